//! Linear energy interpolation path.
//!
//! The annealing path is the straight line between the two energies:
//!
//! \[
//! E_t(x) = (1-t)\,E_\text{source}(x) + t\,E_\text{target}(x), \qquad t \in [0,1].
//! \]
//!
//! Shapes are checked, never broadcast: an energy that returns the wrong length is a contract
//! error, not something to paper over.

use crate::energy::Energy;
use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayView2};

fn check_energy_len(e: &Array1<f32>, n: usize, msg: &'static str) -> Result<()> {
    if e.len() != n {
        return Err(Error::Shape(msg));
    }
    Ok(())
}

/// Interpolated energy `(1-t) E_source(x) + t E_target(x)` for each row of `x`.
pub fn interpolate_energy(
    source: &dyn Energy,
    target: &dyn Energy,
    t: f32,
    x: &ArrayView2<f32>,
) -> Result<Array1<f32>> {
    let n = x.nrows();
    let e_source = source.energy(x)?;
    let e_target = target.energy(x)?;
    check_energy_len(&e_source, n, "source energy must be a flat vector of length x.nrows()")?;
    check_energy_len(&e_target, n, "target energy must be a flat vector of length x.nrows()")?;

    // The endpoints are returned as-is: `0 * inf` would turn an infinite energy on the unused
    // side into NaN.
    if t == 0.0 {
        return Ok(e_source);
    }
    if t == 1.0 {
        return Ok(e_target);
    }
    let mut out = e_source;
    out.zip_mut_with(&e_target, |s, &g| *s = (1.0 - t) * *s + t * g);
    Ok(out)
}

/// Gradient of `sum_i E_t(x)_i` with respect to `x`.
///
/// The result is an owned array shaped exactly like `x`; it references nothing the caller
/// passed in, so it can be stored across steps freely.
pub fn interpolate_energy_grad(
    source: &dyn Energy,
    target: &dyn Energy,
    t: f32,
    x: &ArrayView2<f32>,
) -> Result<Array2<f32>> {
    let g_source = source.grad(x)?;
    let g_target = target.grad(x)?;
    if g_source.dim() != x.dim() {
        return Err(Error::Shape("source gradient must have the same shape as x"));
    }
    if g_target.dim() != x.dim() {
        return Err(Error::Shape("target gradient must have the same shape as x"));
    }

    if t == 0.0 {
        return Ok(g_source);
    }
    if t == 1.0 {
        return Ok(g_target);
    }
    let mut out = g_source;
    out.zip_mut_with(&g_target, |s, &g| *s = (1.0 - t) * *s + t * g);
    Ok(out)
}
