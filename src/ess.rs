//! Effective sample size (ESS) of a weighted particle population.
//!
//! For normalized weights \(w_i = \exp(\ell_i) / \sum_j \exp(\ell_j)\):
//!
//! \[
//! \mathrm{ESS} = \frac{1}{\sum_i w_i^2} \in [1, N].
//! \]
//!
//! `ESS = N` exactly when all log-weights are equal; it shrinks as the weights spread out.
//! Computation is done in `f64` with max-subtraction so large log-weights do not overflow.

use crate::{Error, Result};
use ndarray::ArrayView1;

/// Effective number of particles represented by unnormalized log-weights `logw`.
pub fn effective_sample_size(logw: &ArrayView1<f32>) -> Result<f32> {
    if logw.is_empty() {
        return Err(Error::Domain("log-weights must be non-empty"));
    }
    if logw.iter().any(|x| x.is_nan()) {
        return Err(Error::NanLogWeights);
    }
    if logw.iter().any(|&x| x == f32::INFINITY) {
        return Err(Error::Domain("log-weights must not be +inf"));
    }
    let max = logw.iter().fold(f32::NEG_INFINITY, |m, &x| m.max(x));
    if max == f32::NEG_INFINITY {
        return Err(Error::Domain("all log-weights are -inf"));
    }

    let mut s1 = 0.0f64;
    let mut s2 = 0.0f64;
    for &l in logw.iter() {
        let w = ((l - max) as f64).exp();
        s1 += w;
        s2 += w * w;
    }
    Ok((s1 * s1 / s2) as f32)
}

/// ESS as a fraction of the population size, in `(0, 1]`.
pub fn sampling_efficiency(logw: &ArrayView1<f32>) -> Result<f32> {
    let ess = effective_sample_size(logw)?;
    Ok(ess / logw.len() as f32)
}
