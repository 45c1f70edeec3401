//! Per-particle energies.
//!
//! An energy maps a batch `x` of shape `n × d` to a flat vector of `n` unnormalized energies
//! (`-log p(x)` up to a constant), together with the gradient of the *summed* energy with
//! respect to `x`. Because rows never interact, that gradient's row `i` is the gradient of
//! particle `i`'s own energy.
//!
//! Contract for implementors: rows must not be mixed. The sampler evaluates energies on
//! arbitrary contiguous batches and relies on the result being independent of batching.

use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// A differentiable scalar-per-particle energy.
pub trait Energy {
    /// Energies for each row of `x` (length `x.nrows()`).
    fn energy(&self, x: &ArrayView2<f32>) -> Result<Array1<f32>>;

    /// Gradient of `sum_i energy(x)_i` with respect to `x` (same shape as `x`).
    fn grad(&self, x: &ArrayView2<f32>) -> Result<Array2<f32>>;
}

impl<T: Energy + ?Sized> Energy for &T {
    fn energy(&self, x: &ArrayView2<f32>) -> Result<Array1<f32>> {
        (**self).energy(x)
    }

    fn grad(&self, x: &ArrayView2<f32>) -> Result<Array2<f32>> {
        (**self).grad(x)
    }
}

/// An energy built from two closures: one for the values, one for the gradient.
///
/// This is the lightest way to plug an analytic energy into the sampler:
///
/// ```
/// use ndarray::{ArrayView2, Axis};
/// use smcanneal::FnEnergy;
///
/// // E(x) = |x|^2, grad = 2x
/// let e = FnEnergy::new(
///     |x: &ArrayView2<f32>| x.map(|v| v * v).sum_axis(Axis(1)),
///     |x: &ArrayView2<f32>| x.map(|v| 2.0 * v),
/// );
/// # let _ = e;
/// ```
pub struct FnEnergy<E, G> {
    energy_fn: E,
    grad_fn: G,
}

impl<E, G> FnEnergy<E, G>
where
    E: Fn(&ArrayView2<f32>) -> Array1<f32>,
    G: Fn(&ArrayView2<f32>) -> Array2<f32>,
{
    pub fn new(energy_fn: E, grad_fn: G) -> Self {
        Self { energy_fn, grad_fn }
    }
}

impl<E, G> Energy for FnEnergy<E, G>
where
    E: Fn(&ArrayView2<f32>) -> Array1<f32>,
    G: Fn(&ArrayView2<f32>) -> Array2<f32>,
{
    fn energy(&self, x: &ArrayView2<f32>) -> Result<Array1<f32>> {
        Ok((self.energy_fn)(x))
    }

    fn grad(&self, x: &ArrayView2<f32>) -> Result<Array2<f32>> {
        Ok((self.grad_fn)(x))
    }
}

/// Isotropic Gaussian energy:
///
/// \[
/// E(x) = \tfrac12 \|x - \mu\|_2^2 / \sigma^2.
/// \]
#[derive(Debug, Clone)]
pub struct GaussianEnergy {
    /// Mean `mu` (length `d`).
    pub mean: Array1<f32>,
    /// Standard deviation `sigma` (> 0).
    pub sigma: f32,
}

impl GaussianEnergy {
    pub fn new(mean: Array1<f32>, sigma: f32) -> Result<Self> {
        if mean.is_empty() {
            return Err(Error::Domain("mean must be non-empty"));
        }
        if !(sigma > 0.0) || !sigma.is_finite() {
            return Err(Error::Domain("sigma must be positive and finite"));
        }
        Ok(Self { mean, sigma })
    }

    /// Standard normal in `d` dimensions.
    pub fn standard(d: usize) -> Result<Self> {
        Self::new(Array1::zeros(d), 1.0)
    }

    fn centered(&self, x: &ArrayView2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.mean.len() {
            return Err(Error::Shape("x.ncols() must match the Gaussian dimension"));
        }
        let mu: ArrayView1<f32> = self.mean.view();
        Ok(x - &mu.insert_axis(Axis(0)))
    }
}

impl Energy for GaussianEnergy {
    fn energy(&self, x: &ArrayView2<f32>) -> Result<Array1<f32>> {
        let z = self.centered(x)?;
        let inv_var = 1.0 / (self.sigma * self.sigma);
        Ok(z.map(|v| v * v).sum_axis(Axis(1)) * (0.5 * inv_var))
    }

    fn grad(&self, x: &ArrayView2<f32>) -> Result<Array2<f32>> {
        let z = self.centered(x)?;
        let inv_var = 1.0 / (self.sigma * self.sigma);
        Ok(z * inv_var)
    }
}
