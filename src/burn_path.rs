//! Burn-backed (opt-in) energy path with autodiff gradients.
//!
//! This module is **additive**: the sampler itself stays `ndarray`-only. What it adds is a way
//! to write energies as `burn` tensor programs and let autodiff produce their gradients:
//!
//! - [`interpolate_energy`] / [`interpolate_energy_grad`] evaluate the linear path on tensors;
//! - [`BurnEnergy`] adapts a tensor energy into an [`Energy`] so it can drive `SmcSampler`.
//!
//! Gradients are returned on `B::InnerBackend`, the non-autodiff backend. A tensor of that type
//! has no graph attached, so it can be stored freely and cannot be back-propagated through.

use burn_core as burn;

use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Tensor, TensorData};
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use ndarray::{Array1, Array2, ArrayView2};

use crate::energy::Energy;
use crate::{Error, Result};

/// Default burn backend: ndarray + autodiff.
pub type BurnBackend = Autodiff<NdArray<f32>>;

/// Interpolated energy `(1-t) E_source(x) + t E_target(x)` on tensors.
///
/// Shapes:
/// - `t`: `[batch]` (time broadcast to the batch)
/// - `x`: `[batch, d]`
/// Returns: `[batch]`.
pub fn interpolate_energy<B, FS, FT>(
    source: &FS,
    target: &FT,
    t: Tensor<B, 1>,
    x: Tensor<B, 2>,
) -> Result<Tensor<B, 1>>
where
    B: Backend,
    FS: Fn(Tensor<B, 2>) -> Tensor<B, 1>,
    FT: Fn(Tensor<B, 2>) -> Tensor<B, 1>,
{
    let n = x.dims()[0];
    if t.dims() != [n] {
        return Err(Error::Shape("t must have shape [batch]"));
    }
    let e_source = source(x.clone());
    let e_target = target(x);
    if e_source.dims() != [n] {
        return Err(Error::Shape("source energy must be a flat vector of length batch"));
    }
    if e_target.dims() != [n] {
        return Err(Error::Shape("target energy must be a flat vector of length batch"));
    }
    let one_minus_t = t.clone().neg().add_scalar(1.0);
    Ok(one_minus_t * e_source + t * e_target)
}

/// Gradient of `sum_i E_t(x)_i` with respect to `x`, computed by autodiff.
///
/// `x` is lifted into a fresh leaf that requires gradients, whether or not the caller's tensor
/// tracks any; the broadcast time column is a leaf as well. The caller's graph is untouched.
/// The gradient comes back on the inner backend, i.e. detached.
pub fn interpolate_energy_grad<B, FS, FT>(
    source: &FS,
    target: &FT,
    t: f32,
    x: Tensor<B, 2>,
) -> Result<Tensor<B::InnerBackend, 2>>
where
    B: AutodiffBackend,
    FS: Fn(Tensor<B, 2>) -> Tensor<B, 1>,
    FT: Fn(Tensor<B, 2>) -> Tensor<B, 1>,
{
    let dims = x.dims();
    let device = x.device();

    let x = Tensor::<B, 2>::from_inner(x.inner()).require_grad();
    let t = Tensor::<B, 1>::full([dims[0]], t, &device).require_grad();

    let energy = interpolate_energy(source, target, t, x.clone())?;
    let grads = energy.sum().backward();
    let x_grad = x
        .grad(&grads)
        .ok_or(Error::Domain("interpolated energy does not depend on x"))?;

    if x_grad.dims() != dims {
        return Err(Error::Shape("x gradient must have the same shape as x"));
    }
    Ok(x_grad)
}

fn array_to_tensor<B: Backend>(x: &ArrayView2<f32>, device: &B::Device) -> Tensor<B, 2> {
    let (n, d) = x.dim();
    let data = TensorData::new(x.iter().copied().collect::<Vec<f32>>(), [n, d]);
    Tensor::from_data(data, device)
}

fn tensor_to_vec<B: Backend, const D: usize>(t: Tensor<B, D>) -> Result<Vec<f32>> {
    t.into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|_| Error::Domain("failed to read tensor data as f32"))
}

/// An [`Energy`] defined by a `burn` tensor program; gradients come from autodiff.
pub struct BurnEnergy<B: AutodiffBackend, F> {
    f: F,
    device: B::Device,
}

impl<B, F> BurnEnergy<B, F>
where
    B: AutodiffBackend,
    F: Fn(Tensor<B, 2>) -> Tensor<B, 1>,
{
    pub fn new(f: F, device: B::Device) -> Self {
        Self { f, device }
    }
}

impl<B, F> Energy for BurnEnergy<B, F>
where
    B: AutodiffBackend,
    F: Fn(Tensor<B, 2>) -> Tensor<B, 1>,
{
    fn energy(&self, x: &ArrayView2<f32>) -> Result<Array1<f32>> {
        let n = x.nrows();
        let e = (self.f)(array_to_tensor::<B>(x, &self.device));
        if e.dims() != [n] {
            return Err(Error::Shape("energy must be a flat vector of length x.nrows()"));
        }
        Ok(Array1::from_vec(tensor_to_vec(e)?))
    }

    fn grad(&self, x: &ArrayView2<f32>) -> Result<Array2<f32>> {
        let xt = array_to_tensor::<B>(x, &self.device).require_grad();
        let grads = (self.f)(xt.clone()).sum().backward();
        let g = xt
            .grad(&grads)
            .ok_or(Error::Domain("energy does not depend on x"))?;
        Array2::from_shape_vec(x.dim(), tensor_to_vec(g)?)
            .map_err(|_| Error::Shape("gradient must have the same shape as x"))
    }
}
