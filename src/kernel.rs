//! Local-move kernels.
//!
//! A kernel advances one batch of particles at annealing time `t`: it may move coordinates and
//! it updates log-importance-weights. The sampler only ever talks to [`MoveKernel`]; concrete
//! kernels are swapped at construction time.
//!
//! Contract (checked by the sampler where it can be):
//! - rows are independent: a particle's update only reads that particle;
//! - the returned `x` has the input's shape;
//! - the returned `logw` is a flat vector with one entry per row;
//! - `acceptance` holds either one value for the whole batch or one per particle. The sampler
//!   expands a batch-level value to one entry per particle before averaging across batches, so
//!   the global mean is weighted by batch length.

use crate::energy::Energy;
use crate::path::{interpolate_energy, interpolate_energy_grad};
use crate::{Error, Result};
use ndarray::{Array1, Array2, Zip};
use rand::{Rng, RngCore};
use rand_distr::{Distribution, StandardNormal};

/// Where on the annealing path a kernel step happens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelContext {
    /// Current annealing time.
    pub t: f32,
    /// Distance from the previously visited time (`0` on the first step).
    pub dt: f32,
    /// Step size after warmup / adaptation.
    pub step_size: f32,
}

/// Output of one kernel invocation on a batch.
#[derive(Debug, Clone)]
pub struct KernelStep {
    pub x: Array2<f32>,
    pub logw: Array1<f32>,
    pub acceptance: Array1<f32>,
}

/// A pluggable local-move strategy.
pub trait MoveKernel {
    fn step(
        &self,
        source: &dyn Energy,
        target: &dyn Energy,
        ctx: &KernelContext,
        x: Array2<f32>,
        logw: Array1<f32>,
        rng: &mut dyn RngCore,
    ) -> Result<KernelStep>;
}

/// Leaves particles and weights untouched; every particle counts as accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityKernel;

impl MoveKernel for IdentityKernel {
    fn step(
        &self,
        _source: &dyn Energy,
        _target: &dyn Energy,
        _ctx: &KernelContext,
        x: Array2<f32>,
        logw: Array1<f32>,
        _rng: &mut dyn RngCore,
    ) -> Result<KernelStep> {
        let acceptance = Array1::ones(x.nrows());
        Ok(KernelStep { x, logw, acceptance })
    }
}

/// Annealed importance weighting followed by gradient-guided Langevin moves.
///
/// For a step from `t - dt` to `t` each particle first picks up the incremental weight
///
/// \[
/// \log w \mathrel{+}= -\big(E_t(x) - E_{t-dt}(x)\big) = -dt\,\big(E_\text{target}(x) - E_\text{source}(x)\big),
/// \]
///
/// and is then moved `n_steps` times with the Langevin proposal
///
/// \[
/// x' = x - \varepsilon \nabla E_t(x) + \sqrt{2\varepsilon}\,\xi, \qquad \xi \sim \mathcal N(0, I).
/// \]
///
/// With `metropolize` the proposal is accepted with the MALA probability (so the move leaves
/// \(\exp(-E_t)\) invariant); without it every proposal is accepted (ULA). Acceptance is reported
/// per particle as the accepted fraction of its `n_steps` proposals.
#[derive(Debug, Clone, Copy)]
pub struct LangevinKernel {
    pub n_steps: usize,
    pub metropolize: bool,
}

impl Default for LangevinKernel {
    fn default() -> Self {
        Self {
            n_steps: 1,
            metropolize: true,
        }
    }
}

impl LangevinKernel {
    fn reweight(
        &self,
        source: &dyn Energy,
        target: &dyn Energy,
        ctx: &KernelContext,
        x: &Array2<f32>,
        logw: &mut Array1<f32>,
    ) -> Result<()> {
        if ctx.dt == 0.0 {
            return Ok(());
        }
        let e_now = interpolate_energy(source, target, ctx.t, &x.view())?;
        let e_prev = interpolate_energy(source, target, ctx.t - ctx.dt, &x.view())?;
        Zip::from(logw)
            .and(&e_now)
            .and(&e_prev)
            .for_each(|l, &now, &prev| *l -= now - prev);
        Ok(())
    }
}

impl MoveKernel for LangevinKernel {
    fn step(
        &self,
        source: &dyn Energy,
        target: &dyn Energy,
        ctx: &KernelContext,
        x: Array2<f32>,
        logw: Array1<f32>,
        rng: &mut dyn RngCore,
    ) -> Result<KernelStep> {
        let (n, d) = x.dim();
        if logw.len() != n {
            return Err(Error::Shape("logw length must match x.nrows()"));
        }
        let mut x = x;
        let mut logw = logw;
        self.reweight(source, target, ctx, &x, &mut logw)?;

        let eps = ctx.step_size;
        if !(eps > 0.0) || self.n_steps == 0 {
            // A zero step (e.g. at the start of warmup) proposes x itself.
            return Ok(KernelStep {
                x,
                logw,
                acceptance: Array1::ones(n),
            });
        }
        let noise_scale = (2.0 * eps).sqrt();
        let t = ctx.t;

        let mut accepted = Array1::<f32>::zeros(n);
        let mut e_x = interpolate_energy(source, target, t, &x.view())?;
        let mut g_x = interpolate_energy_grad(source, target, t, &x.view())?;

        for _ in 0..self.n_steps {
            let noise: Array2<f32> =
                Array2::from_shape_fn((n, d), |_| StandardNormal.sample(&mut *rng));
            let y = &x - &(&g_x * eps) + &(noise * noise_scale);

            let e_y = interpolate_energy(source, target, t, &y.view())?;
            let g_y = interpolate_energy_grad(source, target, t, &y.view())?;

            if !self.metropolize {
                x = y;
                e_x = e_y;
                g_x = g_y;
                accepted += 1.0;
                continue;
            }

            for i in 0..n {
                let mut fwd = 0.0f32;
                let mut bwd = 0.0f32;
                for k in 0..d {
                    let a = y[[i, k]] - x[[i, k]] + eps * g_x[[i, k]];
                    let b = x[[i, k]] - y[[i, k]] + eps * g_y[[i, k]];
                    fwd += a * a;
                    bwd += b * b;
                }
                let log_alpha = -(e_y[i] - e_x[i]) + (fwd - bwd) / (4.0 * eps);
                let u: f32 = rng.random();
                if u.ln() < log_alpha {
                    x.row_mut(i).assign(&y.row(i));
                    g_x.row_mut(i).assign(&g_y.row(i));
                    e_x[i] = e_y[i];
                    accepted[i] += 1.0;
                }
            }
        }

        let acceptance = accepted / self.n_steps as f32;
        Ok(KernelStep { x, logw, acceptance })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::GaussianEnergy;
    use ndarray::{array, Axis};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn identity_kernel_is_a_no_op() {
        let e = GaussianEnergy::standard(2).unwrap();
        let x = array![[1.0f32, 2.0], [3.0, 4.0]];
        let logw = array![0.5f32, -0.5];
        let ctx = KernelContext {
            t: 0.5,
            dt: 0.1,
            step_size: 1.0,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let out = IdentityKernel
            .step(&e, &e, &ctx, x.clone(), logw.clone(), &mut rng)
            .unwrap();
        assert_eq!(out.x, x);
        assert_eq!(out.logw, logw);
        assert_eq!(out.acceptance, array![1.0f32, 1.0]);
    }

    #[test]
    fn langevin_reweights_by_the_energy_difference() {
        let source = GaussianEnergy::standard(1).unwrap();
        let target = GaussianEnergy::new(array![1.0f32], 1.0).unwrap();
        let x = array![[0.0f32], [1.0], [2.0]];
        let ctx = KernelContext {
            t: 0.5,
            dt: 0.25,
            step_size: 0.0,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let out = LangevinKernel::default()
            .step(&source, &target, &ctx, x.clone(), Array1::zeros(3), &mut rng)
            .unwrap();

        // -dt * (E_target - E_source) with E = 0.5 (x - mu)^2
        let es = source.energy(&x.view()).unwrap();
        let et = target.energy(&x.view()).unwrap();
        for i in 0..3 {
            let want = -0.25 * (et[i] - es[i]);
            assert!((out.logw[i] - want).abs() < 1e-6);
        }
        // Zero step size: no movement, everything accepted.
        assert_eq!(out.x, x);
        assert_eq!(out.acceptance, Array1::<f32>::ones(3));
    }

    #[test]
    fn first_step_with_zero_dt_keeps_weights() {
        let e = GaussianEnergy::standard(1).unwrap();
        let ctx = KernelContext {
            t: 0.0,
            dt: 0.0,
            step_size: 0.0,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let logw = array![1.0f32, 1.0];
        let out = LangevinKernel::default()
            .step(&e, &e, &ctx, array![[3.0f32], [-3.0]], logw.clone(), &mut rng)
            .unwrap();
        assert_eq!(out.logw, logw);
    }

    #[test]
    fn mala_preserves_a_gaussian_and_accepts_most_small_steps() {
        let e = GaussianEnergy::standard(2).unwrap();
        let n = 2_000usize;
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let x = Array2::from_shape_fn((n, 2), |_| {
            let z: f32 = StandardNormal.sample(&mut rng);
            z
        });
        let kernel = LangevinKernel {
            n_steps: 10,
            metropolize: true,
        };
        let ctx = KernelContext {
            t: 0.5,
            dt: 0.0,
            step_size: 0.05,
        };
        let out = kernel
            .step(&e, &e, &ctx, x, Array1::zeros(n), &mut rng)
            .unwrap();

        let mean = out.x.mean_axis(Axis(0)).unwrap();
        let var = out.x.var_axis(Axis(0), 0.0);
        for k in 0..2 {
            assert!(mean[k].abs() < 0.1, "mean drifted: {mean:?}");
            assert!((var[k] - 1.0).abs() < 0.15, "variance drifted: {var:?}");
        }
        let acc = out.acceptance.mean().unwrap();
        assert!(acc > 0.9, "acceptance too low: {acc}");
        assert!(out.acceptance.iter().all(|&a| (0.0..=1.0).contains(&a)));
    }

    #[test]
    fn ula_moves_particles_toward_low_energy() {
        let source = GaussianEnergy::standard(1).unwrap();
        let target = GaussianEnergy::new(array![4.0f32], 0.5).unwrap();
        let n = 500usize;
        let x = Array2::<f32>::zeros((n, 1));
        let kernel = LangevinKernel {
            n_steps: 200,
            metropolize: false,
        };
        let ctx = KernelContext {
            t: 1.0,
            dt: 0.0,
            step_size: 0.01,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let out = kernel
            .step(&source, &target, &ctx, x, Array1::zeros(n), &mut rng)
            .unwrap();
        let mean = out.x.mean().unwrap();
        assert!((mean - 4.0).abs() < 0.3, "mean={mean}");
        assert_eq!(out.acceptance, Array1::<f32>::ones(n));
    }

    #[test]
    fn mismatched_logw_is_rejected() {
        let e = GaussianEnergy::standard(1).unwrap();
        let ctx = KernelContext {
            t: 0.5,
            dt: 0.5,
            step_size: 0.1,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let err = LangevinKernel::default()
            .step(&e, &e, &ctx, Array2::zeros((3, 1)), Array1::zeros(2), &mut rng)
            .unwrap_err();
        assert!(matches!(err, Error::Shape(_)));
    }
}
