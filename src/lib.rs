//! # smcanneal
//!
//! Annealed Sequential Monte Carlo (SMC) as a library primitive.
//!
//! A batch of particles drawn from an approximate *source* distribution is annealed toward a
//! *target* distribution that is only known through an unnormalized energy. The intermediate
//! distributions follow a linear energy path
//!
//! \[
//! E_t(x) = (1-t)\,E_\text{source}(x) + t\,E_\text{target}(x),
//! \]
//!
//! particles are moved by a pluggable local kernel, carry log-importance-weights, and are
//! resampled whenever the effective sample size (ESS) drops below a threshold.
//!
//! ## Public invariants (must not change)
//!
//! - **Randomness is explicit**: every function that draws takes a caller-supplied generator; the crate never
//!   seeds or owns a generator.
//! - **Batching is a resource knob, not a semantic one**: the driver evaluates the kernel on
//!   contiguous batches and concatenates results in order before any global statistic
//!   (ESS, acceptance, resampling) is computed.
//! - **NaN is fatal**: NaN coordinates or log-weights abort the run with a distinct error.
//! - **Backend-agnostic by default**: the public API is `ndarray`. An autodiff gradient path on
//!   `burn` tensors is feature-gated.
//!
//! ## Module map
//!
//! - `energy`: the `Energy` capability (per-particle energy + coordinate gradient)
//! - `path`: linear energy interpolation and its gradient
//! - `kernel`: the local-move kernel contract and two kernels (`IdentityKernel`, `LangevinKernel`)
//! - `resample`: systematic / multinomial index selection
//! - `ess`: effective sample size from log-weights
//! - `step_size`: acceptance-driven step-size control with a warmup ramp
//! - `schedule`: annealing time schedules
//! - `diagnostics`: per-step numeric series and the figure sink contract
//! - `sampler`: the SMC driver (`SmcSampler`)
//! - `burn_path` (feature `burn`): the interpolation gradient computed with `burn` autodiff

pub mod diagnostics;
pub mod energy;
pub mod ess;
pub mod kernel;
pub mod path;
pub mod resample;
pub mod sampler;
pub mod schedule;
pub mod step_size;

#[cfg(feature = "burn")]
pub mod burn_path;

pub use energy::{Energy, FnEnergy, GaussianEnergy};
pub use kernel::{IdentityKernel, KernelContext, KernelStep, LangevinKernel, MoveKernel};
pub use resample::ResamplingScheme;
pub use sampler::{SmcConfig, SmcOutput, SmcSampler};

/// smcanneal error variants.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("shape mismatch: {0}")]
    Shape(&'static str),
    #[error("domain error: {0}")]
    Domain(&'static str),
    #[error("particle coordinates contain NaN")]
    NanCoordinates,
    #[error("log-weights contain NaN")]
    NanLogWeights,
    #[error("empty particle pool: {0}")]
    EmptyPool(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
