//! The SMC driver.
//!
//! `SmcSampler::sample` runs one particle pool through the annealing schedule:
//!
//! 1. **init**: optionally drop particles whose target energy is not below
//!    `input_energy_cutoff`; log-weights start at the reset value, lineage ids at `0..N`.
//! 2. **step** `j = 0..T`: the kernel runs on contiguous batches of `batch_size` particles whose
//!    outputs are written back in place; then the global acceptance rate, step-size update, ESS,
//!    diagnostics and (if `ESS < ess_threshold` and this is not the last step) a resampling
//!    event follow.
//! 3. **final resample**: always, once. The returned log-weights are the last step's weights,
//!    *not* reset, even though the particles were just resampled.
//!
//! Batching only bounds the work per kernel call. Every global quantity is computed after the
//! batches are concatenated, so with a deterministic kernel the outcome does not depend on
//! `batch_size`.

use crate::diagnostics::{Diagnostics, DiagnosticsSink, StepRecord};
use crate::energy::Energy;
use crate::ess::effective_sample_size;
use crate::kernel::{KernelContext, MoveKernel};
use crate::path::interpolate_energy;
use crate::resample::{resample, ResamplingScheme};
use crate::schedule::TimeSchedule;
use crate::step_size::StepSizeController;
use crate::{Error, Result};
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rand::RngCore;

/// Log-weight every particle carries right after initialization or resampling.
pub const LOG_WEIGHT_RESET: f32 = 1.0;

/// Sampler configuration. Fixed for the lifetime of a sampler.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct SmcConfig {
    /// Particles per kernel invocation.
    pub batch_size: usize,
    /// Initial kernel step size (adapted per run when `adaptive_step_size` is set).
    pub langevin_eps: f32,
    /// Number of annealing steps `T`.
    pub num_timesteps: usize,
    /// Resample when `ESS < ess_threshold` (ESS counted in particles). Negative disables it.
    pub ess_threshold: f32,
    /// Systematic instead of multinomial resampling.
    pub systematic_resampling: bool,
    /// Adapt the step size from the observed acceptance rate.
    pub adaptive_step_size: bool,
    /// Fraction of annealing time over which the step size ramps up from 0.
    pub warmup: f32,
    /// Master switch; a disabled sampler returns `None` without doing any work.
    pub enabled: bool,
    /// Also record per-particle target / interpolated energies every step.
    pub do_energy_plots: bool,
    /// Flush diagnostics every `log_freq` steps.
    pub log_freq: usize,
    /// Keep only input particles with target energy strictly below this value.
    pub input_energy_cutoff: Option<f32>,
}

impl Default for SmcConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            langevin_eps: 1e-7,
            num_timesteps: 100,
            ess_threshold: -1.0,
            systematic_resampling: false,
            adaptive_step_size: false,
            warmup: 0.1,
            enabled: false,
            do_energy_plots: false,
            log_freq: 10,
            input_energy_cutoff: None,
        }
    }
}

impl SmcConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Domain("batch_size must be >= 1"));
        }
        if self.num_timesteps == 0 {
            return Err(Error::Domain("num_timesteps must be >= 1"));
        }
        if self.log_freq == 0 {
            return Err(Error::Domain("log_freq must be >= 1"));
        }
        if !(self.langevin_eps >= 0.0) || !self.langevin_eps.is_finite() {
            return Err(Error::Domain("langevin_eps must be finite and >= 0"));
        }
        if !(self.warmup > 0.0 && self.warmup <= 1.0) {
            return Err(Error::Domain("warmup must be in (0, 1]"));
        }
        if self.ess_threshold.is_nan() {
            return Err(Error::Domain("ess_threshold must not be NaN"));
        }
        if self.input_energy_cutoff.is_some_and(f32::is_nan) {
            return Err(Error::Domain("input_energy_cutoff must not be NaN"));
        }
        Ok(())
    }

    pub fn resampling_scheme(&self) -> ResamplingScheme {
        ResamplingScheme::from_systematic_flag(self.systematic_resampling)
    }
}

/// Result of a sampling run.
#[derive(Debug, Clone)]
pub struct SmcOutput {
    /// Final (resampled) particles, `N × D`.
    pub particles: Array2<f32>,
    /// Log-weights from the last annealing step. Not reset by the final resampling, so entry `i`
    /// belongs to the pre-resampling particle `i`, not to `particles.row(i)`.
    pub log_weights: Array1<f32>,
    /// Initial-pool id of each returned particle.
    pub lineage: Vec<usize>,
    /// Steps `j` at which an ESS-triggered resampling happened.
    pub resampled_at: Vec<usize>,
    /// Fraction of initial lineages still present in `particles`.
    pub survived_fraction: f32,
    /// Everything recorded during the run.
    pub diagnostics: Diagnostics,
}

/// Annealed SMC driver over a pluggable [`MoveKernel`].
pub struct SmcSampler {
    config: SmcConfig,
    kernel: Box<dyn MoveKernel>,
    schedule: Option<TimeSchedule>,
}

impl SmcSampler {
    pub fn new(config: SmcConfig, kernel: Box<dyn MoveKernel>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            kernel,
            schedule: None,
        })
    }

    /// Replace the default `linspace(0, 1, num_timesteps + 1)` schedule.
    pub fn with_schedule(mut self, schedule: TimeSchedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn config(&self) -> &SmcConfig {
        &self.config
    }

    pub fn schedule(&self) -> Result<TimeSchedule> {
        match &self.schedule {
            Some(s) => Ok(s.clone()),
            None => TimeSchedule::linear(self.config.num_timesteps),
        }
    }

    /// Anneal `proposal` from `source` to `target`.
    ///
    /// Returns `Ok(None)` when the sampler is disabled.
    pub fn sample(
        &self,
        proposal: &ArrayView2<f32>,
        source: &dyn Energy,
        target: &dyn Energy,
        rng: &mut dyn RngCore,
    ) -> Result<Option<SmcOutput>> {
        self.run(proposal, source, target, rng, None)
    }

    /// Like [`Self::sample`], also flushing diagnostics figures to `sink`.
    pub fn sample_with_sink(
        &self,
        proposal: &ArrayView2<f32>,
        source: &dyn Energy,
        target: &dyn Energy,
        rng: &mut dyn RngCore,
        sink: &mut dyn DiagnosticsSink,
    ) -> Result<Option<SmcOutput>> {
        self.run(proposal, source, target, rng, Some(sink))
    }

    fn run(
        &self,
        proposal: &ArrayView2<f32>,
        source: &dyn Energy,
        target: &dyn Energy,
        rng: &mut dyn RngCore,
        mut sink: Option<&mut dyn DiagnosticsSink>,
    ) -> Result<Option<SmcOutput>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let cfg = &self.config;
        let schedule = self.schedule()?;
        let num_steps = schedule.num_steps();
        let scheme = cfg.resampling_scheme();

        let mut x = self.init_particles(proposal, target)?;
        let (n, d) = x.dim();
        let mut logw = Array1::<f32>::from_elem(n, LOG_WEIGHT_RESET);
        let mut lineage: Vec<usize> = (0..n).collect();
        let mut controller = StepSizeController::new(cfg.langevin_eps, cfg.warmup);
        let mut diagnostics = Diagnostics::new();
        let mut resampled_at = Vec::new();

        let t0 = schedule.times()[0];
        diagnostics.record(StepRecord {
            t: t0,
            log_weights: logw.clone(),
            ess: effective_sample_size(&logw.view())?,
            step_size: controller.effective(t0),
            acceptance_rate: 1.0,
            survived_fraction: 1.0,
        });
        if cfg.do_energy_plots {
            let (e_target, e_interp) = self.batched_energies(source, target, t0, &x.view())?;
            diagnostics.record_energies(t0, e_target, e_interp);
        }

        for (j, t, dt) in schedule.steps() {
            log::debug!("outer loop iteration {j}");
            let ctx = KernelContext {
                t,
                dt,
                step_size: controller.effective(t),
            };

            let mut acceptance: Vec<f32> = Vec::with_capacity(n);
            for start in (0..n).step_by(cfg.batch_size) {
                let end = (start + cfg.batch_size).min(n);
                let x_batch = x.slice(s![start..end, ..]).to_owned();
                if has_nan(x_batch.iter()) {
                    return Err(Error::NanCoordinates);
                }
                let logw_batch = logw.slice(s![start..end]).to_owned();

                let out = self
                    .kernel
                    .step(source, target, &ctx, x_batch, logw_batch, &mut *rng)?;

                let len = end - start;
                if out.x.dim() != (len, d) {
                    return Err(Error::Shape("kernel must return x with the batch's shape"));
                }
                if out.logw.len() != len {
                    return Err(Error::Shape("kernel must return one log-weight per particle"));
                }
                if out.acceptance.len() != 1 && out.acceptance.len() != len {
                    return Err(Error::Shape(
                        "kernel acceptance must be a single value or one per particle",
                    ));
                }
                x.slice_mut(s![start..end, ..]).assign(&out.x);
                logw.slice_mut(s![start..end]).assign(&out.logw);
                // A batch-level value stands for every particle in the batch.
                if out.acceptance.len() == 1 {
                    acceptance.extend(std::iter::repeat(out.acceptance[0]).take(len));
                } else {
                    acceptance.extend(out.acceptance.iter().copied());
                }
            }

            let acceptance_rate = acceptance.iter().sum::<f32>() / acceptance.len() as f32;
            if cfg.adaptive_step_size {
                controller.update(acceptance_rate);
            }

            let nan_x = has_nan(x.iter());
            let nan_w = has_nan(logw.iter());
            let ess = if nan_w {
                f32::NAN
            } else {
                effective_sample_size(&logw.view())?
            };
            diagnostics.record(StepRecord {
                t,
                log_weights: logw.clone(),
                ess,
                step_size: controller.effective(t),
                acceptance_rate,
                survived_fraction: survived_fraction(&lineage),
            });
            if cfg.do_energy_plots && !nan_x {
                let (e_target, e_interp) = self.batched_energies(source, target, t, &x.view())?;
                diagnostics.record_energies(t, e_target, e_interp);
            }

            let last = j + 1 == num_steps;
            if nan_x || nan_w || (j + 1) % cfg.log_freq == 0 || last {
                if let Some(sink) = sink.as_deref_mut() {
                    diagnostics.flush(sink);
                }
            }
            if nan_x {
                log::warn!("NaN in particle coordinates at step {j} (t={t})");
                return Err(Error::NanCoordinates);
            }
            if nan_w {
                log::warn!("NaN in log-weights at step {j} (t={t})");
                return Err(Error::NanLogWeights);
            }

            if ess < cfg.ess_threshold && !last {
                let (resampled, indexes) = resample(&x.view(), &logw.view(), scheme, &mut *rng)?;
                x = resampled;
                logw.fill(LOG_WEIGHT_RESET);
                lineage = indexes.iter().map(|&i| lineage[i]).collect();
                resampled_at.push(j);
                log::info!("resampling @ step {j}");

                let t_after = just_after(t);
                diagnostics.record(StepRecord {
                    t: t_after,
                    log_weights: logw.clone(),
                    ess: effective_sample_size(&logw.view())?,
                    step_size: controller.effective(t),
                    acceptance_rate,
                    survived_fraction: survived_fraction(&lineage),
                });
                if cfg.do_energy_plots {
                    let (e_target, e_interp) =
                        self.batched_energies(source, target, t_after, &x.view())?;
                    diagnostics.record_energies(t_after, e_target, e_interp);
                }
            }
        }

        let (particles, indexes) = resample(&x.view(), &logw.view(), scheme, &mut *rng)?;
        let lineage: Vec<usize> = indexes.iter().map(|&i| lineage[i]).collect();
        let survived = survived_fraction(&lineage);
        log::info!("final resampling after step {}", num_steps - 1);
        log::info!("fraction of initial lineages surviving: {survived}");

        Ok(Some(SmcOutput {
            particles,
            log_weights: logw,
            lineage,
            resampled_at,
            survived_fraction: survived,
            diagnostics,
        }))
    }

    /// Validate the proposal pool and apply the input energy cutoff.
    fn init_particles(&self, proposal: &ArrayView2<f32>, target: &dyn Energy) -> Result<Array2<f32>> {
        if proposal.nrows() == 0 {
            return Err(Error::EmptyPool("proposal has no particles"));
        }
        if proposal.ncols() == 0 {
            return Err(Error::Domain("particles must have at least one coordinate"));
        }

        let x = match self.config.input_energy_cutoff {
            None => proposal.to_owned(),
            Some(cutoff) => {
                let mut keep = Vec::with_capacity(proposal.nrows());
                for (b, chunk) in proposal
                    .axis_chunks_iter(Axis(0), self.config.batch_size)
                    .enumerate()
                {
                    let e = target.energy(&chunk)?;
                    if e.len() != chunk.nrows() {
                        return Err(Error::Shape(
                            "target energy must be a flat vector of length x.nrows()",
                        ));
                    }
                    let offset = b * self.config.batch_size;
                    keep.extend(
                        e.iter()
                            .enumerate()
                            .filter(|(_, &v)| v < cutoff)
                            .map(|(i, _)| offset + i),
                    );
                }
                log::info!(
                    "clipping energies: kept {} of {} particles below {cutoff}",
                    keep.len(),
                    proposal.nrows()
                );
                if keep.is_empty() {
                    return Err(Error::EmptyPool("no particle is below input_energy_cutoff"));
                }
                proposal.select(Axis(0), &keep)
            }
        };

        if has_nan(x.iter()) {
            return Err(Error::NanCoordinates);
        }
        Ok(x)
    }

    /// Target and interpolated energies of every particle, evaluated batch by batch.
    fn batched_energies(
        &self,
        source: &dyn Energy,
        target: &dyn Energy,
        t: f32,
        x: &ArrayView2<f32>,
    ) -> Result<(Array1<f32>, Array1<f32>)> {
        let mut e_target = Vec::with_capacity(x.nrows());
        let mut e_interp = Vec::with_capacity(x.nrows());
        for chunk in x.axis_chunks_iter(Axis(0), self.config.batch_size) {
            let et = target.energy(&chunk)?;
            if et.len() != chunk.nrows() {
                return Err(Error::Shape(
                    "target energy must be a flat vector of length x.nrows()",
                ));
            }
            e_target.extend(et.iter().copied());
            e_interp.extend(interpolate_energy(source, target, t, &chunk)?.iter().copied());
        }
        Ok((Array1::from_vec(e_target), Array1::from_vec(e_interp)))
    }
}

fn has_nan<'a>(mut values: impl Iterator<Item = &'a f32>) -> bool {
    values.any(|v| v.is_nan())
}

/// Fraction of distinct ids in `lineage` (ids are drawn from `0..lineage.len()`).
fn survived_fraction(lineage: &[usize]) -> f32 {
    let n = lineage.len();
    let mut seen = vec![false; n];
    let mut unique = 0usize;
    for &id in lineage {
        if id < n && !seen[id] {
            seen[id] = true;
            unique += 1;
        }
    }
    unique as f32 / n as f32
}

/// The smallest `f32` strictly greater than `t` (for `t >= 0`).
///
/// Marks the diagnostic point "immediately after resampling at `t`" while keeping the time
/// series strictly increasing.
fn just_after(t: f32) -> f32 {
    if t == 0.0 {
        f32::from_bits(1)
    } else {
        f32::from_bits(t.to_bits() + 1)
    }
}
