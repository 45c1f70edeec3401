//! Step-size control for the local-move kernel.
//!
//! Two independent pieces:
//! - a dual-threshold controller that nudges the step size toward an acceptance band
//!   (`> 0.6` grows by 10%, `< 0.55` shrinks by the same factor, in between is left alone);
//! - a warmup ramp: over the first `warmup` fraction of annealing time the kernel sees a step
//!   size growing linearly from 0, so the first moves stay small while particles are far from
//!   equilibrium.
//!
//! The controller is created per sampling run, so adaptation never leaks between runs.

/// Acceptance rate above which the step size grows.
pub const ACCEPT_HIGH: f32 = 0.6;
/// Acceptance rate below which the step size shrinks.
pub const ACCEPT_LOW: f32 = 0.55;
/// Multiplicative adjustment factor.
pub const STEP_FACTOR: f32 = 1.1;

/// Per-run step-size state.
#[derive(Debug, Clone)]
pub struct StepSizeController {
    eps: f32,
    warmup: f32,
}

impl StepSizeController {
    /// `eps` is the initial step size; `warmup` is the ramp length as a fraction of `[0,1]`.
    pub fn new(eps: f32, warmup: f32) -> Self {
        Self { eps, warmup }
    }

    /// Current controlled step size (before the warmup ramp).
    pub fn step_size(&self) -> f32 {
        self.eps
    }

    /// Adjust the step size from an observed mean acceptance rate.
    pub fn update(&mut self, acceptance_rate: f32) {
        if acceptance_rate > ACCEPT_HIGH {
            self.eps *= STEP_FACTOR;
        } else if acceptance_rate < ACCEPT_LOW {
            self.eps /= STEP_FACTOR;
        }
    }

    /// Step size handed to the kernel at annealing time `t`.
    pub fn effective(&self, t: f32) -> f32 {
        if t < self.warmup {
            self.eps * t / self.warmup
        } else {
            self.eps
        }
    }
}
