//! Annealing time schedules.
//!
//! A schedule is `T+1` strictly increasing times in `[0,1]`, from exactly `0` to exactly `1`.
//! The sampler runs its kernel at the first `T` of them; `dt` for a step is the distance to the
//! previously visited time (the first step has `dt = 0`).

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct TimeSchedule {
    times: Vec<f32>,
}

impl TimeSchedule {
    /// `linspace(0, 1, steps + 1)`.
    pub fn linear(steps: usize) -> Result<Self> {
        if steps == 0 {
            return Err(Error::Domain("num_timesteps must be >= 1"));
        }
        let times = (0..=steps)
            .map(|k| {
                if k == steps {
                    1.0
                } else {
                    k as f32 / steps as f32
                }
            })
            .collect();
        Ok(Self { times })
    }

    /// A caller-provided schedule.
    pub fn from_times(times: Vec<f32>) -> Result<Self> {
        if times.len() < 2 {
            return Err(Error::Domain("schedule needs at least two times"));
        }
        if times.iter().any(|t| !t.is_finite()) {
            return Err(Error::Domain("schedule times must be finite"));
        }
        if times[0] != 0.0 || times[times.len() - 1] != 1.0 {
            return Err(Error::Domain("schedule must start at 0 and end at 1"));
        }
        if times.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(Error::Domain("schedule times must be strictly increasing"));
        }
        Ok(Self { times })
    }

    /// Number of kernel steps `T` (one less than the number of times).
    pub fn num_steps(&self) -> usize {
        self.times.len() - 1
    }

    pub fn times(&self) -> &[f32] {
        &self.times
    }

    /// `(j, t_j, dt_j)` for `j in 0..T`, with `dt_j = t_j - t_{j-1}` and `dt_0 = 0`.
    pub fn steps(&self) -> impl Iterator<Item = (usize, f32, f32)> + '_ {
        let mut t_previous = 0.0f32;
        self.times[..self.times.len() - 1]
            .iter()
            .enumerate()
            .map(move |(j, &t)| {
                let dt = t - t_previous;
                t_previous = t;
                (j, t, dt)
            })
    }
}
