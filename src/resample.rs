//! Resampling: turn a weighted population into an equally weighted one.
//!
//! Both schemes normalize log-weights with a softmax and return exactly `N` indices in
//! `[0, N)`, possibly repeated. Resampling is pure selection; nothing here is differentiated.
//!
//! - **Systematic**: one uniform offset `u ∈ [0, 1/N)`, then the `N` evenly spaced points
//!   `u + k/N` are located in the cumulative weights. Low variance; a particle with normalized
//!   weight `w` is copied either `floor(N w)` or `ceil(N w)` times.
//! - **Multinomial**: `N` independent categorical draws with replacement.

use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Which index-selection algorithm [`resample`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResamplingScheme {
    /// Single shared uniform draw, evenly spaced selection points.
    Systematic,
    /// `N` independent draws proportional to the weights.
    #[default]
    Multinomial,
}

impl ResamplingScheme {
    /// The scheme selected by the `systematic_resampling` configuration flag.
    pub fn from_systematic_flag(systematic: bool) -> Self {
        if systematic {
            Self::Systematic
        } else {
            Self::Multinomial
        }
    }
}

fn validate_log_weights(logw: &ArrayView1<f32>) -> Result<()> {
    if logw.is_empty() {
        return Err(Error::Domain("log-weights must be non-empty"));
    }
    if logw.iter().any(|x| x.is_nan()) {
        return Err(Error::NanLogWeights);
    }
    Ok(())
}

/// Softmax of `logw` (max-subtracted, accumulated in `f64`).
pub fn softmax(logw: &ArrayView1<f32>) -> Result<Array1<f32>> {
    validate_log_weights(logw)?;
    if logw.iter().any(|&x| x == f32::INFINITY) {
        return Err(Error::Domain("log-weights must not be +inf"));
    }
    let max = logw.iter().fold(f32::NEG_INFINITY, |m, &x| m.max(x));
    if max == f32::NEG_INFINITY {
        return Err(Error::Domain("all log-weights are -inf"));
    }
    let w: Vec<f64> = logw.iter().map(|&l| ((l - max) as f64).exp()).collect();
    let s: f64 = w.iter().sum();
    Ok(w.into_iter().map(|x| (x / s) as f32).collect())
}

/// Systematic selection for normalized weights `w` and offset `u ∈ [0, 1/N)`.
///
/// For each `k`, returns the first `i` with `cumsum(w)[i] >= u + k/N`. Indices past the end
/// (cumulative round-off below 1) are clamped to the last particle.
pub fn systematic_indices(w: &ArrayView1<f32>, u: f32) -> Result<Vec<usize>> {
    let n = w.len();
    if n == 0 {
        return Err(Error::Domain("weights must be non-empty"));
    }
    if !(u >= 0.0) || u >= 1.0 / n as f32 {
        return Err(Error::Domain("u must be in [0, 1/N)"));
    }

    let mut cumsum = Vec::with_capacity(n);
    let mut acc = 0.0f64;
    for &x in w.iter() {
        acc += x as f64;
        cumsum.push(acc);
    }

    // Targets are increasing, so one forward sweep over the bins suffices.
    let mut out = Vec::with_capacity(n);
    let mut i = 0usize;
    for k in 0..n {
        let target = u as f64 + k as f64 / n as f64;
        while i < n && cumsum[i] < target {
            i += 1;
        }
        out.push(i.min(n - 1));
    }
    Ok(out)
}

/// `n` independent categorical draws (with replacement) from normalized weights `w`.
pub fn multinomial_indices<R: rand::Rng + ?Sized>(
    w: &ArrayView1<f32>,
    n: usize,
    rng: &mut R,
) -> Result<Vec<usize>> {
    if w.is_empty() {
        return Err(Error::Domain("weights must be non-empty"));
    }
    if w.iter().any(|&x| x < 0.0 || !x.is_finite()) {
        return Err(Error::Domain("weights must be finite and nonnegative"));
    }

    let mut cumsum = Vec::with_capacity(w.len());
    let mut acc = 0.0f64;
    for &x in w.iter() {
        acc += x as f64;
        cumsum.push(acc);
    }
    if !(acc > 0.0) {
        return Err(Error::Domain("weights must have positive total mass"));
    }

    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let u: f64 = rng.random::<f64>() * acc;
        // First bin whose cumulative mass exceeds u; zero-weight bins are never selected.
        let idx = cumsum.partition_point(|&c| c <= u);
        out.push(idx.min(w.len() - 1));
    }
    Ok(out)
}

/// Draw `N` ancestor indices for log-weights `logw` using `scheme`.
pub fn resample_indices<R: rand::Rng + ?Sized>(
    logw: &ArrayView1<f32>,
    scheme: ResamplingScheme,
    rng: &mut R,
) -> Result<Vec<usize>> {
    let w = softmax(logw)?;
    let n = w.len();
    match scheme {
        ResamplingScheme::Systematic => {
            let u = rng.random::<f32>() / n as f32;
            // f32 rounding can land exactly on 1/N; keep the half-open interval.
            let u = if u >= 1.0 / n as f32 { 0.0 } else { u };
            systematic_indices(&w.view(), u)
        }
        ResamplingScheme::Multinomial => multinomial_indices(&w.view(), n, rng),
    }
}

/// Resample the rows of `x` according to `logw`.
///
/// Returns `(x[indexes], indexes)`.
pub fn resample<R: rand::Rng + ?Sized>(
    x: &ArrayView2<f32>,
    logw: &ArrayView1<f32>,
    scheme: ResamplingScheme,
    rng: &mut R,
) -> Result<(Array2<f32>, Vec<usize>)> {
    if x.nrows() != logw.len() {
        return Err(Error::Shape("x.nrows() must match logw length"));
    }
    validate_log_weights(logw)?;
    let indexes = resample_indices(logw, scheme, rng)?;
    Ok((x.select(Axis(0), &indexes), indexes))
}
