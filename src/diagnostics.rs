//! Per-step diagnostics for an SMC run.
//!
//! The recorder is a side channel: the sampler appends one [`StepRecord`] per step (and one more
//! right after every resampling event) and, at a fixed cadence, turns the accumulated series into
//! numeric [`Figure`]s handed to a [`DiagnosticsSink`] under a `langevin/<name>` tag.
//!
//! Rendering is the sink's business. A `Figure` only carries numbers: line series over time, or
//! row-normalized histograms over time.

use ndarray::Array1;

pub const TAG_WEIGHTS: &str = "langevin/weights";
pub const TAG_EPS: &str = "langevin/eps";
pub const TAG_ACCEPTANCE: &str = "langevin/acceptance-rate";
pub const TAG_LINEAGE: &str = "langevin/linage-survived";
pub const TAG_ENERGIES: &str = "langevin/energies";
pub const TAG_ENERGY_HISTOGRAMS: &str = "langevin/energy_histograms";

/// Number of histogram bins used for energy histograms (100 evenly spaced edges).
pub const HISTOGRAM_BINS: usize = 99;

/// What a panel draws.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PanelContent {
    /// One or more line series sharing the time axis `t` (each series has `t.len()` points).
    Lines { t: Vec<f32>, series: Vec<Vec<f32>> },
    /// Row-normalized histograms, one row per time point (`rows[i].len() == HISTOGRAM_BINS`).
    ///
    /// `extent` is `[t_min, t_max, value_min, value_max]`.
    Histograms { extent: [f32; 4], rows: Vec<Vec<f32>> },
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Panel {
    pub x_label: String,
    pub y_label: String,
    pub log_y: bool,
    pub content: PanelContent,
}

impl Panel {
    fn lines(y_label: &str, t: &[f32], series: Vec<Vec<f32>>) -> Self {
        Self {
            x_label: "Time".to_string(),
            y_label: y_label.to_string(),
            log_y: false,
            content: PanelContent::Lines {
                t: t.to_vec(),
                series,
            },
        }
    }
}

/// A numeric figure: a row of panels.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Figure {
    pub panels: Vec<Panel>,
}

/// Receives figures tagged `langevin/<name>`.
pub trait DiagnosticsSink {
    fn log_figure(&mut self, figure: &Figure, tag: &str);
}

impl<F: FnMut(&Figure, &str)> DiagnosticsSink for F {
    fn log_figure(&mut self, figure: &Figure, tag: &str) {
        self(figure, tag)
    }
}

/// Keeps every figure it receives, in order.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub figures: Vec<(String, Figure)>,
}

impl MemorySink {
    /// Tags received so far, in order.
    pub fn tags(&self) -> Vec<&str> {
        self.figures.iter().map(|(tag, _)| tag.as_str()).collect()
    }

    /// The most recent figure with `tag`.
    pub fn last(&self, tag: &str) -> Option<&Figure> {
        self.figures
            .iter()
            .rev()
            .find(|(t, _)| t == tag)
            .map(|(_, f)| f)
    }
}

impl DiagnosticsSink for MemorySink {
    fn log_figure(&mut self, figure: &Figure, tag: &str) {
        self.figures.push((tag.to_string(), figure.clone()));
    }
}

/// One diagnostic point.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub t: f32,
    pub log_weights: Array1<f32>,
    pub ess: f32,
    pub step_size: f32,
    pub acceptance_rate: f32,
    pub survived_fraction: f32,
}

/// Append-only per-run series.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    t: Vec<f32>,
    log_weights: Vec<Array1<f32>>,
    ess: Vec<f32>,
    step_size: Vec<f32>,
    acceptance_rate: Vec<f32>,
    survived_fraction: Vec<f32>,
    energy_t: Vec<f32>,
    target_energies: Vec<Array1<f32>>,
    interpolation_energies: Vec<Array1<f32>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, rec: StepRecord) {
        self.t.push(rec.t);
        self.log_weights.push(rec.log_weights);
        self.ess.push(rec.ess);
        self.step_size.push(rec.step_size);
        self.acceptance_rate.push(rec.acceptance_rate);
        self.survived_fraction.push(rec.survived_fraction);
    }

    /// Per-particle target and interpolated energies at time `t`.
    pub fn record_energies(&mut self, t: f32, target: Array1<f32>, interpolation: Array1<f32>) {
        self.energy_t.push(t);
        self.target_energies.push(target);
        self.interpolation_energies.push(interpolation);
    }

    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    pub fn times(&self) -> &[f32] {
        &self.t
    }

    pub fn log_weights(&self) -> &[Array1<f32>] {
        &self.log_weights
    }

    pub fn ess(&self) -> &[f32] {
        &self.ess
    }

    pub fn step_sizes(&self) -> &[f32] {
        &self.step_size
    }

    pub fn acceptance_rates(&self) -> &[f32] {
        &self.acceptance_rate
    }

    pub fn survived_fractions(&self) -> &[f32] {
        &self.survived_fraction
    }

    pub fn energy_times(&self) -> &[f32] {
        &self.energy_t
    }

    pub fn target_energies(&self) -> &[Array1<f32>] {
        &self.target_energies
    }

    pub fn interpolation_energies(&self) -> &[Array1<f32>] {
        &self.interpolation_energies
    }

    /// Build every figure for the series recorded so far, with its tag.
    pub fn figures(&self) -> Vec<(&'static str, Figure)> {
        let mut out = Vec::new();

        if !self.energy_t.is_empty() {
            out.push((
                TAG_ENERGIES,
                Figure {
                    panels: vec![
                        Panel::lines(
                            "Target energy",
                            &self.energy_t,
                            per_particle_series(&self.target_energies),
                        ),
                        Panel::lines(
                            "Interpolation energy",
                            &self.energy_t,
                            per_particle_series(&self.interpolation_energies),
                        ),
                    ],
                },
            ));
            out.push((
                TAG_ENERGY_HISTOGRAMS,
                Figure {
                    panels: vec![
                        histogram_panel("Target energy", &self.energy_t, &self.target_energies),
                        histogram_panel(
                            "Interpolation energy",
                            &self.energy_t,
                            &self.interpolation_energies,
                        ),
                    ],
                },
            ));
        }

        let mut ess_panel = Panel::lines("ESS", &self.t, vec![self.ess.clone()]);
        ess_panel.log_y = true;
        out.push((
            TAG_WEIGHTS,
            Figure {
                panels: vec![
                    Panel::lines("A", &self.t, per_particle_series(&self.log_weights)),
                    ess_panel,
                ],
            },
        ));
        out.push((
            TAG_EPS,
            Figure {
                panels: vec![Panel::lines("Eps", &self.t, vec![self.step_size.clone()])],
            },
        ));
        out.push((
            TAG_ACCEPTANCE,
            Figure {
                panels: vec![Panel::lines(
                    "Acceptance Rate",
                    &self.t,
                    vec![self.acceptance_rate.clone()],
                )],
            },
        ));
        out.push((
            TAG_LINEAGE,
            Figure {
                panels: vec![Panel::lines(
                    "Survived Linages (%)",
                    &self.t,
                    vec![self.survived_fraction.clone()],
                )],
            },
        ));
        out
    }

    /// Send every figure to `sink`.
    pub fn flush(&self, sink: &mut dyn DiagnosticsSink) {
        for (tag, figure) in self.figures() {
            sink.log_figure(&figure, tag);
        }
    }
}

/// Transpose `time × particle` snapshots into one series per particle.
fn per_particle_series(snapshots: &[Array1<f32>]) -> Vec<Vec<f32>> {
    let n = snapshots.first().map_or(0, |s| s.len());
    (0..n)
        .map(|k| {
            snapshots
                .iter()
                .map(|s| s.get(k).copied().unwrap_or(f32::NAN))
                .collect()
        })
        .collect()
}

/// Row-normalized histograms with shared bins spanning the global finite min/max.
pub fn energy_histograms(snapshots: &[Array1<f32>], bins: usize) -> (f32, f32, Vec<Vec<f32>>) {
    let finite = snapshots.iter().flat_map(|s| s.iter()).filter(|v| v.is_finite());
    let (mut lo, mut hi) = finite.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    });
    if lo > hi {
        return (0.0, 0.0, vec![vec![0.0; bins]; snapshots.len()]);
    }
    if lo == hi {
        lo -= 0.5;
        hi += 0.5;
    }
    let width = (hi - lo) / bins as f32;

    let rows = snapshots
        .iter()
        .map(|s| {
            let mut counts = vec![0.0f32; bins];
            for &v in s.iter().filter(|v| v.is_finite()) {
                // The last bin is closed on the right.
                let b = (((v - lo) / width) as usize).min(bins - 1);
                counts[b] += 1.0;
            }
            let total: f32 = counts.iter().sum();
            if total > 0.0 {
                for c in &mut counts {
                    *c /= total;
                }
            }
            counts
        })
        .collect();
    (lo, hi, rows)
}

fn histogram_panel(y_label: &str, t: &[f32], snapshots: &[Array1<f32>]) -> Panel {
    let (lo, hi, rows) = energy_histograms(snapshots, HISTOGRAM_BINS);
    let t_min = t.iter().copied().fold(f32::INFINITY, f32::min);
    let t_max = t.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    Panel {
        x_label: "Time".to_string(),
        y_label: y_label.to_string(),
        log_y: false,
        content: PanelContent::Histograms {
            extent: [t_min, t_max, lo, hi],
            rows,
        },
    }
}
