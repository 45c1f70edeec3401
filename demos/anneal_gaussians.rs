//! Anneal a standard normal pool onto a two-mode Gaussian mixture in R^2.
//!
//! Prints:
//! - where ESS-triggered resampling happened
//! - the fraction of particles near each mode (should be close to 50/50)
//! - how many initial lineages survived

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use smcanneal::diagnostics::Figure;
use smcanneal::{FnEnergy, GaussianEnergy, LangevinKernel, SmcConfig, SmcSampler};

const MODES: [[f32; 2]; 2] = [[3.0, 3.0], [-3.0, 3.0]];

/// Responsibilities and squared distances of each row to both modes (unit variance).
fn mixture_terms(x: &ArrayView2<f32>) -> (Array2<f32>, Array2<f32>) {
    let n = x.nrows();
    let mut sq = Array2::<f32>::zeros((n, 2));
    for (i, row) in x.outer_iter().enumerate() {
        for (m, mode) in MODES.iter().enumerate() {
            sq[[i, m]] = (row[0] - mode[0]).powi(2) + (row[1] - mode[1]).powi(2);
        }
    }
    let mut resp = Array2::<f32>::zeros((n, 2));
    for i in 0..n {
        let lo = sq[[i, 0]].min(sq[[i, 1]]);
        let a = (-0.5 * (sq[[i, 0]] - lo)).exp();
        let b = (-0.5 * (sq[[i, 1]] - lo)).exp();
        resp[[i, 0]] = a / (a + b);
        resp[[i, 1]] = b / (a + b);
    }
    (sq, resp)
}

fn mixture_energy(x: &ArrayView2<f32>) -> Array1<f32> {
    let (sq, _) = mixture_terms(x);
    sq.map_axis(Axis(1), |r| {
        let lo = r[0].min(r[1]);
        0.5 * lo - ((-0.5 * (r[0] - lo)).exp() + (-0.5 * (r[1] - lo)).exp()).ln() + 2f32.ln()
    })
}

fn mixture_grad(x: &ArrayView2<f32>) -> Array2<f32> {
    let (_, resp) = mixture_terms(x);
    let mut g = Array2::<f32>::zeros(x.raw_dim());
    for i in 0..x.nrows() {
        for k in 0..2 {
            g[[i, k]] = resp[[i, 0]] * (x[[i, k]] - MODES[0][k])
                + resp[[i, 1]] * (x[[i, k]] - MODES[1][k]);
        }
    }
    g
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let n = 4_096usize;
    let cfg = SmcConfig {
        enabled: true,
        num_timesteps: 100,
        batch_size: 512,
        langevin_eps: 0.05,
        ess_threshold: 0.5 * n as f32,
        systematic_resampling: true,
        adaptive_step_size: true,
        log_freq: 25,
        ..SmcConfig::default()
    };
    let kernel = LangevinKernel {
        n_steps: 5,
        metropolize: true,
    };
    let sampler = SmcSampler::new(cfg.clone(), Box::new(kernel))?;

    let source = GaussianEnergy::standard(2)?;
    let target = FnEnergy::new(mixture_energy, mixture_grad);

    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    let proposal = Array2::from_shape_fn((n, 2), |_| {
        let z: f32 = StandardNormal.sample(&mut rng);
        z
    });

    let mut flushes = 0usize;
    let mut sink = |_figure: &Figure, tag: &str| {
        if tag == smcanneal::diagnostics::TAG_WEIGHTS {
            flushes += 1;
        }
    };
    let Some(out) =
        sampler.sample_with_sink(&proposal.view(), &source, &target, &mut rng, &mut sink)?
    else {
        return Ok(());
    };

    let right = out.particles.column(0).iter().filter(|&&v| v > 0.0).count();
    let mean = out.particles.mean_axis(Axis(0)).unwrap_or_default();

    println!("n={n} steps={} eps0={}", cfg.num_timesteps, cfg.langevin_eps);
    println!("resampled at steps: {:?}", out.resampled_at);
    println!("diagnostics flushes: {flushes}");
    println!(
        "final step size: {:.4}",
        out.diagnostics.step_sizes().last().copied().unwrap_or(f32::NAN)
    );
    println!("mean = [{:.3}, {:.3}]", mean[0], mean[1]);
    println!(
        "mode split: right={:.3} left={:.3}",
        right as f32 / n as f32,
        1.0 - right as f32 / n as f32
    );
    println!("survived lineages: {:.3}", out.survived_fraction);
    Ok(())
}
