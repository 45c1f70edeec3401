use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use smcanneal::diagnostics::{MemorySink, PanelContent, TAG_WEIGHTS};
use smcanneal::{
    Energy, FnEnergy, GaussianEnergy, IdentityKernel, LangevinKernel, Result, SmcConfig,
    SmcSampler,
};

fn quadratic() -> impl Energy {
    FnEnergy::new(
        |x: &ArrayView2<f32>| x.map(|v| v * v).sum_axis(Axis(1)),
        |x: &ArrayView2<f32>| x.map(|v| 2.0 * v),
    )
}

fn shifted_quadratic() -> impl Energy {
    FnEnergy::new(
        |x: &ArrayView2<f32>| x.map(|v| (v - 1.0) * (v - 1.0)).sum_axis(Axis(1)),
        |x: &ArrayView2<f32>| x.map(|v| 2.0 * (v - 1.0)),
    )
}

fn eight_particles() -> Array2<f32> {
    Array2::from_shape_fn((8, 1), |(i, _)| i as f32 * 0.25 - 1.0)
}

/// x^2 -> (x-1)^2 over four steps with the identity kernel and resampling disabled: only the
/// final resampling touches the pool.
#[test]
fn identity_kernel_only_resamples_at_the_end() -> Result<()> {
    let cfg = SmcConfig {
        enabled: true,
        num_timesteps: 4,
        ess_threshold: -1.0,
        systematic_resampling: false,
        batch_size: 3,
        ..SmcConfig::default()
    };
    let sampler = SmcSampler::new(cfg, Box::new(IdentityKernel))?;
    let x = eight_particles();
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let out = sampler
        .sample(&x.view(), &quadratic(), &shifted_quadratic(), &mut rng)?
        .expect("enabled sampler returns output");

    assert_eq!(out.particles.dim(), (8, 1));
    assert!(out.resampled_at.is_empty());
    assert_eq!(out.lineage.len(), 8);
    // Every output row is an input row, and lineage says which one.
    for (row, &id) in out.particles.outer_iter().zip(&out.lineage) {
        assert_eq!(row, x.row(id));
    }
    assert!(out.log_weights.iter().all(|&l| l == 1.0));
    // init + one point per step
    assert_eq!(out.diagnostics.len(), 5);
    Ok(())
}

/// Counts every draw taken from the wrapped generator.
struct CountingRng {
    inner: ChaCha8Rng,
    draws: usize,
}

impl RngCore for CountingRng {
    fn next_u32(&mut self) -> u32 {
        self.draws += 1;
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.draws += 1;
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        self.draws += 1;
        self.inner.fill_bytes(dst)
    }
}

/// The identity kernel never draws, so every draw comes from resampling: one uniform for a
/// systematic pass, one per particle for a multinomial pass.
#[test]
fn final_resampling_runs_exactly_once() -> Result<()> {
    for (systematic, want_draws) in [(true, 1usize), (false, 8)] {
        let cfg = SmcConfig {
            enabled: true,
            num_timesteps: 4,
            ess_threshold: -1.0,
            systematic_resampling: systematic,
            ..SmcConfig::default()
        };
        let sampler = SmcSampler::new(cfg, Box::new(IdentityKernel))?;
        let x = eight_particles();
        let mut rng = CountingRng {
            inner: ChaCha8Rng::seed_from_u64(42),
            draws: 0,
        };
        let out = sampler
            .sample(&x.view(), &quadratic(), &shifted_quadratic(), &mut rng)?
            .expect("enabled");
        assert!(out.resampled_at.is_empty());
        assert_eq!(rng.draws, want_draws, "systematic={systematic}");
    }
    Ok(())
}

/// With a zero step size the Langevin kernel only reweights. The returned log-weights are the
/// last step's weights; the final resampling does not reset them.
#[test]
fn final_log_weights_are_not_reset_by_the_final_resample() -> Result<()> {
    let cfg = SmcConfig {
        enabled: true,
        num_timesteps: 4,
        langevin_eps: 0.0,
        ..SmcConfig::default()
    };
    let sampler = SmcSampler::new(cfg, Box::new(LangevinKernel::default()))?;
    let x = eight_particles();
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let out = sampler
        .sample(&x.view(), &quadratic(), &shifted_quadratic(), &mut rng)?
        .expect("enabled");

    // Visited times 0, 0.25, 0.5, 0.75: total dt 0.75, and E_target - E_source = 1 - 2x.
    for (i, &l) in out.log_weights.iter().enumerate() {
        let xi = x[[i, 0]];
        let want = 1.0 - 0.75 * (1.0 - 2.0 * xi);
        assert!((l - want).abs() < 1e-5, "i={i}: {l} vs {want}");
    }
    Ok(())
}

#[test]
fn energy_cutoff_keeps_low_energy_particles_in_order() -> Result<()> {
    let cfg = SmcConfig {
        enabled: true,
        num_timesteps: 2,
        batch_size: 3,
        input_energy_cutoff: Some(20.0),
        ..SmcConfig::default()
    };
    let sampler = SmcSampler::new(cfg, Box::new(IdentityKernel))?;
    // Target energy x^2: 0, 1, 4, 9, 16 are kept; 25 and above are dropped.
    let x = Array2::from_shape_fn((10, 1), |(i, _)| i as f32);
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let out = sampler
        .sample(&x.view(), &quadratic(), &quadratic(), &mut rng)?
        .expect("enabled");

    assert_eq!(out.particles.nrows(), 5);
    // Lineage ids index the filtered pool, which kept the input order.
    for (row, &id) in out.particles.outer_iter().zip(&out.lineage) {
        assert!(id < 5);
        assert_eq!(row[0], id as f32);
    }
    Ok(())
}

#[test]
fn sink_receives_figures_on_the_configured_cadence() -> Result<()> {
    let cfg = SmcConfig {
        enabled: true,
        num_timesteps: 5,
        log_freq: 2,
        ..SmcConfig::default()
    };
    let sampler = SmcSampler::new(cfg, Box::new(IdentityKernel))?;
    let x = eight_particles();
    let e = GaussianEnergy::standard(1)?;
    let mut sink = MemorySink::default();
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    sampler
        .sample_with_sink(&x.view(), &e, &e, &mut rng, &mut sink)?
        .expect("enabled");

    // Flushes after steps 2, 4 and the final step 5; four figures each.
    assert_eq!(sink.figures.len(), 12);
    let weights = sink.last(TAG_WEIGHTS).expect("weights figure");
    match &weights.panels[0].content {
        PanelContent::Lines { t, series } => {
            assert_eq!(t.len(), 6);
            assert_eq!(series.len(), 8);
        }
        other => panic!("unexpected content: {other:?}"),
    }
    Ok(())
}

#[test]
fn energy_diagnostics_follow_every_recorded_point() -> Result<()> {
    let cfg = SmcConfig {
        enabled: true,
        num_timesteps: 3,
        do_energy_plots: true,
        ess_threshold: 100.0,
        systematic_resampling: true,
        ..SmcConfig::default()
    };
    let sampler = SmcSampler::new(cfg, Box::new(LangevinKernel::default()))?;
    let x = eight_particles();
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let out = sampler
        .sample(&x.view(), &quadratic(), &shifted_quadratic(), &mut rng)?
        .expect("enabled");

    // ESS can never reach 100 with 8 particles, so every non-final step resamples.
    assert_eq!(out.resampled_at, vec![0, 1]);
    let d = &out.diagnostics;
    assert_eq!(d.len(), 1 + 3 + 2);
    assert_eq!(d.energy_times(), d.times());
    assert!(d.target_energies().iter().all(|e| e.len() == 8));
    Ok(())
}

#[test]
fn langevin_annealing_moves_the_pool_to_the_target() -> Result<()> {
    let n = 2_000usize;
    let cfg = SmcConfig {
        enabled: true,
        num_timesteps: 50,
        batch_size: 256,
        langevin_eps: 0.1,
        ess_threshold: 0.5 * n as f32,
        systematic_resampling: true,
        ..SmcConfig::default()
    };
    let kernel = LangevinKernel {
        n_steps: 5,
        metropolize: true,
    };
    let sampler = SmcSampler::new(cfg, Box::new(kernel))?;
    let source = GaussianEnergy::standard(1)?;
    let target = GaussianEnergy::new(Array1::from_elem(1, 3.0), 1.0)?;

    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    let x = Array2::from_shape_fn((n, 1), |_| {
        let z: f32 = StandardNormal.sample(&mut rng);
        z
    });
    let out = sampler
        .sample(&x.view(), &source, &target, &mut rng)?
        .expect("enabled");

    let mean = out.particles.mean().unwrap_or(f32::NAN);
    assert!((mean - 3.0).abs() < 0.25, "mean={mean}");
    assert!(!out.resampled_at.is_empty());
    assert!(out.survived_fraction < 1.0);
    let acc = out.diagnostics.acceptance_rates();
    assert!(acc[1..].iter().all(|&a| a > 0.5), "{acc:?}");
    Ok(())
}
