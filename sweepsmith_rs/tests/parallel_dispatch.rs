use std::path::Path;

use anyhow::Result;
use rand::Rng;
use rand::rngs::StdRng;
use sweepsmith_rs::{
    Accumulator, Combination, ParameterSpace, ResultsCollection, RunnerConfig, Simulation,
    SimulationRunner, SweepError, simulate_in_parallel,
};

struct Scaled;

impl Simulation for Scaled {
    fn run(&self, combination: &Combination<'_>, rng: &mut StdRng) -> Result<ResultsCollection> {
        let x = combination.get_f64("x").unwrap();
        let scale = combination.get_f64("scale").unwrap();
        let mut noisy = Accumulator::ratio("noisy").with_history();
        noisy.update(x * scale + rng.random::<f64>(), Some(1.0))?;
        Ok(ResultsCollection::from_accumulators([
            Accumulator::sum_of("scaled", x * scale),
            noisy,
        ]))
    }
}

fn space() -> ParameterSpace {
    let mut params = ParameterSpace::new();
    params
        .add("x", vec![1, 2, 3])
        .add("scale", vec![0.5, 2.0])
        .add("tag", "demo");
    params.set_unpack("x", true).unwrap();
    params.set_unpack("scale", true).unwrap();
    params
}

fn config(dir: &Path, workers: usize) -> RunnerConfig {
    let mut config = RunnerConfig::new(5);
    config.rep_max = 3;
    config.workers = workers;
    config.output_dir = dir.to_path_buf();
    config.results_filename = Some("scaled_{tag}".to_string());
    config
}

#[test]
fn parallel_dispatch_matches_sequential_run() -> Result<()> {
    let seq_dir = tempfile::tempdir()?;
    let mut sequential = SimulationRunner::new(Scaled, space(), config(seq_dir.path(), 1))?;
    sequential.simulate()?;

    let par_dir = tempfile::tempdir()?;
    let combined = simulate_in_parallel(|| {
        SimulationRunner::new(Scaled, space(), config(par_dir.path(), 4))
    })?;

    assert_eq!(&combined, sequential.results());
    assert_eq!(
        combined.values_f64_for("scaled", None)?,
        vec![1.5, 6.0, 3.0, 12.0, 4.5, 18.0]
    );

    let saved = ResultsCollection::load_from_file(&par_dir.path().join("scaled_demo.json"))?;
    assert_eq!(saved, combined);
    // Per-variation files are cleaned up.
    assert!(!par_dir.path().join("scaled_demo_unpack_00.json").exists());
    assert!(!par_dir.path().join("scaled_demo_unpack_05.json").exists());
    Ok(())
}

#[test]
fn keep_checkpoint_leaves_per_variation_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    simulate_in_parallel(|| {
        let mut config = config(dir.path(), 2);
        config.keep_checkpoint = true;
        SimulationRunner::new(Scaled, space(), config)
    })?;
    for index in 0..6 {
        assert!(dir.path().join(format!("scaled_demo_unpack_{index:02}.json")).exists());
    }
    Ok(())
}

#[test]
fn parallel_dispatch_requires_a_filename() {
    let err = simulate_in_parallel(|| {
        SimulationRunner::new(Scaled, space(), RunnerConfig::new(1))
    })
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SweepError>(),
        Some(SweepError::NotConfigured { .. })
    ));
}
