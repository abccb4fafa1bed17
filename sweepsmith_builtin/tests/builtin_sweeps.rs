use anyhow::Result;
use sweepsmith_builtin::{BuiltinSweepOptions, SweepOutcome, run_builtin_sweep};
use sweepsmith_rs::{ParameterSpace, ResultsCollection, RunnerConfig};

fn linear_space() -> ParameterSpace {
    let mut params = ParameterSpace::new();
    params
        .add("x", vec![0, 5, 10])
        .add("slope", 2.0)
        .add("bias", 1.0);
    params.set_unpack("x", true).unwrap();
    params
}

fn completed(outcome: SweepOutcome) -> ResultsCollection {
    match outcome {
        SweepOutcome::Completed(results) => results,
        SweepOutcome::Variation(path) => panic!("expected a full sweep, got {}", path.display()),
    }
}

#[test]
fn linear_sweep_runs_sequentially() -> Result<()> {
    let outcome = run_builtin_sweep(
        "linear",
        linear_space(),
        RunnerConfig::new(7),
        BuiltinSweepOptions::default(),
    )?;
    let results = completed(outcome);
    assert_eq!(results.values_f64_for("result", None)?, vec![1.0, 11.0, 21.0]);
    Ok(())
}

#[test]
fn parallel_sweep_matches_sequential() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = RunnerConfig::new(7);
    config.output_dir = dir.path().to_path_buf();
    config.results_filename = Some("linear_{slope}".to_string());
    config.rep_max = 2;

    let sequential = completed(run_builtin_sweep(
        "linear",
        linear_space(),
        config.clone(),
        BuiltinSweepOptions::default(),
    )?);

    let par_dir = tempfile::tempdir()?;
    config.output_dir = par_dir.path().to_path_buf();
    config.workers = 3;
    let parallel = completed(run_builtin_sweep(
        "linear",
        linear_space(),
        config,
        BuiltinSweepOptions::default(),
    )?);

    assert_eq!(parallel, sequential);
    assert!(par_dir.path().join("linear_2.json").exists());
    Ok(())
}

#[test]
fn single_variation_writes_its_own_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = RunnerConfig::new(7);
    config.output_dir = dir.path().to_path_buf();
    config.results_filename = Some("linear".to_string());

    let outcome = run_builtin_sweep(
        "linear",
        linear_space(),
        config,
        BuiltinSweepOptions {
            variation_index: Some(1),
        },
    )?;
    let SweepOutcome::Variation(path) = outcome else {
        panic!("expected a single variation");
    };
    assert_eq!(path, dir.path().join("linear_unpack_01.json"));
    let saved = ResultsCollection::load_from_file(&path)?;
    assert_eq!(saved.values_f64_for("result", None)?, vec![11.0]);
    Ok(())
}

#[test]
fn bernoulli_stops_once_enough_errors_are_seen() -> Result<()> {
    let mut params = ParameterSpace::new();
    params
        .add("p", vec![1.0, 0.0])
        .add("num_trials", 5)
        .add("max_errors", 12);
    params.set_unpack("p", true)?;
    let mut config = RunnerConfig::new(11);
    config.rep_max = 10;

    let results = completed(run_builtin_sweep(
        "bernoulli",
        params,
        config,
        BuiltinSweepOptions::default(),
    )?);
    // Three repetitions of five certain errors pass the threshold; p = 0
    // never errs and runs to the repetition ceiling.
    assert_eq!(results.values_f64_for("errors", None)?, vec![15.0, 0.0]);
    assert_eq!(results.values_f64_for("trials", None)?, vec![15.0, 50.0]);
    assert_eq!(results.values_f64_for("error_rate", None)?, vec![1.0, 0.0]);
    Ok(())
}

#[test]
fn bernoulli_error_rate_is_reproducible_for_a_seed() -> Result<()> {
    let mut params = ParameterSpace::new();
    params.add("p", vec![0.1, 0.3]).add("num_trials", 200);
    params.set_unpack("p", true)?;
    let mut config = RunnerConfig::new(2024);
    config.rep_max = 4;

    let first = completed(run_builtin_sweep(
        "bernoulli",
        params.clone(),
        config.clone(),
        BuiltinSweepOptions::default(),
    )?);
    let second = completed(run_builtin_sweep(
        "bernoulli",
        params,
        config,
        BuiltinSweepOptions::default(),
    )?);
    let rates = first.values_f64_for("error_rate", None)?;
    assert_eq!(rates, second.values_f64_for("error_rate", None)?);
    assert!(rates.iter().all(|rate| (0.0..=1.0).contains(rate)));

    let intervals = first.confidence_intervals_for("error_rate", 95.0, None)?;
    for ([low, high], rate) in intervals.iter().zip(&rates) {
        assert!(*low <= rate + 1e-12 && *rate <= high + 1e-12);
    }
    Ok(())
}

#[test]
fn unknown_experiment_is_an_error() {
    let err = run_builtin_sweep(
        "psk",
        linear_space(),
        RunnerConfig::new(1),
        BuiltinSweepOptions::default(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("Unsupported experiment 'psk'"));
}
