use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use sweepsmith_rs::{
    Accumulator, Combination, ParameterSpace, ResultsCollection, RunnerConfig, Simulation,
    SimulationRunner, simulate_in_parallel,
};
use tracing::info;

pub const EXPERIMENT_LINEAR: &str = "linear";
pub const EXPERIMENT_BERNOULLI: &str = "bernoulli";

const SUPPORTED_EXPERIMENTS: [&str; 2] = [EXPERIMENT_LINEAR, EXPERIMENT_BERNOULLI];

pub fn ensure_experiment_supported(name: &str) -> Result<()> {
    if SUPPORTED_EXPERIMENTS.contains(&name) {
        return Ok(());
    }
    Err(anyhow!(
        "Unsupported experiment '{name}'. Supported experiments: {}",
        SUPPORTED_EXPERIMENTS.join(", ")
    ))
}

fn required_f64(combination: &Combination<'_>, name: &str, experiment: &str) -> Result<f64> {
    combination
        .get_f64(name)
        .ok_or_else(|| anyhow!("{experiment} experiment requires numeric parameter '{name}'"))
}

fn optional_f64(combination: &Combination<'_>, name: &str, default: f64) -> f64 {
    combination.get_f64(name).unwrap_or(default)
}

/// Deterministic `slope * x + bias`, reported as `RATIO(value, 1)` under
/// `result`, plus a `calls` SUM counting repetitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearExperiment;

impl Simulation for LinearExperiment {
    fn run(&self, combination: &Combination<'_>, _rng: &mut StdRng) -> Result<ResultsCollection> {
        let x = required_f64(combination, "x", EXPERIMENT_LINEAR)?;
        let slope = optional_f64(combination, "slope", 1.0);
        let bias = optional_f64(combination, "bias", 0.0);
        Ok(ResultsCollection::from_accumulators([
            Accumulator::ratio_of("result", slope * x + bias, 1.0),
            Accumulator::sum_of("calls", 1.0),
        ]))
    }
}

/// `num_trials` Bernoulli(`p`) draws per repetition.
///
/// Reports `errors` and `trials` sums and an `error_rate` ratio with history
/// for confidence intervals. With a `max_errors` parameter a variation stops
/// repeating once that many errors were seen.
#[derive(Debug, Clone, Copy, Default)]
pub struct BernoulliExperiment;

impl Simulation for BernoulliExperiment {
    fn run(&self, combination: &Combination<'_>, rng: &mut StdRng) -> Result<ResultsCollection> {
        let p = required_f64(combination, "p", EXPERIMENT_BERNOULLI)?;
        if !(0.0..=1.0).contains(&p) {
            bail!("bernoulli experiment requires 0 <= p <= 1, got {p}");
        }
        let trials = combination
            .get_i64("num_trials")
            .filter(|n| *n > 0)
            .ok_or_else(|| anyhow!("bernoulli experiment requires a positive integer 'num_trials'"))?;

        let errors = (0..trials).filter(|_| rng.random_bool(p)).count() as f64;
        let trials = trials as f64;

        let mut error_rate = Accumulator::ratio("error_rate").with_history();
        error_rate.update(errors, Some(trials))?;
        Ok(ResultsCollection::from_accumulators([
            Accumulator::sum_of("errors", errors),
            Accumulator::sum_of("trials", trials),
            error_rate,
        ]))
    }

    fn keep_going(
        &self,
        results: &ResultsCollection,
        combination: &Combination<'_>,
        _repetitions: usize,
    ) -> bool {
        let Some(max_errors) = combination.get_f64("max_errors") else {
            return true;
        };
        let errors = results
            .last("errors")
            .and_then(Accumulator::result_f64)
            .unwrap_or(0.0);
        errors < max_errors
    }
}

/// The builtin experiments behind one type, selected by name.
#[derive(Debug, Clone, Copy)]
pub enum BuiltinExperiment {
    Linear(LinearExperiment),
    Bernoulli(BernoulliExperiment),
}

impl BuiltinExperiment {
    pub fn from_name(name: &str) -> Result<Self> {
        ensure_experiment_supported(name)?;
        Ok(match name {
            EXPERIMENT_BERNOULLI => BuiltinExperiment::Bernoulli(BernoulliExperiment),
            _ => BuiltinExperiment::Linear(LinearExperiment),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinExperiment::Linear(_) => EXPERIMENT_LINEAR,
            BuiltinExperiment::Bernoulli(_) => EXPERIMENT_BERNOULLI,
        }
    }
}

impl Simulation for BuiltinExperiment {
    fn run(&self, combination: &Combination<'_>, rng: &mut StdRng) -> Result<ResultsCollection> {
        match self {
            BuiltinExperiment::Linear(inner) => inner.run(combination, rng),
            BuiltinExperiment::Bernoulli(inner) => inner.run(combination, rng),
        }
    }

    fn keep_going(
        &self,
        results: &ResultsCollection,
        combination: &Combination<'_>,
        repetitions: usize,
    ) -> bool {
        match self {
            BuiltinExperiment::Linear(inner) => inner.keep_going(results, combination, repetitions),
            BuiltinExperiment::Bernoulli(inner) => {
                inner.keep_going(results, combination, repetitions)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct BuiltinSweepOptions {
    /// Run only this variation and write it to its index-qualified file.
    pub variation_index: Option<usize>,
}

#[derive(Debug)]
pub enum SweepOutcome {
    Completed(ResultsCollection),
    Variation(PathBuf),
}

/// Run a builtin experiment over `params`: one variation, a parallel
/// dispatch when `config.workers > 1`, or the sequential loop.
pub fn run_builtin_sweep(
    experiment: &str,
    params: ParameterSpace,
    config: RunnerConfig,
    options: BuiltinSweepOptions,
) -> Result<SweepOutcome> {
    let experiment = BuiltinExperiment::from_name(experiment)?;
    info!(
        experiment = experiment.name(),
        variations = params.num_variations(),
        workers = config.workers,
        variation_index = ?options.variation_index,
        "Running builtin sweep"
    );

    let builder = std::thread::Builder::new()
        .name("sweepsmith-runner".to_string())
        .stack_size(8 * 1024 * 1024);

    let handle = builder
        .spawn(move || -> Result<SweepOutcome> {
            if let Some(index) = options.variation_index {
                let mut runner = SimulationRunner::new(experiment, params, config)?;
                let path = runner
                    .simulate_variation(index)
                    .with_context(|| format!("Variation {index} failed"))?;
                return Ok(SweepOutcome::Variation(path));
            }
            if config.workers > 1 {
                let results = simulate_in_parallel(|| {
                    SimulationRunner::new(experiment, params.clone(), config.clone())
                })?;
                return Ok(SweepOutcome::Completed(results));
            }
            let mut runner = SimulationRunner::new(experiment, params, config)?;
            runner.simulate()?;
            Ok(SweepOutcome::Completed(runner.into_results()))
        })
        .map_err(|err| anyhow!("failed to spawn sweepsmith runner thread: {err}"))?;

    handle
        .join()
        .map_err(|_| anyhow!("sweepsmith runner thread panicked"))?
}
