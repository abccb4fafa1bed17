use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::accumulator::Accumulator;
use crate::aggregator::ProgressClient;
use crate::config::{ProgressOutput, RunnerConfig};
use crate::error::SweepError;
use crate::params::{Combination, Parameter, ParameterSpace, REP_MAX_PARAM};
use crate::progress::{ProgressBar, ProgressSink, ProgressTracker};
use crate::results::{ELAPSED_TIME_RESULT, ResultsCollection};
use crate::storage::{self, Checkpoint};

/// The caller-supplied unit of work.
pub trait Simulation {
    /// One repetition for `combination`. Randomness must come from `rng` for
    /// a run to be reproducible from its seed.
    fn run(&self, combination: &Combination<'_>, rng: &mut StdRng) -> Result<ResultsCollection>;

    /// Checked after every repetition with the results merged so far.
    /// Returning false ends this combination early; the sweep continues.
    fn keep_going(
        &self,
        _results: &ResultsCollection,
        _combination: &Combination<'_>,
        _repetitions: usize,
    ) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Seed of the RNG handed to every repetition of one variation.
///
/// A SplitMix64 finalisation of the base seed and variation index, so
/// neighbouring indices get unrelated streams and the same variation gets
/// the same stream whether it runs sequentially or on a worker.
pub fn derive_seed(seed: u64, variation_index: usize) -> u64 {
    splitmix64(seed.wrapping_add(splitmix64(variation_index as u64)))
}

fn splitmix64(value: u64) -> u64 {
    let mut z = value.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// `1.23s`, `2m 3.00s`, `1h 2m 3.00s`.
pub fn pretty_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "unknown".to_string();
    }
    let hours = (seconds / 3600.0).floor();
    let minutes = ((seconds - hours * 3600.0) / 60.0).floor();
    let secs = seconds - hours * 3600.0 - minutes * 60.0;
    if hours > 0.0 {
        format!("{hours}h {minutes}m {secs:.2}s")
    } else if minutes > 0.0 {
        format!("{minutes}m {secs:.2}s")
    } else {
        format!("{secs:.2}s")
    }
}

/// Replace `{name}` placeholders with the value of non-unpacked parameters
/// and make sure the name ends in `.json`.
pub fn render_filename(template: &str, params: &ParameterSpace) -> Result<String, SweepError> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            rendered.push_str(&rest[open..]);
            rest = "";
            break;
        };
        let name = &after[..close];
        let parameter = params.get(name).ok_or_else(|| {
            SweepError::invalid_kind(name, "filename placeholder names no parameter")
        })?;
        if params.is_unpacked(name) {
            return Err(SweepError::invalid_kind(
                name,
                "unpacked parameters cannot appear in a results filename",
            ));
        }
        match parameter {
            Parameter::Scalar(value) => rendered.push_str(&value.to_string()),
            list => rendered.push_str(&list.to_string()),
        }
        rest = &after[close + 1..];
    }
    rendered.push_str(rest);
    if !rendered.ends_with(".json") {
        rendered.push_str(".json");
    }
    Ok(rendered)
}

/// Drives a [`Simulation`] over every variation of a parameter space.
pub struct SimulationRunner<S> {
    simulation: S,
    params: ParameterSpace,
    config: RunnerConfig,
    results: ResultsCollection,
    state: RunState,
    runned_reps: Vec<usize>,
    elapsed: Duration,
    results_filename: Option<String>,
    progress_client: Option<ProgressClient>,
}

impl<S: Simulation> SimulationRunner<S> {
    /// Fixes the results filename from `config.results_filename` against the
    /// current parameter values.
    pub fn new(simulation: S, params: ParameterSpace, config: RunnerConfig) -> Result<Self> {
        let mut runner = Self {
            simulation,
            results: ResultsCollection::with_params(params.clone()),
            params,
            config,
            state: RunState::Idle,
            runned_reps: Vec::new(),
            elapsed: Duration::ZERO,
            results_filename: None,
            progress_client: None,
        };
        let template = runner.config.results_filename.clone();
        runner.set_results_filename(template.as_deref())?;
        Ok(runner)
    }

    /// Set (or clear, with `None`) the results filename template.
    pub fn set_results_filename(&mut self, template: Option<&str>) -> Result<(), SweepError> {
        self.results_filename = match template {
            Some(template) => Some(render_filename(template, &self.params)?),
            None => None,
        };
        Ok(())
    }

    pub fn results_filename(&self) -> Option<&str> {
        self.results_filename.as_deref()
    }

    /// Final results file, when persistence is configured.
    pub fn results_path(&self) -> Option<PathBuf> {
        self.results_filename
            .as_ref()
            .map(|name| self.config.output_dir.join(name))
    }

    pub fn checkpoint_path(&self) -> Option<PathBuf> {
        self.results_path().map(|path| storage::checkpoint_path(&path))
    }

    /// `<stem>_unpack_<NN>.json`, the index zero-padded to the width of the
    /// largest index and at least two digits.
    pub fn variation_results_path(&self, index: usize) -> Option<PathBuf> {
        let path = self.results_path()?;
        let width = self
            .params
            .num_variations()
            .saturating_sub(1)
            .to_string()
            .len()
            .max(2);
        Some(storage::with_stem_suffix(
            &path,
            &format!("_unpack_{index:0width$}"),
            "json",
        ))
    }

    /// Report progress to an aggregator instead of the local bar.
    pub fn set_progress_client(&mut self, client: ProgressClient) {
        self.progress_client = Some(client);
    }

    /// Repetition ceiling: a positive integer `rep_max` parameter wins over
    /// the configured value.
    pub fn rep_max(&self) -> usize {
        self.params
            .get(REP_MAX_PARAM)
            .and_then(Parameter::as_scalar)
            .and_then(|v| v.as_i64())
            .filter(|v| *v > 0)
            .map(|v| v as usize)
            .unwrap_or(self.config.rep_max)
            .max(1)
    }

    pub fn simulation(&self) -> &S {
        &self.simulation
    }

    pub fn params(&self) -> &ParameterSpace {
        &self.params
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn results(&self) -> &ResultsCollection {
        &self.results
    }

    pub fn into_results(self) -> ResultsCollection {
        self.results
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Repetitions actually run for each completed variation, in order.
    pub fn runned_reps(&self) -> &[usize] {
        &self.runned_reps
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn elapsed_pretty(&self) -> String {
        pretty_time(self.elapsed.as_secs_f64())
    }

    /// Run every variation in canonical order, resuming from a checkpoint
    /// when one exists.
    pub fn simulate(&mut self) -> Result<()> {
        self.state = RunState::Running;
        match self.simulate_all() {
            Ok(()) => {
                self.state = RunState::Completed;
                Ok(())
            }
            Err(error) => {
                self.state = RunState::Failed;
                warn!(?error, "Sweep failed; checkpoint left in place");
                Err(error)
            }
        }
    }

    fn simulate_all(&mut self) -> Result<()> {
        let start = Instant::now();
        let total = self.params.num_variations();
        let rep_max = self.rep_max();
        let checkpoint_path = self.checkpoint_path();

        self.results = ResultsCollection::with_params(self.params.clone());
        self.runned_reps.clear();
        let mut prior_elapsed = 0.0;

        if let (Some(path), true) = (&checkpoint_path, self.config.resume) {
            if let Some(checkpoint) = storage::load_checkpoint(path)? {
                if checkpoint.results.params() != &self.params {
                    return Err(SweepError::CheckpointMismatch {
                        path: path.display().to_string(),
                    }
                    .into());
                }
                self.results = checkpoint.results;
                self.runned_reps = checkpoint.runned_reps;
                prior_elapsed = checkpoint.elapsed_secs;
            }
        }

        let start_index = self.runned_reps.len().min(total);
        info!(
            variations = total,
            rep_max,
            resume_from = start_index,
            params = %self.params,
            "Starting sweep"
        );

        let mut tracker = self.build_tracker(total)?;
        tracker.resume_from(start_index);

        let params = self.params.clone();
        for combination in params.combinations_from(start_index) {
            let (combination_results, reps) = self.run_combination(&combination)?;
            self.results.append_all(&combination_results)?;
            self.runned_reps.push(reps);

            if let Some(path) = &checkpoint_path {
                let elapsed = prior_elapsed + start.elapsed().as_secs_f64();
                let checkpoint =
                    Checkpoint::new(self.results.clone(), self.runned_reps.clone(), elapsed);
                storage::save_checkpoint(path, &checkpoint)?;
            }
            tracker.record_step()?;
            debug!(
                variation_index = combination.index(),
                combination = %combination,
                reps,
                "Variation complete"
            );
        }
        tracker.finish()?;

        self.elapsed = Duration::from_secs_f64(prior_elapsed) + start.elapsed();
        self.results.add(Accumulator::misc_of(
            ELAPSED_TIME_RESULT,
            self.elapsed.as_secs_f64(),
        ));

        if let Some(path) = self.results_path() {
            self.results.save_to_file(&path)?;
            info!(path = %path.display(), "Results saved");
        }
        if let Some(path) = &checkpoint_path {
            if self.config.keep_checkpoint {
                debug!(path = %path.display(), "Keeping checkpoint");
            } else {
                storage::remove_if_exists(path)?;
            }
        }

        info!(
            variations = total,
            repetitions = self.runned_reps.iter().sum::<usize>(),
            elapsed = %self.elapsed_pretty(),
            "Sweep completed"
        );
        Ok(())
    }

    /// Run one variation by index and write its results to an
    /// index-qualified file, returning that file's path. Requires a results
    /// filename.
    ///
    /// An existing file for the same parameter space is reused when resume
    /// is enabled.
    pub fn simulate_variation(&mut self, index: usize) -> Result<PathBuf> {
        let path = self
            .variation_results_path(index)
            .ok_or_else(|| SweepError::NotConfigured {
                operation: "simulate_variation".to_string(),
            })?;

        self.state = RunState::Running;
        match self.simulate_one(index, &path) {
            Ok(()) => {
                self.state = RunState::Completed;
                Ok(path)
            }
            Err(error) => {
                self.state = RunState::Failed;
                warn!(?error, variation_index = index, "Variation failed");
                Err(error)
            }
        }
    }

    fn simulate_one(&mut self, index: usize, path: &Path) -> Result<()> {
        let start = Instant::now();
        let params = self.params.clone();
        let total = params.num_variations();
        let combination = params
            .combination(index)
            .ok_or_else(|| anyhow!("variation index {index} is out of range (0..{total})"))?;

        if self.config.resume && path.exists() {
            let existing = ResultsCollection::load_from_file(path)?;
            if existing.params() != &self.params {
                return Err(SweepError::CheckpointMismatch {
                    path: path.display().to_string(),
                }
                .into());
            }
            info!(
                variation_index = index,
                path = %path.display(),
                "Variation already on disk; skipping"
            );
            self.results = existing;
            if let Some(client) = &self.progress_client {
                client.advance(client.final_count())?;
            }
            return Ok(());
        }

        let mut tracker = self.build_tracker(1)?;
        let (combination_results, reps) = self.run_combination(&combination)?;
        self.results = ResultsCollection::with_params(self.params.clone());
        self.results.append_all(&combination_results)?;
        self.runned_reps = vec![reps];
        self.results
            .save_to_file(path)
            .with_context(|| format!("Unable to save variation {index}"))?;
        tracker.record_step()?;
        tracker.finish()?;

        self.elapsed = start.elapsed();
        info!(
            variation_index = index,
            combination = %combination,
            reps,
            path = %path.display(),
            elapsed = %self.elapsed_pretty(),
            "Variation saved"
        );
        Ok(())
    }

    /// Repeat the unit of work for one combination until `rep_max` or the
    /// early-stop predicate, merging each repetition.
    fn run_combination(&self, combination: &Combination<'_>) -> Result<(ResultsCollection, usize)> {
        let rep_max = self.rep_max();
        let mut rng = StdRng::seed_from_u64(derive_seed(self.config.seed, combination.index()));
        let mut merged = ResultsCollection::new();
        let mut reps = 0;
        while reps < rep_max {
            let repetition = self.simulation.run(combination, &mut rng).with_context(|| {
                format!(
                    "Simulation failed for variation {} ({combination})",
                    combination.index()
                )
            })?;
            merged.merge(&repetition)?;
            reps += 1;
            if !self.simulation.keep_going(&merged, combination, reps) {
                debug!(
                    variation_index = combination.index(),
                    reps, "Early stop requested"
                );
                break;
            }
        }
        Ok((merged, reps))
    }

    fn build_tracker(&self, steps: usize) -> Result<ProgressTracker> {
        let rep_max = self.rep_max();
        let tracker = ProgressTracker::new(steps, rep_max);
        if let Some(client) = &self.progress_client {
            return Ok(tracker.with_reporter(Box::new(client.clone())));
        }

        let sink = match self.config.effective_progress() {
            ProgressOutput::Off => return Ok(tracker),
            ProgressOutput::Screen => ProgressSink::stdout(),
            ProgressOutput::File => {
                let path = match self.results_path() {
                    Some(path) => storage::with_stem_suffix(&path, "_progress", "txt"),
                    None => self.config.output_dir.join("sweepsmith_progress.txt"),
                };
                std::fs::create_dir_all(&self.config.output_dir).with_context(|| {
                    format!("Unable to create {}", self.config.output_dir.display())
                })?;
                ProgressSink::file(&path)?
            }
        };
        let mut bar = ProgressBar::new(tracker.total(), sink);
        if let Some(message) = &self.config.progress_message {
            bar = bar.with_message(message.clone());
        }
        Ok(tracker.with_reporter(Box::new(bar)))
    }
}
