use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::accumulator::Accumulator;
use crate::aggregator::{ProgressAggregator, ProgressClient};
use crate::config::{ProgressOutput, RunnerConfig};
use crate::error::SweepError;
use crate::progress::{ProgressBar, ProgressSink};
use crate::results::{ELAPSED_TIME_RESULT, ResultsCollection};
use crate::runner::{Simulation, SimulationRunner, pretty_time};
use crate::storage;

/// Run every variation on its own runner in a worker pool and assemble the
/// per-variation files into one collection, in index order.
///
/// `factory` builds an independent runner per variation; every runner must
/// describe the same parameter space and have a results filename. The
/// combined collection is written to the runner's results path. Per-variation
/// files are removed afterwards unless `keep_checkpoint` is set.
pub fn simulate_in_parallel<S, F>(factory: F) -> Result<ResultsCollection>
where
    S: Simulation,
    F: Fn() -> Result<SimulationRunner<S>> + Sync,
{
    let start = Instant::now();
    let probe = factory()?;
    let config = probe.config().clone();
    let params = probe.params().clone();
    let total = params.num_variations();
    let rep_max = probe.rep_max();
    let results_path = probe
        .results_path()
        .ok_or_else(|| SweepError::NotConfigured {
            operation: "simulate_in_parallel".to_string(),
        })?;
    drop(probe);

    let aggregator = build_aggregator(&config, &results_path)?;
    let clients: Vec<ProgressClient> = (0..total)
        .map(|_| aggregator.register(rep_max as u64))
        .collect();

    let workers = config.workers.max(1);
    info!(
        variations = total,
        workers,
        rep_max,
        path = %results_path.display(),
        "Starting parallel sweep"
    );

    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("sweep-worker-{i}"))
        .build()
        .context("Failed to build worker pool")?;

    aggregator.start()?;
    let outcome: Result<Vec<PathBuf>> = pool.install(|| {
        (0..total)
            .into_par_iter()
            .map(|index| {
                let mut runner = factory()?;
                runner.set_progress_client(clients[index].clone());
                runner.simulate_variation(index)
            })
            .collect()
    });
    aggregator.stop();
    let paths = outcome?;

    let mut results = ResultsCollection::with_params(params);
    for path in &paths {
        let part = ResultsCollection::load_from_file(path)?;
        if part.params() != results.params() {
            return Err(SweepError::CheckpointMismatch {
                path: path.display().to_string(),
            }
            .into());
        }
        results.append_all(&part)?;
    }

    let elapsed = start.elapsed().as_secs_f64();
    results.add(Accumulator::misc_of(ELAPSED_TIME_RESULT, elapsed));
    results.save_to_file(&results_path)?;

    if !config.keep_checkpoint {
        for path in &paths {
            storage::remove_if_exists(path)?;
        }
        debug!(files = paths.len(), "Removed per-variation files");
    }

    info!(
        variations = total,
        elapsed = %pretty_time(elapsed),
        path = %results_path.display(),
        "Parallel sweep completed"
    );
    Ok(results)
}

fn build_aggregator(config: &RunnerConfig, results_path: &Path) -> Result<ProgressAggregator> {
    let sink = match config.effective_progress() {
        ProgressOutput::Off => None,
        ProgressOutput::Screen => Some(ProgressSink::stdout()),
        ProgressOutput::File => {
            if let Some(parent) = results_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Unable to create {}", parent.display()))?;
            }
            let path = storage::with_stem_suffix(results_path, "_progress", "txt");
            Some(ProgressSink::file(&path)?)
        }
    };
    let bar = sink.map(|sink| {
        let bar = ProgressBar::new(0, sink);
        match &config.progress_message {
            Some(message) => bar.with_message(message.clone()),
            None => bar,
        }
    });
    Ok(ProgressAggregator::new(config.progress_poll_interval(), bar))
}
