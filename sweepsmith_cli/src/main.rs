mod cli;
mod sweep_file;

use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Result, anyhow};
use cli::{Cli, Commands};
use itertools::Itertools;
use sweep_file::SweepFile;
use sweepsmith_builtin::{SweepOutcome, ensure_experiment_supported, run_builtin_sweep};
use sweepsmith_rs::ResultsCollection;
use sweepsmith_rs::results::ELAPSED_TIME_RESULT;
use tracing_appender::non_blocking;
use tracing_subscriber::{EnvFilter, prelude::*};

fn init_tracing(log_file: Option<PathBuf>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| anyhow!("failed to create log directory {parent:?}: {err}"))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| anyhow!("failed to open log file {path:?}: {err}"))?;
        let (non_blocking_writer, guard) = non_blocking(file);
        // The writer flushes until the guard drops; keep it for the process.
        let _guard = Box::leak(Box::new(guard));
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(non_blocking_writer);
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .with(file_layer)
            .try_init()
            .map_err(|err| anyhow!("failed to initialize tracing: {err}"))
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .try_init()
            .map_err(|err| anyhow!("failed to initialize tracing: {err}"))
    }
}

fn log_invocation(log_file: Option<&PathBuf>) {
    let cwd = std::env::current_dir().ok();
    let argv: Vec<String> = std::env::args_os()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    tracing::info!("==================== new sweepsmith run ====================");
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        cwd = ?cwd,
        log_file = ?log_file,
        argv = ?argv,
        "sweepsmith_cli invoked"
    );
    tracing::info!("command_line={}", argv.join(" "));

    if let Ok(launcher) = std::env::var("SWEEPSMITH_LAUNCHER_COMMAND") {
        tracing::info!("launcher_command={launcher}");
    }

    if argv.len() >= 2 {
        tracing::info!(
            "cargo_repro_command=cargo run --release -p sweepsmith_cli -- {}",
            argv[1..].join(" ")
        );
    }
}

/// One line per combination and result, in variation order.
fn log_results_table(results: &ResultsCollection) {
    let params = results.params();
    let names: Vec<&str> = results
        .names()
        .filter(|name| *name != ELAPSED_TIME_RESULT)
        .collect();
    tracing::info!(
        variations = params.num_variations(),
        "Results: {}",
        names.iter().join(", ")
    );
    for name in names {
        let Some(accumulators) = results.get(name) else {
            continue;
        };
        for (combination, acc) in params.combinations().zip(accumulators) {
            let label = if params.unpacked_names().is_empty() {
                "-".to_string()
            } else {
                combination.to_string()
            };
            tracing::info!(
                "{:>5}  {:<12} {:<40} {}",
                combination.index(),
                name,
                label,
                acc.result()
            );
        }
    }
    if let Some(elapsed) = results.last(ELAPSED_TIME_RESULT) {
        tracing::info!("Elapsed: {}s", elapsed.result());
    }
}

fn run_plan(sweep: &SweepFile) -> Result<()> {
    ensure_experiment_supported(&sweep.experiment)?;
    let params = sweep.parameter_space()?;
    println!("experiment: {}", sweep.experiment);
    println!("parameters: {params}");
    println!("{} variations", params.num_variations());
    for combination in params.combinations() {
        println!("{:>5}  {combination}", combination.index());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_file = match &cli.command {
        Commands::Run(args) => {
            if args.no_file_log {
                None
            } else {
                Some(args.output_dir.join("sweepsmith.log"))
            }
        }
        Commands::Plan(_) => None,
    };

    match cli.command {
        Commands::Plan(args) => run_plan(&SweepFile::load(&args.sweep)?),
        Commands::Run(args) => {
            init_tracing(log_file.clone())?;
            log_invocation(log_file.as_ref());

            let sweep = SweepFile::load(&args.sweep)?;
            let quiet = args.quiet;
            let params = sweep.parameter_space()?;
            let (config, options) = args.into_config(&sweep)?;

            match run_builtin_sweep(&sweep.experiment, params, config, options)? {
                SweepOutcome::Completed(results) => {
                    if !quiet {
                        log_results_table(&results);
                    }
                }
                SweepOutcome::Variation(path) => {
                    tracing::info!(path = %path.display(), "Variation results written");
                }
            }
            Ok(())
        }
    }
}
