use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use crate::sweep_file::SweepFile;
use sweepsmith_builtin::BuiltinSweepOptions;
use sweepsmith_rs::{ProgressOutput, RunnerConfig};

/// Seed used when neither the command line nor the sweep file sets one.
const DEFAULT_SEED: u64 = 0;

#[derive(Parser, Debug)]
#[command(
    name = "sweepsmith",
    about = "Parameter-sweep simulation runner with checkpoint/resume"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a builtin experiment over every variation of a sweep file
    #[command(name = "run")]
    Run(RunArgs),
    /// Print the variations of a sweep file without running anything
    #[command(name = "plan")]
    Plan(PlanArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Sweep description (JSON)
    #[arg(long = "sweep", value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub sweep: PathBuf,

    /// Directory receiving results, checkpoints and the log file
    #[arg(long = "output-dir", value_hint = clap::ValueHint::DirPath)]
    pub output_dir: PathBuf,

    /// Repetition ceiling per variation (overrides the sweep file)
    #[arg(long = "rep-max")]
    pub rep_max: Option<usize>,

    /// Base seed for every per-variation RNG (overrides the sweep file)
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    /// Results filename template, `{param}` placeholders allowed
    #[arg(long = "results-filename")]
    pub results_filename: Option<String>,

    /// Run only this variation and write it to its own results file
    #[arg(long = "variation-index")]
    pub variation_index: Option<usize>,

    /// Worker threads; more than one runs variations in parallel
    #[arg(long = "workers", alias = "n-jobs")]
    pub workers: Option<usize>,

    /// Keep the checkpoint (and per-variation files) after completion
    #[arg(long = "keep-checkpoint", default_value_t = false)]
    pub keep_checkpoint: bool,

    /// Ignore any existing checkpoint and start over
    #[arg(long = "no-resume", default_value_t = false)]
    pub no_resume: bool,

    /// Where the progress bar goes
    #[arg(long = "progress", value_enum, default_value = "screen")]
    pub progress: ProgressValue,

    /// Disable writing sweepsmith.log into the output directory
    #[arg(long = "no-file-log", default_value_t = false)]
    pub no_file_log: bool,

    /// Suppress the progress bar and the per-result table
    #[arg(long = "quiet", default_value_t = false)]
    pub quiet: bool,
}

#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Sweep description (JSON)
    #[arg(long = "sweep", value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub sweep: PathBuf,
}

impl Cli {
    pub fn parse() -> Self {
        <Cli as Parser>::parse()
    }
}

impl RunArgs {
    /// Merge command-line flags over the sweep file's runner section.
    pub fn into_config(self, sweep: &SweepFile) -> Result<(RunnerConfig, BuiltinSweepOptions)> {
        let section = &sweep.runner;
        let mut config = RunnerConfig::new(self.seed.or(section.seed).unwrap_or(DEFAULT_SEED));
        config.output_dir = self.output_dir;
        if let Some(rep_max) = self.rep_max.or(section.rep_max) {
            anyhow::ensure!(rep_max > 0, "--rep-max must be at least 1");
            config.rep_max = rep_max;
        }
        config.results_filename = self
            .results_filename
            .or_else(|| section.results_filename.clone());
        config.keep_checkpoint = self.keep_checkpoint || section.keep_checkpoint.unwrap_or(false);
        config.resume = !self.no_resume;
        config.progress = self.progress.to_output();
        config.progress_message = section.progress_message.clone();
        if let Some(poll_ms) = section.progress_poll_ms {
            config.progress_poll_ms = poll_ms;
        }
        config.quiet = self.quiet;
        config.workers = normalize_workers(self.workers.or(section.workers));

        let options = BuiltinSweepOptions {
            variation_index: self.variation_index,
        };
        Ok((config, options))
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ProgressValue {
    Screen,
    File,
    Off,
}

impl ProgressValue {
    fn to_output(self) -> ProgressOutput {
        match self {
            ProgressValue::Screen => ProgressOutput::Screen,
            ProgressValue::File => ProgressOutput::File,
            ProgressValue::Off => ProgressOutput::Off,
        }
    }
}

fn normalize_workers(value: Option<usize>) -> usize {
    value.unwrap_or(1).max(1)
}
