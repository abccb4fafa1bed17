use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where the runner's own progress bar is written.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProgressOutput {
    /// No bar at all.
    Off,
    /// Redraw in place on stdout.
    #[default]
    Screen,
    /// Append renders to `<results stem>_progress.txt` next to the results.
    File,
}

fn default_rep_max() -> usize {
    1
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_resume() -> bool {
    true
}

fn default_progress_poll_ms() -> u64 {
    250
}

fn default_workers() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Repetition ceiling per combination. The early-stop predicate may end
    /// a combination sooner.
    #[serde(default = "default_rep_max")]
    pub rep_max: usize,
    /// Directory receiving the results file, its checkpoint, and any
    /// per-variation files written in single-index mode.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Results filename template, `{name}` placeholders allowed. `None`
    /// disables persistence entirely (no checkpoint, no final file).
    #[serde(default)]
    pub results_filename: Option<String>,
    /// Keep the checkpoint after a completed sweep instead of deleting it.
    #[serde(default)]
    pub keep_checkpoint: bool,
    /// Reload an existing checkpoint and skip combinations it already holds.
    #[serde(default = "default_resume")]
    pub resume: bool,
    /// Base seed every per-combination RNG is derived from.
    pub seed: u64,
    #[serde(default)]
    pub progress: ProgressOutput,
    /// Message shown next to the bar; `{count}` and `{final}` are replaced.
    #[serde(default)]
    pub progress_message: Option<String>,
    #[serde(default = "default_progress_poll_ms")]
    pub progress_poll_ms: u64,
    #[serde(default)]
    pub quiet: bool,
    /// Worker threads used by the parallel dispatcher. 1 runs sequentially.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl RunnerConfig {
    pub fn new(seed: u64) -> Self {
        Self {
            rep_max: default_rep_max(),
            output_dir: default_output_dir(),
            results_filename: None,
            keep_checkpoint: false,
            resume: default_resume(),
            seed,
            progress: ProgressOutput::Off,
            progress_message: None,
            progress_poll_ms: default_progress_poll_ms(),
            quiet: false,
            workers: default_workers(),
        }
    }

    pub fn progress_poll_interval(&self) -> Duration {
        Duration::from_millis(self.progress_poll_ms.max(1))
    }

    /// Bar output after applying `quiet`.
    pub fn effective_progress(&self) -> ProgressOutput {
        if self.quiet {
            ProgressOutput::Off
        } else {
            self.progress
        }
    }
}
