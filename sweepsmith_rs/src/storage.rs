use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::results::ResultsCollection;

/// Bumped whenever the checkpoint layout changes incompatibly.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Snapshot of a partially completed sweep.
///
/// `results` carries the parameter space that produced it; resume compares
/// that space structurally. The fingerprint and timestamp are only there so
/// a stale file can be identified by eye.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub params_fingerprint: String,
    pub saved_at: DateTime<Utc>,
    /// Number of combinations whose results are included, counted from
    /// variation 0.
    pub completed: usize,
    pub runned_reps: Vec<usize>,
    pub elapsed_secs: f64,
    pub results: ResultsCollection,
}

impl Checkpoint {
    pub fn new(results: ResultsCollection, runned_reps: Vec<usize>, elapsed_secs: f64) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            params_fingerprint: results.params().fingerprint(),
            saved_at: Utc::now(),
            completed: runned_reps.len(),
            runned_reps,
            elapsed_secs,
            results,
        }
    }
}

/// Serialize `value` to a temporary sibling file and rename it over `path`,
/// so readers never observe a half-written document.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Unable to create {}", parent.display()))?;
        }
    }
    let buf = serde_json::to_vec_pretty(value)
        .with_context(|| format!("Unable to serialize {}", path.display()))?;
    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("Unable to write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "Unable to move {} into place at {}",
            tmp_path.display(),
            path.display()
        )
    })?;
    debug!(path = %path.display(), bytes = buf.len(), "Wrote JSON document");
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).with_context(|| format!("Unable to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Unable to parse {}", path.display()))
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Checkpoint location for a results file: `<stem>_checkpoint.json` in the
/// same directory.
pub fn checkpoint_path(results_path: &Path) -> PathBuf {
    with_stem_suffix(results_path, "_checkpoint", "json")
}

/// `<dir>/<stem><suffix>.<extension>` for `path`.
pub fn with_stem_suffix(path: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}{suffix}.{extension}"))
}

pub fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<()> {
    write_json_atomic(path, checkpoint)?;
    debug!(
        path = %path.display(),
        completed = checkpoint.completed,
        "Checkpoint saved"
    );
    Ok(())
}

/// Load a checkpoint, `None` when no file exists.
pub fn load_checkpoint(path: &Path) -> Result<Option<Checkpoint>> {
    if !path.exists() {
        return Ok(None);
    }
    let checkpoint: Checkpoint = read_json(path)?;
    anyhow::ensure!(
        checkpoint.version == CHECKPOINT_VERSION,
        "Checkpoint {} has version {}, expected {}",
        path.display(),
        checkpoint.version,
        CHECKPOINT_VERSION
    );
    info!(
        path = %path.display(),
        completed = checkpoint.completed,
        saved_at = %checkpoint.saved_at,
        fingerprint = %checkpoint.params_fingerprint,
        "Loaded checkpoint"
    );
    Ok(Some(checkpoint))
}

/// Remove a file if present. Missing files are not an error.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => {
            Err(error).with_context(|| format!("Unable to remove {}", path.display()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::Accumulator;

    #[test]
    fn checkpoint_path_sits_next_to_results() {
        let path = Path::new("/tmp/out/results_bias_1.3.json");
        assert_eq!(
            checkpoint_path(path),
            PathBuf::from("/tmp/out/results_bias_1.3_checkpoint.json")
        );
    }

    #[test]
    fn missing_checkpoint_loads_as_none() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(load_checkpoint(&dir.path().join("nothing.json"))?.is_none());
        Ok(())
    }

    #[test]
    fn checkpoint_roundtrip_and_no_tmp_left_behind() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("run_checkpoint.json");
        let results = ResultsCollection::from_accumulators([Accumulator::sum_of("s", 3.0)]);
        let checkpoint = Checkpoint::new(results.clone(), vec![2, 1], 0.5);

        save_checkpoint(&path, &checkpoint)?;
        assert!(!tmp_path_for(&path).exists());

        let loaded = load_checkpoint(&path)?.expect("checkpoint present");
        assert_eq!(loaded.completed, 2);
        assert_eq!(loaded.runned_reps, vec![2, 1]);
        assert_eq!(loaded.results, results);
        assert_eq!(loaded.params_fingerprint, results.params().fingerprint());
        Ok(())
    }

    #[test]
    fn remove_if_exists_tolerates_missing_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("gone.json");
        remove_if_exists(&path)?;
        fs::write(&path, b"{}")?;
        remove_if_exists(&path)?;
        assert!(!path.exists());
        Ok(())
    }
}
