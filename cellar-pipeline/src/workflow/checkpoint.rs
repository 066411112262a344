//! Resumable batch checkpoint
//!
//! One JSON file per source dataset and step:
//! `{"sourceIdentifier": "...", "nextIndex": 120, "timestamp": 1700000000.5}`
//!
//! The file is rewritten atomically after every committed batch. A checkpoint
//! whose source identifier does not match the current run is ignored.

use crate::error::{PipelineError, PipelineResult};
use cellar_common::config::{read_json, write_json_atomic};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Persisted cursor for one source dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineCheckpoint {
    pub source_identifier: String,
    /// First item not yet durably processed
    pub next_index: usize,
    /// Unix seconds of the last write
    pub timestamp: f64,
}

impl PipelineCheckpoint {
    pub fn new(source_identifier: impl Into<String>, next_index: usize) -> Self {
        Self {
            source_identifier: source_identifier.into(),
            next_index,
            timestamp: cellar_common::time::unix_timestamp(),
        }
    }
}

/// Progress of a source relative to its length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointState {
    NotStarted,
    InProgress(usize),
    Completed,
}

impl CheckpointState {
    /// Classify a checkpoint against the current dataset length
    pub fn classify(checkpoint: Option<&PipelineCheckpoint>, total_items: usize) -> Self {
        match checkpoint {
            None => Self::NotStarted,
            Some(cp) if cp.next_index >= total_items => Self::Completed,
            Some(cp) if cp.next_index == 0 => Self::NotStarted,
            Some(cp) => Self::InProgress(cp.next_index),
        }
    }

    /// Index processing starts from
    pub fn start_index(&self, total_items: usize) -> usize {
        match self {
            Self::NotStarted => 0,
            Self::InProgress(next) => *next,
            Self::Completed => total_items,
        }
    }
}

impl fmt::Display for CheckpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "NotStarted"),
            Self::InProgress(next) => write!(f, "InProgress({next})"),
            Self::Completed => write!(f, "Completed"),
        }
    }
}

/// Location of a checkpoint on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Checkpoint for `step` over `source_path` inside `state_dir`
    pub fn for_source(state_dir: &Path, step: &str, source_path: &Path) -> Self {
        let stem = source_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source".to_string());
        Self::new(state_dir.join(format!("{step}_{stem}.checkpoint.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the checkpoint if present
    ///
    /// An unreadable or corrupt file is logged and treated as absent, so the
    /// run starts from the beginning.
    pub fn load(&self) -> Option<PipelineCheckpoint> {
        if !self.path.exists() {
            return None;
        }
        match read_json(&self.path) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to load checkpoint, starting from the beginning");
                None
            }
        }
    }

    /// Read the checkpoint only if it belongs to `source_identifier`
    pub fn load_for(&self, source_identifier: &str) -> Option<PipelineCheckpoint> {
        let checkpoint = self.load()?;
        if checkpoint.source_identifier != source_identifier {
            tracing::info!(
                found = %checkpoint.source_identifier,
                expected = %source_identifier,
                "Checkpoint belongs to another source, ignoring"
            );
            return None;
        }
        Some(checkpoint)
    }

    /// Persist the cursor; failure is fatal for the run
    pub fn save(&self, source_identifier: &str, next_index: usize) -> PipelineResult<PipelineCheckpoint> {
        let checkpoint = PipelineCheckpoint::new(source_identifier, next_index);
        write_json_atomic(&self.path, &checkpoint).map_err(|e| {
            PipelineError::Checkpoint(format!("{}: {}", self.path.display(), e))
        })?;
        tracing::debug!(path = %self.path.display(), next_index, "Checkpoint saved");
        Ok(checkpoint)
    }

    /// Delete the checkpoint; returns whether a file was removed
    pub fn reset(&self) -> PipelineResult<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PipelineError::Checkpoint(format!("{}: {}", self.path.display(), e))),
        }
    }
}
