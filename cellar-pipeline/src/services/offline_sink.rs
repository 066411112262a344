//! Offline batch sink
//!
//! In offline mode committed batches are written to local JSON files instead
//! of the record store:
//! `batch_{sourceStem}_{batchStart}_{batchEnd}_{unixTs}.json`

use crate::error::{PipelineError, PipelineResult};
use cellar_common::config::write_json_atomic;
use cellar_common::CatalogRecord;
use std::path::{Path, PathBuf};

pub struct OfflineSink {
    dir: PathBuf,
}

impl OfflineSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File name for a batch of `source_path`
    pub fn batch_file_name(source_path: &Path, start: usize, end: usize, unix_ts: i64) -> String {
        let stem = source_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source".to_string());
        format!("batch_{stem}_{start}_{end}_{unix_ts}.json")
    }

    /// Write one committed batch; returns the file written
    pub fn write_batch(
        &self,
        source_path: &Path,
        start: usize,
        end: usize,
        records: &[CatalogRecord],
    ) -> PipelineResult<PathBuf> {
        let name = Self::batch_file_name(source_path, start, end, cellar_common::time::now().timestamp());
        let path = self.dir.join(name);
        write_json_atomic(&path, records).map_err(|e| {
            PipelineError::external("offline sink", format!("{}: {}", path.display(), e))
        })?;
        tracing::info!(path = %path.display(), records = records.len(), "Saved batch offline");
        Ok(path)
    }
}
