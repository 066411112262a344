//! Multi-source record consolidation
//!
//! Folds records from an explicitly ordered list of provenance sources into
//! one record per external id. Later sources take precedence, so the result
//! depends on source order.
//!
//! **Merge rule for a known external id:**
//! - Non-null scalar fields on the incoming record overwrite existing values
//! - `metadata` merges key by key (incoming keys win, other keys survive)
//! - Lists (`tags`) and other containers are replaced wholesale
//! - The external id itself is never rewritten
//! - Records without an external id are dropped

use crate::error::{PipelineError, PipelineResult};
use cellar_common::CatalogRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Records from one provenance source
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    pub name: String,
    pub records: Vec<CatalogRecord>,
    /// Items in the source files that did not decode as records
    pub malformed: usize,
}

impl SourceBatch {
    pub fn new(name: impl Into<String>, records: Vec<CatalogRecord>) -> Self {
        Self {
            name: name.into(),
            records,
            malformed: 0,
        }
    }
}

/// Consolidation counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    /// Records seen across all sources
    pub total_seen: usize,
    /// Distinct external ids produced
    pub unique_ids: usize,
    /// Records dropped for lacking an external id
    pub dropped: usize,
    /// Records that merged into an existing entry
    pub merged: usize,
    /// Items skipped because they did not decode as records
    #[serde(default)]
    pub malformed: usize,
}

impl ConsolidationReport {
    pub fn display_string(&self) -> String {
        format!(
            "{} unique records from {} seen ({} merged, {} dropped without externalId, {} malformed)",
            self.unique_ids, self.total_seen, self.merged, self.dropped, self.malformed
        )
    }
}

/// External id to best-known record, in first-seen order
#[derive(Debug, Clone, Default)]
pub struct ConsolidationMap {
    index: HashMap<String, usize>,
    records: Vec<CatalogRecord>,
}

impl ConsolidationMap {
    pub fn get(&self, external_id: &str) -> Option<&CatalogRecord> {
        self.index.get(external_id).map(|&i| &self.records[i])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Final record list in first-seen order
    pub fn into_records(self) -> Vec<CatalogRecord> {
        self.records
    }

    /// Insert or deep-merge one record
    ///
    /// `None` when the record has no key, `Some(true)` when it merged into an
    /// existing entry.
    fn upsert(&mut self, mut record: CatalogRecord) -> Option<bool> {
        let key = record.key()?.to_string();
        match self.index.get(&key) {
            Some(&i) => {
                merge_into(&mut self.records[i], record);
                Some(true)
            }
            None => {
                record.external_id = Some(key.clone());
                self.index.insert(key, self.records.len());
                self.records.push(record);
                Some(false)
            }
        }
    }
}

/// Merges ordered provenance sources
#[derive(Debug, Default)]
pub struct SourceConsolidator {
    map: ConsolidationMap,
    report: ConsolidationReport,
}

impl SourceConsolidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one source on top of everything folded so far
    pub fn fold(&mut self, batch: SourceBatch) {
        let before = self.report.clone();
        self.report.malformed += batch.malformed;
        for record in batch.records {
            self.report.total_seen += 1;
            match self.map.upsert(record) {
                Some(true) => self.report.merged += 1,
                Some(false) => {}
                None => self.report.dropped += 1,
            }
        }
        self.report.unique_ids = self.map.len();

        tracing::info!(
            source = %batch.name,
            records = self.report.total_seen - before.total_seen,
            merged = self.report.merged - before.merged,
            dropped = self.report.dropped - before.dropped,
            malformed = batch.malformed,
            unique = self.report.unique_ids,
            "Folded source"
        );
    }

    pub fn finish(self) -> (ConsolidationMap, ConsolidationReport) {
        (self.map, self.report)
    }

    /// Consolidate sources listed lowest to highest precedence
    pub fn consolidate(sources: Vec<SourceBatch>) -> (ConsolidationMap, ConsolidationReport) {
        let mut consolidator = Self::new();
        for source in sources {
            consolidator.fold(source);
        }
        consolidator.finish()
    }
}

macro_rules! overwrite_if_present {
    ($target:expr, $incoming:expr, $($field:ident),+ $(,)?) => {
        $(
            if $incoming.$field.is_some() {
                $target.$field = $incoming.$field;
            }
        )+
    };
}

/// Deep-merge `incoming` into `existing`
pub fn merge_into(existing: &mut CatalogRecord, incoming: CatalogRecord) {
    overwrite_if_present!(
        existing,
        incoming,
        id,
        name,
        volume,
        abv,
        description,
        distillery,
        country,
        region,
        category,
        subcategory,
        source,
        status,
        image_url,
        thumbnail_url,
        tags,
    );

    if let Some(metadata) = incoming.metadata {
        let target = existing.metadata_mut();
        for (key, value) in metadata {
            target.insert(key, value);
        }
    }

    for (key, value) in incoming.extra {
        if !value.is_null() {
            existing.extra.insert(key, value);
        }
    }
}

/// Expand a source path list into files
///
/// Directories contribute their `*.json` files sorted by file name.
pub fn expand_source_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let entries: Vec<PathBuf> = WalkDir::new(path)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
                .collect();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }
    files
}

/// Records decoded from one dataset file
#[derive(Debug, Default)]
pub struct DatasetFile {
    pub records: Vec<CatalogRecord>,
    /// Items skipped because they did not decode as records
    pub malformed: usize,
}

/// Read a JSON dataset: either an array of records or a single record
///
/// An unreadable file or a top level that is neither an array nor an object
/// is a [`PipelineError::Dataset`]. Items that fail to decode are logged and
/// skipped.
pub fn load_records(path: &Path) -> PipelineResult<DatasetFile> {
    let content = std::fs::read(path)
        .map_err(|e| PipelineError::Dataset(format!("{}: {}", path.display(), e)))?;
    let value: Value = serde_json::from_slice(&content)
        .map_err(|e| PipelineError::Dataset(format!("{}: {}", path.display(), e)))?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(_) => vec![value],
        _ => {
            return Err(PipelineError::Dataset(format!(
                "{}: expected a JSON array of records",
                path.display()
            )))
        }
    };

    let mut dataset = DatasetFile::default();
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<CatalogRecord>(item) {
            Ok(record) => dataset.records.push(record),
            Err(e) => {
                tracing::warn!(file = %path.display(), index, error = %e, "Skipping malformed record");
                dataset.malformed += 1;
            }
        }
    }
    Ok(dataset)
}

/// Load one named source from files and directories
///
/// Unreadable files are logged and skipped.
pub fn load_source(name: &str, paths: &[PathBuf]) -> SourceBatch {
    let mut batch = SourceBatch::new(name, Vec::new());
    for file in expand_source_paths(paths) {
        match load_records(&file) {
            Ok(mut loaded) => {
                tracing::debug!(
                    source = name,
                    file = %file.display(),
                    count = loaded.records.len(),
                    malformed = loaded.malformed,
                    "Loaded source file"
                );
                batch.records.append(&mut loaded.records);
                batch.malformed += loaded.malformed;
            }
            Err(e) => {
                tracing::warn!(source = name, file = %file.display(), error = %e, "Skipping unreadable source file");
            }
        }
    }
    batch
}
