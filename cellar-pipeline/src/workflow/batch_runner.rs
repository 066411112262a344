//! Sequential, resumable batch driver
//!
//! Walks a dataset in fixed-size batches from the checkpointed position,
//! handing each batch to a [`BatchProcessor`].
//!
//! **Per batch:**
//! 1. Process the batch (external calls, commit)
//! 2. On success: advance the checkpoint past the batch
//! 3. On a non-fatal failure: count the batch as errored and skip it. The
//!    checkpoint stays at the failed batch for the rest of the run, so the
//!    next run retries it (later batches are still processed and must be
//!    safe to repeat).
//! 4. On a fatal failure (checkpoint write, unreadable data): abort the run
//! 5. Pause before the next batch

use super::checkpoint::{CheckpointFile, CheckpointState};
use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use cellar_common::CatalogRecord;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Half-open index range of a batch within the dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRange {
    pub start: usize,
    pub end: usize,
}

impl BatchRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// One-based inclusive form used in log lines ("11-20")
    pub fn display_string(&self) -> String {
        format!("{}-{}", self.start + 1, self.end)
    }
}

/// Counts reported by a processor for one committed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub processed: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// One pipeline step applied batch by batch
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    /// Step name used for checkpoint files and logs
    fn step_name(&self) -> &'static str;

    /// Process and commit one batch
    ///
    /// An `Err` means nothing in the batch may be considered committed.
    async fn process(&self, batch: &[CatalogRecord], range: BatchRange) -> PipelineResult<BatchOutcome>;
}

/// Batch driver settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerOptions {
    pub batch_size: usize,
    /// Maximum items handled in one run
    pub item_limit: usize,
    pub batch_delay: Duration,
    /// Upper bound of random extra delay between batches
    pub batch_delay_jitter: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            item_limit: 100,
            batch_delay: Duration::from_millis(2000),
            batch_delay_jitter: Duration::ZERO,
        }
    }
}

/// Summary of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub step: String,
    pub source_identifier: String,
    pub total_items: usize,
    pub start_index: usize,
    /// Exclusive end of the range this run covered
    pub end_index: usize,
    /// Checkpoint position after the run
    pub next_index: usize,
    pub processed: usize,
    pub updated: usize,
    pub skipped: usize,
    /// Items in failed batches
    pub errors: usize,
    pub failed_batches: usize,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl RunReport {
    fn new(step: &str, source_identifier: &str, total_items: usize, start_index: usize) -> Self {
        let now = cellar_common::time::now();
        Self {
            run_id: Uuid::new_v4(),
            step: step.to_string(),
            source_identifier: source_identifier.to_string(),
            total_items,
            start_index,
            end_index: start_index,
            next_index: start_index,
            processed: 0,
            updated: 0,
            skipped: 0,
            errors: 0,
            failed_batches: 0,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.next_index >= self.total_items
    }

    pub fn progress_percent(&self) -> u32 {
        if self.total_items == 0 {
            return 100;
        }
        (self.next_index.min(self.total_items) * 100 / self.total_items) as u32
    }

    pub fn display_string(&self) -> String {
        let next = if self.is_complete() {
            "DONE".to_string()
        } else {
            self.next_index.to_string()
        };
        format!(
            "Processed {} (updated {}, skipped {}, errors {} in {} failed batches), next start index {}, progress {} / {} ({}%)",
            self.processed,
            self.updated,
            self.skipped,
            self.errors,
            self.failed_batches,
            next,
            self.next_index.min(self.total_items),
            self.total_items,
            self.progress_percent()
        )
    }
}

/// Drives a processor over a dataset
pub struct BatchRunner {
    options: RunnerOptions,
    /// `None` runs from the start without persisting progress (dry runs)
    checkpoint: Option<CheckpointFile>,
}

impl BatchRunner {
    pub fn new(options: RunnerOptions, checkpoint: Option<CheckpointFile>) -> Self {
        Self {
            options: RunnerOptions {
                batch_size: options.batch_size.max(1),
                ..options
            },
            checkpoint,
        }
    }

    /// Current checkpoint state for a dataset of `total_items`
    pub fn state(&self, source_identifier: &str, total_items: usize) -> CheckpointState {
        let checkpoint = self.checkpoint.as_ref().and_then(|c| c.load_for(source_identifier));
        CheckpointState::classify(checkpoint.as_ref(), total_items)
    }

    pub async fn run(
        &self,
        records: &[CatalogRecord],
        source_identifier: &str,
        processor: &dyn BatchProcessor,
    ) -> PipelineResult<RunReport> {
        let total_items = records.len();
        let state = self.state(source_identifier, total_items);
        let start_index = state.start_index(total_items);
        let mut report = RunReport::new(processor.step_name(), source_identifier, total_items, start_index);

        if state == CheckpointState::Completed || start_index >= total_items {
            tracing::info!(run_id = %report.run_id, source = %source_identifier, "All items in this source have been processed");
            report.end_index = total_items;
            report.next_index = total_items;
            return Ok(report);
        }

        let end_index = start_index.saturating_add(self.options.item_limit).min(total_items);
        report.end_index = end_index;

        tracing::info!(
            run_id = %report.run_id,
            step = processor.step_name(),
            source = %source_identifier,
            start_index,
            end_index,
            batch_size = self.options.batch_size,
            state = %state,
            "Starting batch run"
        );

        let mut committed_to = start_index;
        let mut checkpoint_frozen = false;

        for batch_start in (start_index..end_index).step_by(self.options.batch_size) {
            let range = BatchRange {
                start: batch_start,
                end: (batch_start + self.options.batch_size).min(end_index),
            };
            let batch = &records[range.start..range.end];

            tracing::info!(
                run_id = %report.run_id,
                batch = %range.display_string(),
                total = total_items,
                "Processing batch"
            );

            match processor.process(batch, range).await {
                Ok(outcome) => {
                    report.processed += outcome.processed;
                    report.updated += outcome.updated;
                    report.skipped += outcome.skipped;

                    if !checkpoint_frozen {
                        if let Some(file) = &self.checkpoint {
                            file.save(source_identifier, range.end)?;
                        }
                        committed_to = range.end;
                    }
                    tracing::info!(batch = %range.display_string(), next_index = committed_to, "Batch completed");
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(run_id = %report.run_id, batch = %range.display_string(), error = %e, "Fatal error, aborting run");
                    return Err(e);
                }
                Err(e) => {
                    report.errors += range.len();
                    report.failed_batches += 1;
                    if !checkpoint_frozen {
                        checkpoint_frozen = true;
                        tracing::warn!(
                            batch = %range.display_string(),
                            error = %e,
                            next_index = committed_to,
                            "Skipping batch due to error, checkpoint held for retry"
                        );
                    } else {
                        tracing::warn!(batch = %range.display_string(), error = %e, "Skipping batch due to error");
                    }
                }
            }

            if range.end < end_index {
                self.pause().await;
            }
        }

        report.next_index = committed_to;
        report.finished_at = cellar_common::time::now();

        tracing::info!(
            run_id = %report.run_id,
            processed = report.processed,
            updated = report.updated,
            errors = report.errors,
            next_index = report.next_index,
            "Batch run finished"
        );

        Ok(report)
    }

    async fn pause(&self) {
        let jitter_ms = self.options.batch_delay_jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        let delay = self.options.batch_delay + jitter;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Reject option combinations that could never make progress
pub fn validate_options(options: &RunnerOptions) -> PipelineResult<()> {
    if options.item_limit == 0 {
        return Err(PipelineError::Common(cellar_common::Error::InvalidInput(
            "item_limit must be at least 1".to_string(),
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<BatchRange>>,
        fail_starts: Vec<usize>,
        fatal_at: Option<usize>,
    }

    impl Recorder {
        fn new(fail_starts: Vec<usize>) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                fail_starts,
                fatal_at: None,
            }
        }
    }

    #[async_trait]
    impl BatchProcessor for Recorder {
        fn step_name(&self) -> &'static str {
            "test"
        }

        async fn process(&self, batch: &[CatalogRecord], range: BatchRange) -> PipelineResult<BatchOutcome> {
            self.seen.lock().unwrap().push(range);
            if self.fatal_at == Some(range.start) {
                return Err(PipelineError::Dataset("gone".into()));
            }
            if self.fail_starts.contains(&range.start) {
                return Err(PipelineError::external("enrichment", "HTTP 500"));
            }
            Ok(BatchOutcome {
                processed: batch.len(),
                updated: batch.len(),
                skipped: 0,
            })
        }
    }

    fn records(n: usize) -> Vec<CatalogRecord> {
        (0..n).map(|i| CatalogRecord::new(format!("ID-{i}"), format!("Item {i}"))).collect()
    }

    fn options(batch_size: usize, item_limit: usize) -> RunnerOptions {
        RunnerOptions {
            batch_size,
            item_limit,
            batch_delay: Duration::ZERO,
            batch_delay_jitter: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_partial_last_batch() {
        let dir = tempfile::tempdir().unwrap();
        let runner = BatchRunner::new(options(4, 100), Some(CheckpointFile::new(dir.path().join("cp.json"))));
        let processor = Recorder::new(vec![]);

        let report = runner.run(&records(10), "src", &processor).await.unwrap();
        assert_eq!(
            *processor.seen.lock().unwrap(),
            vec![
                BatchRange { start: 0, end: 4 },
                BatchRange { start: 4, end: 8 },
                BatchRange { start: 8, end: 10 },
            ]
        );
        assert_eq!(report.next_index, 10);
        assert!(report.is_complete());
        assert_eq!(report.progress_percent(), 100);
        assert_eq!(runner.state("src", 10), CheckpointState::Completed);
    }

    #[tokio::test]
    async fn test_failed_batch_holds_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let file = CheckpointFile::new(dir.path().join("cp.json"));
        let runner = BatchRunner::new(options(10, 50), Some(file.clone()));
        let processor = Recorder::new(vec![20]);

        let report = runner.run(&records(100), "src", &processor).await.unwrap();
        assert_eq!(processor.seen.lock().unwrap().len(), 5);
        assert_eq!(report.next_index, 20);
        assert_eq!(report.errors, 10);
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.processed, 40);
        assert_eq!(file.load().unwrap().next_index, 20);

        let retry = Recorder::new(vec![]);
        let report = runner.run(&records(100), "src", &retry).await.unwrap();
        assert_eq!(retry.seen.lock().unwrap()[0], BatchRange { start: 20, end: 30 });
        assert_eq!(report.next_index, 70);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts() {
        let runner = BatchRunner::new(options(10, 100), None);
        let mut processor = Recorder::new(vec![]);
        processor.fatal_at = Some(10);

        let result = runner.run(&records(30), "src", &processor).await;
        assert!(matches!(result, Err(PipelineError::Dataset(_))));
        assert_eq!(processor.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_without_checkpoint_always_starts_at_zero() {
        let runner = BatchRunner::new(options(5, 5), None);
        let processor = Recorder::new(vec![]);
        runner.run(&records(20), "src", &processor).await.unwrap();
        let report = runner.run(&records(20), "src", &processor).await.unwrap();
        assert_eq!(report.start_index, 0);
        assert_eq!(report.next_index, 5);
    }

    #[tokio::test]
    async fn test_other_source_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let file = CheckpointFile::new(dir.path().join("cp.json"));
        file.save("old.json", 8).unwrap();

        let runner = BatchRunner::new(options(5, 5), Some(file));
        let report = runner.run(&records(20), "new.json", &Recorder::new(vec![])).await.unwrap();
        assert_eq!(report.start_index, 0);
        assert_eq!(report.next_index, 5);
    }

    #[test]
    fn test_display_string() {
        let mut report = RunReport::new("run", "src", 500, 0);
        report.next_index = 100;
        report.processed = 100;
        assert!(report.display_string().contains("next start index 100, progress 100 / 500 (20%)"));
        report.next_index = 500;
        assert!(report.display_string().contains("DONE"));
    }

    #[test]
    fn test_zero_limit_rejected() {
        assert!(validate_options(&options(10, 0)).is_err());
        assert!(validate_options(&options(10, 1)).is_ok());
    }
}
