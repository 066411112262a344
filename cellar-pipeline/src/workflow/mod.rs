//! Resumable batch workflow
//!
//! # Architecture
//!
//! A run walks one source dataset in dataset order:
//! 1. Load the checkpoint for the source and step
//! 2. Hand fixed-size batches to a [`BatchProcessor`] one at a time
//! 3. Advance the checkpoint after each committed batch
//!
//! Processing is strictly sequential. Interrupting a run mid-batch leaves the
//! checkpoint before that batch, so it is processed again in full next time.

pub mod batch_runner;
pub mod checkpoint;
pub mod processors;

pub use batch_runner::{BatchOutcome, BatchProcessor, BatchRange, BatchRunner, RunReport, RunnerOptions};
pub use checkpoint::{CheckpointFile, CheckpointState, PipelineCheckpoint};
pub use processors::{CommitTarget, EnrichmentProcessor, NormalizeProcessor};
