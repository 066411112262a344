//! cellar-pipeline library interface
//!
//! Catalog ingest for spirits records:
//! - [`extraction`]: pull volume, strength and descriptors out of product names
//! - [`services::normalizer`]: reconcile extracted values with stored fields
//! - [`services::consolidator`]: merge multi-source record sets by external id
//! - [`workflow`]: resumable, checkpointed batch runs over a dataset

pub mod config;
pub mod db;
pub mod error;
pub mod extraction;
pub mod services;
pub mod utils;
pub mod workflow;

pub use crate::error::{PipelineError, PipelineResult};
pub use crate::extraction::{extract, ExtractionResult, FieldExtractor};
