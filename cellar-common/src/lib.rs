//! # Cellar Common Library
//!
//! Shared code for the Cellar catalog pipeline crates:
//! - Catalog record schema
//! - Configuration file discovery and loading
//! - Atomic file writes
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod record;
pub mod time;

pub use error::{Error, Result};
pub use record::{CatalogRecord, RecordPatch};
