//! Utility modules for cellar-pipeline

pub mod retry;

pub use retry::{retry_with_backoff, RetryPolicy};
