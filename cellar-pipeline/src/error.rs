//! Error types for cellar-pipeline
//!
//! Errors are split by how the batch runner reacts to them: fatal errors
//! abort the run, everything else skips the current batch and leaves the
//! checkpoint where it was.

use thiserror::Error;

/// Pipeline result type
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Pipeline error type
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Checkpoint could not be read or persisted (fatal)
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// An external collaborator (enrichment, image lookup, store) failed
    #[error("{collaborator} failed: {message}")]
    External {
        collaborator: &'static str,
        message: String,
    },

    /// Record store rejected or could not serve a request
    #[error("Record store error: {0}")]
    Store(String),

    /// Source dataset could not be read (fatal)
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// cellar-common error
    #[error("Common error: {0}")]
    Common(#[from] cellar_common::Error),
}

impl PipelineError {
    pub fn external(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::External {
            collaborator,
            message: message.into(),
        }
    }

    /// Whether the run must stop instead of skipping the batch
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Checkpoint(_) | Self::Dataset(_))
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        Self::external("http", err.to_string())
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Common(cellar_common::Error::Json(err))
    }
}
