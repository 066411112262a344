//! Record persistence collaborators
//!
//! The pipeline talks to persistence through [`RecordStore`]. A store handle
//! is built once by the caller and passed by reference into processors.

use crate::db;
use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use cellar_common::{CatalogRecord, RecordPatch};
use sqlx::SqlitePool;
use std::time::Duration;

const COLLABORATOR: &str = "record store";
const USER_AGENT: &str = concat!("cellar-pipeline/", env!("CARGO_PKG_VERSION"));

/// Persistence store supporting get/patch by id and upsert
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Store kind for logging
    fn kind(&self) -> &'static str;

    async fn get(&self, id: &str) -> PipelineResult<Option<CatalogRecord>>;

    async fn patch(&self, id: &str, patch: &RecordPatch) -> PipelineResult<()>;

    /// Insert or replace, keyed by external id
    async fn upsert(&self, record: &CatalogRecord) -> PipelineResult<()>;
}

/// Local SQLite store
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, id: &str) -> PipelineResult<Option<CatalogRecord>> {
        Ok(db::records::load_record(&self.pool, id).await?)
    }

    async fn patch(&self, id: &str, patch: &RecordPatch) -> PipelineResult<()> {
        let mut record = db::records::load_record(&self.pool, id)
            .await?
            .ok_or_else(|| PipelineError::Store(format!("record {id} not found")))?;
        record.apply_patch(patch);
        db::records::save_record(&self.pool, &record).await?;
        tracing::debug!(id = %id, "Patched record");
        Ok(())
    }

    async fn upsert(&self, record: &CatalogRecord) -> PipelineResult<()> {
        db::records::save_record(&self.pool, record).await?;
        Ok(())
    }
}

/// REST store: `{base_url}/spirits/{id}`
pub struct HttpRecordStore {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpRecordStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> PipelineResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::external(COLLABORATOR, e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, id: &str) -> String {
        format!("{}/spirits/{}", self.base_url, id)
    }

    async fn check(response: reqwest::Response) -> PipelineResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(PipelineError::external(
            COLLABORATOR,
            format!("HTTP {}: {}", status.as_u16(), body),
        ))
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn get(&self, id: &str) -> PipelineResult<Option<CatalogRecord>> {
        let response = self
            .http_client
            .get(self.url(id))
            .send()
            .await
            .map_err(|e| PipelineError::external(COLLABORATOR, e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let record = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| PipelineError::external(COLLABORATOR, e.to_string()))?;
        Ok(Some(record))
    }

    async fn patch(&self, id: &str, patch: &RecordPatch) -> PipelineResult<()> {
        tracing::debug!(id = %id, url = %self.url(id), "PATCH record");
        let response = self
            .http_client
            .patch(self.url(id))
            .json(patch)
            .send()
            .await
            .map_err(|e| PipelineError::external(COLLABORATOR, e.to_string()))?;
        Self::check(response).await?;
        Ok(())
    }

    async fn upsert(&self, record: &CatalogRecord) -> PipelineResult<()> {
        let id = record
            .store_id()
            .ok_or_else(|| PipelineError::Store("record has no id or externalId".to_string()))?;
        let response = self
            .http_client
            .put(self.url(id))
            .json(record)
            .send()
            .await
            .map_err(|e| PipelineError::external(COLLABORATOR, e.to_string()))?;
        Self::check(response).await?;
        Ok(())
    }
}
