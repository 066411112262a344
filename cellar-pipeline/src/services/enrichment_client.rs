//! Generative enrichment collaborator
//!
//! Sends a batch of `{id, name, category}` items to an enrichment endpoint
//! and applies the returned fields (region, subcategory, refined distillery,
//! tasting tags, description) to the records.

use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use cellar_common::CatalogRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

const COLLABORATOR: &str = "enrichment";

pub const STATUS_ENRICHED: &str = "ENRICHED";

/// One item sent for enrichment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRequest {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_en: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distillery: Option<String>,
    #[serde(default)]
    pub category: String,
}

impl EnrichmentRequest {
    /// Build a request; `None` for records without a key or name
    pub fn from_record(record: &CatalogRecord) -> Option<Self> {
        Some(Self {
            id: record.key()?.to_string(),
            name: record.display_name()?.to_string(),
            name_en: record
                .metadata
                .as_ref()
                .and_then(|m| m.get("name_en"))
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string),
            distillery: record.distillery.clone(),
            category: record.category.clone().unwrap_or_default(),
        })
    }
}

/// Fields returned for one item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub id: String,
    #[serde(default)]
    pub abv: Option<f64>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub distillery_refined: Option<String>,
    #[serde(default)]
    pub nose_tags: Vec<String>,
    #[serde(default)]
    pub palate_tags: Vec<String>,
    #[serde(default)]
    pub finish_tags: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl Enrichment {
    /// Fold the enrichment into a record
    ///
    /// Strength is only filled when the record has none: a value read from
    /// the product name is kept over an inferred one.
    pub fn apply_to(&self, record: &mut CatalogRecord) {
        if record.abv.is_none() {
            record.abv = self.abv.filter(|abv| cellar_common::record::is_valid_abv(*abv));
        }
        if let Some(region) = non_blank(&self.region) {
            record.region = Some(region);
        }
        if let Some(subcategory) = non_blank(&self.subcategory) {
            record.subcategory = Some(subcategory);
        }
        if let Some(distillery) = non_blank(&self.distillery_refined) {
            record.distillery = Some(distillery);
        }

        let metadata = record.metadata_mut();
        metadata.insert("nose_tags".into(), Value::from(self.nose_tags.clone()));
        metadata.insert("palate_tags".into(), Value::from(self.palate_tags.clone()));
        metadata.insert("finish_tags".into(), Value::from(self.finish_tags.clone()));
        if let Some(description) = non_blank(&self.description) {
            metadata.insert("description".into(), Value::from(description));
        }

        let all_tags: Vec<&str> = self
            .nose_tags
            .iter()
            .chain(&self.palate_tags)
            .chain(&self.finish_tags)
            .map(String::as_str)
            .collect();
        if !all_tags.is_empty() {
            metadata.insert("tasting_note".into(), Value::from(all_tags.join(", ")));
        }

        record.status = Some(STATUS_ENRICHED.to_string());
        record.extra.insert(
            "updatedAt".into(),
            Value::from(cellar_common::time::now().to_rfc3339()),
        );
    }
}

/// Apply enrichments to a batch by id; returns the indices of matched records
pub fn apply_enrichments(records: &mut [CatalogRecord], enrichments: &[Enrichment]) -> Vec<usize> {
    let by_id: HashMap<&str, &Enrichment> = enrichments.iter().map(|e| (e.id.as_str(), e)).collect();
    let mut applied = Vec::new();
    for (index, record) in records.iter_mut().enumerate() {
        let Some(enrichment) = record.key().and_then(|key| by_id.get(key).copied()) else {
            continue;
        };
        enrichment.apply_to(record);
        applied.push(index);
    }
    applied
}

/// Strip a Markdown code fence around a JSON payload
pub fn strip_code_fence(content: &str) -> &str {
    let mut content = content.trim();
    if let Some(rest) = content.strip_prefix("```json") {
        content = rest;
    } else if let Some(rest) = content.strip_prefix("```") {
        content = rest;
    }
    if let Some(rest) = content.strip_suffix("```") {
        content = rest;
    }
    content.trim()
}

/// Parse a raw enrichment response body
pub fn parse_enrichments(body: &str) -> PipelineResult<Vec<Enrichment>> {
    serde_json::from_str(strip_code_fence(body))
        .map_err(|e| PipelineError::external(COLLABORATOR, format!("unparseable response: {e}")))
}

/// Enrichment service
#[async_trait]
pub trait EnrichmentClient: Send + Sync {
    async fn enrich(&self, items: &[EnrichmentRequest]) -> PipelineResult<Vec<Enrichment>>;
}

/// HTTP enrichment endpoint
///
/// POSTs `{"items": [...]}` and expects a JSON array of enrichments, possibly
/// wrapped in a ```json fence.
pub struct HttpEnrichmentClient {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpEnrichmentClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> PipelineResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::external(COLLABORATOR, e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[derive(Serialize)]
struct EnrichmentPayload<'a> {
    items: &'a [EnrichmentRequest],
}

#[async_trait]
impl EnrichmentClient for HttpEnrichmentClient {
    async fn enrich(&self, items: &[EnrichmentRequest]) -> PipelineResult<Vec<Enrichment>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(items = items.len(), endpoint = %self.endpoint, "Requesting enrichment");

        let mut request = self
            .http_client
            .post(&self.endpoint)
            .json(&EnrichmentPayload { items });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::external(COLLABORATOR, e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::external(COLLABORATOR, e.to_string()))?;
        if !status.is_success() {
            return Err(PipelineError::external(
                COLLABORATOR,
                format!("HTTP {}: {}", status.as_u16(), body),
            ));
        }

        parse_enrichments(&body)
    }
}
