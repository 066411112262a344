//! Product image lookup
//!
//! Queries an image search page for a bottle shot and picks a candidate URL
//! from the returned HTML.
//!
//! **Candidate selection:**
//! 1. Embedded `["url",height,width]` entries that are portrait (or square)
//!    and not hosted by the search engine
//! 2. Plain `<img>` sources not hosted by the search engine
//! 3. Portrait search-engine thumbnails (`encrypted-tbn`) as a last resort

use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use cellar_common::CatalogRecord;
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use regex::Regex;
use serde_json::Value;
use std::time::Duration;

const COLLABORATOR: &str = "image lookup";

pub const STATUS_PENDING_CONFIRM: &str = "PENDING_CONFIRM";
pub const STATUS_IMAGE_FAILED: &str = "IMAGE_FAILED";

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
];

static SIZED_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\["(https?://[^"\s]+\.(?:jpg|jpeg|png|webp))",(\d+),(\d+)\]"#)
        .expect("sized image pattern must compile")
});

static IMG_TAG_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<img[^>]*?\s(?:src|data-src|data-deferred-src)="(https?://[^"]+)""#)
        .expect("img tag pattern must compile")
});

/// Search-engine hosted URLs are thumbnails, not source images
fn is_search_engine_host(url: &str) -> bool {
    url.contains("gstatic.com") || url.contains("google")
}

/// Whether a record already has an image worth keeping
pub fn has_usable_image(record: &CatalogRecord) -> bool {
    record
        .image_url
        .as_deref()
        .map(|url| url.starts_with("http") && !url.contains("google"))
        .unwrap_or(false)
}

/// Pick the best image URL out of a search results page
pub fn select_candidate(html: &str) -> Option<String> {
    let sized: Vec<(&str, u32, u32)> = SIZED_IMAGE
        .captures_iter(html)
        .filter_map(|caps| {
            let url = caps.get(1)?.as_str();
            let height = caps.get(2)?.as_str().parse().ok()?;
            let width = caps.get(3)?.as_str().parse().ok()?;
            Some((url, height, width))
        })
        .collect();

    let portrait = sized
        .iter()
        .filter(|(_, height, width)| width <= height)
        .find(|(url, _, _)| !is_search_engine_host(url) && url.len() > 20)
        .map(|(url, _, _)| url.to_string());
    if portrait.is_some() {
        return portrait;
    }

    let tagged = IMG_TAG_SRC
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .find(|url| !is_search_engine_host(url))
        .map(str::to_string);
    if tagged.is_some() {
        return tagged;
    }

    sized
        .iter()
        .find(|(url, height, width)| url.contains("encrypted-tbn") && width <= height)
        .map(|(url, _, _)| url.to_string())
}

/// What to search for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageQuery {
    pub name: String,
    pub distillery: Option<String>,
}

impl ImageQuery {
    /// Prefers the English name from metadata
    pub fn from_record(record: &CatalogRecord) -> Option<Self> {
        let name_en = record
            .metadata
            .as_ref()
            .and_then(|m| m.get("name_en"))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty());
        let name = name_en.or_else(|| record.display_name())?;
        Some(Self {
            name: name.to_string(),
            distillery: record.distillery.clone(),
        })
    }

    pub fn text(&self) -> String {
        match &self.distillery {
            Some(distillery) if !distillery.trim().is_empty() => format!("{} {}", self.name, distillery),
            _ => self.name.clone(),
        }
    }
}

/// Image lookup service
#[async_trait]
pub trait ImageLookup: Send + Sync {
    /// A candidate URL, or `None` when nothing suitable was found
    async fn find_image(&self, query: &ImageQuery) -> PipelineResult<Option<String>>;
}

/// Record the lookup outcome; returns true on a hit
pub fn apply_image(record: &mut CatalogRecord, url: Option<String>) -> bool {
    let now = Value::from(cellar_common::time::now().to_rfc3339());
    match url {
        Some(url) => {
            record.thumbnail_url = Some(url.clone());
            record.image_url = Some(url);
            record.status = Some(STATUS_PENDING_CONFIRM.to_string());
            record.extra.insert("updatedAt".into(), now);
            true
        }
        None => {
            record.image_url = None;
            record.status = Some(STATUS_IMAGE_FAILED.to_string());
            false
        }
    }
}

/// Image search over HTTP
pub struct HttpImageLookup {
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpImageLookup {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> PipelineResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::external(COLLABORATOR, e.to_string()))?;
        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
        })
    }

    fn params(query: &ImageQuery) -> Vec<(&'static str, String)> {
        vec![
            ("as_st", "y".to_string()),
            ("as_q", query.text()),
            ("as_oq", "bottle OR packaging".to_string()),
            ("as_eq", "glass interior".to_string()),
            ("udm", "2".to_string()),
            ("tbs", "isz:m".to_string()),
        ]
    }
}

#[async_trait]
impl ImageLookup for HttpImageLookup {
    async fn find_image(&self, query: &ImageQuery) -> PipelineResult<Option<String>> {
        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);

        let response = self
            .http_client
            .get(&self.endpoint)
            .query(&Self::params(query))
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await
            .map_err(|e| PipelineError::external(COLLABORATOR, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::external(COLLABORATOR, format!("HTTP {}", status.as_u16())));
        }

        let html = response
            .text()
            .await
            .map_err(|e| PipelineError::external(COLLABORATOR, e.to_string()))?;

        let found = select_candidate(&html);
        tracing::debug!(query = %query.text(), found = found.is_some(), "Image lookup finished");
        Ok(found)
    }
}
