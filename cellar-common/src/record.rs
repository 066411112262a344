//! Catalog record schema
//!
//! Every field is a typed optional. Source files are partial and
//! inconsistent, so presence is modelled explicitly and the numeric fields are
//! decoded leniently: a value that cannot be read as a valid volume or
//! strength decodes as absent instead of failing the whole dataset. Ids may
//! arrive as numbers and are kept as their decimal string.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Upper bound of the alcohol-by-volume percentage scale
pub const ABV_MAX: f64 = 100.0;

/// One catalog record (a product) as seen by a single provenance source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRecord {
    /// Document id in the persistence store (may differ from `external_id`)
    #[serde(
        default,
        deserialize_with = "lenient::identifier",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    /// Stable identifier assigned by the originating source
    #[serde(
        default,
        deserialize_with = "lenient::identifier",
        skip_serializing_if = "Option::is_none"
    )]
    pub external_id: Option<String>,
    /// Free-text product name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Bottle volume in milliliters
    #[serde(
        default,
        deserialize_with = "lenient::volume",
        skip_serializing_if = "Option::is_none"
    )]
    pub volume: Option<u32>,
    /// Alcohol by volume, percent in [0, 100]
    #[serde(
        default,
        deserialize_with = "lenient::abv",
        skip_serializing_if = "Option::is_none"
    )]
    pub abv: Option<f64>,
    /// Free-text description (append-only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distillery: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    /// Provenance tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Processing status marker (ENRICHED, PENDING_CONFIRM, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Tag list, replaced wholesale on merge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Arbitrary key/value metadata, merged key-wise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Any other top-level keys the source carried
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CatalogRecord {
    /// Create a record with only the identity and name set
    pub fn new(external_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            external_id: Some(external_id.into()),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// External id, if present and not blank
    pub fn key(&self) -> Option<&str> {
        self.external_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Id used when talking to the persistence store
    ///
    /// Falls back to the external id for records that were never stored.
    pub fn store_id(&self) -> Option<&str> {
        self.id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| self.key())
    }

    /// Name, if present and not blank
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.trim().is_empty())
    }

    /// Mutable access to metadata, creating the map if absent
    pub fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        self.metadata.get_or_insert_with(Map::new)
    }

    /// Apply a partial update
    pub fn apply_patch(&mut self, patch: &RecordPatch) {
        if let Some(name) = &patch.name {
            self.name = Some(name.clone());
        }
        if let Some(volume) = patch.volume {
            self.volume = Some(volume);
        }
        if let Some(abv) = patch.abv {
            self.abv = Some(abv);
        }
        if let Some(description) = &patch.description {
            self.description = Some(description.clone());
        }
    }
}

/// Partial update sent to a record store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abv: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.volume.is_none()
            && self.abv.is_none()
            && self.description.is_none()
    }
}

/// Check a strength value against the ABV scale
pub fn is_valid_abv(abv: f64) -> bool {
    abv.is_finite() && (0.0..=ABV_MAX).contains(&abv)
}

mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn as_number(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn identifier<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    }

    pub fn volume<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value
            .as_ref()
            .and_then(as_number)
            .filter(|v| v.is_finite() && *v >= 0.0 && *v <= u32::MAX as f64)
            .map(|v| v.round() as u32))
    }

    pub fn abv<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value
            .as_ref()
            .and_then(as_number)
            .filter(|v| super::is_valid_abv(*v)))
    }
}
