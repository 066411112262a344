//! Record normalization
//!
//! Runs name extraction on a record and reconciles what was found against the
//! record's stored volume and strength, producing a changeset.
//!
//! **Decision policy:**
//! - Field not extracted: stored value untouched
//! - Extracted, nothing stored: extracted value applied
//! - Extracted, stored value differs beyond tolerance: extracted value applied
//!   and the change is flagged as a mismatch
//! - Name and description change only when the cleaned name differs from
//!   the original name

use crate::extraction::{
    ExtractedField, ExtractionResult, FieldExtractor, FieldWarning, DESCRIPTION_SEPARATOR,
};
use cellar_common::{CatalogRecord, RecordPatch};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Mismatch thresholds between stored and extracted values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerances {
    /// Milliliters
    pub volume_ml: f64,
    /// ABV percentage points
    pub abv: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            volume_ml: 1.0,
            abv: 0.5,
        }
    }
}

/// Field touched by a changeset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangedField {
    Name,
    Volume,
    Abv,
    Description,
}

impl fmt::Display for ChangedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangedField::Name => "name",
            ChangedField::Volume => "volume",
            ChangedField::Abv => "abv",
            ChangedField::Description => "description",
        };
        f.write_str(name)
    }
}

/// One field update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: ChangedField,
    pub from: Option<Value>,
    pub to: Value,
    /// Stored value disagreed with extraction beyond tolerance
    pub mismatch: bool,
}

impl FieldChange {
    pub fn display_string(&self) -> String {
        let from = self
            .from
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_else(|| "(none)".to_string());
        let flag = if self.mismatch { "  [MISMATCH]" } else { "" };
        format!("{}: {} -> {}{}", self.field, from, self.to, flag)
    }
}

/// Updates computed for one record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Changeset {
    pub external_id: String,
    pub changes: Vec<FieldChange>,
    #[serde(skip)]
    patch: RecordPatch,
}

impl Changeset {
    fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            ..Default::default()
        }
    }

    /// Whether the stored record needs patching
    pub fn requires_update(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Mismatch warnings in change order
    pub fn warnings(&self) -> Vec<FieldWarning> {
        self.changes
            .iter()
            .filter(|c| c.mismatch)
            .filter_map(|c| {
                let field = match c.field {
                    ChangedField::Volume => ExtractedField::Volume,
                    ChangedField::Abv => ExtractedField::Abv,
                    _ => return None,
                };
                Some(FieldWarning {
                    field,
                    previous_value: c.from.as_ref()?.as_f64()?,
                    extracted_value: c.to.as_f64()?,
                })
            })
            .collect()
    }

    /// Partial update carrying every changed field
    pub fn to_patch(&self) -> RecordPatch {
        self.patch.clone()
    }

    /// Apply the changes to a record in memory
    pub fn apply(&self, record: &mut CatalogRecord) {
        record.apply_patch(&self.patch);
    }

    pub fn display_string(&self) -> String {
        let mut out = format!("[{}]", self.external_id);
        for change in &self.changes {
            out.push_str("\n  ");
            out.push_str(&change.display_string());
        }
        out
    }

    fn push(&mut self, field: ChangedField, from: Option<Value>, to: Value, mismatch: bool) {
        self.changes.push(FieldChange {
            field,
            from,
            to,
            mismatch,
        });
    }
}

/// Extraction result with its reconciliation
#[derive(Debug, Clone, PartialEq)]
pub struct Normalization {
    /// Extraction with mismatch warnings filled in
    pub extraction: ExtractionResult,
    pub changeset: Changeset,
}

/// Applies name extraction to records
pub struct Normalizer {
    extractor: FieldExtractor,
    tolerances: Tolerances,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(Tolerances::default())
    }
}

impl Normalizer {
    pub fn new(tolerances: Tolerances) -> Self {
        Self {
            extractor: FieldExtractor::new(),
            tolerances,
        }
    }

    /// Extract and reconcile one record
    ///
    /// Returns `None` for records without a name or external id; they are
    /// left unchanged.
    pub fn normalize(&self, record: &CatalogRecord) -> Option<Normalization> {
        let (Some(external_id), Some(name)) = (record.key(), record.display_name()) else {
            tracing::debug!(
                external_id = ?record.external_id,
                "Skipping record without name or external id"
            );
            return None;
        };

        let mut extraction = self.extractor.extract(name);
        let changeset = reconcile_with(record, &extraction, self.tolerances);
        extraction.warnings = changeset.warnings();

        for warning in &extraction.warnings {
            tracing::warn!(
                external_id = %external_id,
                field = %warning.field,
                stored = warning.previous_value,
                extracted = warning.extracted_value,
                "Stored value disagrees with name, using extracted value"
            );
        }

        Some(Normalization {
            extraction,
            changeset,
        })
    }

    /// Reconcile an extraction against a record's stored values
    pub fn reconcile(&self, record: &CatalogRecord, extraction: &ExtractionResult) -> Changeset {
        reconcile_with(record, extraction, self.tolerances)
    }
}

/// Reconcile with default tolerances
pub fn reconcile(record: &CatalogRecord, extraction: &ExtractionResult) -> Changeset {
    reconcile_with(record, extraction, Tolerances::default())
}

fn reconcile_with(
    record: &CatalogRecord,
    extraction: &ExtractionResult,
    tolerances: Tolerances,
) -> Changeset {
    let mut changeset = Changeset::new(record.key().unwrap_or_default());

    if let Some(extracted) = extraction.volume {
        match record.volume {
            None => {
                changeset.push(ChangedField::Volume, None, Value::from(extracted), false);
                changeset.patch.volume = Some(extracted);
            }
            Some(stored) if stored != extracted => {
                let mismatch = (f64::from(stored) - f64::from(extracted)).abs() > tolerances.volume_ml;
                changeset.push(
                    ChangedField::Volume,
                    Some(Value::from(stored)),
                    Value::from(extracted),
                    mismatch,
                );
                changeset.patch.volume = Some(extracted);
            }
            Some(_) => {}
        }
    }

    if let Some(extracted) = extraction.abv {
        match record.abv {
            None => {
                changeset.push(ChangedField::Abv, None, Value::from(extracted), false);
                changeset.patch.abv = Some(extracted);
            }
            Some(stored) if (stored - extracted).abs() > f64::EPSILON => {
                let mismatch = (stored - extracted).abs() > tolerances.abv;
                changeset.push(
                    ChangedField::Abv,
                    Some(Value::from(stored)),
                    Value::from(extracted),
                    mismatch,
                );
                changeset.patch.abv = Some(extracted);
            }
            Some(_) => {}
        }
    }

    let original = record.name.as_deref().unwrap_or_default();
    if extraction.cleaned_name != original {
        if extraction.cleaned_name.is_empty() {
            tracing::warn!(
                external_id = %changeset.external_id,
                name = %original,
                "Name is empty after cleaning, keeping original name"
            );
        } else {
            changeset.push(
                ChangedField::Name,
                Some(Value::from(original)),
                Value::from(extraction.cleaned_name.clone()),
                false,
            );
            changeset.patch.name = Some(extraction.cleaned_name.clone());

            if !extraction.description.is_empty() {
                let stored = record
                    .description
                    .as_deref()
                    .map(str::trim)
                    .filter(|d| !d.is_empty());
                let combined = match stored {
                    Some(existing) => {
                        format!("{existing}{DESCRIPTION_SEPARATOR}{}", extraction.description)
                    }
                    None => extraction.description.clone(),
                };
                changeset.push(
                    ChangedField::Description,
                    stored.map(Value::from),
                    Value::from(combined.clone()),
                    false,
                );
                changeset.patch.description = Some(combined);
            }
        }
    }

    changeset
}
