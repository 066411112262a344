//! Name field extraction
//!
//! Strips bottle volume, alcohol strength and lot/batch markers out of a free
//! text product name and moves bracketed or trailing annotations into a
//! description, leaving a clean product name.
//!
//! Stages run in a fixed order (volume, strength, lot, description, cleanup)
//! and the whole pass is repeated until the text stops changing, which makes
//! extraction idempotent: extracting from a cleaned name finds nothing more.

pub mod patterns;
pub mod stages;

pub use patterns::{LITERS_TO_MILLILITERS, PROOF_TO_ABV};
pub use stages::{
    CleanupStage, DescriptionStage, LotStage, Stage, StrengthStage, VolumeStage, Workpiece,
};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between description fragments
pub const DESCRIPTION_SEPARATOR: &str = " / ";

/// Record field a warning refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractedField {
    Volume,
    Abv,
}

impl fmt::Display for ExtractedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractedField::Volume => write!(f, "volume"),
            ExtractedField::Abv => write!(f, "abv"),
        }
    }
}

/// A stored value that disagrees with what extraction found
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldWarning {
    pub field: ExtractedField,
    pub previous_value: f64,
    pub extracted_value: f64,
}

/// Output of one extraction call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    /// Volume in milliliters
    pub volume: Option<u32>,
    /// Percent alcohol by volume
    pub abv: Option<f64>,
    pub cleaned_name: String,
    /// Captured annotations joined with " / ", possibly empty
    pub description: String,
    /// Filled during reconciliation against stored values
    pub warnings: Vec<FieldWarning>,
}

impl ExtractionResult {
    /// Whether anything beyond whitespace tidying was found
    pub fn found_anything(&self) -> bool {
        self.volume.is_some() || self.abv.is_some() || !self.description.is_empty()
    }
}

/// Ordered stage pipeline
pub struct FieldExtractor {
    stages: Vec<Box<dyn Stage>>,
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldExtractor {
    /// Extractor with the standard stage order
    pub fn new() -> Self {
        Self::with_stages(vec![
            Box::new(VolumeStage),
            Box::new(StrengthStage),
            Box::new(LotStage),
            Box::new(DescriptionStage),
            Box::new(CleanupStage),
        ])
    }

    /// Extractor with a caller-chosen stage list
    pub fn with_stages(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage once
    pub fn run_pass(&self, piece: &mut Workpiece) {
        for stage in &self.stages {
            stage.apply(piece);
        }
    }

    /// Extract fields from `name`
    ///
    /// Never fails: text without recognizable patterns comes back tidied with
    /// no values. Passes repeat until the text is stable; every pass that
    /// changes the text removes at least one character, so the loop is
    /// bounded by the name length.
    pub fn extract(&self, name: &str) -> ExtractionResult {
        let mut piece = Workpiece::new(name);
        let max_passes = name.chars().count() + 2;

        for pass in 0..max_passes {
            let before = piece.text.clone();
            self.run_pass(&mut piece);
            if piece.text == before {
                break;
            }
            if pass > 0 {
                tracing::trace!(pass, text = %piece.text, "Extraction required another pass");
            }
        }

        ExtractionResult {
            volume: piece.volume,
            abv: piece.abv,
            cleaned_name: piece.text,
            description: piece.fragments.join(DESCRIPTION_SEPARATOR),
            warnings: Vec::new(),
        }
    }
}

static DEFAULT_EXTRACTOR: Lazy<FieldExtractor> = Lazy::new(FieldExtractor::new);

/// Extract with the standard stage order
pub fn extract(name: &str) -> ExtractionResult {
    DEFAULT_EXTRACTOR.extract(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert_eq!(
            FieldExtractor::new().stage_names(),
            vec!["volume", "strength", "lot", "description", "cleanup"]
        );
    }

    #[test]
    fn test_full_name() {
        let result = extract("Glen Test 12 Year Old [Single Malt] 700ml 43% LOT 2021-07");
        assert_eq!(result.volume, Some(700));
        assert_eq!(result.abv, Some(43.0));
        assert_eq!(result.cleaned_name, "Glen Test 12 Year Old");
        assert_eq!(result.description, "Single Malt");
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_plain_name_untouched() {
        let result = extract("Lagavulin 16");
        assert_eq!(result.cleaned_name, "Lagavulin 16");
        assert_eq!(result.volume, None);
        assert_eq!(result.abv, None);
        assert_eq!(result.description, "");
        assert!(!result.found_anything());
    }

    #[test]
    fn test_empty_and_separator_only_names() {
        assert_eq!(extract("").cleaned_name, "");
        assert_eq!(extract(" / - ").cleaned_name, "");
        assert_eq!(extract("700ml").cleaned_name, "");
        assert_eq!(extract("700ml").volume, Some(700));
    }

    #[test]
    fn test_units_split_by_annotation_resolved_by_repeat_pass() {
        let result = extract("Vodka 750 [Gift] ml");
        assert_eq!(result.volume, Some(750));
        assert_eq!(result.cleaned_name, "Vodka");
        assert_eq!(result.description, "Gift");
    }

    #[test]
    fn test_second_volume_removed_but_first_kept() {
        let result = extract("Twin Pack 1.5l 700ml");
        assert_eq!(result.volume, Some(1500));
        assert_eq!(result.cleaned_name, "Twin Pack");
    }

    #[test]
    fn test_multiple_fragments_joined() {
        let result = extract("Rum (Dark) [Aged] / Limited");
        assert_eq!(result.description, "Aged / Dark / Limited");
        assert_eq!(result.cleaned_name, "Rum");
    }

    #[test]
    fn test_custom_stage_list() {
        let volume_only = FieldExtractor::with_stages(vec![Box::new(VolumeStage), Box::new(CleanupStage)]);
        let result = volume_only.extract("Gin 700ml 40%");
        assert_eq!(result.volume, Some(700));
        assert_eq!(result.abv, None);
        assert_eq!(result.cleaned_name, "Gin 40%");
    }

    #[test]
    fn test_idempotent_on_samples() {
        let samples = [
            "Glen Test 12 Year Old [Single Malt] 700ml 43% LOT 2021-07",
            "Bourbon 750 ml 90 proof (Small Batch) / Kentucky",
            "( () ) weird ))",
            "참이슬 360밀리리터 16.9도 로트 123",
            "Whisky [CASK STRENGTH] (L12345) - 1 L -",
        ];
        for sample in samples {
            let first = extract(sample);
            let second = extract(&first.cleaned_name);
            assert_eq!(second.cleaned_name, first.cleaned_name, "sample {sample:?}");
            assert_eq!(second.volume, None, "sample {sample:?}");
            assert_eq!(second.abv, None, "sample {sample:?}");
        }
    }
}
