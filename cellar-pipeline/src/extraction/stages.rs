//! Ordered extraction stages
//!
//! Each stage reads and rewrites a shared [`Workpiece`]. Matched spans are
//! replaced with a single space rather than deleted so neighbouring tokens are
//! never glued together into a new match; [`CleanupStage`] collapses the
//! leftovers.

use super::patterns::{
    UnitPattern, EMPTY_PARENS, LEADING_SEPARATORS, LOT_PATTERNS, PAREN_GROUP, SQUARE_GROUP,
    STRENGTH_PATTERNS, TRAILING_SEPARATORS, TRAILING_SLASH, VOLUME_PATTERNS, WHITESPACE_RUN,
};
use cellar_common::record::is_valid_abv;
use regex::Regex;

/// Mutable state threaded through the stages of one extraction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workpiece {
    /// Remaining name text
    pub text: String,
    /// First volume found, in milliliters
    pub volume: Option<u32>,
    /// First valid strength found, percent ABV
    pub abv: Option<f64>,
    /// Description fragments in order of capture
    pub fragments: Vec<String>,
}

impl Workpiece {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// One step of the extraction pipeline
pub trait Stage: Send + Sync {
    /// Stage name for diagnostics
    fn name(&self) -> &'static str;

    /// Rewrite the workpiece
    fn apply(&self, piece: &mut Workpiece);
}

/// Find the first pattern (in priority order) matching `text`, remove all of
/// its matches and return the converted quantity of the first match.
///
/// Returns `(quantity, removed)`; `quantity` is `None` when the captured
/// number cannot be parsed.
fn take_first_quantity(text: &mut String, patterns: &[UnitPattern]) -> Option<Option<f64>> {
    for pattern in patterns {
        let Some(caps) = pattern.regex.captures(text) else {
            continue;
        };
        let quantity = caps
            .get(1)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .map(|q| q * pattern.multiplier);
        *text = pattern.regex.replace_all(text, " ").into_owned();
        return Some(quantity);
    }
    None
}

/// Strip bottle volume (ml, l and the Korean unit words)
pub struct VolumeStage;

impl Stage for VolumeStage {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn apply(&self, piece: &mut Workpiece) {
        let Some(quantity) = take_first_quantity(&mut piece.text, &VOLUME_PATTERNS) else {
            return;
        };
        let volume = quantity
            .map(f64::round)
            .filter(|ml| ml.is_finite() && *ml >= 0.0 && *ml <= f64::from(u32::MAX))
            .map(|ml| ml as u32);
        if piece.volume.is_none() {
            piece.volume = volume;
        }
    }
}

/// Strip alcohol strength (percent, 도, proof)
///
/// A strength outside the ABV scale is still removed from the text but
/// yields no value.
pub struct StrengthStage;

impl Stage for StrengthStage {
    fn name(&self) -> &'static str {
        "strength"
    }

    fn apply(&self, piece: &mut Workpiece) {
        let Some(quantity) = take_first_quantity(&mut piece.text, &STRENGTH_PATTERNS) else {
            return;
        };
        if piece.abv.is_none() {
            piece.abv = quantity.filter(|abv| is_valid_abv(*abv));
        }
    }
}

/// Remove every lot/batch marker
pub struct LotStage;

impl Stage for LotStage {
    fn name(&self) -> &'static str {
        "lot"
    }

    fn apply(&self, piece: &mut Workpiece) {
        for pattern in LOT_PATTERNS.iter() {
            if pattern.regex.is_match(&piece.text) {
                tracing::trace!(pattern = pattern.label, text = %piece.text, "Removing lot marker");
                piece.text = pattern.regex.replace_all(&piece.text, " ").into_owned();
            }
        }
    }
}

/// Move bracketed, parenthesized and trailing slash text into the description
pub struct DescriptionStage;

impl DescriptionStage {
    fn siphon(regex: &Regex, piece: &mut Workpiece) {
        let captured: Vec<String> = regex
            .captures_iter(&piece.text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|fragment| !fragment.is_empty())
            .collect();
        if regex.is_match(&piece.text) {
            piece.text = regex.replace_all(&piece.text, " ").into_owned();
        }
        piece.fragments.extend(captured);
    }
}

impl Stage for DescriptionStage {
    fn name(&self) -> &'static str {
        "description"
    }

    fn apply(&self, piece: &mut Workpiece) {
        Self::siphon(&SQUARE_GROUP, piece);
        Self::siphon(&PAREN_GROUP, piece);
        Self::siphon(&TRAILING_SLASH, piece);
    }
}

/// Tidy separators and whitespace
pub struct CleanupStage;

impl Stage for CleanupStage {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    fn apply(&self, piece: &mut Workpiece) {
        let text = EMPTY_PARENS.replace_all(&piece.text, " ");
        let text = WHITESPACE_RUN.replace_all(&text, " ");
        let text = LEADING_SEPARATORS.replace(&text, "");
        let text = TRAILING_SEPARATORS.replace(&text, "");
        piece.text = text.trim().to_string();
    }
}
