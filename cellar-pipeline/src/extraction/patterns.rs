//! Compiled name patterns used by the extraction stages
//!
//! Pattern lists are ordered: the volume and strength lists are searched in
//! priority order and the first matching pattern wins, the lot list is applied
//! exhaustively in order.

use once_cell::sync::Lazy;
use regex::Regex;

/// Milliliters per liter
pub const LITERS_TO_MILLILITERS: f64 = 1000.0;

/// Percent ABV per proof degree
pub const PROOF_TO_ABV: f64 = 0.5;

/// A quantity pattern with the factor converting its captured number into
/// the target unit (milliliters or percent ABV).
pub struct UnitPattern {
    pub regex: Regex,
    pub multiplier: f64,
    pub unit: &'static str,
}

impl UnitPattern {
    fn new(pattern: &str, multiplier: f64, unit: &'static str) -> Self {
        Self {
            regex: Regex::new(pattern).expect("volume/strength pattern must compile"),
            multiplier,
            unit,
        }
    }
}

/// A lot/batch pattern with a short label for diagnostics
pub struct LotPattern {
    pub regex: Regex,
    pub label: &'static str,
}

impl LotPattern {
    fn new(pattern: &str, label: &'static str) -> Self {
        Self {
            regex: Regex::new(pattern).expect("lot pattern must compile"),
            label,
        }
    }
}

/// Volume patterns. Decimal quantities come before integer quantities so
/// "1.5l" is never read as "5l".
pub static VOLUME_PATTERNS: Lazy<Vec<UnitPattern>> = Lazy::new(|| {
    vec![
        UnitPattern::new(r"(?i)([0-9]+\.[0-9]+)\s*ml\b", 1.0, "ml"),
        UnitPattern::new(r"(?i)([0-9]+\.[0-9]+)\s*l\b", LITERS_TO_MILLILITERS, "l"),
        UnitPattern::new(r"([0-9]+\.[0-9]+)\s*밀리리터", 1.0, "밀리리터"),
        UnitPattern::new(r"([0-9]+\.[0-9]+)\s*리터", LITERS_TO_MILLILITERS, "리터"),
        UnitPattern::new(r"(?i)([0-9]+)\s*ml\b", 1.0, "ml"),
        UnitPattern::new(r"(?i)([0-9]+)\s*l\b", LITERS_TO_MILLILITERS, "l"),
        UnitPattern::new(r"([0-9]+)\s*밀리리터", 1.0, "밀리리터"),
        UnitPattern::new(r"([0-9]+)\s*리터", LITERS_TO_MILLILITERS, "리터"),
    ]
});

/// Strength patterns: percent, the Korean degree unit, then proof
pub static STRENGTH_PATTERNS: Lazy<Vec<UnitPattern>> = Lazy::new(|| {
    vec![
        UnitPattern::new(r"([0-9]+(?:\.[0-9]*)?)\s*%", 1.0, "%"),
        UnitPattern::new(r"([0-9]+(?:\.[0-9]*)?)\s*도", 1.0, "도"),
        UnitPattern::new(r"(?i)([0-9]+(?:\.[0-9]*)?)\s*proof\b", PROOF_TO_ABV, "proof"),
    ]
});

/// Lot/batch markers, every match of every pattern is removed.
///
/// The last three patterns are case-sensitive on purpose: they key on
/// uppercase codes, and mixed-case bracket text is left for the description.
/// The all-caps bracket pattern can still swallow a meaningful tag such as
/// "[CASK STRENGTH]"; it runs before description capture and that precedence
/// is kept.
pub static LOT_PATTERNS: Lazy<Vec<LotPattern>> = Lazy::new(|| {
    vec![
        LotPattern::new(r"(?i)\(\s*lot\b[^)]*[0-9][^)]*\)", "parenthesized lot"),
        LotPattern::new(
            r"(?i)\blot\s*(?:no\b\.?|number\b)?\s*[#:]?\s*[a-z0-9-]*[0-9][a-z0-9-]*\b",
            "lot code",
        ),
        LotPattern::new(r"(?i)\(\s*batch\b[^)]*[0-9][^)]*\)", "parenthesized batch"),
        LotPattern::new(
            r"(?i)\bbatch\s*(?:no\b\.?|number\b)?\s*[#:]?\s*[a-z0-9-]*[0-9][a-z0-9-]*\b",
            "batch code",
        ),
        LotPattern::new(r"로트\s*[0-9]+", "korean lot"),
        LotPattern::new(r"\[\s*[A-Z0-9\s]+\]", "uppercase bracket"),
        LotPattern::new(r"\(\s*[A-Z]\s?[0-9]{4,}[\s0-9]*\)", "parenthesized letter code"),
        LotPattern::new(r"\b[A-Z][0-9]{4,}\b|\bL\s[0-9]{4,}\b", "letter code"),
    ]
});

/// `[...]` groups
pub static SQUARE_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]").expect("square group pattern must compile"));

/// `(...)` groups
pub static PAREN_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([^)]*)\)").expect("paren group pattern must compile"));

/// Trailing `/ ...` text
pub static TRAILING_SLASH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/\s*([^/]+)$").expect("trailing slash pattern must compile"));

pub static EMPTY_PARENS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\s*\)").expect("empty parens pattern must compile"));

pub static LEADING_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\s/\-]+").expect("leading separator pattern must compile"));

pub static TRAILING_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s/\-]+$").expect("trailing separator pattern must compile"));

pub static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern must compile"));
