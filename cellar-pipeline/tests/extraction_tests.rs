//! Name field extraction properties

use cellar_pipeline::extraction::{extract, LITERS_TO_MILLILITERS, PROOF_TO_ABV};

const SAMPLES: &[&str] = &[
    "Product 750ml",
    "Product 1.5l",
    "Product 80 proof",
    "X LOT A1 BATCH 2",
    "X [Single Malt] 700ml",
    "Highland Park 18 Year Old (Viking Pride) 700ml 43% [Gift Box]",
    "Blanton's Single Barrel 750 ml 93 Proof / Kentucky",
    "화요 25도 500ml (L 20230101)",
    "[LIMITED] Cognac XO 1 l 40 %",
    "Empty () [] / -",
    "",
];

#[test]
fn extraction_is_idempotent() {
    for sample in SAMPLES {
        let once = extract(sample);
        let twice = extract(&once.cleaned_name);
        assert_eq!(twice.cleaned_name, once.cleaned_name, "name changed on re-extraction of {sample:?}");
        assert_eq!(twice.description, "", "description re-extracted from {sample:?}");
        assert!(!twice.found_anything(), "fields re-extracted from {sample:?}");
    }
}

#[test]
fn volume_in_milliliters() {
    assert_eq!(extract("Product 750ml").volume, Some(750));
    assert_eq!(extract("Product 1.5l").volume, Some(1500));
    assert_eq!(LITERS_TO_MILLILITERS, 1000.0);
}

#[test]
fn proof_converts_to_abv() {
    let result = extract("Product 80 proof");
    assert_eq!(result.abv, Some(40.0));
    assert_eq!(result.cleaned_name, "Product");
    assert_eq!(PROOF_TO_ABV, 0.5);
}

#[test]
fn lot_markers_are_stripped() {
    let result = extract("X LOT A1 BATCH 2");
    assert!(!result.cleaned_name.contains("LOT A1"));
    assert!(!result.cleaned_name.contains("BATCH 2"));
    assert_eq!(result.cleaned_name, "X");
}

#[test]
fn bracket_descriptor_captured() {
    let result = extract("X [Single Malt] 700ml");
    assert_eq!(result.description, "Single Malt");
    assert_eq!(result.cleaned_name, "X");
    assert_eq!(result.volume, Some(700));
}

#[test]
fn extraction_never_warns_on_its_own() {
    // Warnings come from reconciliation against stored values
    for sample in SAMPLES {
        assert!(extract(sample).warnings.is_empty());
    }
}
