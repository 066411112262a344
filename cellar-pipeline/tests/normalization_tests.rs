//! Name normalization against stored record fields

use cellar_common::CatalogRecord;
use cellar_pipeline::extraction::ExtractedField;
use cellar_pipeline::services::normalizer::{ChangedField, Normalizer, Tolerances};
use cellar_pipeline::services::record_store::{RecordStore, SqliteRecordStore};
use cellar_pipeline::utils::RetryPolicy;
use cellar_pipeline::workflow::{BatchProcessor, BatchRange, NormalizeProcessor};
use std::sync::Arc;

fn record(id: &str, name: &str, abv: Option<f64>, volume: Option<u32>) -> CatalogRecord {
    CatalogRecord {
        abv,
        volume,
        ..CatalogRecord::new(id, name)
    }
}

#[test]
fn mismatched_strength_is_flagged_and_applied() {
    // Given: stored abv 40, name says 43%
    let stored = record("w1", "Glen Test 43%", Some(40.0), None);

    // When
    let normalization = Normalizer::default().normalize(&stored).unwrap();

    // Then: the extracted value wins and a warning records both values
    assert_eq!(normalization.extraction.abv, Some(43.0));
    let warnings = &normalization.extraction.warnings;
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].field, ExtractedField::Abv);
    assert_eq!(warnings[0].previous_value, 40.0);
    assert_eq!(warnings[0].extracted_value, 43.0);

    let mut updated = stored.clone();
    normalization.changeset.apply(&mut updated);
    assert_eq!(updated.abv, Some(43.0));
    assert_eq!(updated.name.as_deref(), Some("Glen Test"));
    assert!(normalization.changeset.display_string().contains("[MISMATCH]"));
}

#[test]
fn differences_within_tolerance_are_not_flagged() {
    let stored = record("w2", "Vodka 700ml 40.3%", Some(40.0), Some(700));
    let normalization = Normalizer::new(Tolerances::default()).normalize(&stored).unwrap();

    assert!(normalization.extraction.warnings.is_empty());
    let abv_change = normalization
        .changeset
        .changes
        .iter()
        .find(|c| c.field == ChangedField::Abv)
        .unwrap();
    assert!(!abv_change.mismatch);
    assert!(!normalization
        .changeset
        .changes
        .iter()
        .any(|c| c.field == ChangedField::Volume));
}

#[test]
fn description_appended_to_existing() {
    let stored = CatalogRecord {
        description: Some("Classic".into()),
        ..CatalogRecord::new("w3", "Rum [Dark] 700ml")
    };
    let normalization = Normalizer::default().normalize(&stored).unwrap();

    let mut updated = stored.clone();
    normalization.changeset.apply(&mut updated);
    assert_eq!(updated.description.as_deref(), Some("Classic / Dark"));
    assert_eq!(updated.volume, Some(700));
}

#[test]
fn clean_record_needs_no_update() {
    let stored = record("w4", "Lagavulin 16", None, None);
    let normalization = Normalizer::default().normalize(&stored).unwrap();
    assert!(!normalization.changeset.requires_update());
}

#[tokio::test]
async fn execute_mode_patches_the_store() {
    let pool = cellar_pipeline::db::init_memory_pool().await.unwrap();
    let store = Arc::new(SqliteRecordStore::new(pool));
    let batch = vec![
        record("a", "Gin 700ml 43%", Some(40.0), None),
        record("b", "Plain Gin", None, None),
    ];
    for r in &batch {
        store.upsert(r).await.unwrap();
    }

    let processor = NormalizeProcessor::execute(Normalizer::default(), store.clone(), RetryPolicy::none());
    let outcome = processor.process(&batch, BatchRange { start: 0, end: 2 }).await.unwrap();
    assert_eq!(outcome.updated, 1);
    assert_eq!(outcome.skipped, 1);

    let patched = store.get("a").await.unwrap().unwrap();
    assert_eq!(patched.name.as_deref(), Some("Gin"));
    assert_eq!(patched.volume, Some(700));
    assert_eq!(patched.abv, Some(43.0));

    let untouched = store.get("b").await.unwrap().unwrap();
    assert_eq!(untouched.name.as_deref(), Some("Plain Gin"));

    let log = processor.take_changes();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].warnings().len(), 1);
}
