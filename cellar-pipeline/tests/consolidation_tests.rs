//! Multi-source consolidation

use cellar_common::CatalogRecord;
use cellar_pipeline::services::consolidator::{load_source, SourceBatch, SourceConsolidator};
use serde_json::json;

fn source(name: &str, records: Vec<CatalogRecord>) -> SourceBatch {
    SourceBatch::new(name, records)
}

fn with_distillery(id: &str, distillery: &str) -> CatalogRecord {
    CatalogRecord {
        external_id: Some(id.to_string()),
        distillery: Some(distillery.to_string()),
        ..Default::default()
    }
}

#[test]
fn later_sources_win() {
    let a = || source("a", vec![CatalogRecord::new("1", "Foo")]);
    let b = || source("b", vec![CatalogRecord::new("1", "Bar")]);

    let (ab, _) = SourceConsolidator::consolidate(vec![a(), b()]);
    assert_eq!(ab.get("1").unwrap().name.as_deref(), Some("Bar"));

    let (ba, _) = SourceConsolidator::consolidate(vec![b(), a()]);
    assert_eq!(ba.get("1").unwrap().name.as_deref(), Some("Foo"));
}

#[test]
fn absent_fields_are_preserved() {
    let (map, report) = SourceConsolidator::consolidate(vec![
        source("a", vec![CatalogRecord::new("1", "Foo")]),
        source("b", vec![with_distillery("1", "Bar")]),
    ]);

    let record = map.get("1").unwrap();
    assert_eq!(record.name.as_deref(), Some("Foo"));
    assert_eq!(record.distillery.as_deref(), Some("Bar"));
    assert_eq!(report.unique_ids, 1);
    assert_eq!(report.merged, 1);
}

#[test]
fn records_without_id_are_dropped() {
    let anonymous = CatalogRecord {
        name: Some("Nameless".into()),
        ..Default::default()
    };
    let (map, report) = SourceConsolidator::consolidate(vec![source(
        "a",
        vec![anonymous, CatalogRecord::new("2", "Kept")],
    )]);

    assert_eq!(map.len(), 1);
    assert_eq!(report.dropped, 1);
    assert_eq!(report.total_seen, 2);
}

#[test]
fn output_keeps_first_seen_order() {
    let (map, _) = SourceConsolidator::consolidate(vec![
        source("a", vec![CatalogRecord::new("b", "B"), CatalogRecord::new("a", "A")]),
        source("b", vec![CatalogRecord::new("c", "C"), CatalogRecord::new("b", "B2")]),
    ]);

    let ids: Vec<_> = map.into_records().into_iter().filter_map(|r| r.external_id).collect();
    assert_eq!(ids, vec!["b", "a", "c"]);
}

#[test]
fn directory_sources_load_in_file_name_order() {
    let dir = tempfile::tempdir().unwrap();
    let enriched = dir.path().join("enriched");
    std::fs::create_dir(&enriched).unwrap();
    std::fs::write(enriched.join("02.json"), json!([{"externalId": "1", "name": "Second"}]).to_string()).unwrap();
    std::fs::write(enriched.join("01.json"), json!([{"externalId": "1", "name": "First"}]).to_string()).unwrap();
    std::fs::write(enriched.join("broken.json"), "{ not json").unwrap();
    std::fs::write(enriched.join("notes.txt"), "ignored").unwrap();

    let primary = dir.path().join("primary.json");
    std::fs::write(&primary, json!({"externalId": "1", "name": "Primary", "country": "Scotland"}).to_string()).unwrap();

    let (map, _) = SourceConsolidator::consolidate(vec![
        load_source("primary", &[primary]),
        load_source("enriched", &[enriched]),
    ]);

    let record = map.get("1").unwrap();
    assert_eq!(record.name.as_deref(), Some("Second"));
    assert_eq!(record.country.as_deref(), Some("Scotland"));
}

#[test]
fn malformed_record_is_skipped_not_the_whole_file() {
    // Given: one file with a good record, a numeric id and a wrongly-typed name
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("imported.json");
    std::fs::write(
        &path,
        json!([
            {"externalId": "1", "name": "Good"},
            {"externalId": 2, "name": "Numbered"},
            {"externalId": "3", "name": 123}
        ])
        .to_string(),
    )
    .unwrap();

    // When
    let batch = load_source("imported", &[path]);
    let (map, report) = SourceConsolidator::consolidate(vec![batch]);

    // Then: the valid records survive and the bad one is counted
    assert_eq!(map.get("1").unwrap().name.as_deref(), Some("Good"));
    assert_eq!(map.get("2").unwrap().name.as_deref(), Some("Numbered"));
    assert!(map.get("3").is_none());
    assert_eq!(report.malformed, 1);
    assert_eq!(report.unique_ids, 2);
}
