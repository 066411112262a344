//! Batch processors for the pipeline steps

use super::batch_runner::{BatchOutcome, BatchProcessor, BatchRange};
use crate::error::PipelineResult;
use crate::services::enrichment_client::{apply_enrichments, EnrichmentClient, EnrichmentRequest};
use crate::services::image_lookup::{self, ImageLookup, ImageQuery};
use crate::services::normalizer::{Changeset, Normalizer};
use crate::services::offline_sink::OfflineSink;
use crate::services::record_store::RecordStore;
use crate::utils::retry::{retry_with_backoff, RetryPolicy};
use async_trait::async_trait;
use cellar_common::CatalogRecord;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Where committed batches go
pub enum CommitTarget {
    Store(Arc<dyn RecordStore>),
    Offline { sink: OfflineSink, source_path: PathBuf },
}

impl CommitTarget {
    pub fn mode(&self) -> &'static str {
        match self {
            CommitTarget::Store(_) => "online",
            CommitTarget::Offline { .. } => "offline",
        }
    }
}

/// Full ingest step: normalize, enrich, find images, commit
///
/// Enrichment and image lookup are optional; a step without a configured
/// collaborator is skipped.
pub struct EnrichmentProcessor {
    normalizer: Normalizer,
    enrichment: Option<Arc<dyn EnrichmentClient>>,
    images: Option<Arc<dyn ImageLookup>>,
    target: CommitTarget,
    retry: RetryPolicy,
}

impl EnrichmentProcessor {
    pub fn new(normalizer: Normalizer, target: CommitTarget, retry: RetryPolicy) -> Self {
        Self {
            normalizer,
            enrichment: None,
            images: None,
            target,
            retry,
        }
    }

    pub fn with_enrichment(mut self, client: Arc<dyn EnrichmentClient>) -> Self {
        self.enrichment = Some(client);
        self
    }

    pub fn with_image_lookup(mut self, lookup: Arc<dyn ImageLookup>) -> Self {
        self.images = Some(lookup);
        self
    }

    async fn enrich(&self, records: &mut [CatalogRecord], touched: &mut [bool]) -> PipelineResult<()> {
        let Some(client) = &self.enrichment else {
            return Ok(());
        };
        let requests: Vec<EnrichmentRequest> = records.iter().filter_map(EnrichmentRequest::from_record).collect();
        let requests = &requests;
        let enrichments = retry_with_backoff("enrichment", self.retry, move || client.enrich(requests)).await?;
        let applied = apply_enrichments(records, &enrichments);
        tracing::debug!(requested = requests.len(), applied = applied.len(), "Enrichment applied");
        for index in applied {
            touched[index] = true;
        }
        Ok(())
    }

    async fn find_images(&self, records: &mut [CatalogRecord], touched: &mut [bool]) -> PipelineResult<()> {
        let Some(lookup) = &self.images else {
            return Ok(());
        };
        for (record, touched) in records.iter_mut().zip(touched.iter_mut()) {
            if image_lookup::has_usable_image(record) {
                continue;
            }
            let Some(query) = ImageQuery::from_record(record) else {
                continue;
            };
            let query = &query;
            let url = retry_with_backoff("image lookup", self.retry, move || lookup.find_image(query)).await?;
            if image_lookup::apply_image(record, url) {
                *touched = true;
            } else {
                tracing::warn!(external_id = ?record.external_id, query = %query.text(), "No image found");
            }
        }
        Ok(())
    }

    async fn commit(&self, records: &[CatalogRecord], range: BatchRange) -> PipelineResult<()> {
        match &self.target {
            CommitTarget::Offline { sink, source_path } => {
                sink.write_batch(source_path, range.start, range.end, records)?;
            }
            CommitTarget::Store(store) => {
                for record in records {
                    retry_with_backoff("record upsert", self.retry, move || store.upsert(record)).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BatchProcessor for EnrichmentProcessor {
    fn step_name(&self) -> &'static str {
        "run"
    }

    async fn process(&self, batch: &[CatalogRecord], range: BatchRange) -> PipelineResult<BatchOutcome> {
        let mut records: Vec<CatalogRecord> = batch.iter().filter(|r| r.key().is_some()).cloned().collect();
        // Records changed by normalization, enrichment or a found image
        let mut touched = vec![false; records.len()];

        for (record, touched) in records.iter_mut().zip(touched.iter_mut()) {
            if let Some(normalization) = self.normalizer.normalize(record) {
                if normalization.changeset.requires_update() {
                    normalization.changeset.apply(record);
                    *touched = true;
                }
            }
        }

        self.enrich(&mut records, &mut touched).await?;
        self.find_images(&mut records, &mut touched).await?;
        self.commit(&records, range).await?;

        let updated = touched.iter().filter(|&&t| t).count();
        Ok(BatchOutcome {
            processed: batch.len(),
            updated,
            skipped: batch.len() - updated,
        })
    }
}

/// Name normalization step
///
/// Without a store the step is a dry run: changesets are computed and logged
/// but nothing is written.
pub struct NormalizeProcessor {
    normalizer: Normalizer,
    store: Option<Arc<dyn RecordStore>>,
    retry: RetryPolicy,
    changes_log: Mutex<Vec<Changeset>>,
}

impl NormalizeProcessor {
    pub fn dry_run(normalizer: Normalizer) -> Self {
        Self {
            normalizer,
            store: None,
            retry: RetryPolicy::none(),
            changes_log: Mutex::new(Vec::new()),
        }
    }

    pub fn execute(normalizer: Normalizer, store: Arc<dyn RecordStore>, retry: RetryPolicy) -> Self {
        Self {
            normalizer,
            store: Some(store),
            retry,
            changes_log: Mutex::new(Vec::new()),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.store.is_none()
    }

    /// Changesets recorded so far, in processing order
    pub fn take_changes(&self) -> Vec<Changeset> {
        match self.changes_log.lock() {
            Ok(mut log) => std::mem::take(&mut *log),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    fn record_change(&self, changeset: Changeset) {
        match self.changes_log.lock() {
            Ok(mut log) => log.push(changeset),
            Err(poisoned) => poisoned.into_inner().push(changeset),
        }
    }
}

#[async_trait]
impl BatchProcessor for NormalizeProcessor {
    fn step_name(&self) -> &'static str {
        "normalize"
    }

    async fn process(&self, batch: &[CatalogRecord], _range: BatchRange) -> PipelineResult<BatchOutcome> {
        let mut outcome = BatchOutcome {
            processed: batch.len(),
            ..Default::default()
        };
        let mut pending = Vec::new();

        for record in batch {
            let Some(normalization) = self.normalizer.normalize(record) else {
                outcome.skipped += 1;
                continue;
            };
            if !normalization.changeset.requires_update() {
                outcome.skipped += 1;
                continue;
            }

            if let Some(store) = &self.store {
                let Some(id) = record.store_id() else {
                    outcome.skipped += 1;
                    continue;
                };
                let patch = normalization.changeset.to_patch();
                let patch = &patch;
                retry_with_backoff("record patch", self.retry, move || store.patch(id, patch)).await?;
            } else {
                tracing::info!("[DRY] {}", normalization.changeset.display_string());
            }

            outcome.updated += 1;
            pending.push(normalization.changeset);
        }

        for changeset in pending {
            self.record_change(changeset);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::enrichment_client::Enrichment;
    use crate::services::record_store::SqliteRecordStore;

    struct FixedEnrichment;

    #[async_trait]
    impl EnrichmentClient for FixedEnrichment {
        async fn enrich(&self, items: &[EnrichmentRequest]) -> PipelineResult<Vec<Enrichment>> {
            Ok(items
                .iter()
                .map(|item| Enrichment {
                    id: item.id.clone(),
                    region: Some("Speyside".into()),
                    ..Default::default()
                })
                .collect())
        }
    }

    struct NoImages;

    #[async_trait]
    impl ImageLookup for NoImages {
        async fn find_image(&self, _query: &ImageQuery) -> PipelineResult<Option<String>> {
            Ok(None)
        }
    }

    fn range(n: usize) -> BatchRange {
        BatchRange { start: 0, end: n }
    }

    #[tokio::test]
    async fn test_enrichment_processor_commits_to_store() {
        let store = Arc::new(SqliteRecordStore::new(crate::db::init_memory_pool().await.unwrap()));
        let processor = EnrichmentProcessor::new(Normalizer::default(), CommitTarget::Store(store.clone()), RetryPolicy::none())
            .with_enrichment(Arc::new(FixedEnrichment))
            .with_image_lookup(Arc::new(NoImages));

        let mut orphan = CatalogRecord::new("", "No key");
        orphan.external_id = None;
        let batch = vec![CatalogRecord::new("A", "Glen Test 700ml 40%"), orphan];

        let outcome = processor.process(&batch, range(2)).await.unwrap();
        assert_eq!(outcome, BatchOutcome { processed: 2, updated: 1, skipped: 1 });

        let stored = store.get("A").await.unwrap().unwrap();
        assert_eq!(stored.name.as_deref(), Some("Glen Test"));
        assert_eq!(stored.volume, Some(700));
        assert_eq!(stored.region.as_deref(), Some("Speyside"));
        assert_eq!(stored.status.as_deref(), Some(image_lookup::STATUS_IMAGE_FAILED));
    }

    #[tokio::test]
    async fn test_enrichment_processor_counts_only_changed_records() {
        let store = Arc::new(SqliteRecordStore::new(crate::db::init_memory_pool().await.unwrap()));
        let processor = EnrichmentProcessor::new(Normalizer::default(), CommitTarget::Store(store.clone()), RetryPolicy::none())
            .with_image_lookup(Arc::new(NoImages));

        let batch = vec![
            CatalogRecord::new("A", "Gin 700ml"),
            CatalogRecord::new("B", "Plain Gin"),
            CatalogRecord::new("C", "Rum"),
        ];
        let outcome = processor.process(&batch, range(3)).await.unwrap();

        // Only the name carrying a volume changed; every keyed record is still committed
        assert_eq!(outcome, BatchOutcome { processed: 3, updated: 1, skipped: 2 });
        assert!(store.get("B").await.unwrap().is_some());
        assert!(store.get("C").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_enrichment_processor_offline() {
        let dir = tempfile::tempdir().unwrap();
        let target = CommitTarget::Offline {
            sink: OfflineSink::new(dir.path()),
            source_path: PathBuf::from("raw.json"),
        };
        assert_eq!(target.mode(), "offline");
        let processor = EnrichmentProcessor::new(Normalizer::default(), target, RetryPolicy::none());

        processor
            .process(&[CatalogRecord::new("A", "Gin")], BatchRange { start: 10, end: 11 })
            .await
            .unwrap();

        let written: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(written.len(), 1);
    }

    #[tokio::test]
    async fn test_normalize_dry_run_logs_changes_only() {
        let processor = NormalizeProcessor::dry_run(Normalizer::default());
        let batch = vec![CatalogRecord::new("A", "Rum 43%"), CatalogRecord::new("B", "Plain Rum")];

        let outcome = processor.process(&batch, range(2)).await.unwrap();
        assert_eq!(outcome, BatchOutcome { processed: 2, updated: 1, skipped: 1 });
        assert!(processor.is_dry_run());

        let changes = processor.take_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].external_id, "A");
        assert!(processor.take_changes().is_empty());
    }

    #[tokio::test]
    async fn test_normalize_execute_patches_store() {
        let store = Arc::new(SqliteRecordStore::new(crate::db::init_memory_pool().await.unwrap()));
        let mut original = CatalogRecord::new("A", "Rum 43%");
        original.abv = Some(40.0);
        store.upsert(&original).await.unwrap();

        let processor = NormalizeProcessor::execute(Normalizer::default(), store.clone(), RetryPolicy::none());
        processor.process(&[original], range(1)).await.unwrap();

        let stored = store.get("A").await.unwrap().unwrap();
        assert_eq!(stored.name.as_deref(), Some("Rum"));
        assert_eq!(stored.abv, Some(43.0));
        assert_eq!(processor.take_changes()[0].warnings().len(), 1);
    }

    #[tokio::test]
    async fn test_normalize_execute_missing_record_fails_batch() {
        let store = Arc::new(SqliteRecordStore::new(crate::db::init_memory_pool().await.unwrap()));
        let processor = NormalizeProcessor::execute(Normalizer::default(), store, RetryPolicy::none());
        let result = processor.process(&[CatalogRecord::new("ghost", "Gin 700ml")], range(1)).await;
        assert!(result.is_err());
        assert!(!result.unwrap_err().is_fatal());
        assert!(processor.take_changes().is_empty());
    }
}
