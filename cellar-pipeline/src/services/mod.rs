//! Services: the normalization and consolidation engines plus the external
//! collaborators (record store, enrichment, image lookup, offline sink)

pub mod consolidator;
pub mod enrichment_client;
pub mod image_lookup;
pub mod normalizer;
pub mod offline_sink;
pub mod record_store;

pub use consolidator::{ConsolidationMap, ConsolidationReport, SourceBatch, SourceConsolidator};
pub use enrichment_client::{Enrichment, EnrichmentClient, EnrichmentRequest, HttpEnrichmentClient};
pub use image_lookup::{HttpImageLookup, ImageLookup, ImageQuery};
pub use normalizer::{Changeset, FieldChange, Normalization, Normalizer, Tolerances};
pub use offline_sink::OfflineSink;
pub use record_store::{HttpRecordStore, RecordStore, SqliteRecordStore};
