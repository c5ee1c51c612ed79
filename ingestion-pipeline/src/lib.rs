#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod embedding_job;
pub mod enricher;
pub mod parser;
pub mod pipeline;
pub mod reconcile;
pub mod types;
pub mod validation;

pub use embedding_job::{generate_missing_embeddings, EmbeddingRunReport};
pub use enricher::DataEnricher;
pub use pipeline::{
    IngestionConfig, IngestionPipeline, IngestionRun, IngestionTuning, RecordFailure,
    RecordOutcome, RunStats,
};
pub use reconcile::{IdentityCache, ReconcileSettings, ReconciliationEngine, UpsertOutcome};
pub use types::{EnrichedRecord, RawScrapedRecord};
pub use validation::{ValidationError, ValidationRule, ValidationStage};
