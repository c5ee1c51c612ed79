use common::error::AppError;
use tracing::error;

use crate::{
    reconcile::UpsertOutcome,
    types::{EnrichedRecord, RawScrapedRecord},
};

pub struct PipelineContext<'a> {
    pub raw: &'a RawScrapedRecord,
    /// Position of the record in the run, for log correlation
    pub record_index: u64,
    pub enriched: Option<EnrichedRecord>,
    pub outcome: Option<UpsertOutcome>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(raw: &'a RawScrapedRecord, record_index: u64) -> Self {
        Self {
            raw,
            record_index,
            enriched: None,
            outcome: None,
        }
    }

    pub fn product_url(&self) -> &str {
        self.enriched
            .as_ref()
            .map(|record| record.product_url.as_str())
            .or(self.raw.product_url.as_deref())
            .unwrap_or_default()
    }

    pub fn enriched(&self) -> Result<&EnrichedRecord, AppError> {
        self.enriched
            .as_ref()
            .ok_or_else(|| AppError::InternalError("enriched record expected to be available".into()))
    }

    pub fn take_outcome(&mut self) -> Result<UpsertOutcome, AppError> {
        self.outcome.take().ok_or_else(|| {
            AppError::InternalError("reconciliation outcome expected to be available".into())
        })
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            record_index = self.record_index,
            product_url = %self.product_url(),
            error = %err,
            "record processing aborted"
        );
        err
    }
}
