mod config;
mod context;
mod stages;
mod state;
mod stats;

pub use config::{IngestionConfig, IngestionTuning};
pub use stats::RunStats;

use std::{fmt, sync::Arc, time::Instant};

use common::{error::AppError, storage::db::SurrealDbClient};
use tracing::{debug, info, warn};

use crate::{
    enricher::DataEnricher,
    reconcile::{ReconciliationEngine, UpsertOutcome},
    types::RawScrapedRecord,
    validation::{ValidationError, ValidationStage},
};

use self::{
    context::PipelineContext,
    stages::{enrich, reconcile, validate},
    state::ready,
};

/// Why a record did not make it into the catalog.
#[derive(Debug)]
pub enum RecordFailure {
    /// Rejected by validation before touching the database
    Dropped(ValidationError),
    /// Reconciliation failed and its transaction was rolled back
    Failed(AppError),
}

impl From<AppError> for RecordFailure {
    fn from(err: AppError) -> Self {
        RecordFailure::Failed(err)
    }
}

impl fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordFailure::Dropped(err) => write!(f, "dropped: {err}"),
            RecordFailure::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

/// Per-record result in lenient mode.
#[derive(Debug)]
pub enum RecordOutcome {
    Persisted(Box<UpsertOutcome>),
    Dropped(ValidationError),
    Failed(String),
}

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    pipeline_config: IngestionConfig,
    enricher: DataEnricher,
}

impl IngestionPipeline {
    pub fn new(db: Arc<SurrealDbClient>, pipeline_config: IngestionConfig) -> Self {
        let enricher = DataEnricher::new(
            pipeline_config.store_code.clone(),
            pipeline_config.default_currency.clone(),
        );
        Self {
            db,
            pipeline_config,
            enricher,
        }
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.pipeline_config
    }

    /// Starts a run with a fresh identity cache and duplicate-URL set.
    pub fn start_run(&self) -> IngestionRun<'_> {
        IngestionRun {
            pipeline: self,
            validation: ValidationStage::new(),
            engine: ReconciliationEngine::new(
                self.db.as_ref(),
                self.pipeline_config.reconcile_settings(),
            ),
            stats: RunStats::default(),
        }
    }

    /// Processes all records as one run. In strict mode the first dropped or failed record
    /// aborts the run with its error.
    #[tracing::instrument(skip_all, fields(strict = self.pipeline_config.strict_mode))]
    pub async fn ingest<I>(&self, records: I) -> Result<RunStats, AppError>
    where
        I: IntoIterator<Item = RawScrapedRecord>,
    {
        let mut run = self.start_run();
        for record in records {
            run.process(&record).await?;
        }
        Ok(run.finish())
    }
}

/// One ingestion run: records are processed sequentially, each through
/// enrich, validate and reconcile.
pub struct IngestionRun<'a> {
    pipeline: &'a IngestionPipeline,
    validation: ValidationStage,
    engine: ReconciliationEngine<'a>,
    stats: RunStats,
}

impl<'a> IngestionRun<'a> {
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Runs one record. Returns `Err` only when strict mode escalates a dropped or failed
    /// record.
    pub async fn process(&mut self, raw: &RawScrapedRecord) -> Result<RecordOutcome, AppError> {
        let record_index = self.stats.seen;
        self.stats.seen += 1;

        match self.drive_record(raw, record_index).await {
            Ok(outcome) => {
                self.stats.record_persisted(&outcome);
                Ok(RecordOutcome::Persisted(Box::new(outcome)))
            }
            Err(RecordFailure::Dropped(err)) => {
                self.stats.record_dropped(err.rule);
                if self.pipeline.pipeline_config.strict_mode {
                    return Err(AppError::Validation(err.to_string()));
                }
                Ok(RecordOutcome::Dropped(err))
            }
            Err(RecordFailure::Failed(err)) => {
                self.stats.failed += 1;
                if self.pipeline.pipeline_config.strict_mode {
                    return Err(err);
                }
                warn!(record_index, error = %err, "record failed; continuing with next record");
                Ok(RecordOutcome::Failed(err.to_string()))
            }
        }
    }

    /// Ends the run and logs its statistics.
    pub fn finish(self) -> RunStats {
        let stats = self.stats;
        info!(
            seen = stats.seen,
            created = stats.created,
            updated = stats.updated,
            price_changes = stats.price_changes,
            created_entities = stats.created_entities,
            dropped = stats.dropped_total(),
            failed = stats.failed,
            "ingestion run finished"
        );
        stats
    }

    async fn drive_record(
        &mut self,
        raw: &RawScrapedRecord,
        record_index: u64,
    ) -> Result<UpsertOutcome, RecordFailure> {
        let mut ctx = PipelineContext::new(raw, record_index);
        let started = Instant::now();

        let machine = ready();
        let machine = enrich(machine, &mut ctx, &self.pipeline.enricher)?;
        let machine = validate(machine, &mut ctx, &mut self.validation)?;
        let _machine = reconcile(machine, &mut ctx, &mut self.engine)
            .await
            .map_err(|failure| match failure {
                RecordFailure::Failed(err) => RecordFailure::Failed(ctx.abort(err)),
                dropped @ RecordFailure::Dropped(_) => dropped,
            })?;

        let outcome = ctx.take_outcome()?;
        debug!(
            record_index,
            product_url = %outcome.product.product_url,
            total_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "record pipeline finished"
        );
        Ok(outcome)
    }
}
