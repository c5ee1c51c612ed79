use common::error::AppError;
use state_machines::core::GuardError;
use tracing::{debug, instrument};

use crate::{enricher::DataEnricher, reconcile::ReconciliationEngine, validation::ValidationStage};

use super::{
    context::PipelineContext,
    state::{Enriched, Ready, Reconciled, RecordMachine, Validated},
    RecordFailure,
};

#[instrument(level = "trace", skip_all, fields(record_index = ctx.record_index))]
pub fn enrich(
    machine: RecordMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
    enricher: &DataEnricher,
) -> Result<RecordMachine<(), Enriched>, RecordFailure> {
    let enriched = enricher.enrich(ctx.raw);

    debug!(
        record_index = ctx.record_index,
        product_url = %enriched.product_url,
        sku = enriched.sku.as_deref().unwrap_or_default(),
        manufacturer = enriched.manufacturer.as_deref().unwrap_or_default(),
        "record enriched"
    );

    ctx.enriched = Some(enriched);

    machine
        .enrich()
        .map_err(|(_, guard)| map_guard_error("enrich", &guard).into())
}

#[instrument(level = "trace", skip_all, fields(record_index = ctx.record_index))]
pub fn validate(
    machine: RecordMachine<(), Enriched>,
    ctx: &mut PipelineContext<'_>,
    validation: &mut ValidationStage,
) -> Result<RecordMachine<(), Validated>, RecordFailure> {
    validation
        .validate(ctx.enriched()?)
        .map_err(RecordFailure::Dropped)?;

    machine
        .validate()
        .map_err(|(_, guard)| map_guard_error("validate", &guard).into())
}

#[instrument(level = "trace", skip_all, fields(record_index = ctx.record_index))]
pub async fn reconcile(
    machine: RecordMachine<(), Validated>,
    ctx: &mut PipelineContext<'_>,
    engine: &mut ReconciliationEngine<'_>,
) -> Result<RecordMachine<(), Reconciled>, RecordFailure> {
    let outcome = engine.reconcile(ctx.enriched()?).await?;

    debug!(
        record_index = ctx.record_index,
        product_id = %outcome.product.id,
        action = ?outcome.action,
        "record persisted"
    );

    ctx.outcome = Some(outcome);

    machine
        .reconcile()
        .map_err(|(_, guard)| map_guard_error("reconcile", &guard).into())
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid ingestion pipeline transition during {event}: {guard:?}"
    ))
}
