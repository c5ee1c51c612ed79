use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    reconcile::{UpsertAction, UpsertOutcome},
    validation::ValidationRule,
};

/// Counters for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub seen: u64,
    pub created: u64,
    pub updated: u64,
    pub price_changes: u64,
    /// Stores, categories and manufacturers created along the way
    pub created_entities: u64,
    pub dropped: BTreeMap<ValidationRule, u64>,
    pub failed: u64,
}

impl RunStats {
    pub fn persisted(&self) -> u64 {
        self.created + self.updated
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped.values().sum()
    }

    pub fn dropped_for(&self, rule: ValidationRule) -> u64 {
        self.dropped.get(&rule).copied().unwrap_or(0)
    }

    pub(crate) fn record_persisted(&mut self, outcome: &UpsertOutcome) {
        match outcome.action {
            UpsertAction::Created => self.created += 1,
            UpsertAction::Updated => self.updated += 1,
        }
        if outcome.changes.price_changed {
            self.price_changes += 1;
        }
        self.created_entities += outcome.created_entities as u64;
    }

    pub(crate) fn record_dropped(&mut self, rule: ValidationRule) {
        *self.dropped.entry(rule).or_insert(0) += 1;
    }
}
