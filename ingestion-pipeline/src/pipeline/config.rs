use common::utils::config::AppConfig;

use crate::reconcile::ReconcileSettings;

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    /// Extra attempts for a record whose transaction hit a unique-index or commit conflict
    pub conflict_retries: usize,
    pub embedding_batch_size: usize,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            conflict_retries: 3,
            embedding_batch_size: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub tuning: IngestionTuning,
    /// Abort the run on the first dropped or failed record
    pub strict_mode: bool,
    /// Prefix of SKUs derived from product URLs
    pub store_code: String,
    pub default_country: String,
    pub default_currency: String,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            tuning: IngestionTuning::default(),
            strict_mode: false,
            store_code: "EDEKA".to_string(),
            default_country: "DE".to_string(),
            default_currency: "EUR".to_string(),
        }
    }
}

impl IngestionConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            tuning: IngestionTuning {
                conflict_retries: config.conflict_retries,
                embedding_batch_size: config.embedding_batch_size.max(1),
            },
            strict_mode: config.strict_mode,
            store_code: config.store_code.clone(),
            default_country: config.default_country.clone(),
            default_currency: config.default_currency.clone(),
        }
    }

    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            default_country: self.default_country.clone(),
            default_currency: self.default_currency.clone(),
            conflict_retries: self.tuning.conflict_retries,
            ..ReconcileSettings::default()
        }
    }
}
