use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    str::FromStr,
};

use common::storage::types::product::StockStatus;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;
use url::Url;

use crate::types::EnrichedRecord;

/// URLs this short cannot point at a product page.
const MIN_URL_CHARS: usize = 11;
const MIN_STORE_NAME_CHARS: usize = 2;

/// A guard a record can fail. Each rule has its own counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationRule {
    MissingName,
    MissingProductUrl,
    MissingStoreName,
    InvalidUrl,
    InvalidPrice,
    InvalidCurrency,
    IncompleteBasePrice,
    InvalidStockStatus,
    InvalidStoreName,
    DuplicateUrl,
}

impl ValidationRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationRule::MissingName => "missing_name",
            ValidationRule::MissingProductUrl => "missing_product_url",
            ValidationRule::MissingStoreName => "missing_store_name",
            ValidationRule::InvalidUrl => "invalid_url",
            ValidationRule::InvalidPrice => "invalid_price",
            ValidationRule::InvalidCurrency => "invalid_currency",
            ValidationRule::IncompleteBasePrice => "incomplete_base_price",
            ValidationRule::InvalidStockStatus => "invalid_stock_status",
            ValidationRule::InvalidStoreName => "invalid_store_name",
            ValidationRule::DuplicateUrl => "duplicate_url",
        }
    }
}

impl fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a record was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub rule: ValidationRule,
    pub product_url: Option<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.product_url {
            Some(url) => write!(f, "record {url} failed {}", self.rule),
            None => write!(f, "record failed {}", self.rule),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Run-scoped guard layer. Holds the per-rule counters and the set of URLs already accepted
/// in this run.
#[derive(Debug, Default)]
pub struct ValidationStage {
    counters: BTreeMap<ValidationRule, u64>,
    seen_urls: HashSet<String>,
}

impl ValidationStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks one record. Failing records are counted under their rule; accepted records
    /// claim their URL so later repeats are rejected.
    pub fn validate(&mut self, record: &EnrichedRecord) -> Result<(), ValidationError> {
        let outcome = check_fields(record).and_then(|()| {
            if self.seen_urls.contains(&record.product_url) {
                Err(ValidationRule::DuplicateUrl)
            } else {
                Ok(())
            }
        });

        match outcome {
            Ok(()) => {
                self.seen_urls.insert(record.product_url.clone());
                Ok(())
            }
            Err(rule) => {
                *self.counters.entry(rule).or_insert(0) += 1;
                info!(
                    rule = %rule,
                    product_url = %record.product_url,
                    "record dropped by validation"
                );
                Err(ValidationError {
                    rule,
                    product_url: (!record.product_url.is_empty())
                        .then(|| record.product_url.clone()),
                })
            }
        }
    }

    pub fn count(&self, rule: ValidationRule) -> u64 {
        self.counters.get(&rule).copied().unwrap_or(0)
    }

    pub fn counters(&self) -> &BTreeMap<ValidationRule, u64> {
        &self.counters
    }

    pub fn total_dropped(&self) -> u64 {
        self.counters.values().sum()
    }
}

fn check_fields(record: &EnrichedRecord) -> Result<(), ValidationRule> {
    if record.name.trim().is_empty() {
        return Err(ValidationRule::MissingName);
    }
    if record.product_url.trim().is_empty() {
        return Err(ValidationRule::MissingProductUrl);
    }
    if record.store_name.trim().is_empty() {
        return Err(ValidationRule::MissingStoreName);
    }

    if !is_valid_product_url(&record.product_url) {
        return Err(ValidationRule::InvalidUrl);
    }
    if record
        .price_amount
        .is_some_and(|price| price < Decimal::ZERO)
    {
        return Err(ValidationRule::InvalidPrice);
    }
    if record.price_currency.chars().count() != 3 {
        return Err(ValidationRule::InvalidCurrency);
    }

    let base_fields = [
        record.base_price_amount.is_some(),
        record.base_price_unit.is_some(),
        record.base_price_quantity.is_some(),
    ];
    if base_fields.iter().any(|present| *present) && !base_fields.iter().all(|present| *present)
    {
        return Err(ValidationRule::IncompleteBasePrice);
    }

    if let Some(declared) = record.declared_stock_status.as_deref() {
        if StockStatus::from_str(declared).is_err() {
            return Err(ValidationRule::InvalidStockStatus);
        }
    }
    if record.store_name.trim().chars().count() < MIN_STORE_NAME_CHARS {
        return Err(ValidationRule::InvalidStoreName);
    }

    Ok(())
}

fn is_valid_product_url(raw: &str) -> bool {
    if raw.chars().count() < MIN_URL_CHARS {
        return false;
    }
    Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_record() -> EnrichedRecord {
        EnrichedRecord {
            name: "Vollmilch 3,5%".into(),
            product_url: "https://www.edeka24.de/products/1001".into(),
            store_name: "EDEKA24".into(),
            price_amount: Some(Decimal::new(129, 2)),
            price_currency: "EUR".into(),
            base_price_amount: Some(Decimal::new(129, 2)),
            base_price_unit: Some("L".into()),
            base_price_quantity: Some(Decimal::ONE),
            ..EnrichedRecord::default()
        }
    }

    fn rule_for(record: EnrichedRecord) -> Option<ValidationRule> {
        ValidationStage::new().validate(&record).err().map(|e| e.rule)
    }

    #[test]
    fn accepts_complete_record() {
        assert_eq!(rule_for(valid_record()), None);
    }

    #[test]
    fn required_fields_are_checked_first() {
        let mut record = valid_record();
        record.name = "   ".into();
        record.product_url = String::new();
        assert_eq!(rule_for(record), Some(ValidationRule::MissingName));

        let mut record = valid_record();
        record.product_url = String::new();
        assert_eq!(rule_for(record), Some(ValidationRule::MissingProductUrl));

        let mut record = valid_record();
        record.store_name = String::new();
        assert_eq!(rule_for(record), Some(ValidationRule::MissingStoreName));
    }

    #[test]
    fn format_rules() {
        let mut record = valid_record();
        record.product_url = "ftp://www.edeka24.de/products/1001".into();
        assert_eq!(rule_for(record), Some(ValidationRule::InvalidUrl));

        let mut record = valid_record();
        record.product_url = "http://a.b".into();
        assert_eq!(rule_for(record), Some(ValidationRule::InvalidUrl));

        let mut record = valid_record();
        record.price_amount = Some(Decimal::new(-1, 0));
        assert_eq!(rule_for(record), Some(ValidationRule::InvalidPrice));

        let mut record = valid_record();
        record.price_currency = "EURO".into();
        assert_eq!(rule_for(record), Some(ValidationRule::InvalidCurrency));

        let mut record = valid_record();
        record.base_price_unit = None;
        assert_eq!(rule_for(record), Some(ValidationRule::IncompleteBasePrice));

        let mut record = valid_record();
        record.declared_stock_status = Some("maybe".into());
        assert_eq!(rule_for(record), Some(ValidationRule::InvalidStockStatus));

        let mut record = valid_record();
        record.store_name = "E".into();
        assert_eq!(rule_for(record), Some(ValidationRule::InvalidStoreName));
    }

    #[test]
    fn absent_price_and_base_price_are_accepted() {
        let mut record = valid_record();
        record.price_amount = None;
        record.base_price_amount = None;
        record.base_price_unit = None;
        record.base_price_quantity = None;
        assert_eq!(rule_for(record), None);
    }

    #[test]
    fn first_occurrence_of_url_wins() {
        let mut stage = ValidationStage::new();
        let record = valid_record();

        assert!(stage.validate(&record).is_ok());
        let err = stage.validate(&record).expect_err("duplicate rejected");
        assert_eq!(err.rule, ValidationRule::DuplicateUrl);
        assert_eq!(stage.count(ValidationRule::DuplicateUrl), 1);
    }

    #[test]
    fn rejected_records_do_not_claim_their_url() {
        let mut stage = ValidationStage::new();
        let mut broken = valid_record();
        broken.price_currency = "EURO".into();

        assert!(stage.validate(&broken).is_err());
        assert!(stage.validate(&valid_record()).is_ok());
        assert_eq!(stage.count(ValidationRule::InvalidCurrency), 1);
        assert_eq!(stage.count(ValidationRule::DuplicateUrl), 0);
        assert_eq!(stage.total_dropped(), 1);
    }
}
