use std::collections::BTreeMap;

use common::storage::types::product::StockStatus;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One scraped page as delivered by the crawler. Every field is optional; the product URL
/// is the only natural identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawScrapedRecord {
    pub name: Option<String>,
    pub price_text: Option<String>,
    pub base_price_text: Option<String>,
    pub availability_text: Option<String>,
    pub category_path: Vec<String>,
    #[serde(alias = "store")]
    pub store_name: Option<String>,
    #[serde(alias = "manufacturer_name")]
    pub manufacturer: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub product_url: Option<String>,
    pub sku: Option<String>,
    /// ISO code declared by the crawler, if any
    pub currency: Option<String>,
    /// Stock status declared by the crawler, if any
    pub stock_status: Option<String>,
    pub details: BTreeMap<String, Value>,
    pub nutritional_info: BTreeMap<String, Value>,
}

/// A record after parsing and enrichment, ready for validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnrichedRecord {
    pub name: String,
    pub product_url: String,
    pub store_name: String,
    pub sku: Option<String>,
    pub image_url: Option<String>,
    pub price_amount: Option<Decimal>,
    pub price_currency: String,
    pub base_price_amount: Option<Decimal>,
    pub base_price_unit: Option<String>,
    pub base_price_quantity: Option<Decimal>,
    pub description: Option<String>,
    pub details: BTreeMap<String, Value>,
    pub nutritional_info: BTreeMap<String, Value>,
    pub stock_status: StockStatus,
    /// Raw declared status kept for validation
    pub declared_stock_status: Option<String>,
    pub availability_text: Option<String>,
    pub category_path: Vec<String>,
    pub manufacturer: Option<String>,
    pub store_slug: Option<String>,
    pub category_slugs: Vec<String>,
}
