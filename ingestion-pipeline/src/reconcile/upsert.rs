use chrono::{DateTime, Utc};
use common::storage::types::product::Product;

use crate::types::EnrichedRecord;

/// Ids and display names of the rows a product points at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductRefs {
    pub store_id: String,
    pub category_id: Option<String>,
    pub category_name: Option<String>,
    pub manufacturer_id: Option<String>,
    pub manufacturer_name: Option<String>,
}

/// What a sighting changed on a stored product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SightingChanges {
    pub price_changed: bool,
    pub content_changed: bool,
}

/// First sighting of a product URL.
pub fn new_product(record: &EnrichedRecord, refs: &ProductRefs, now: DateTime<Utc>) -> Product {
    let mut product = Product::new(
        record.name.clone(),
        record.product_url.clone(),
        refs.store_id.clone(),
        record.price_currency.clone(),
    );
    product.created_at = now;
    product.updated_at = now;
    product.content_updated_at = now;
    product.sku = record.sku.clone();
    product.image_url = record.image_url.clone();
    product.price_amount = record.price_amount;
    product.base_price_amount = record.base_price_amount;
    product.base_price_unit = record.base_price_unit.clone();
    product.base_price_quantity = record.base_price_quantity;
    product.description = record.description.clone();
    product.details = record.details.clone();
    product.nutritional_info = record.nutritional_info.clone();
    product.stock_status = record.stock_status;
    product.availability_text = record.availability_text.clone();
    product.category_id = refs.category_id.clone();
    product.manufacturer_id = refs.manufacturer_id.clone();
    product.last_price_update = record.price_amount.map(|_| now);
    product.search_text = product.compose_search_text(
        refs.category_name.as_deref(),
        refs.manufacturer_name.as_deref(),
    );
    product
}

/// Merges a repeat sighting into the stored product.
///
/// Absent incoming values keep the stored ones. A differing, present price marks the
/// product as repriced. `search_text` is only recomputed when name, description or details
/// change; `content_updated_at` also moves on a price change so the embedding, which
/// includes the price, goes stale.
pub fn apply_sighting(
    existing: Product,
    record: &EnrichedRecord,
    refs: &ProductRefs,
    now: DateTime<Utc>,
) -> (Product, SightingChanges) {
    let mut product = existing;

    let price_changed =
        record.price_amount.is_some() && record.price_amount != product.price_amount;
    if price_changed {
        product.price_amount = record.price_amount;
        product.last_price_update = Some(now);
    }
    product.price_changed = price_changed;

    let description = record
        .description
        .clone()
        .or_else(|| product.description.clone());
    let details = if record.details.is_empty() {
        product.details.clone()
    } else {
        record.details.clone()
    };
    let content_changed = product.name != record.name
        || product.description != description
        || product.details != details;

    product.name = record.name.clone();
    product.description = description;
    product.details = details;

    product.sku = record.sku.clone().or(product.sku);
    product.image_url = record.image_url.clone().or(product.image_url);
    product.price_currency = record.price_currency.clone();
    if record.base_price_amount.is_some() {
        product.base_price_amount = record.base_price_amount;
        product.base_price_unit = record.base_price_unit.clone();
        product.base_price_quantity = record.base_price_quantity;
    }
    if !record.nutritional_info.is_empty() {
        product.nutritional_info = record.nutritional_info.clone();
    }
    product.stock_status = record.stock_status;
    product.availability_text = record
        .availability_text
        .clone()
        .or(product.availability_text);
    product.store_id = refs.store_id.clone();
    product.category_id = refs.category_id.clone().or(product.category_id);
    product.manufacturer_id = refs.manufacturer_id.clone().or(product.manufacturer_id);

    product.scrape_count = product.scrape_count.saturating_add(1);
    product.updated_at = now;

    if content_changed {
        product.search_text = product.compose_search_text(
            refs.category_name.as_deref(),
            refs.manufacturer_name.as_deref(),
        );
    }
    if content_changed || price_changed {
        product.content_updated_at = now;
    }

    (
        product,
        SightingChanges {
            price_changed,
            content_changed,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::storage::types::product::StockStatus;
    use rust_decimal::Decimal;
    use serde_json::json;

    fn record() -> EnrichedRecord {
        EnrichedRecord {
            name: "Vollmilch 3,5%".into(),
            product_url: "https://www.edeka24.de/products/1001".into(),
            store_name: "EDEKA24".into(),
            price_amount: Some(Decimal::new(129, 2)),
            price_currency: "EUR".into(),
            description: Some("Frische Milch".into()),
            stock_status: StockStatus::InStock,
            ..EnrichedRecord::default()
        }
    }

    fn refs() -> ProductRefs {
        ProductRefs {
            store_id: "store-1".into(),
            category_id: Some("cat-1".into()),
            category_name: Some("Milchprodukte".into()),
            manufacturer_id: None,
            manufacturer_name: None,
        }
    }

    #[test]
    fn new_product_carries_record_fields() {
        let now = Utc::now();
        let product = new_product(&record(), &refs(), now);

        assert_eq!(product.scrape_count, 1);
        assert_eq!(product.last_price_update, Some(now));
        assert_eq!(product.category_id.as_deref(), Some("cat-1"));
        assert_eq!(product.search_text, "Vollmilch 3,5% Frische Milch Milchprodukte");
        assert!(!product.price_changed);
    }

    #[test]
    fn unpriced_product_has_no_price_timestamp() {
        let mut unpriced = record();
        unpriced.price_amount = None;
        let product = new_product(&unpriced, &refs(), Utc::now());
        assert!(product.last_price_update.is_none());
    }

    #[test]
    fn unchanged_sighting_only_counts() {
        let created_at = Utc::now();
        let product = new_product(&record(), &refs(), created_at);
        let later = created_at + Duration::minutes(5);

        let (updated, changes) = apply_sighting(product.clone(), &record(), &refs(), later);

        assert_eq!(changes, SightingChanges::default());
        assert_eq!(updated.scrape_count, 2);
        assert_eq!(updated.last_price_update, Some(created_at));
        assert_eq!(updated.search_text, product.search_text);
        assert_eq!(updated.content_updated_at, created_at);
        assert_eq!(updated.updated_at, later);
    }

    #[test]
    fn new_price_is_recorded() {
        let created_at = Utc::now();
        let product = new_product(&record(), &refs(), created_at);
        let later = created_at + Duration::minutes(5);
        let mut repriced = record();
        repriced.price_amount = Some(Decimal::new(149, 2));

        let (updated, changes) = apply_sighting(product, &repriced, &refs(), later);

        assert!(changes.price_changed);
        assert!(!changes.content_changed);
        assert!(updated.price_changed);
        assert_eq!(updated.price_amount, Some(Decimal::new(149, 2)));
        assert_eq!(updated.last_price_update, Some(later));
        assert_eq!(updated.content_updated_at, later);
    }

    #[test]
    fn missing_price_keeps_the_stored_one() {
        let created_at = Utc::now();
        let product = new_product(&record(), &refs(), created_at);
        let mut unpriced = record();
        unpriced.price_amount = None;

        let (updated, changes) =
            apply_sighting(product, &unpriced, &refs(), created_at + Duration::minutes(1));

        assert!(!changes.price_changed);
        assert_eq!(updated.price_amount, Some(Decimal::new(129, 2)));
        assert_eq!(updated.last_price_update, Some(created_at));
    }

    #[test]
    fn content_change_rebuilds_search_text() {
        let created_at = Utc::now();
        let product = new_product(&record(), &refs(), created_at);
        let mut changed = record();
        changed.details.insert("herkunft".into(), json!("Bayern"));
        let later = created_at + Duration::minutes(5);

        let (updated, changes) = apply_sighting(product, &changed, &refs(), later);

        assert!(changes.content_changed);
        assert!(updated.search_text.contains("Bayern"));
        assert_eq!(updated.content_updated_at, later);
    }

    #[test]
    fn price_flag_reflects_latest_sighting() {
        let created_at = Utc::now();
        let product = new_product(&record(), &refs(), created_at);
        let mut repriced = record();
        repriced.price_amount = Some(Decimal::new(149, 2));

        let (repriced_product, _) =
            apply_sighting(product, &repriced, &refs(), created_at + Duration::minutes(1));
        let (steady, changes) = apply_sighting(
            repriced_product,
            &repriced,
            &refs(),
            created_at + Duration::minutes(2),
        );

        assert!(!changes.price_changed);
        assert!(!steady.price_changed);
        assert_eq!(steady.scrape_count, 3);
    }
}
