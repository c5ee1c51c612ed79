//! Derives secondary attributes (SKU, manufacturer guess, slugs, structured details) from a
//! raw scraped record. Each step is best-effort: a failing step is logged and skipped.

use std::{collections::BTreeMap, str::FromStr, sync::OnceLock};

use anyhow::{anyhow, Result};
use common::{storage::types::product::StockStatus, utils::text::clean_text};
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{
    parser::{detect_availability, detect_currency, parse_base_price, parse_main_price},
    types::{EnrichedRecord, RawScrapedRecord},
};

/// Brands recognised anywhere in a product name. Best-effort only.
const KNOWN_BRANDS: [&str; 17] = [
    "coca-cola",
    "pepsi",
    "nestle",
    "unilever",
    "procter",
    "johnson",
    "kellogg",
    "mars",
    "ferrero",
    "kraft",
    "danone",
    "löwenbräu",
    "beck",
    "warsteiner",
    "krombacher",
    "bitburger",
    "franziskaner",
];

/// Detail keys longer than this are treated as prose, not labels.
const MAX_DETAIL_KEY_CHARS: usize = 40;

struct Patterns {
    sku: Vec<Regex>,
    detail_line: Regex,
    slug_strip: Regex,
    slug_collapse: Regex,
}

fn patterns() -> Result<&'static Patterns> {
    static PATTERNS: OnceLock<Result<Patterns, String>> = OnceLock::new();

    let compiled = PATTERNS.get_or_init(|| {
        let build = |pattern: &str| {
            Regex::new(pattern).map_err(|e| format!("invalid enrichment pattern {pattern}: {e}"))
        };
        Ok(Patterns {
            sku: vec![
                build(r"/products?/(\d+)")?,
                build(r"/item/(\d+)")?,
                build(r"[?&]id=(\d+)")?,
                build(r"/p/([a-zA-Z0-9-]+)")?,
            ],
            detail_line: build(r"(?m)(\p{L}[\p{L} \t]*):[ \t]*([^\n\r]+)")?,
            slug_strip: build(r"[^\w\s-]")?,
            slug_collapse: build(r"[-\s]+")?,
        })
    });

    compiled.as_ref().map_err(|err| anyhow!(err.clone()))
}

/// Deterministic SKU for a product URL: the first id-looking path or query segment, or a
/// truncated hash of the whole URL, prefixed with the store code.
pub fn generate_sku_from_url(url: &str, store_code: &str) -> String {
    let matched = patterns().ok().and_then(|patterns| {
        patterns
            .sku
            .iter()
            .find_map(|pattern| pattern.captures(url)?.get(1))
            .map(|m| m.as_str().to_owned())
    });

    let id = matched.unwrap_or_else(|| {
        let digest = Sha256::digest(url.as_bytes());
        digest.iter().take(4).map(|b| format!("{b:02X}")).collect()
    });

    format!("{store_code}-{id}")
}

/// Guesses a manufacturer from a product name. Known brands match anywhere (returned title
/// cased); otherwise a leading alphabetic word longer than two characters is assumed to be
/// the brand. Expect false positives.
pub fn extract_manufacturer_from_name(name: &str) -> Option<String> {
    let lowered = name.to_lowercase();
    if let Some(brand) = KNOWN_BRANDS.iter().find(|brand| lowered.contains(*brand)) {
        return Some(title_case(brand));
    }

    let first = name.split_whitespace().next()?;
    (first.chars().count() > 2 && first.chars().all(char::is_alphabetic))
        .then(|| first.to_string())
}

/// Promotes "Key: value" lines of a description into detail entries keyed by the lowercased,
/// underscore-joined label.
pub fn extract_product_details(description: &str) -> Result<BTreeMap<String, Value>> {
    let patterns = patterns()?;
    let mut details = BTreeMap::new();

    for caps in patterns.detail_line.captures_iter(description) {
        let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let key = key.as_str().trim();
        let value = value.as_str().trim();
        if key.is_empty() || value.is_empty() || key.chars().count() > MAX_DETAIL_KEY_CHARS {
            continue;
        }

        let normalized_key = key
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_");
        details
            .entry(normalized_key)
            .or_insert_with(|| Value::String(value.to_string()));
    }

    Ok(details)
}

/// URL-safe identifier for store and category names.
pub fn slugify(text: &str) -> String {
    let Ok(patterns) = patterns() else {
        return text.trim().to_lowercase();
    };
    let lowered = text.to_lowercase();
    let stripped = patterns.slug_strip.replace_all(&lowered, "");
    let collapsed = patterns.slug_collapse.replace_all(stripped.trim(), "-");
    collapsed.trim_matches('-').to_string()
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !c.is_alphabetic();
    }
    out
}

fn clean_optional(value: Option<&str>) -> Option<String> {
    value.map(clean_text).filter(|text| !text.is_empty())
}

/// Turns raw crawler output into [`EnrichedRecord`]s.
#[derive(Debug, Clone)]
pub struct DataEnricher {
    store_code: String,
    default_currency: String,
}

impl DataEnricher {
    pub fn new(store_code: impl Into<String>, default_currency: impl Into<String>) -> Self {
        Self {
            store_code: store_code.into(),
            default_currency: default_currency.into(),
        }
    }

    /// Cleans text fields, parses prices and availability, and derives SKU, manufacturer,
    /// details and slugs. Never fails: attributes whose step fails stay empty.
    pub fn enrich(&self, raw: &RawScrapedRecord) -> EnrichedRecord {
        let mut record = EnrichedRecord {
            name: raw.name.as_deref().map(clean_text).unwrap_or_default(),
            product_url: raw
                .product_url
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string(),
            store_name: raw.store_name.as_deref().map(clean_text).unwrap_or_default(),
            sku: clean_optional(raw.sku.as_deref()),
            image_url: raw
                .image_url
                .as_deref()
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_owned),
            price_currency: self.default_currency.clone(),
            description: clean_optional(raw.description.as_deref()),
            details: raw.details.clone(),
            nutritional_info: raw.nutritional_info.clone(),
            availability_text: clean_optional(raw.availability_text.as_deref()),
            category_path: raw
                .category_path
                .iter()
                .map(|entry| clean_text(entry))
                .filter(|entry| !entry.is_empty())
                .collect(),
            manufacturer: clean_optional(raw.manufacturer.as_deref()),
            declared_stock_status: raw
                .stock_status
                .as_deref()
                .map(str::trim)
                .filter(|status| !status.is_empty())
                .map(str::to_owned),
            ..EnrichedRecord::default()
        };

        let product_url = record.product_url.clone();
        let run_step = |step: &'static str, outcome: Result<()>| {
            if let Err(err) = outcome {
                warn!(step, product_url = %product_url, error = %err, "enrichment step failed");
            }
        };

        run_step("prices", self.apply_prices(raw, &mut record));
        run_step("availability", Self::apply_availability(&mut record));
        run_step("sku", self.apply_sku(&mut record));
        run_step("manufacturer", Self::apply_manufacturer(&mut record));
        run_step("details", Self::apply_details(raw, &mut record));
        run_step("slugs", Self::apply_slugs(&mut record));

        debug!(
            product_url = %record.product_url,
            price = ?record.price_amount,
            stock_status = %record.stock_status,
            categories = record.category_path.len(),
            "record enriched"
        );

        record
    }

    fn apply_prices(&self, raw: &RawScrapedRecord, record: &mut EnrichedRecord) -> Result<()> {
        let price_text = raw.price_text.as_deref().unwrap_or_default();

        record.price_currency = raw
            .currency
            .as_deref()
            .map(|code| code.trim().to_uppercase())
            .filter(|code| !code.is_empty())
            .or_else(|| detect_currency(price_text))
            .unwrap_or_else(|| self.default_currency.clone());

        if let Some(price) = parse_main_price(price_text) {
            record.price_amount = Some(price.amount);
        } else if !price_text.trim().is_empty() {
            debug!(product_url = %record.product_url, price_text, "price text did not parse");
        }

        if let Some(base) = raw.base_price_text.as_deref().and_then(parse_base_price) {
            record.base_price_amount = Some(base.amount);
            record.base_price_unit = Some(base.unit);
            record.base_price_quantity = Some(base.quantity);
        }

        Ok(())
    }

    fn apply_availability(record: &mut EnrichedRecord) -> Result<()> {
        let declared = record
            .declared_stock_status
            .as_deref()
            .and_then(|status| StockStatus::from_str(status).ok());

        let (detected, normalized) =
            detect_availability(record.availability_text.as_deref().unwrap_or_default());
        record.availability_text = normalized;
        record.stock_status = declared.unwrap_or(detected);
        Ok(())
    }

    fn apply_sku(&self, record: &mut EnrichedRecord) -> Result<()> {
        if record.sku.is_none() && !record.product_url.is_empty() {
            record.sku = Some(generate_sku_from_url(&record.product_url, &self.store_code));
        }
        Ok(())
    }

    fn apply_manufacturer(record: &mut EnrichedRecord) -> Result<()> {
        if record.manufacturer.is_none() {
            record.manufacturer = extract_manufacturer_from_name(&record.name);
        }
        Ok(())
    }

    fn apply_details(raw: &RawScrapedRecord, record: &mut EnrichedRecord) -> Result<()> {
        // Line structure only survives in the uncleaned description
        let Some(description) = raw.description.as_deref() else {
            return Ok(());
        };

        for (key, value) in extract_product_details(description)? {
            record.details.entry(key).or_insert(value);
        }

        if let Some(cleaned) = record.description.as_deref() {
            record
                .details
                .entry("description_length".to_string())
                .or_insert_with(|| Value::from(cleaned.chars().count()));
        }
        Ok(())
    }

    fn apply_slugs(record: &mut EnrichedRecord) -> Result<()> {
        if !record.store_name.is_empty() {
            record.store_slug = Some(slugify(&record.store_name));
        }
        record.category_slugs = record.category_path.iter().map(|name| slugify(name)).collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::json;

    fn raw_milk() -> RawScrapedRecord {
        RawScrapedRecord {
            name: Some("  Vollmilch   3,5% ".into()),
            price_text: Some("1,29 €".into()),
            base_price_text: Some("1,29 € / 1 L".into()),
            availability_text: Some("Sofort verfügbar".into()),
            category_path: vec!["Lebensmittel".into(), " ".into(), "Milchprodukte".into()],
            store_name: Some("EDEKA24".into()),
            product_url: Some(" https://www.edeka24.de/products/1001 ".into()),
            description: Some("Frische Vollmilch.\nZutaten: Milch\nHerkunft Land: Deutschland".into()),
            ..RawScrapedRecord::default()
        }
    }

    #[test]
    fn sku_prefers_url_ids_and_falls_back_to_hash() {
        assert_eq!(
            generate_sku_from_url("https://shop.example/products/12345", "EDEKA"),
            "EDEKA-12345"
        );
        assert_eq!(
            generate_sku_from_url("https://shop.example/item/77", "EDEKA"),
            "EDEKA-77"
        );
        assert_eq!(
            generate_sku_from_url("https://shop.example/list?page=2&id=42", "EDEKA"),
            "EDEKA-42"
        );
        assert_eq!(
            generate_sku_from_url("https://shop.example/p/bio-milch-1l", "EDEKA"),
            "EDEKA-bio-milch-1l"
        );

        let hashed = generate_sku_from_url("https://shop.example/vollmilch.html", "EDEKA");
        assert_eq!(hashed.len(), "EDEKA-".len() + 8);
        assert!(hashed
            .trim_start_matches("EDEKA-")
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_eq!(
            hashed,
            generate_sku_from_url("https://shop.example/vollmilch.html", "EDEKA")
        );
    }

    #[test]
    fn manufacturer_heuristic_prefers_known_brands() {
        assert_eq!(
            extract_manufacturer_from_name("Original Coca-Cola Zero 1,5l"),
            Some("Coca-Cola".to_string())
        );
        assert_eq!(
            extract_manufacturer_from_name("Löwenbräu Original"),
            Some("Löwenbräu".to_string())
        );
        assert_eq!(
            extract_manufacturer_from_name("Weihenstephan Joghurt"),
            Some("Weihenstephan".to_string())
        );
        assert_eq!(extract_manufacturer_from_name("Ja! Milch"), None);
        assert_eq!(extract_manufacturer_from_name("3er Pack"), None);
        assert_eq!(extract_manufacturer_from_name(""), None);
    }

    #[test]
    fn details_are_extracted_from_labelled_lines() {
        let details = extract_product_details(
            "Leckere Milch.\nZutaten: Vollmilch\nNettofüllmenge:  1 Liter\nHerkunft Land: Bayern",
        )
        .expect("details extract");

        assert_eq!(details.get("zutaten"), Some(&json!("Vollmilch")));
        assert_eq!(details.get("nettofüllmenge"), Some(&json!("1 Liter")));
        assert_eq!(details.get("herkunft_land"), Some(&json!("Bayern")));
    }

    #[test]
    fn slugify_collapses_and_trims() {
        assert_eq!(slugify("EDEKA24"), "edeka24");
        assert_eq!(slugify("Obst & Gemüse"), "obst-gemüse");
        assert_eq!(slugify("  --Wein, Sekt --  "), "wein-sekt");
        assert_eq!(slugify("Milch_Produkte"), "milch_produkte");
    }

    #[test]
    fn enrich_fills_derived_fields() {
        let enricher = DataEnricher::new("EDEKA", "EUR");
        let record = enricher.enrich(&raw_milk());

        assert_eq!(record.name, "Vollmilch 3,5%");
        assert_eq!(record.product_url, "https://www.edeka24.de/products/1001");
        assert_eq!(record.price_amount, Some(Decimal::new(129, 2)));
        assert_eq!(record.price_currency, "EUR");
        assert_eq!(record.base_price_amount, Some(Decimal::new(129, 2)));
        assert_eq!(record.base_price_unit.as_deref(), Some("L"));
        assert_eq!(record.base_price_quantity, Some(Decimal::ONE));
        assert_eq!(record.stock_status, StockStatus::InStock);
        assert_eq!(record.sku.as_deref(), Some("EDEKA-1001"));
        assert_eq!(record.manufacturer.as_deref(), Some("Vollmilch"));
        assert_eq!(record.category_path, vec!["Lebensmittel", "Milchprodukte"]);
        assert_eq!(record.category_slugs, vec!["lebensmittel", "milchprodukte"]);
        assert_eq!(record.store_slug.as_deref(), Some("edeka24"));
        assert_eq!(record.details.get("zutaten"), Some(&json!("Milch")));
        assert_eq!(record.details.get("herkunft_land"), Some(&json!("Deutschland")));
        assert!(record.details.contains_key("description_length"));
    }

    #[test]
    fn existing_values_win_over_derived_ones() {
        let mut raw = raw_milk();
        raw.sku = Some("SKU-1".into());
        raw.manufacturer = Some("Weihenstephan".into());
        raw.currency = Some("chf".into());
        raw.stock_status = Some("out_of_stock".into());
        raw.details.insert("zutaten".into(), json!("Bio-Milch"));

        let record = DataEnricher::new("EDEKA", "EUR").enrich(&raw);

        assert_eq!(record.sku.as_deref(), Some("SKU-1"));
        assert_eq!(record.manufacturer.as_deref(), Some("Weihenstephan"));
        assert_eq!(record.price_currency, "CHF");
        assert_eq!(record.stock_status, StockStatus::OutOfStock);
        assert_eq!(record.details.get("zutaten"), Some(&json!("Bio-Milch")));
    }

    #[test]
    fn unparseable_text_leaves_attributes_empty() {
        let raw = RawScrapedRecord {
            name: Some("Geschenkkarte".into()),
            price_text: Some("Preis auf Anfrage".into()),
            base_price_text: Some("Grundpreis folgt".into()),
            store_name: Some("EDEKA24".into()),
            product_url: Some("https://www.edeka24.de/geschenkkarte".into()),
            ..RawScrapedRecord::default()
        };

        let record = DataEnricher::new("EDEKA", "EUR").enrich(&raw);

        assert!(record.price_amount.is_none());
        assert!(record.base_price_amount.is_none());
        assert!(record.base_price_unit.is_none());
        assert!(record.base_price_quantity.is_none());
        assert_eq!(record.stock_status, StockStatus::Unknown);
        assert!(record.availability_text.is_none());
        assert!(record.sku.is_some());
    }
}
