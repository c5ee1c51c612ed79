//! Price, base-price and availability parsing for scraped text.
//!
//! Every function here is pure and total: text that does not match yields `None` (or
//! [`StockStatus::Unknown`]) and the caller decides what a missing value means.

use std::{str::FromStr, sync::OnceLock};

use common::storage::types::product::StockStatus;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Currency assumed when neither the text nor the record names one.
pub const DEFAULT_CURRENCY: &str = "EUR";

const IN_STOCK_PHRASES: [&str; 7] = [
    "sofort verfügbar",
    "verfügbar",
    "available",
    "auf lager",
    "in stock",
    "lieferbar",
    "vorrätig",
];

const OUT_OF_STOCK_PHRASES: [&str; 10] = [
    "nicht verfügbar",
    "nicht mehr verfügbar",
    "temporär nicht verfügbar",
    "nicht lieferbar",
    "nicht vorrätig",
    "ausverkauft",
    "out of stock",
    "sold out",
    "not available",
    "unavailable",
];

const KNOWN_CURRENCY_CODES: [&str; 10] = [
    "EUR", "USD", "GBP", "CHF", "PLN", "CZK", "DKK", "SEK", "NOK", "HUF",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedPrice {
    pub amount: Decimal,
    pub currency: String,
}

/// Per-unit price. The three fields only ever exist together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedBasePrice {
    pub amount: Decimal,
    pub unit: String,
    pub quantity: Decimal,
}

struct Patterns {
    main_price: Regex,
    base_price_trailing_unit: Regex,
    base_price_leading_unit: Regex,
    iso_code: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Result<Patterns, String>> = OnceLock::new();

    let compiled = PATTERNS.get_or_init(|| {
        let build = |pattern: &str| {
            Regex::new(pattern).map_err(|e| format!("invalid price pattern {pattern}: {e}"))
        };
        Ok(Patterns {
            main_price: build(r"(?i)(?:€\s*)?(\d{1,3}(?:\.\d{3})+,\d{2}|\d+[,.]\d{2})(?:\D|$)")?,
            base_price_trailing_unit: build(
                r"(?i)\(?(?:€\s*)?(\d+[,.]\d{2})(?:\s*€)?\s*/?\s*(?:(?:per|pro|je)\s+)?(\d+(?:[.,]\d+)?)\s*(\p{L}+)\)?",
            )?,
            base_price_leading_unit: build(
                r"(?i)(\d+(?:[.,]\d+)?)\s*(\p{L}+)\s*=\s*(?:€\s*)?(\d+[,.]\d{2})",
            )?,
            iso_code: build(r"\b([A-Z]{3})\b")?,
        })
    });

    match compiled {
        Ok(patterns) => Some(patterns),
        Err(err) => {
            error!(error = %err, "price patterns failed to compile");
            None
        }
    }
}

/// Converts a locale-formatted number ("1.299,00", "2,99", "2.99") to an exact decimal.
fn parse_locale_decimal(raw: &str) -> Option<Decimal> {
    let normalized = if raw.contains(',') {
        raw.replace('.', "").replace(',', ".")
    } else {
        raw.to_owned()
    };
    Decimal::from_str(&normalized).ok()
}

/// Currency named by a symbol or ISO code inside `text`.
pub fn detect_currency(text: &str) -> Option<String> {
    if text.contains('€') || text.to_ascii_uppercase().contains("EUR") {
        return Some("EUR".to_string());
    }
    if text.contains('$') {
        return Some("USD".to_string());
    }
    if text.contains('£') {
        return Some("GBP".to_string());
    }

    let patterns = patterns()?;
    patterns
        .iso_code
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .find(|code| KNOWN_CURRENCY_CODES.contains(code))
        .map(str::to_owned)
}

/// Extracts the shelf price from text such as "2,99 €" or "EUR 1.299,00".
pub fn parse_main_price(text: &str) -> Option<ParsedPrice> {
    let patterns = patterns()?;
    let raw = patterns.main_price.captures(text)?.get(1)?.as_str();
    let amount = parse_locale_decimal(raw)?;

    Some(ParsedPrice {
        amount,
        currency: detect_currency(text).unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
    })
}

/// Extracts a per-unit price from "1,29 € / 1 L", "(0,50 € per 100 g)" or "1 kg = 2,58 €".
pub fn parse_base_price(text: &str) -> Option<ParsedBasePrice> {
    let patterns = patterns()?;

    if let Some(caps) = patterns.base_price_trailing_unit.captures(text) {
        return build_base_price(
            caps.get(1)?.as_str(),
            caps.get(2)?.as_str(),
            caps.get(3)?.as_str(),
        );
    }

    let caps = patterns.base_price_leading_unit.captures(text)?;
    build_base_price(
        caps.get(3)?.as_str(),
        caps.get(1)?.as_str(),
        caps.get(2)?.as_str(),
    )
}

fn build_base_price(amount: &str, quantity: &str, unit: &str) -> Option<ParsedBasePrice> {
    Some(ParsedBasePrice {
        amount: parse_locale_decimal(amount)?,
        quantity: parse_locale_decimal(quantity)?,
        unit: normalize_unit(unit),
    })
}

/// Maps unit spellings onto a canonical unit. Unknown units pass through lowercased, so
/// normalizing twice is the same as normalizing once.
pub fn normalize_unit(unit: &str) -> String {
    let lowered = unit.trim().to_lowercase();
    let canonical = match lowered.as_str() {
        "g" | "gr" | "gram" | "gramm" | "gramos" => "g",
        "kg" | "kilo" | "kilos" | "kilogram" | "kilogramm" => "kg",
        "ml" | "milliliter" | "millilitro" => "ml",
        "l" | "liter" | "litre" | "litro" => "L",
        "st" | "stk" | "stück" | "stueck" | "piece" | "pieces" | "pcs" => "piece",
        "m" | "meter" | "metre" => "m",
        "cm" | "centimeter" | "centimetre" | "zentimeter" => "cm",
        _ => return lowered,
    };
    canonical.to_string()
}

/// Classifies availability text by phrase containment. The positive list is checked first,
/// so text matching both lists ("Nicht verfügbar" contains "verfügbar") is in stock.
pub fn detect_availability(text: &str) -> (StockStatus, Option<String>) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return (StockStatus::Unknown, None);
    }

    let lowered = trimmed.to_lowercase();
    let status = if IN_STOCK_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
    {
        StockStatus::InStock
    } else if OUT_OF_STOCK_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
    {
        StockStatus::OutOfStock
    } else {
        StockStatus::Unknown
    };

    (status, Some(trimmed.to_string()))
}
