use std::{collections::BTreeMap, str::FromStr};

use rust_decimal::Decimal;
use serde_json::Value;
use surrealdb::sql::Datetime as SurrealDatetime;
use tracing::{debug, info};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::{category::Category, manufacturer::Manufacturer, new_record_id};

/// HNSW index over product embeddings, defined on demand by `catalog init --vector-index`.
const EMBEDDING_INDEX_NAME: &str = "idx_embedding_product";

/// Detail keys that carry enough meaning to be worth embedding.
const EMBEDDED_DETAIL_KEYS: [&str; 5] = [
    "ingredients",
    "features",
    "benefits",
    "usage",
    "specifications",
];

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    OutOfStock,
    #[default]
    Unknown,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::InStock => "in_stock",
            StockStatus::OutOfStock => "out_of_stock",
            StockStatus::Unknown => "unknown",
        }
    }
}

impl FromStr for StockStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_stock" => Ok(StockStatus::InStock),
            "out_of_stock" => Ok(StockStatus::OutOfStock),
            "unknown" => Ok(StockStatus::Unknown),
            other => Err(AppError::Validation(format!("unknown stock status '{other}'"))),
        }
    }
}

impl fmt::Display for StockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

stored_object!(Product, "product", {
    name: String,
    sku: Option<String>,
    /// Natural key, unique across products
    product_url: String,
    image_url: Option<String>,
    price_amount: Option<Decimal>,
    price_currency: String,
    base_price_amount: Option<Decimal>,
    base_price_unit: Option<String>,
    base_price_quantity: Option<Decimal>,
    description: Option<String>,
    #[serde(default)]
    details: BTreeMap<String, Value>,
    #[serde(default)]
    nutritional_info: BTreeMap<String, Value>,
    #[serde(default)]
    stock_status: StockStatus,
    availability_text: Option<String>,
    #[serde(default)]
    search_text: String,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    embedding_model: Option<String>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    embedding_updated_at: Option<DateTime<Utc>>,
    /// Last time name, description or details changed
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
    content_updated_at: DateTime<Utc>,
    scrape_count: u32,
    #[serde(default)]
    price_changed: bool,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    last_price_update: Option<DateTime<Utc>>,
    store_id: String,
    category_id: Option<String>,
    manufacturer_id: Option<String>
});

/// One page of a store listing.
#[derive(Debug, Clone, Serialize)]
pub struct ProductPage {
    pub products: Vec<Product>,
    pub total: u64,
    pub skip: usize,
    pub limit: usize,
    pub has_next: bool,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: u64,
}

impl Product {
    pub fn new(name: String, product_url: String, store_id: String, currency: String) -> Self {
        let now = Utc::now();
        Self {
            id: new_record_id(),
            created_at: now,
            updated_at: now,
            name,
            sku: None,
            product_url,
            image_url: None,
            price_amount: None,
            price_currency: currency,
            base_price_amount: None,
            base_price_unit: None,
            base_price_quantity: None,
            description: None,
            details: BTreeMap::new(),
            nutritional_info: BTreeMap::new(),
            stock_status: StockStatus::Unknown,
            availability_text: None,
            search_text: String::new(),
            embedding: None,
            embedding_model: None,
            embedding_updated_at: None,
            content_updated_at: now,
            scrape_count: 1,
            price_changed: false,
            last_price_update: None,
            store_id,
            category_id: None,
            manufacturer_id: None,
        }
    }

    /// Lexical search document: name, description, textual detail values, category and
    /// manufacturer names, space separated.
    pub fn compose_search_text(
        &self,
        category_name: Option<&str>,
        manufacturer_name: Option<&str>,
    ) -> String {
        let mut parts: Vec<&str> = vec![self.name.as_str()];
        if let Some(description) = self.description.as_deref() {
            parts.push(description);
        }
        for value in self.details.values() {
            match value {
                Value::String(text) => parts.push(text),
                Value::Array(items) => parts.extend(items.iter().filter_map(Value::as_str)),
                _ => {}
            }
        }
        parts.extend(category_name);
        parts.extend(manufacturer_name);

        parts
            .into_iter()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Canonical embedding input. Section order is fixed so equal products embed equally.
    pub fn embedding_text(
        &self,
        category_name: Option<&str>,
        manufacturer_name: Option<&str>,
    ) -> String {
        let mut lines = Vec::new();

        if !self.name.is_empty() {
            lines.push(format!("Product: {}", self.name));
        }
        if let Some(description) = self.description.as_deref().filter(|d| !d.is_empty()) {
            lines.push(format!("Description: {description}"));
        }
        if let Some(category) = category_name {
            lines.push(format!("Category: {category}"));
        }
        if let Some(manufacturer) = manufacturer_name {
            lines.push(format!("Brand: {manufacturer}"));
        }

        for key in EMBEDDED_DETAIL_KEYS {
            let Some(value) = self.details.get(key) else {
                continue;
            };
            let rendered = match value {
                Value::String(text) => Some(text.clone()),
                Value::Array(items) => Some(
                    items
                        .iter()
                        .map(render_scalar)
                        .collect::<Vec<_>>()
                        .join(", "),
                ),
                _ => None,
            };
            if let Some(rendered) = rendered {
                lines.push(format!("{}: {rendered}", title_case(key)));
            }
        }

        let nutrition: Vec<String> = self
            .nutritional_info
            .iter()
            .filter(|(_, value)| value.is_string() || value.is_number())
            .map(|(key, value)| format!("{key}: {}", render_scalar(value)))
            .collect();
        if !nutrition.is_empty() {
            lines.push(format!("Nutrition: {}", nutrition.join(", ")));
        }

        if let Some(price) = self.price_amount {
            let mut price_line = format!("Price: {price} {}", self.price_currency);
            if let (Some(base), Some(unit)) =
                (self.base_price_amount, self.base_price_unit.as_deref())
            {
                price_line.push_str(&format!(" ({base} {}/{unit})", self.price_currency));
            }
            lines.push(price_line);
        }

        lines.join("\n")
    }

    /// True when no embedding exists or content changed after it was generated.
    pub fn needs_embedding(&self) -> bool {
        match (&self.embedding, self.embedding_updated_at) {
            (Some(_), Some(embedded_at)) => self.content_updated_at > embedded_at,
            _ => true,
        }
    }

    pub async fn get_by_url(url: &str, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM type::table($table) WHERE product_url = $url LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("url", url.to_owned()))
            .await?;
        let products: Vec<Self> = response.take(0)?;
        Ok(products.into_iter().next())
    }

    /// Paginated store listing, optionally narrowed to a category and to in-stock items.
    pub async fn list_by_store(
        store_id: &str,
        category_id: Option<&str>,
        in_stock_only: bool,
        skip: usize,
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<ProductPage, AppError> {
        let mut conditions = vec!["store_id = $store_id"];
        if category_id.is_some() {
            conditions.push("category_id = $category_id");
        }
        if in_stock_only {
            conditions.push("stock_status = 'in_stock'");
        }
        let where_clause = conditions.join(" AND ");

        let sql = format!(
            "SELECT * FROM type::table($table) WHERE {where_clause} \
             ORDER BY name ASC, id ASC LIMIT $limit START $skip; \
             SELECT count() FROM type::table($table) WHERE {where_clause} GROUP ALL;"
        );

        let mut response = db
            .client
            .query(sql)
            .bind(("table", Self::table_name()))
            .bind(("store_id", store_id.to_owned()))
            .bind(("category_id", category_id.map(str::to_owned)))
            .bind(("limit", limit as i64))
            .bind(("skip", skip as i64))
            .await?;

        let products: Vec<Self> = response.take(0)?;
        let counts: Vec<CountRow> = response.take(1)?;
        let total = counts.first().map_or(0, |row| row.count);

        Ok(ProductPage {
            has_next: (skip.saturating_add(limit) as u64) < total,
            products,
            total,
            skip,
            limit,
        })
    }

    /// Priced products within an inclusive range, cheapest first.
    pub async fn list_by_price_range(
        min_price: Option<Decimal>,
        max_price: Option<Decimal>,
        store_id: Option<&str>,
        skip: usize,
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let store_clause = if store_id.is_some() {
            " AND store_id = $store_id"
        } else {
            ""
        };
        let sql = format!(
            "SELECT * FROM type::table($table) WHERE price_amount != NONE{store_clause}"
        );

        let mut response = db
            .client
            .query(sql)
            .bind(("table", Self::table_name()))
            .bind(("store_id", store_id.map(str::to_owned)))
            .await?;
        let candidates: Vec<Self> = response.take(0)?;

        // Amounts are stored as exact decimal strings, so range and order are applied here.
        let mut in_range: Vec<(Decimal, Self)> = candidates
            .into_iter()
            .filter_map(|product| product.price_amount.map(|price| (price, product)))
            .filter(|(price, _)| min_price.map_or(true, |min| *price >= min))
            .filter(|(price, _)| max_price.map_or(true, |max| *price <= max))
            .collect();
        in_range.sort_by(|(a_price, a), (b_price, b)| a_price.cmp(b_price).then_with(|| a.id.cmp(&b.id)));

        Ok(in_range
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|(_, product)| product)
            .collect())
    }

    /// Products whose embedding is missing or older than their content.
    pub async fn needing_embeddings(
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .client
            .query(
                "SELECT * FROM type::table($table) \
                 WHERE embedding = NONE \
                    OR embedding_updated_at = NONE \
                    OR content_updated_at > embedding_updated_at \
                 ORDER BY content_updated_at ASC \
                 LIMIT $limit",
            )
            .bind(("table", Self::table_name()))
            .bind(("limit", limit as i64))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn update_embedding(
        id: &str,
        embedding: Vec<f32>,
        model: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let mut response = db
            .client
            .query(
                "UPDATE type::thing($table, $id) SET \
                    embedding = $embedding, \
                    embedding_model = $model, \
                    embedding_updated_at = $embedded_at",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_owned()))
            .bind(("embedding", embedding))
            .bind(("model", model))
            .bind(("embedded_at", SurrealDatetime::from(Utc::now())))
            .await?;
        SurrealDbClient::check_response(&mut response)?;
        Ok(())
    }

    /// Recomputes `search_text` for products that lack one. Returns the number updated.
    pub async fn backfill_search_text(db: &SurrealDbClient) -> Result<usize, AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM type::table($table) WHERE search_text = NONE OR search_text = ''")
            .bind(("table", Self::table_name()))
            .await?;
        let products: Vec<Self> = response.take(0)?;

        let mut updated = 0usize;
        for product in products {
            let category = match product.category_id.as_deref() {
                Some(id) => db.get_item::<Category>(id).await?,
                None => None,
            };
            let manufacturer = match product.manufacturer_id.as_deref() {
                Some(id) => db.get_item::<Manufacturer>(id).await?,
                None => None,
            };
            let search_text = product.compose_search_text(
                category.as_ref().map(|c| c.name.as_str()),
                manufacturer.as_ref().map(|m| m.name.as_str()),
            );

            let mut response = db
                .client
                .query("UPDATE type::thing($table, $id) SET search_text = $search_text")
                .bind(("table", Self::table_name()))
                .bind(("id", product.id.clone()))
                .bind(("search_text", search_text))
                .await?;
            SurrealDbClient::check_response(&mut response)?;
            updated = updated.saturating_add(1);
            debug!(product_id = %product.id, "search text backfilled");
        }

        if updated > 0 {
            info!(updated, "backfilled product search text");
        }
        Ok(updated)
    }

    /// Recreate the HNSW index on product embeddings with a new dimension.
    pub async fn redefine_hnsw_index(
        db: &SurrealDbClient,
        dimension: usize,
    ) -> Result<(), AppError> {
        let query = format!(
            "BEGIN TRANSACTION;
             REMOVE INDEX IF EXISTS {index} ON TABLE {table};
             DEFINE INDEX {index} ON TABLE {table} FIELDS embedding HNSW DIMENSION {dimension} DIST COSINE;
             COMMIT TRANSACTION;",
            index = EMBEDDING_INDEX_NAME,
            table = Self::table_name(),
        );

        let mut res = db.client.query(query).await?;
        SurrealDbClient::check_response(&mut res)?;

        Ok(())
    }

    /// Dimension of the HNSW embedding index, or `None` while it is not defined.
    pub async fn hnsw_index_dimension(db: &SurrealDbClient) -> Result<Option<usize>, AppError> {
        let mut response = db
            .client
            .query(format!("INFO FOR TABLE {};", Self::table_name()))
            .await?;
        let info: surrealdb::Value = response.take(0)?;
        let info = serde_json::to_value(info)?;

        Ok(find_index_definition(&info, EMBEDDING_INDEX_NAME).and_then(extract_dimension))
    }
}

fn find_index_definition<'a>(info: &'a Value, index: &str) -> Option<&'a str> {
    match info {
        Value::String(definition) if definition.contains(&format!("INDEX {index} ")) => {
            Some(definition.as_str())
        }
        Value::Array(items) => items
            .iter()
            .find_map(|item| find_index_definition(item, index)),
        Value::Object(fields) => fields
            .values()
            .find_map(|field| find_index_definition(field, index)),
        _ => None,
    }
}

fn extract_dimension(definition: &str) -> Option<usize> {
    definition
        .split("DIMENSION")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|token| token.trim_end_matches(';').parse::<usize>().ok())
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn title_case(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized().await.expect("Failed to init schema");
        db
    }

    fn milk(store_id: &str) -> Product {
        let mut product = Product::new(
            "Vollmilch 3,5%".into(),
            "https://www.edeka24.de/products/1001".into(),
            store_id.into(),
            "EUR".into(),
        );
        product.price_amount = Some(Decimal::new(129, 2));
        product.base_price_amount = Some(Decimal::new(129, 2));
        product.base_price_unit = Some("L".into());
        product.base_price_quantity = Some(Decimal::ONE);
        product
    }

    #[test]
    fn search_text_joins_textual_fields() {
        let mut product = milk("store-1");
        product.description = Some("Frische Milch".into());
        product.details.insert("herkunft".into(), json!("Bayern"));
        product.details.insert("labels".into(), json!(["Bio", 3, "Regional"]));
        product.details.insert("description_length".into(), json!(13));

        let text = product.compose_search_text(Some("Milchprodukte"), Some("Weihenstephan"));

        assert_eq!(
            text,
            "Vollmilch 3,5% Frische Milch Bayern Bio Regional Milchprodukte Weihenstephan"
        );
    }

    #[test]
    fn embedding_text_has_stable_sections() {
        let mut product = milk("store-1");
        product.description = Some("Frische Milch".into());
        product.details.insert("ingredients".into(), json!("Milch"));
        product.details.insert("features".into(), json!(["laktosefrei", "bio"]));
        product.nutritional_info.insert("fett".into(), json!("3,5 g"));
        product.nutritional_info.insert("kcal".into(), json!(64));

        let text = product.embedding_text(Some("Milchprodukte"), Some("Weihenstephan"));

        assert_eq!(
            text,
            "Product: Vollmilch 3,5%\n\
             Description: Frische Milch\n\
             Category: Milchprodukte\n\
             Brand: Weihenstephan\n\
             Ingredients: Milch\n\
             Features: laktosefrei, bio\n\
             Nutrition: fett: 3,5 g, kcal: 64\n\
             Price: 1.29 EUR (1.29 EUR/L)"
        );
    }

    #[test]
    fn staleness_follows_content_timestamp() {
        let mut product = milk("store-1");
        assert!(product.needs_embedding());

        product.embedding = Some(vec![0.1, 0.2]);
        product.embedding_updated_at = Some(product.content_updated_at + Duration::seconds(5));
        assert!(!product.needs_embedding());

        product.content_updated_at += Duration::seconds(10);
        assert!(product.needs_embedding());
    }

    #[test]
    fn stock_status_round_trips_through_str() {
        for status in [
            StockStatus::InStock,
            StockStatus::OutOfStock,
            StockStatus::Unknown,
        ] {
            assert_eq!(StockStatus::from_str(status.as_str()).ok(), Some(status));
        }
        assert!(StockStatus::from_str("maybe").is_err());
    }

    #[tokio::test]
    async fn decimals_survive_persistence_exactly() {
        let db = memory_db().await;
        let product = milk("store-1");
        db.store_item(product.clone()).await.expect("store product");

        let fetched = Product::get_by_url(&product.product_url, &db)
            .await
            .expect("query ok")
            .expect("product exists");

        assert_eq!(fetched.price_amount, Some(Decimal::new(129, 2)));
        assert_eq!(fetched.base_price_quantity, Some(Decimal::ONE));
        assert_eq!(fetched.stock_status, StockStatus::Unknown);
        assert!(fetched.embedding.is_none());
    }

    #[tokio::test]
    async fn embedding_queue_and_update() {
        let db = memory_db().await;
        let product = milk("store-1");
        db.store_item(product.clone()).await.expect("store product");

        let pending = Product::needing_embeddings(10, &db).await.expect("pending");
        assert_eq!(pending.len(), 1);

        Product::update_embedding(&product.id, vec![0.5, 0.5], Some("hashed-2".into()), &db)
            .await
            .expect("update embedding");

        let pending = Product::needing_embeddings(10, &db).await.expect("pending");
        assert!(pending.is_empty());

        let stored: Product = db
            .get_item(&product.id)
            .await
            .expect("fetch")
            .expect("exists");
        assert_eq!(stored.embedding_model.as_deref(), Some("hashed-2"));
        assert!(!stored.needs_embedding());
    }

    #[tokio::test]
    async fn store_listing_paginates_and_filters() {
        let db = memory_db().await;
        for idx in 0..3 {
            let mut product = Product::new(
                format!("Artikel {idx}"),
                format!("https://www.edeka24.de/products/{idx}"),
                "store-1".into(),
                "EUR".into(),
            );
            if idx == 0 {
                product.stock_status = StockStatus::InStock;
            }
            db.store_item(product).await.expect("store product");
        }
        let elsewhere = Product::new(
            "Fremd".into(),
            "https://example.org/products/9".into(),
            "store-2".into(),
            "EUR".into(),
        );
        db.store_item(elsewhere).await.expect("store product");

        let page = Product::list_by_store("store-1", None, false, 0, 2, &db)
            .await
            .expect("page");
        assert_eq!(page.total, 3);
        assert_eq!(page.products.len(), 2);
        assert!(page.has_next);

        let in_stock = Product::list_by_store("store-1", None, true, 0, 10, &db)
            .await
            .expect("page");
        assert_eq!(in_stock.total, 1);
        assert!(!in_stock.has_next);
    }

    #[tokio::test]
    async fn price_range_orders_by_amount() {
        let db = memory_db().await;
        for (idx, cents) in [(1, 349), (2, 99), (3, 1299)] {
            let mut product = Product::new(
                format!("Artikel {idx}"),
                format!("https://www.edeka24.de/products/{idx}"),
                "store-1".into(),
                "EUR".into(),
            );
            product.price_amount = Some(Decimal::new(cents, 2));
            db.store_item(product).await.expect("store product");
        }

        let cheap = Product::list_by_price_range(
            None,
            Some(Decimal::new(500, 2)),
            Some("store-1"),
            0,
            10,
            &db,
        )
        .await
        .expect("range query");

        let prices: Vec<_> = cheap.iter().filter_map(|p| p.price_amount).collect();
        assert_eq!(prices, vec![Decimal::new(99, 2), Decimal::new(349, 2)]);
    }

    #[tokio::test]
    async fn backfill_fills_missing_search_text() {
        let db = memory_db().await;
        let manufacturer = Manufacturer::new("Weihenstephan".into());
        db.store_item(manufacturer.clone()).await.expect("store manufacturer");

        let mut product = milk("store-1");
        product.manufacturer_id = Some(manufacturer.id.clone());
        db.store_item(product.clone()).await.expect("store product");

        let updated = Product::backfill_search_text(&db).await.expect("backfill");
        assert_eq!(updated, 1);

        let stored: Product = db
            .get_item(&product.id)
            .await
            .expect("fetch")
            .expect("exists");
        assert_eq!(stored.search_text, "Vollmilch 3,5% Weihenstephan");

        assert_eq!(Product::backfill_search_text(&db).await.expect("backfill"), 0);
    }

    #[test]
    fn index_dimension_is_read_from_its_definition() {
        let info = serde_json::json!({
            "indexes": {
                "idx_product_url": "DEFINE INDEX idx_product_url ON product FIELDS product_url UNIQUE",
                "idx_embedding_product": "DEFINE INDEX idx_embedding_product ON product FIELDS embedding HNSW DIMENSION 384 DIST COSINE TYPE F32 EFC 150 M 12"
            }
        });

        let definition = find_index_definition(&info, EMBEDDING_INDEX_NAME).expect("found");
        assert_eq!(extract_dimension(definition), Some(384));
        assert!(find_index_definition(&info, "idx_missing").is_none());
    }

    #[tokio::test]
    async fn hnsw_index_dimension_tracks_redefinition() {
        let db = memory_db().await;
        assert_eq!(
            Product::hnsw_index_dimension(&db).await.expect("info"),
            None
        );

        Product::redefine_hnsw_index(&db, 3).await.expect("define index");
        assert_eq!(
            Product::hnsw_index_dimension(&db).await.expect("info"),
            Some(3)
        );

        Product::redefine_hnsw_index(&db, 8).await.expect("redefine index");
        assert_eq!(
            Product::hnsw_index_dimension(&db).await.expect("info"),
            Some(8)
        );
    }
}
