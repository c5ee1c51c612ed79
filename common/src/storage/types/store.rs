use serde_json::json;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::new_record_id;

stored_object!(Store, "store", {
    name: String,
    /// Natural key, unique across stores
    slug: String,
    display_name: String,
    country: String,
    currency: String,
    is_active: bool,
    is_scraping_enabled: bool,
    scraper_config: serde_json::Value
});

impl Store {
    pub fn new(name: String, slug: String, country: String, currency: String) -> Self {
        let now = Utc::now();
        Self {
            id: new_record_id(),
            created_at: now,
            updated_at: now,
            display_name: name.clone(),
            name,
            slug,
            country,
            currency,
            is_active: true,
            is_scraping_enabled: true,
            scraper_config: Self::default_scraper_config(),
        }
    }

    /// Crawl settings a freshly discovered store starts with.
    pub fn default_scraper_config() -> serde_json::Value {
        json!({
            "concurrent_requests": 2,
            "download_delay": 1.0,
        })
    }

    pub async fn get_by_slug(slug: &str, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM type::table($table) WHERE slug = $slug LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("slug", slug.to_owned()))
            .await?;
        let stores: Vec<Self> = response.take(0)?;
        Ok(stores.into_iter().next())
    }

    pub async fn list_active(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM type::table($table) WHERE is_active = true ORDER BY name ASC")
            .bind(("table", Self::table_name()))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn list_scraping_enabled(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .client
            .query(
                "SELECT * FROM type::table($table) \
                 WHERE is_active = true AND is_scraping_enabled = true \
                 ORDER BY name ASC",
            )
            .bind(("table", Self::table_name()))
            .await?;
        Ok(response.take(0)?)
    }
}
