use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::new_record_id;

stored_object!(Manufacturer, "manufacturer", {
    /// Natural key, case-sensitive as scraped
    name: String,
    slug: String,
    display_name: String,
    is_active: bool,
    is_verified: bool
});

impl Manufacturer {
    pub fn new(name: String) -> Self {
        let now = Utc::now();
        Self {
            id: new_record_id(),
            created_at: now,
            updated_at: now,
            slug: Self::slug_for(&name),
            display_name: name.clone(),
            name,
            is_active: true,
            is_verified: false,
        }
    }

    pub fn slug_for(name: &str) -> String {
        name.to_lowercase().replace(' ', "-")
    }

    pub async fn get_by_name(name: &str, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM type::table($table) WHERE name = $name LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("name", name.to_owned()))
            .await?;
        let manufacturers: Vec<Self> = response.take(0)?;
        Ok(manufacturers.into_iter().next())
    }
}
