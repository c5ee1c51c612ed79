use crate::error::{is_retryable_message, AppError};

use super::types::StoredObject;
use std::ops::Deref;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Response, Surreal,
};
use tracing::debug;

const CATALOG_INDEXES: &str = "
    DEFINE INDEX IF NOT EXISTS idx_store_slug ON TABLE store FIELDS slug UNIQUE;
    DEFINE INDEX IF NOT EXISTS idx_category_scope ON TABLE category FIELDS name, parent_key UNIQUE;
    DEFINE INDEX IF NOT EXISTS idx_category_slug ON TABLE category FIELDS slug, parent_key;
    DEFINE INDEX IF NOT EXISTS idx_manufacturer_name ON TABLE manufacturer FIELDS name UNIQUE;
    DEFINE INDEX IF NOT EXISTS idx_product_url ON TABLE product FIELDS product_url UNIQUE;
    DEFINE INDEX IF NOT EXISTS idx_product_store ON TABLE product FIELDS store_id;
    DEFINE ANALYZER IF NOT EXISTS catalog_search_analyzer
        TOKENIZERS blank, class, punct
        FILTERS lowercase, ascii, ngram(2, 12);
    DEFINE INDEX IF NOT EXISTS idx_product_search_text ON TABLE product
        FIELDS search_text SEARCH ANALYZER catalog_search_analyzer BM25;
";

/// Error attached to every statement of a cancelled transaction except the failing one.
const CANCELLED_STATEMENT_MARKER: &str = "not executed due to a failed transaction";

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// # Initialize a new database client
    ///
    /// # Returns
    /// * `SurrealDbClient` initialized
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        // Sign in to database
        db.signin(Root { username, password }).await?;

        // Set namespace
        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Defines the uniqueness constraints the reconciliation engine relies on and the BM25
    /// full-text index behind keyword search. Substring matches ("milch" in "Vollmilch") come
    /// from the analyzer's n-grams.
    pub async fn ensure_initialized(&self) -> Result<(), AppError> {
        let mut response = self.client.query(CATALOG_INDEXES).await?;
        Self::check_response(&mut response)?;
        debug!("catalog indexes ensured");
        Ok(())
    }

    /// Surfaces the first real statement error of a response. Unique index violations and
    /// transaction conflicts become [`AppError::Conflict`] so callers can retry the write as a
    /// lookup.
    pub fn check_response(response: &mut Response) -> Result<(), AppError> {
        let mut errors: Vec<(usize, Error)> = response.take_errors().into_iter().collect();
        if errors.is_empty() {
            return Ok(());
        }
        errors.sort_by_key(|(index, _)| *index);

        if let Some((_, err)) = errors
            .iter()
            .find(|(_, err)| is_retryable_message(&err.to_string()))
        {
            return Err(AppError::Conflict(err.to_string()));
        }

        let position = errors
            .iter()
            .position(|(_, err)| !err.to_string().contains(CANCELLED_STATEMENT_MARKER))
            .unwrap_or(0);
        let (_, err) = errors.swap_remove(position);
        Err(AppError::Database(err))
    }

    /// Operation to store a object in SurrealDB, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `item` - The item to be stored
    ///
    /// # Returns
    /// * `Result` - Item or Error
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Operation to retrieve all objects from a certain table, requires the struct to implement StoredObject
    ///
    /// # Returns
    /// * `Result` - Vec<T> or Error
    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    /// Operation to retrieve a single object by its ID, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `id` - The ID of the item to retrieve
    ///
    /// # Returns
    /// * `Result<Option<T>, Error>` - The found item or Error
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}

#[cfg(test)]
mod tests {
    use crate::stored_object;

    use super::*;
    use uuid::Uuid;

    stored_object!(Dummy, "dummy", {
        name: String
    });

    #[tokio::test]
    async fn test_initialization_and_crud() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string(); // ensures isolation per test run
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        db.ensure_initialized()
            .await
            .expect("Failed to initialize schema");
        // Index definitions are idempotent
        db.ensure_initialized()
            .await
            .expect("Failed to re-run initialization");

        let dummy = Dummy {
            id: "abc".to_string(),
            name: "first".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let stored = db.store_item(dummy.clone()).await.expect("Failed to store");
        assert!(stored.is_some());

        let fetched = db
            .get_item::<Dummy>(&dummy.id)
            .await
            .expect("Failed to fetch");
        assert_eq!(fetched, Some(dummy.clone()));

        let all = db
            .get_all_stored_items::<Dummy>()
            .await
            .expect("Failed to fetch all");
        assert!(all.contains(&dummy));
    }

    #[tokio::test]
    async fn unique_violation_maps_to_conflict() {
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", database)
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized()
            .await
            .expect("Failed to initialize schema");

        let mut first = db
            .query("CREATE store:first CONTENT { slug: 'edeka24', name: 'EDEKA24' }")
            .await
            .expect("query runs");
        SurrealDbClient::check_response(&mut first).expect("first insert succeeds");

        let mut second = db
            .query(
                "BEGIN TRANSACTION;
                 CREATE store:second CONTENT { slug: 'edeka24', name: 'EDEKA24' };
                 COMMIT TRANSACTION;",
            )
            .await
            .expect("query runs");
        let err = SurrealDbClient::check_response(&mut second).expect_err("duplicate slug");

        assert!(err.is_conflict(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn retryable_transaction_error_maps_to_conflict() {
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let mut response = db
            .query(
                "BEGIN TRANSACTION;
                 CREATE store:first CONTENT { slug: 'edeka24', name: 'EDEKA24' };
                 THROW 'Failed to commit transaction due to a read or write conflict. This transaction can be retried';
                 COMMIT TRANSACTION;",
            )
            .await
            .expect("query runs");
        let err = SurrealDbClient::check_response(&mut response).expect_err("aborted");

        assert!(err.is_conflict(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn other_statement_errors_stay_database_errors() {
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", database)
            .await
            .expect("Failed to start in-memory surrealdb");

        let mut response = db
            .query("THROW 'price must not be negative'")
            .await
            .expect("query runs");
        let err = SurrealDbClient::check_response(&mut response).expect_err("thrown");

        assert!(matches!(err, AppError::Database(_)), "unexpected error: {err}");
    }
}
