//! Batch job that (re)generates product embeddings. Products whose vector could not be
//! produced stay stale and are picked up again by the next run.

use std::collections::HashMap;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{category::Category, manufacturer::Manufacturer, product::Product},
    },
    utils::embedding::EmbeddingProvider,
};
use serde::Serialize;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmbeddingRunReport {
    pub processed: usize,
    pub embedded: usize,
    /// Left stale because no vector came back
    pub skipped: usize,
}

/// Embeds up to `batch_size` products that have no embedding or whose content changed after
/// the last one.
#[instrument(skip_all, fields(backend = provider.backend_label(), batch_size = batch_size))]
pub async fn generate_missing_embeddings(
    db: &SurrealDbClient,
    provider: &EmbeddingProvider,
    batch_size: usize,
) -> Result<EmbeddingRunReport, AppError> {
    let products = Product::needing_embeddings(batch_size.max(1), db).await?;
    if products.is_empty() {
        return Ok(EmbeddingRunReport::default());
    }

    if !provider.is_available() {
        warn!(
            pending = products.len(),
            "embedding backend unavailable; products stay pending"
        );
        return Ok(EmbeddingRunReport {
            processed: products.len(),
            embedded: 0,
            skipped: products.len(),
        });
    }

    let mut names = NameLookup::default();
    let mut texts = Vec::with_capacity(products.len());
    for product in &products {
        let category = names.category(product.category_id.as_deref(), db).await?;
        let manufacturer = names
            .manufacturer(product.manufacturer_id.as_deref(), db)
            .await?;
        texts.push(product.embedding_text(category.as_deref(), manufacturer.as_deref()));
    }

    let mut vectors = provider.generate_batch(&texts).await;
    let model = provider.model_code();

    let mut report = EmbeddingRunReport {
        processed: products.len(),
        ..EmbeddingRunReport::default()
    };
    for (index, product) in products.iter().enumerate() {
        match vectors.remove(&index) {
            Some(vector) => {
                Product::update_embedding(&product.id, vector, model.clone(), db).await?;
                report.embedded += 1;
            }
            None => report.skipped += 1,
        }
    }

    info!(
        processed = report.processed,
        embedded = report.embedded,
        skipped = report.skipped,
        "embedding maintenance finished"
    );
    Ok(report)
}

/// Memoised category and manufacturer names for one batch.
#[derive(Default)]
struct NameLookup {
    categories: HashMap<String, Option<String>>,
    manufacturers: HashMap<String, Option<String>>,
}

impl NameLookup {
    async fn category(
        &mut self,
        id: Option<&str>,
        db: &SurrealDbClient,
    ) -> Result<Option<String>, AppError> {
        let Some(id) = id else { return Ok(None) };
        if let Some(name) = self.categories.get(id) {
            return Ok(name.clone());
        }
        let name = db.get_item::<Category>(id).await?.map(|c| c.name);
        self.categories.insert(id.to_owned(), name.clone());
        Ok(name)
    }

    async fn manufacturer(
        &mut self,
        id: Option<&str>,
        db: &SurrealDbClient,
    ) -> Result<Option<String>, AppError> {
        let Some(id) = id else { return Ok(None) };
        if let Some(name) = self.manufacturers.get(id) {
            return Ok(name.clone());
        }
        let name = db.get_item::<Manufacturer>(id).await?.map(|m| m.name);
        self.manufacturers.insert(id.to_owned(), name.clone());
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized().await.expect("Failed to init schema");
        db
    }

    fn product(name: &str, url: &str) -> Product {
        let mut product = Product::new(name.into(), url.into(), "store-1".into(), "EUR".into());
        product.price_amount = Some(Decimal::new(129, 2));
        product
    }

    #[tokio::test]
    async fn embeds_pending_products() {
        let db = memory_db().await;
        let category = Category::new_root("Milchprodukte".into(), "milchprodukte".into());
        db.store_item(category.clone()).await.expect("store category");
        let mut milk = product("Vollmilch 3,5%", "https://www.edeka24.de/products/1001");
        milk.category_id = Some(category.id.clone());
        db.store_item(milk.clone()).await.expect("store milk");
        db.store_item(product("Gouda", "https://www.edeka24.de/products/2002"))
            .await
            .expect("store gouda");
        let provider = EmbeddingProvider::new_hashed(16).expect("hashed provider");

        let report = generate_missing_embeddings(&db, &provider, 10)
            .await
            .expect("job runs");

        assert_eq!(report.processed, 2);
        assert_eq!(report.embedded, 2);
        assert_eq!(report.skipped, 0);

        let stored = db
            .get_item::<Product>(&milk.id)
            .await
            .expect("query ok")
            .expect("product exists");
        assert_eq!(stored.embedding.as_ref().map(Vec::len), Some(16));
        assert_eq!(stored.embedding_model.as_deref(), Some("hashed-16"));
        assert!(!stored.needs_embedding());

        let again = generate_missing_embeddings(&db, &provider, 10)
            .await
            .expect("job runs");
        assert_eq!(again, EmbeddingRunReport::default());
    }

    #[tokio::test]
    async fn unavailable_backend_leaves_products_pending() {
        let db = memory_db().await;
        db.store_item(product("Gouda", "https://www.edeka24.de/products/2002"))
            .await
            .expect("store gouda");

        let report = generate_missing_embeddings(&db, &EmbeddingProvider::disabled(), 10)
            .await
            .expect("job runs");

        assert_eq!(report.embedded, 0);
        assert_eq!(report.skipped, 1);
        let pending = Product::needing_embeddings(10, &db).await.expect("pending");
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn batch_size_limits_each_run() {
        let db = memory_db().await;
        for index in 0..3 {
            db.store_item(product(
                "Joghurt",
                &format!("https://www.edeka24.de/products/{index}"),
            ))
            .await
            .expect("store product");
        }
        let provider = EmbeddingProvider::new_hashed(8).expect("hashed provider");

        let first = generate_missing_embeddings(&db, &provider, 2)
            .await
            .expect("job runs");
        let second = generate_missing_embeddings(&db, &provider, 2)
            .await
            .expect("job runs");

        assert_eq!(first.embedded, 2);
        assert_eq!(second.embedded, 1);
    }
}
