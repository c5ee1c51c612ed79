use tracing::{debug, instrument};

use common::{error::AppError, storage::types::product::Product};

use crate::{
    filters::SearchFilters,
    search::{HybridSearchEngine, SearchHit},
    vector::find_products_by_vector,
};

impl HybridSearchEngine {
    /// Products of the same store closest to the stored embedding of `product_id`.
    /// Results under the configured similarity floor are omitted; a product without an
    /// embedding has no similar products.
    #[instrument(skip(self))]
    pub async fn similar_products(
        &self,
        product_id: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, AppError> {
        let product: Product = self
            .db
            .get_item(product_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("product {product_id}")))?;

        let Some(embedding) = product.embedding.as_deref().filter(|e| !e.is_empty()) else {
            debug!("product has no embedding; no similar products");
            return Ok(Vec::new());
        };

        let hits = find_products_by_vector(
            limit,
            embedding,
            self.config.similarity_floor,
            &SearchFilters::for_store(product.store_id.clone()),
            Some(&product.id),
            &self.db,
        )
        .await?;

        Ok(hits
            .into_iter()
            .map(|mut scored| {
                scored.fused = scored.scores.vector.unwrap_or_default();
                SearchHit::from(scored)
            })
            .collect())
    }
}
