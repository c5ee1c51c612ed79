use std::{sync::Arc, time::Instant};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::product::Product},
    utils::embedding::EmbeddingProvider,
};

use crate::{
    config::{SearchConfig, SearchMode, SearchType},
    filters::SearchFilters,
    lexical::find_products_by_text,
    scoring::{fuse_ranked, Scored},
    vector::find_products_by_vector,
};

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    /// Precomputed query vector; generated from `query` when absent and AI is usable.
    pub query_embedding: Option<Vec<f32>>,
    pub filters: SearchFilters,
    pub mode: SearchMode,
    pub limit: usize,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            limit,
            ..Self::default()
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.query_embedding = Some(embedding);
        self
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub text_score: Option<f32>,
    pub vector_score: Option<f32>,
    pub total_score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub product: Product,
    pub scores: ScoreBreakdown,
}

impl From<Scored<Product>> for SearchHit {
    fn from(scored: Scored<Product>) -> Self {
        Self {
            scores: ScoreBreakdown {
                text_score: scored.scores.text,
                vector_score: scored.scores.vector,
                total_score: scored.fused,
            },
            product: scored.item,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SearchMetadata {
    pub search_type: SearchType,
    pub ai_available: bool,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub metadata: SearchMetadata,
}

/// Keyword search fused with embedding similarity, falling back to keywords alone whenever
/// no query vector can be had.
pub struct HybridSearchEngine {
    pub(crate) db: Arc<SurrealDbClient>,
    pub(crate) embeddings: Option<Arc<EmbeddingProvider>>,
    pub(crate) config: SearchConfig,
}

impl HybridSearchEngine {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embeddings: Option<Arc<EmbeddingProvider>>,
        config: SearchConfig,
    ) -> Self {
        Self {
            db,
            embeddings,
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn ai_available(&self) -> bool {
        self.embeddings
            .as_ref()
            .is_some_and(|provider| provider.is_available())
    }

    #[instrument(skip_all, fields(limit = request.limit, mode = ?request.mode))]
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, AppError> {
        let started = Instant::now();
        let ai_available = self.ai_available();

        let query_embedding = if request.mode.use_ai() && ai_available {
            self.query_embedding(request).await
        } else {
            None
        };

        let (results, search_type) = match query_embedding {
            Some(embedding) => (
                self.hybrid_search(&request.query, &embedding, &request.filters, request.limit)
                    .await?,
                SearchType::Hybrid,
            ),
            None => (
                self.lexical_search(&request.query, &request.filters, request.limit)
                    .await?,
                SearchType::LexicalOnly,
            ),
        };

        info!(
            search_type = %search_type,
            ai_available,
            total = results.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "product search finished"
        );

        Ok(SearchResponse {
            metadata: SearchMetadata {
                search_type,
                ai_available,
                total: results.len(),
            },
            results,
        })
    }

    /// Keyword-only ranking, the path taken whenever vectors are unavailable.
    pub async fn lexical_search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>, AppError> {
        let take = self.config.candidate_take(limit);
        let text_ranked = find_products_by_text(take, query, filters, &self.db).await?;
        Ok(self.fuse(text_ranked, Vec::new(), limit))
    }

    async fn hybrid_search(
        &self,
        query: &str,
        embedding: &[f32],
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>, AppError> {
        let take = self.config.candidate_take(limit);
        let text_ranked = find_products_by_text(take, query, filters, &self.db).await?;
        let vector_ranked = find_products_by_vector(
            take,
            embedding,
            self.config.vector_similarity_threshold,
            filters,
            None,
            &self.db,
        )
        .await?;

        debug!(
            text_candidates = text_ranked.len(),
            vector_candidates = vector_ranked.len(),
            "fusing search stages"
        );
        Ok(self.fuse(text_ranked, vector_ranked, limit))
    }

    fn fuse(
        &self,
        text_ranked: Vec<Scored<Product>>,
        vector_ranked: Vec<Scored<Product>>,
        limit: usize,
    ) -> Vec<SearchHit> {
        fuse_ranked(text_ranked, vector_ranked, self.config.weights)
            .into_iter()
            .take(limit)
            .map(SearchHit::from)
            .collect()
    }

    async fn query_embedding(&self, request: &SearchRequest) -> Option<Vec<f32>> {
        if let Some(embedding) = request.query_embedding.as_ref().filter(|e| !e.is_empty()) {
            return Some(embedding.clone());
        }
        let provider = self.embeddings.as_ref()?;
        let embedding = provider.generate(&request.query).await;
        if embedding.is_none() {
            warn!("query embedding unavailable; falling back to lexical search");
        }
        embedding
    }
}
