#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod config;
pub mod filters;
pub mod lexical;
pub mod scoring;
pub mod search;
mod similar;
pub mod vector;

pub use config::{SearchConfig, SearchMode, SearchType};
pub use filters::SearchFilters;
pub use search::{
    HybridSearchEngine, ScoreBreakdown, SearchHit, SearchMetadata, SearchRequest, SearchResponse,
};
