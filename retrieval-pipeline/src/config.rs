use serde::{Deserialize, Serialize};
use std::fmt;

use common::utils::config::AppConfig;

use crate::scoring::FusionWeights;

/// Caller-selected ranking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Hybrid ranking whenever the embedding backend can serve it
    #[default]
    Auto,
    /// Keyword relevance only
    Lexical,
}

impl SearchMode {
    pub const fn use_ai(self) -> bool {
        matches!(self, SearchMode::Auto)
    }
}

impl std::str::FromStr for SearchMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "auto" | "hybrid" => Ok(Self::Auto),
            "lexical" | "text" => Ok(Self::Lexical),
            other => Err(format!("unknown search mode '{other}'")),
        }
    }
}

/// Ranking mode that actually produced a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    LexicalOnly,
    Hybrid,
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SearchType::LexicalOnly => "lexical_only",
            SearchType::Hybrid => "hybrid",
        };
        f.write_str(label)
    }
}

/// Tunable parameters of the hybrid search engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub weights: FusionWeights,
    /// Vector hits below this cosine similarity are dropped from the hybrid vector stage.
    pub vector_similarity_threshold: f32,
    /// Similar-products results below this cosine similarity are omitted.
    pub similarity_floor: f32,
    /// Each stage fetches `limit * candidate_multiplier` candidates before fusion.
    pub candidate_multiplier: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            weights: FusionWeights::default(),
            vector_similarity_threshold: 0.0,
            similarity_floor: 0.7,
            candidate_multiplier: 2,
        }
    }
}

impl SearchConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            weights: FusionWeights {
                text: config.text_weight,
                vector: config.vector_weight,
            },
            vector_similarity_threshold: config.vector_similarity_threshold,
            similarity_floor: config.similarity_floor,
            ..Self::default()
        }
    }

    pub fn candidate_take(&self, limit: usize) -> usize {
        limit.saturating_mul(self.candidate_multiplier.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn search_mode_parses_aliases() {
        assert_eq!(SearchMode::from_str("HYBRID"), Ok(SearchMode::Auto));
        assert_eq!(SearchMode::from_str("text"), Ok(SearchMode::Lexical));
        assert!(SearchMode::from_str("graph").is_err());
        assert!(!SearchMode::Lexical.use_ai());
    }

    #[test]
    fn search_type_serializes_snake_case() {
        let encoded = serde_json::to_string(&SearchType::LexicalOnly).expect("serializes");
        assert_eq!(encoded, "\"lexical_only\"");
        assert_eq!(SearchType::Hybrid.to_string(), "hybrid");
    }

    #[test]
    fn candidate_take_never_drops_below_limit() {
        let config = SearchConfig {
            candidate_multiplier: 0,
            ..SearchConfig::default()
        };
        assert_eq!(config.candidate_take(5), 5);
        assert_eq!(SearchConfig::default().candidate_take(5), 10);
    }
}
