use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use super::embedding::EmbeddingBackend;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default)]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_text_weight")]
    pub text_weight: f32,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f32,
    #[serde(default)]
    pub vector_similarity_threshold: f32,
    #[serde(default)]
    pub strict_mode: bool,
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: usize,
    #[serde(default = "default_store_code")]
    pub store_code: String,
    #[serde(default = "default_country")]
    pub default_country: String,
    #[serde(default = "default_currency")]
    pub default_currency: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

const fn default_embedding_dimensions() -> u32 {
    1536
}

const fn default_text_weight() -> f32 {
    0.6
}

const fn default_vector_weight() -> f32 {
    0.4
}

const fn default_similarity_floor() -> f32 {
    0.7
}

const fn default_embedding_batch_size() -> usize {
    50
}

const fn default_conflict_retries() -> usize {
    3
}

fn default_store_code() -> String {
    "EDEKA".to_string()
}

fn default_country() -> String {
    "DE".to_string()
}

fn default_currency() -> String {
    "EUR".to_string()
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
