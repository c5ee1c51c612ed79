use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
    str::FromStr,
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use fastembed::{EmbeddingModel, ModelTrait, TextEmbedding, TextInitOptions};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{debug, error, info, warn};

use super::{
    config::AppConfig,
    text::{collapse_whitespace, truncate_chars},
};

/// Character budget for a single embedding input (roughly 8k tokens).
pub const MAX_EMBEDDING_INPUT_CHARS: usize = 32_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    OpenAI,
    FastEmbed,
    Hashed,
    Disabled,
}

impl FromStr for EmbeddingBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "hashed" => Ok(Self::Hashed),
            "fastembed" | "fast-embed" | "fast" => Ok(Self::FastEmbed),
            "disabled" | "none" | "off" => Ok(Self::Disabled),
            other => Err(anyhow!(
                "unknown embedding backend '{other}'. Expected 'openai', 'hashed', 'fastembed' or 'disabled'."
            )),
        }
    }
}

/// Text-to-vector collaborator.
///
/// Every failure mode (missing credentials, remote errors, empty input) surfaces as an absent
/// vector from [`EmbeddingProvider::generate`] and [`EmbeddingProvider::generate_batch`], so
/// callers treat "unavailable" as a normal degraded state.
#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
}

#[derive(Clone)]
enum EmbeddingInner {
    OpenAI {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimensions: u32,
    },
    Hashed {
        dimension: usize,
    },
    FastEmbed {
        model: Arc<Mutex<TextEmbedding>>,
        model_name: EmbeddingModel,
        dimension: usize,
    },
    Disabled,
}

impl EmbeddingProvider {
    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::Hashed { .. } => "hashed",
            EmbeddingInner::FastEmbed { .. } => "fastembed",
            EmbeddingInner::OpenAI { .. } => "openai",
            EmbeddingInner::Disabled => "disabled",
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.inner, EmbeddingInner::Disabled)
    }

    pub fn dimension(&self) -> usize {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } | EmbeddingInner::FastEmbed { dimension, .. } => {
                *dimension
            }
            EmbeddingInner::OpenAI { dimensions, .. } => *dimensions as usize,
            EmbeddingInner::Disabled => 0,
        }
    }

    /// Identifier persisted next to generated vectors.
    pub fn model_code(&self) -> Option<String> {
        match &self.inner {
            EmbeddingInner::FastEmbed { model_name, .. } => Some(model_name.to_string()),
            EmbeddingInner::OpenAI { model, .. } => Some(model.clone()),
            EmbeddingInner::Hashed { dimension } => Some(format!("hashed-{dimension}")),
            EmbeddingInner::Disabled => None,
        }
    }

    /// Embeds a single text, returning `None` when the backend is unavailable or fails.
    pub async fn generate(&self, text: &str) -> Option<Vec<f32>> {
        if !self.is_available() {
            debug!("embedding backend disabled; skipping generation");
            return None;
        }

        let input = preprocess_text(text);
        if input.is_empty() {
            warn!("empty text provided for embedding");
            return None;
        }

        let strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
        match Retry::spawn(strategy, || self.embed(&input)).await {
            Ok(vector) => Some(vector),
            Err(err) => {
                error!(backend = self.backend_label(), error = %err, "embedding generation failed");
                None
            }
        }
    }

    /// Embeds many texts at once. The returned map only holds indices that produced a vector;
    /// blank inputs are skipped and a failed request yields an empty map.
    pub async fn generate_batch(&self, texts: &[String]) -> HashMap<usize, Vec<f32>> {
        if !self.is_available() {
            debug!("embedding backend disabled; skipping batch generation");
            return HashMap::new();
        }

        let (indices, inputs): (Vec<usize>, Vec<String>) = texts
            .iter()
            .enumerate()
            .map(|(idx, text)| (idx, preprocess_text(text)))
            .filter(|(_, text)| !text.is_empty())
            .unzip();

        if inputs.is_empty() {
            return HashMap::new();
        }

        let strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
        match Retry::spawn(strategy, || self.embed_batch(inputs.clone())).await {
            Ok(vectors) => {
                if vectors.len() != inputs.len() {
                    warn!(
                        expected = inputs.len(),
                        received = vectors.len(),
                        "embedding batch returned an unexpected number of vectors"
                    );
                }
                indices.into_iter().zip(vectors).collect()
            }
            Err(err) => {
                error!(
                    backend = self.backend_label(),
                    batch_size = inputs.len(),
                    error = %err,
                    "batch embedding generation failed"
                );
                HashMap::new()
            }
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(hashed_embedding(text, *dimension)),
            EmbeddingInner::FastEmbed { model, .. } => {
                let mut guard = model.lock().await;
                let embeddings = guard
                    .embed(vec![text.to_owned()], None)
                    .context("generating fastembed vector")?;
                embeddings
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("fastembed returned no embedding for input"))
            }
            EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input([text])
                    .dimensions(*dimensions)
                    .build()?;

                let response = client.embeddings().create(request).await?;

                let embedding = response
                    .data
                    .first()
                    .ok_or_else(|| anyhow!("No embedding data received from OpenAI API"))?
                    .embedding
                    .clone();

                Ok(embedding)
            }
            EmbeddingInner::Disabled => Err(anyhow!("embedding backend disabled")),
        }
    }

    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(texts
                .into_iter()
                .map(|text| hashed_embedding(&text, *dimension))
                .collect()),
            EmbeddingInner::FastEmbed { model, .. } => {
                if texts.is_empty() {
                    return Ok(Vec::new());
                }
                let mut guard = model.lock().await;
                guard
                    .embed(texts, None)
                    .context("generating fastembed batch embeddings")
            }
            EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            } => {
                if texts.is_empty() {
                    return Ok(Vec::new());
                }

                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input(texts)
                    .dimensions(*dimensions)
                    .build()?;

                let response = client.embeddings().create(request).await?;

                let mut data = response.data;
                data.sort_by_key(|item| item.index);

                Ok(data.into_iter().map(|item| item.embedding).collect())
            }
            EmbeddingInner::Disabled => Err(anyhow!("embedding backend disabled")),
        }
    }

    /// Builds the provider selected by configuration. A missing OpenAI key downgrades to
    /// the disabled backend instead of failing startup.
    pub async fn from_config(
        config: &AppConfig,
        openai_client: Option<Arc<Client<OpenAIConfig>>>,
    ) -> Result<Self> {
        match config.embedding_backend {
            EmbeddingBackend::OpenAI => {
                let client = match (openai_client, config.openai_api_key.as_deref()) {
                    (Some(client), _) => client,
                    (None, Some(key)) => Arc::new(Client::with_config(
                        OpenAIConfig::new()
                            .with_api_key(key)
                            .with_api_base(&config.openai_base_url),
                    )),
                    (None, None) => {
                        warn!("OpenAI API key not configured; embedding generation disabled");
                        return Ok(Self::disabled());
                    }
                };
                Self::new_openai(
                    client,
                    config.embedding_model.clone(),
                    config.embedding_dimensions,
                )
            }
            EmbeddingBackend::FastEmbed => {
                Self::new_fastembed(Some(config.embedding_model.clone())).await
            }
            EmbeddingBackend::Hashed => Self::new_hashed(config.embedding_dimensions as usize),
            EmbeddingBackend::Disabled => Ok(Self::disabled()),
        }
    }

    /// Like [`Self::from_config`], but a backend that fails to start (model download, bad
    /// credentials) leaves embeddings disabled instead of failing the caller.
    pub async fn from_config_or_disabled(
        config: &AppConfig,
        openai_client: Option<Arc<Client<OpenAIConfig>>>,
    ) -> Self {
        Self::available_or_disabled(Self::from_config(config, openai_client).await)
    }

    fn available_or_disabled(started: Result<Self>) -> Self {
        started.unwrap_or_else(|err| {
            warn!(error = %err, "embedding backend failed to start; continuing without embeddings");
            Self::disabled()
        })
    }

    pub fn new_openai(
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimensions: u32,
    ) -> Result<Self> {
        Ok(EmbeddingProvider {
            inner: EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            },
        })
    }

    pub async fn new_fastembed(model_override: Option<String>) -> Result<Self> {
        let model_name = match model_override
            .as_deref()
            .map(EmbeddingModel::from_str)
            .transpose()
        {
            Ok(Some(model)) => model,
            Ok(None) => EmbeddingModel::default(),
            Err(err) => {
                info!(error = %err, "unknown fastembed model requested; using default model");
                EmbeddingModel::default()
            }
        };

        let options = TextInitOptions::new(model_name.clone()).with_show_download_progress(true);
        let model_name_for_task = model_name.clone();
        let model_name_code = model_name.to_string();

        let (model, dimension) = tokio::task::spawn_blocking(move || -> Result<_> {
            let model =
                TextEmbedding::try_new(options).context("initialising FastEmbed text model")?;
            let info = EmbeddingModel::get_model_info(&model_name_for_task)
                .ok_or_else(|| anyhow!("FastEmbed model metadata missing for {model_name_code}"))?;
            Ok((model, info.dim))
        })
        .await
        .context("joining FastEmbed initialisation task")??;

        Ok(EmbeddingProvider {
            inner: EmbeddingInner::FastEmbed {
                model: Arc::new(Mutex::new(model)),
                model_name,
                dimension,
            },
        })
    }

    pub fn new_hashed(dimension: usize) -> Result<Self> {
        Ok(EmbeddingProvider {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
            },
        })
    }

    pub fn disabled() -> Self {
        EmbeddingProvider {
            inner: EmbeddingInner::Disabled,
        }
    }
}

fn preprocess_text(text: &str) -> String {
    let collapsed = collapse_whitespace(text);
    truncate_chars(&collapsed, MAX_EMBEDDING_INPUT_CHARS).to_owned()
}

// Deterministic bag-of-tokens vectors for offline runs and tests
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];
    if text.is_empty() {
        return vector;
    }

    let mut token_count = 0f32;
    for token in tokens(text) {
        token_count += 1.0;
        if let Some(slot) = vector.get_mut(bucket(&token, dim)) {
            *slot += 1.0;
        }
    }

    if token_count == 0.0 {
        return vector;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dimension
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn backend_start_failure_degrades_to_disabled() {
        let provider = EmbeddingProvider::available_or_disabled(Err(anyhow!(
            "initialising FastEmbed text model: network unreachable"
        )));

        assert!(!provider.is_available());
        assert!(provider.generate("Vollmilch 3,5%").await.is_none());
    }

    #[tokio::test]
    async fn started_backend_is_kept() {
        let provider = EmbeddingProvider::available_or_disabled(EmbeddingProvider::new_hashed(8));

        assert!(provider.is_available());
        assert_eq!(provider.dimension(), 8);
    }

    #[tokio::test]
    async fn disabled_backend_reports_unavailable() {
        let provider = EmbeddingProvider::disabled();

        assert!(!provider.is_available());
        assert!(provider.generate("Vollmilch").await.is_none());
        assert!(provider
            .generate_batch(&["Vollmilch".to_string()])
            .await
            .is_empty());
        assert!(provider.model_code().is_none());
    }

    #[tokio::test]
    async fn hashed_backend_is_deterministic() {
        let provider = EmbeddingProvider::new_hashed(32).expect("hashed provider");

        let first = provider.generate("Vollmilch 3,5%").await.expect("vector");
        let second = provider.generate("  Vollmilch   3,5% ").await.expect("vector");

        assert_eq!(first.len(), 32);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn generate_skips_blank_input() {
        let provider = EmbeddingProvider::new_hashed(8).expect("hashed provider");
        assert!(provider.generate("   ").await.is_none());
    }

    #[tokio::test]
    async fn batch_maps_original_indices_and_skips_blanks() {
        let provider = EmbeddingProvider::new_hashed(16).expect("hashed provider");
        let texts = vec![
            "Vollmilch".to_string(),
            String::new(),
            "Bio Joghurt".to_string(),
        ];

        let vectors = provider.generate_batch(&texts).await;

        assert_eq!(vectors.len(), 2);
        assert!(vectors.contains_key(&0));
        assert!(!vectors.contains_key(&1));
        assert!(vectors.contains_key(&2));
    }

    #[test]
    fn backend_parses_aliases() {
        assert_eq!(
            EmbeddingBackend::from_str("fast").expect("parses"),
            EmbeddingBackend::FastEmbed
        );
        assert_eq!(
            EmbeddingBackend::from_str("OFF").expect("parses"),
            EmbeddingBackend::Disabled
        );
        assert!(EmbeddingBackend::from_str("bogus").is_err());
    }
}
