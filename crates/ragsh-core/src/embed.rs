//! Embedding generation
//!
//! Chunks and queries must be embedded with the same model, so the model name
//! is stored in the index and checked at query time.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::config::EmbeddingConfig;
use crate::openai::OpenAiClient;
use crate::{Config, RagError, Result};

/// Maps text to dense vectors.
pub trait Embedder: Send + Sync {
    /// Model identifier, recorded in the index.
    fn model_name(&self) -> &str;

    /// Generate embeddings for a batch of texts, one per input, in input order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Generate embedding for a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::EmbeddingService("No embedding generated".to_string()))
    }

    /// How many texts to hand to `embed_batch` at once when indexing.
    fn batch_size(&self) -> usize {
        64
    }
}

impl<E: Embedder + ?Sized> Embedder for Arc<E> {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_batch(texts)
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed(text)
    }

    fn batch_size(&self) -> usize {
        (**self).batch_size()
    }
}

/// Create the embedder selected by `config.embedding.provider`.
pub fn create_embedder(config: &Config) -> Result<Box<dyn Embedder>> {
    match config.embedding.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiEmbedder::new(config)?)),
        #[cfg(feature = "local")]
        "local" => Ok(Box::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local"))]
        "local" => Err(RagError::Config(
            "the local embedding provider requires building with --features local".to_string(),
        )),
        other => Err(RagError::Config(format!(
            "Unknown embedding provider: {other}. Supported: openai, local"
        ))),
    }
}

/// Embeddings from an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: OpenAiClient,
    model: String,
    batch_size: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_api_key(&config.embedding, config.api_key()?)
    }

    /// Create an embedder with an explicit credential.
    pub fn with_api_key(settings: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let client = OpenAiClient::new(
            &settings.base_url,
            api_key,
            settings.timeout_secs,
            settings.max_retries,
        )
        .map_err(RagError::EmbeddingService)?;

        Ok(Self {
            client,
            model: settings.model.clone(),
            batch_size: settings.batch_size.max(1),
        })
    }
}

impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let body = json!({
                "model": self.model,
                "input": batch,
            });
            let response = self
                .client
                .post_json("embeddings", &body)
                .map_err(RagError::EmbeddingService)?;
            embeddings.extend(parse_embeddings(response, batch.len())?);
        }

        Ok(embeddings)
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }
}

/// Decode an embeddings response, restoring input order from each item's `index`.
fn parse_embeddings(response: serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let mut response: EmbeddingResponse = serde_json::from_value(response)
        .map_err(|e| RagError::EmbeddingService(format!("invalid embeddings response: {e}")))?;

    if response.data.len() != expected {
        return Err(RagError::EmbeddingService(format!(
            "expected {} embeddings, got {}",
            expected,
            response.data.len()
        )));
    }

    response.data.sort_by_key(|item| item.index);
    Ok(response.data.into_iter().map(|item| item.embedding).collect())
}

/// Local embeddings using fastembed; no network calls after the model download.
#[cfg(feature = "local")]
pub struct LocalEmbedder {
    model: fastembed::TextEmbedding,
    name: String,
}

#[cfg(feature = "local")]
impl LocalEmbedder {
    /// Create a new embedder with the model specified in config.
    pub fn new(config: &Config) -> Result<Self> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

        let model_type = match config.embedding.model.as_str() {
            "all-MiniLM-L6-v2" => EmbeddingModel::AllMiniLML6V2,
            "all-MiniLM-L12-v2" => EmbeddingModel::AllMiniLML12V2,
            "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
            other => {
                return Err(RagError::EmbeddingService(format!(
                    "Unknown local model: {other}. Supported: all-MiniLM-L6-v2, all-MiniLM-L12-v2, bge-small-en-v1.5, bge-base-en-v1.5"
                )));
            }
        };

        let model =
            TextEmbedding::try_new(InitOptions::new(model_type).with_show_download_progress(true))
                .map_err(|e| RagError::EmbeddingService(e.to_string()))?;

        Ok(Self {
            model,
            name: config.embedding.model.clone(),
        })
    }
}

#[cfg(feature = "local")]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        self.model
            .embed(texts.to_vec(), None)
            .map_err(|e| RagError::EmbeddingService(e.to_string()))
    }
}
