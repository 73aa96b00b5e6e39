use std::time::Duration;

use anyhow::{anyhow, Context};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use underwrite_core::{normalize, AssessError, HashEmbedder, HashEmbedderConfig, Result};

pub const DEFAULT_EMBEDDING_URL: &str = "http://localhost:8080/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Local feature-hashing embedder, no network.
    Hash { dimensions: usize },
    /// OpenAI-compatible `/embeddings` endpoint.
    Http { base_url: String, model: String },
}

impl Default for EmbeddingBackend {
    fn default() -> Self {
        EmbeddingBackend::Hash {
            dimensions: HashEmbedderConfig::default().dimensions,
        }
    }
}

impl EmbeddingBackend {
    pub fn kind(&self) -> &'static str {
        match self {
            EmbeddingBackend::Hash { .. } => "hash",
            EmbeddingBackend::Http { .. } => "http",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub timeout_secs: u64,
    pub backend: EmbeddingBackend,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            timeout_secs: 30,
        }
    }
}

#[derive(Clone)]
enum Backend {
    Hash(HashEmbedder),
    Http(HttpEmbeddingClient),
}

/// Embeds chunk and query text; the same instance must serve both sides of
/// a retrieval so vectors are comparable.
#[derive(Clone)]
pub struct EmbeddingClient {
    backend: Backend,
}

impl EmbeddingClient {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let backend = match &config.backend {
            EmbeddingBackend::Hash { dimensions } => {
                Backend::Hash(HashEmbedder::new(HashEmbedderConfig {
                    dimensions: *dimensions,
                    ..Default::default()
                }))
            }
            EmbeddingBackend::Http { base_url, model } => Backend::Http(
                HttpEmbeddingClient::new(base_url, model, Duration::from_secs(config.timeout_secs))
                    .map_err(|e| AssessError::EmbeddingUnavailable(format!("{e:#}")))?,
            ),
        };
        Ok(Self { backend })
    }

    pub fn hash() -> Self {
        Self {
            backend: Backend::Hash(HashEmbedder::new(HashEmbedderConfig::default())),
        }
    }

    pub fn describe(&self) -> String {
        match &self.backend {
            Backend::Hash(embedder) => format!("hash/{}", embedder.dimensions()),
            Backend::Http(client) => format!("http/{}", client.model),
        }
    }

    /// One vector per input, all of one dimension, each L2-normalised.
    pub fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let mut vectors = match &self.backend {
            Backend::Hash(embedder) => inputs
                .iter()
                .map(|text| embedder.embed_text(text))
                .collect(),
            Backend::Http(client) => client
                .embed_batch(inputs)
                .map_err(|e| AssessError::EmbeddingUnavailable(format!("{e:#}")))?,
        };
        if vectors.len() != inputs.len() {
            return Err(AssessError::EmbeddingUnavailable(format!(
                "expected {} vectors, backend returned {}",
                inputs.len(),
                vectors.len()
            )));
        }
        let dims = vectors[0].len();
        if dims == 0 {
            return Err(AssessError::EmbeddingUnavailable(
                "backend returned an empty vector".to_string(),
            ));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(AssessError::EmbeddingUnavailable(format!(
                "inconsistent vector dimensions: {} vs {}",
                dims,
                bad.len()
            )));
        }
        for vector in vectors.iter_mut() {
            normalize(vector);
        }
        debug!(backend = %self.describe(), inputs = inputs.len(), dims, "embedded batch");
        Ok(vectors)
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let inputs = vec![text.to_string()];
        let mut output = self.embed_batch(&inputs)?;
        Ok(output.pop().unwrap_or_default())
    }
}

#[derive(Clone)]
struct HttpEmbeddingClient {
    http: Client,
    url: String,
    model: String,
}

impl HttpEmbeddingClient {
    fn new(base_url: &str, model: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build embedding http client")?;
        Ok(Self {
            http,
            url: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }

    fn embed_batch(&self, inputs: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let payload = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });
        let response = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .with_context(|| format!("embedding request to {} failed", self.url))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "embedding request failed: {}",
                response.status()
            ));
        }
        let mut parsed: EmbeddingResponse = response
            .json()
            .context("failed to decode embedding response")?;
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}
