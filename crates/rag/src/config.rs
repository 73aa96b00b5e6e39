use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use underwrite_core::{AssessError, ChunkConfig};
use underwrite_llm::LlmProvider;

use crate::embedding::{
    EmbeddingBackend, EmbeddingConfig, DEFAULT_EMBEDDING_MODEL, DEFAULT_EMBEDDING_URL,
};
use crate::generate::GenerationConfig;
use crate::retrieve::RetrievalConfig;

pub const DEFAULT_CONFIG_FILE: &str = "underwrite.toml";

/// Everything one assessment needs besides the credential and the uploads.
///
/// Built from defaults, then an optional TOML file, then `UNDERWRITE_*`
/// environment overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessConfig {
    pub scratch_dir: Option<PathBuf>,
    pub chunking: ChunkConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
}

impl AssessConfig {
    /// `explicit` wins over `UNDERWRITE_CONFIG`, which wins over
    /// `./underwrite.toml` when that file exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| env::var_os("UNDERWRITE_CONFIG").map(PathBuf::from))
            .or_else(|| {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                default.exists().then_some(default)
            });
        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(value) = get("UNDERWRITE_PROVIDER") {
            self.generation.provider = LlmProvider::from_str(value.trim())
                .ok_or_else(|| anyhow!("UNDERWRITE_PROVIDER: unknown provider {value}"))?;
        }
        if let Some(value) = get("UNDERWRITE_MODEL") {
            self.generation.model = Some(value);
        }
        if let Some(value) = get("UNDERWRITE_BASE_URL") {
            self.generation.base_url = Some(value);
        }
        if let Some(value) = get("UNDERWRITE_CHUNK_SIZE") {
            self.chunking.chunk_size = parse_number("UNDERWRITE_CHUNK_SIZE", &value)?;
        }
        if let Some(value) = get("UNDERWRITE_CHUNK_OVERLAP") {
            self.chunking.chunk_overlap = parse_number("UNDERWRITE_CHUNK_OVERLAP", &value)?;
        }
        if let Some(value) = get("UNDERWRITE_TOP_K") {
            self.retrieval.top_k = parse_number("UNDERWRITE_TOP_K", &value)?;
        }
        if let Some(value) = get("UNDERWRITE_EMBEDDING") {
            self.embedding.backend = match value.trim().to_lowercase().as_str() {
                "hash" => match &self.embedding.backend {
                    backend @ EmbeddingBackend::Hash { .. } => backend.clone(),
                    _ => EmbeddingBackend::default(),
                },
                "http" => EmbeddingBackend::Http {
                    base_url: get("UNDERWRITE_EMBEDDING_URL")
                        .unwrap_or_else(|| DEFAULT_EMBEDDING_URL.to_string()),
                    model: get("UNDERWRITE_EMBEDDING_MODEL")
                        .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
                },
                other => bail!("UNDERWRITE_EMBEDDING: expected hash or http, got {other}"),
            };
        }
        if let Some(value) = get("UNDERWRITE_SCRATCH_DIR") {
            self.scratch_dir = Some(PathBuf::from(value));
        }
        Ok(())
    }

    pub fn validate(&self) -> underwrite_core::Result<()> {
        self.chunking.validate()?;
        if self.retrieval.top_k == 0 {
            return Err(AssessError::InvalidConfig("top_k must be positive".into()));
        }
        if let Some(min) = self.retrieval.min_score {
            if !(-1.0..=1.0).contains(&min) {
                return Err(AssessError::InvalidConfig(format!(
                    "min_score {min} is outside [-1, 1]"
                )));
            }
        }
        match &self.embedding.backend {
            EmbeddingBackend::Hash { dimensions } if *dimensions == 0 => {
                return Err(AssessError::InvalidConfig(
                    "hash embedding dimensions must be positive".into(),
                ));
            }
            EmbeddingBackend::Http { base_url, model } if base_url.is_empty() || model.is_empty() => {
                return Err(AssessError::InvalidConfig(
                    "http embedding needs base_url and model".into(),
                ));
            }
            _ => {}
        }
        if self.embedding.timeout_secs == 0 || self.generation.timeout_secs == 0 {
            return Err(AssessError::InvalidConfig("timeouts must be positive".into()));
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(AssessError::InvalidConfig(format!(
                "temperature {} is outside [0, 2]",
                self.generation.temperature
            )));
        }
        if self.generation.max_context_chars == 0 {
            return Err(AssessError::InvalidConfig(
                "max_context_chars must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Environment variable the configured provider reads its key from.
    pub fn credential_var(&self) -> Option<&'static str> {
        self.generation.provider.credential_var()
    }

    pub fn credential_from_env(&self) -> Option<SecretString> {
        let var = self.credential_var()?;
        env::var(var)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(SecretString::new)
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(env::temp_dir)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render config")
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .with_context(|| format!("{key}: expected a number, got {value}"))
}
