use serde::{Deserialize, Serialize};
use tracing::debug;

use underwrite_core::{Chunk, Result};

use crate::embedding::EmbeddingClient;
use crate::index::VectorIndex;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Drop hits scoring below this. `None` always returns up to `top_k`.
    pub min_score: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            min_score: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Hits in descending score order, at most `top_k` of them.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn chunks(&self) -> Vec<Chunk> {
        self.hits.iter().map(|hit| hit.chunk.clone()).collect()
    }
}

pub struct Retriever<'a> {
    index: &'a VectorIndex,
    embeddings: &'a EmbeddingClient,
    config: RetrievalConfig,
}

impl<'a> Retriever<'a> {
    pub fn new(index: &'a VectorIndex, embeddings: &'a EmbeddingClient, config: RetrievalConfig) -> Self {
        Self {
            index,
            embeddings,
            config,
        }
    }

    pub fn top_k(&self) -> usize {
        self.config.top_k
    }

    pub fn retrieve(&self, query: &str) -> Result<RetrievalResult> {
        let query_vector = self.embeddings.embed(query)?;
        let hits = self
            .index
            .search(&query_vector, self.config.top_k, self.config.min_score)?;
        for hit in &hits {
            debug!(
                chunk = %hit.chunk.chunk_id,
                source = %hit.chunk.metadata.label(),
                score = hit.score,
                "retrieved chunk"
            );
        }
        Ok(RetrievalResult { hits })
    }
}
