use std::cmp::Ordering;

use tracing::info;

use underwrite_core::{AssessError, Chunk, Result};

use crate::embedding::EmbeddingClient;
use crate::retrieve::ScoredChunk;

struct IndexEntry {
    chunk: Chunk,
    vector: Vec<f32>,
}

/// Flat cosine index over one request's chunks. Built once, never mutated.
pub struct VectorIndex {
    entries: Vec<IndexEntry>,
    dimensions: usize,
}

impl VectorIndex {
    pub fn build(chunks: Vec<Chunk>, embeddings: &EmbeddingClient) -> Result<Self> {
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = embeddings.embed_batch(&texts)?;
        let dimensions = vectors.first().map(Vec::len).unwrap_or(0);
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry { chunk, vector })
            .collect();
        info!(
            chunks = entries.len(),
            dimensions,
            backend = %embeddings.describe(),
            "built vector index"
        );
        Ok(Self {
            entries,
            dimensions,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().map(|entry| &entry.chunk)
    }

    /// Top `k` chunks by cosine similarity, ties broken by chunk order.
    pub fn search(&self, query: &[f32], k: usize, min_score: Option<f32>) -> Result<Vec<ScoredChunk>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimensions {
            return Err(AssessError::EmbeddingUnavailable(format!(
                "query vector has {} dimensions, index has {}",
                query.len(),
                self.dimensions
            )));
        }
        let mut hits: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                score: cosine_similarity(query, &entry.vector),
                chunk: entry.chunk.clone(),
            })
            .filter(|hit| min_score.map_or(true, |min| hit.score >= min))
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.chunk.ordinal.cmp(&b.chunk.ordinal))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut a_norm = 0.0f32;
    let mut b_norm = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    dot / (a_norm.sqrt() * b_norm.sqrt())
}
