use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HashEmbedderConfig {
    pub dimensions: usize,
    pub seed: u64,
}

impl Default for HashEmbedderConfig {
    fn default() -> Self {
        Self {
            dimensions: 384,
            seed: 1337,
        }
    }
}

/// Feature-hashing bag-of-words embedder. Same text, same vector.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    config: HashEmbedderConfig,
}

impl HashEmbedder {
    pub fn new(config: HashEmbedderConfig) -> Self {
        Self { config }
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions.max(1)
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let dims = self.dimensions();
        let mut vector = vec![0f32; dims];
        for token in tokens(text) {
            let bucket = self.bucket_for(&token);
            vector[bucket] += 1.0;
        }
        normalize(&mut vector);
        vector
    }

    fn bucket_for(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        hasher.write_u64(self.config.seed);
        token.hash(&mut hasher);
        (hasher.finish() as usize) % self.dimensions()
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .map(|raw| raw.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|token| !token.is_empty())
}

/// Scale to unit length in place; zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_deterministic_and_unit_length() {
        let embedder = HashEmbedder::new(HashEmbedderConfig::default());
        let a = embedder.embed_text("Foundation: minor cracks.");
        let b = embedder.embed_text("Foundation: minor cracks.");
        assert_eq!(a, b);
        assert_eq!(a.len(), 384);
        let norm = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn punctuation_and_case_do_not_change_tokens() {
        let embedder = HashEmbedder::new(HashEmbedderConfig::default());
        assert_eq!(
            embedder.embed_text("FOUNDATION: cracks!"),
            embedder.embed_text("foundation cracks")
        );
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let embedder = HashEmbedder::new(HashEmbedderConfig {
            dimensions: 8,
            seed: 1,
        });
        assert!(embedder.embed_text("  ... ").iter().all(|v| *v == 0.0));
    }
}
