mod chunk;
mod document;
mod embedding;
mod error;
mod loader;

pub use chunk::{Chunk, ChunkConfig, Chunker, OversizePolicy, TextWindow};
pub use document::{DocumentMetadata, SourceDocument, SourceKind};
pub use embedding::{normalize, HashEmbedder, HashEmbedderConfig};
pub use error::{AssessError, Result};
pub use loader::load_document;
