pub mod config;
pub mod embedding;
pub mod generate;
pub mod index;
pub mod prompt;
pub mod retrieve;
pub mod session;

pub use config::{AssessConfig, DEFAULT_CONFIG_FILE};
pub use embedding::{EmbeddingBackend, EmbeddingClient, EmbeddingConfig};
pub use generate::{
    AnswerGenerator, AssessmentResult, Decision, GenerationConfig, OverflowPolicy, TokenUsage,
};
pub use index::VectorIndex;
pub use prompt::ASSESSMENT_QUERY;
pub use retrieve::{RetrievalConfig, RetrievalResult, Retriever, ScoredChunk};
pub use session::{
    load_and_chunk, AssessmentRequest, RequestContext, Session, SessionState, Upload,
};
pub use underwrite_llm::{LlmClient, LlmProvider, LlmRequest, LlmResponse};
