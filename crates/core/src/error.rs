use std::path::PathBuf;

use thiserror::Error;

/// Every way an assessment request can fail.
///
/// The orchestrator and both user-facing surfaces convert these into a
/// message for the user; none of them is allowed to escape as a crash.
#[derive(Error, Debug)]
pub enum AssessError {
    #[error("credential {0} is not set")]
    MissingCredential(String),
    #[error("missing input: {0}")]
    MissingInput(&'static str),
    #[error("unreadable document {path:?}: {reason}")]
    UnreadableDocument { path: PathBuf, reason: String },
    #[error("no text extracted: {0}")]
    EmptyExtraction(String),
    #[error("embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),
    #[error("context of {actual} chars exceeds the {limit} char budget")]
    ContextTooLarge { actual: usize, limit: usize },
    #[error("generation service error: {0}")]
    GenerationServiceError(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("unexpected failure: {0}")]
    UnexpectedFailure(String),
}

pub type Result<T> = std::result::Result<T, AssessError>;

impl AssessError {
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::UnreadableDocument {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AssessError::MissingCredential(_) => "missing_credential",
            AssessError::MissingInput(_) => "missing_input",
            AssessError::UnreadableDocument { .. } => "unreadable_document",
            AssessError::EmptyExtraction(_) => "empty_extraction",
            AssessError::EmbeddingUnavailable(_) => "embedding_unavailable",
            AssessError::ContextTooLarge { .. } => "context_too_large",
            AssessError::GenerationServiceError(_) => "generation_service_error",
            AssessError::InvalidConfig(_) => "invalid_config",
            AssessError::UnexpectedFailure(_) => "unexpected_failure",
        }
    }

    /// Validation failures happen before any file is written.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AssessError::MissingCredential(_)
                | AssessError::MissingInput(_)
                | AssessError::InvalidConfig(_)
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            AssessError::MissingCredential(var) => format!(
                "{var} not found. Add it to your environment or .env file and try again."
            ),
            AssessError::MissingInput(what) => format!("Please upload the {what}."),
            AssessError::UnreadableDocument { path, reason } => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string());
                format!("Could not read {name}: {reason}")
            }
            AssessError::EmptyExtraction(detail) => format!(
                "Could not extract any text from the documents ({detail}). Please check the files; scanned PDFs are not supported."
            ),
            AssessError::EmbeddingUnavailable(detail) => {
                format!("The embedding backend is unavailable: {detail}")
            }
            AssessError::ContextTooLarge { actual, limit } => format!(
                "The retrieved context ({actual} characters) exceeds the model budget of {limit} characters."
            ),
            AssessError::GenerationServiceError(detail) => format!(
                "An error occurred calling the language model: {detail}. Please check that your API key is valid and has credits."
            ),
            AssessError::InvalidConfig(detail) => format!("Invalid configuration: {detail}"),
            AssessError::UnexpectedFailure(detail) => format!("An error occurred: {detail}"),
        }
    }
}

impl From<anyhow::Error> for AssessError {
    fn from(value: anyhow::Error) -> Self {
        Self::UnexpectedFailure(format!("{value:#}"))
    }
}
