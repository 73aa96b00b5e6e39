use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Serialize;
use tempfile::{Builder, TempDir};
use tracing::{error, info, warn};

use underwrite_core::{load_document, AssessError, Chunk, ChunkConfig, Chunker, Result, SourceKind};

use crate::config::AssessConfig;
use crate::embedding::EmbeddingClient;
use crate::generate::{AnswerGenerator, AssessmentResult};
use crate::index::VectorIndex;
use crate::prompt::ASSESSMENT_QUERY;
use crate::retrieve::Retriever;

const REPORT_INPUT: &str = "property appraisal report";
const GUIDELINES_INPUT: &str = "underwriting guidelines";

/// One uploaded file as received from the user.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssessmentRequest {
    pub report: Option<Upload>,
    pub guidelines: Option<Upload>,
}

/// Everything a request may touch. Nothing is read from process-wide state
/// once this is built.
#[derive(Clone)]
pub struct RequestContext {
    pub config: AssessConfig,
    pub credential: Option<SecretString>,
    pub scratch_root: PathBuf,
}

impl RequestContext {
    pub fn from_env(config: AssessConfig) -> Self {
        Self {
            credential: config.credential_from_env(),
            scratch_root: config.scratch_root(),
            config,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Validating,
    Processing,
    Done,
    Failed,
}

pub struct Session {
    ctx: RequestContext,
    state: SessionState,
    transitions: Vec<SessionState>,
}

impl Session {
    pub fn new(ctx: RequestContext) -> Self {
        Self {
            ctx,
            state: SessionState::Idle,
            transitions: vec![SessionState::Idle],
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// States visited by the most recent `run`, starting and ending at `Idle`.
    pub fn transitions(&self) -> &[SessionState] {
        &self.transitions
    }

    pub fn run(&mut self, request: AssessmentRequest) -> Result<AssessmentResult> {
        self.run_with(request, Self::pipeline)
    }

    fn run_with<F>(&mut self, request: AssessmentRequest, stage: F) -> Result<AssessmentResult>
    where
        F: FnOnce(&Self, &Path, &Upload, &Upload) -> Result<AssessmentResult>,
    {
        self.transitions = vec![SessionState::Idle];
        self.enter(SessionState::Validating);
        let outcome = match self.validate(request) {
            Ok((report, guidelines)) => {
                self.enter(SessionState::Processing);
                self.process(&report, &guidelines, stage)
            }
            Err(err) => Err(err),
        };
        match &outcome {
            Ok(result) => {
                info!(
                    decision = result.decision.map(|d| d.label()).unwrap_or("none"),
                    sources = result.sources.len(),
                    "assessment complete"
                );
                self.enter(SessionState::Done);
            }
            Err(err) => {
                error!(code = err.code(), error = %err, "assessment failed");
                self.enter(SessionState::Failed);
            }
        }
        self.enter(SessionState::Idle);
        outcome
    }

    fn enter(&mut self, next: SessionState) {
        self.state = next;
        self.transitions.push(next);
    }

    fn validate(&self, request: AssessmentRequest) -> Result<(Upload, Upload)> {
        if let Some(var) = self.ctx.config.credential_var() {
            if self.ctx.credential.is_none() {
                return Err(AssessError::MissingCredential(var.to_string()));
            }
        }
        let report = request
            .report
            .ok_or(AssessError::MissingInput(REPORT_INPUT))?;
        let guidelines = request
            .guidelines
            .ok_or(AssessError::MissingInput(GUIDELINES_INPUT))?;
        self.ctx.config.validate()?;
        Ok((report, guidelines))
    }

    fn process<F>(&self, report: &Upload, guidelines: &Upload, stage: F) -> Result<AssessmentResult>
    where
        F: FnOnce(&Self, &Path, &Upload, &Upload) -> Result<AssessmentResult>,
    {
        let scratch = create_scratch(&self.ctx.scratch_root)?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            stage(self, scratch.path(), report, guidelines)
        }))
        .unwrap_or_else(|payload| Err(AssessError::UnexpectedFailure(panic_message(payload))));
        let scratch_path = scratch.path().to_path_buf();
        if let Err(err) = scratch.close() {
            warn!(path = %scratch_path.display(), error = %err, "failed to remove scratch directory");
        }
        outcome
    }

    fn pipeline(&self, scratch: &Path, report: &Upload, guidelines: &Upload) -> Result<AssessmentResult> {
        let config = &self.ctx.config;
        let report_path = persist_upload(scratch, report, "report.pdf", None)?;
        let guidelines_path =
            persist_upload(scratch, guidelines, "guidelines.txt", Some(&report_path))?;

        let chunks = load_and_chunk(&report_path, &guidelines_path, &config.chunking)?;
        let embeddings = EmbeddingClient::from_config(&config.embedding)?;
        let index = VectorIndex::build(chunks, &embeddings)?;
        let retriever = Retriever::new(&index, &embeddings, config.retrieval.clone());
        let retrieval = retriever.retrieve(ASSESSMENT_QUERY)?;
        info!(hits = retrieval.len(), top_k = retriever.top_k(), "retrieved context");

        let generator = AnswerGenerator::new(&config.generation, self.ctx.credential.as_ref())?;
        generator.generate(ASSESSMENT_QUERY, retrieval.chunks())
    }
}

/// Load the report (PDF) and guidelines (plain text) and chunk them in that
/// order. A report without extractable text is an error even if the
/// guidelines are fine.
pub fn load_and_chunk(report: &Path, guidelines: &Path, chunking: &ChunkConfig) -> Result<Vec<Chunk>> {
    let chunker = Chunker::new(chunking.clone())?;
    let mut docs = load_document(report, SourceKind::Pdf)?;
    let report_pages = docs.len();
    let report_origin = docs
        .first()
        .map(|doc| doc.metadata.origin_file.clone())
        .unwrap_or_default();
    let guideline_docs = load_document(guidelines, SourceKind::PlainText)?;
    docs.extend(guideline_docs);
    let chunks = chunker.split_documents(&docs);
    let report_chunks = chunks
        .iter()
        .filter(|chunk| chunk.metadata.origin_file == report_origin)
        .count();
    info!(
        report_pages,
        report_chunks,
        chunks = chunks.len(),
        "chunked documents"
    );
    if chunks.is_empty() {
        return Err(AssessError::EmptyExtraction("no chunks produced".to_string()));
    }
    if report_chunks == 0 {
        return Err(AssessError::EmptyExtraction(format!(
            "{report_origin} contains no extractable text"
        )));
    }
    Ok(chunks)
}

fn create_scratch(root: &Path) -> Result<TempDir> {
    fs::create_dir_all(root).map_err(|e| {
        AssessError::UnexpectedFailure(format!("cannot create scratch root {}: {e}", root.display()))
    })?;
    Builder::new()
        .prefix("underwrite-")
        .tempdir_in(root)
        .map_err(|e| AssessError::UnexpectedFailure(format!("cannot create scratch directory: {e}")))
}

/// Write an upload under its base name. `taken` guards against both uploads
/// sharing a name.
fn persist_upload(dir: &Path, upload: &Upload, fallback: &str, taken: Option<&Path>) -> Result<PathBuf> {
    let mut name = base_name(&upload.file_name).unwrap_or_else(|| fallback.to_string());
    if taken.and_then(Path::file_name).map(|n| n.to_string_lossy() == name.as_str()) == Some(true) {
        name = format!("{}-{name}", fallback.split('.').next().unwrap_or("upload"));
    }
    let path = dir.join(name);
    fs::write(&path, &upload.bytes).map_err(|e| {
        AssessError::UnexpectedFailure(format!("cannot write {}: {e}", path.display()))
    })?;
    Ok(path)
}

fn base_name(file_name: &str) -> Option<String> {
    let name = file_name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return format!("pipeline panicked: {msg}");
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return format!("pipeline panicked: {msg}");
    }
    "pipeline panicked".to_string()
}
