mod render;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::{routing::get, routing::post, Json, Router};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::task;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use underwrite_core::AssessError;
use underwrite_rag::{
    AssessConfig, AssessmentRequest, AssessmentResult, Decision, RequestContext, Session,
    TokenUsage, Upload,
};

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    config: AssessConfig,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let _ = dotenvy::dotenv();
    init_tracing();
    let config = AssessConfig::load(None)?;
    config.validate()?;
    if let Some(var) = config.credential_var() {
        if config.credential_from_env().is_none() {
            warn!(var, "credential not set");
        }
    }
    let state = Arc::new(AppState { config });
    let addr: SocketAddr = std::env::var("BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8000".to_string())
        .parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening" = %addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(serve_ui))
        .route("/assess", post(handle_assess_form))
        .route("/api/assess", post(handle_assess_api))
        .route("/healthz", get(handle_health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn serve_ui() -> Html<&'static str> {
    Html(include_str!("../../../ui/index.html"))
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let generation = &state.config.generation;
    Json(json!({
        "status": "ok",
        "provider": generation.provider.as_str(),
        "model": generation.model_name(),
        "embedding": state.config.embedding.backend.kind(),
    }))
}

async fn handle_assess_form(State(state): State<Arc<AppState>>, multipart: Multipart) -> Response {
    match run_assessment(&state, multipart).await {
        Ok(result) => Html(render::result_page(&result)).into_response(),
        Err(err) => {
            err.log();
            (err.status(), Html(render::error_page(&err.user_message()))).into_response()
        }
    }
}

async fn handle_assess_api(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<AssessResponse>, AppError> {
    let result = run_assessment(&state, multipart).await?;
    Ok(Json(AssessResponse::from(result)))
}

async fn run_assessment(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<AssessmentResult, AppError> {
    let request = read_uploads(&mut multipart).await?;
    let ctx = RequestContext::from_env(state.config.clone());
    let result = task::spawn_blocking(move || Session::new(ctx).run(request))
        .await
        .map_err(AppError::internal)??;
    Ok(result)
}

/// Collect the `report` and `guidelines` parts. A part with no file chosen
/// arrives empty and counts as missing.
async fn read_uploads(multipart: &mut Multipart) -> Result<AssessmentRequest, AppError> {
    let mut request = AssessmentRequest::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(AppError::bad_request)?
    {
        let Some(name) = field.name().map(|s| s.to_string()) else {
            continue;
        };
        if name != "report" && name != "guidelines" {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await.map_err(AppError::bad_request)?;
        if file_name.is_empty() && data.is_empty() {
            continue;
        }
        let upload = Upload::new(file_name, data.to_vec());
        if name == "report" {
            request.report = Some(upload);
        } else {
            request.guidelines = Some(upload);
        }
    }
    Ok(request)
}

#[derive(Debug, Serialize)]
struct AssessResponse {
    narrative: String,
    decision: Option<Decision>,
    sources: Vec<SourceResponse>,
    usage: TokenUsage,
}

#[derive(Debug, Serialize)]
struct SourceResponse {
    chunk_id: String,
    origin_file: String,
    page: Option<u32>,
    text: String,
}

impl From<AssessmentResult> for AssessResponse {
    fn from(value: AssessmentResult) -> Self {
        Self {
            narrative: value.narrative,
            decision: value.decision,
            sources: value
                .sources
                .into_iter()
                .map(|chunk| SourceResponse {
                    chunk_id: chunk.chunk_id,
                    origin_file: chunk.metadata.origin_file,
                    page: chunk.metadata.page_index.map(|p| p + 1),
                    text: chunk.text,
                })
                .collect(),
            usage: value.usage,
        }
    }
}

#[derive(Debug, Error)]
enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Assess(#[from] AssessError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn bad_request<E: ToString>(msg: E) -> Self {
        Self::BadRequest(msg.to_string())
    }

    fn internal<E: Into<anyhow::Error>>(err: E) -> Self {
        Self::Internal(err.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Assess(err) => match err {
                _ if err.is_validation() => StatusCode::BAD_REQUEST,
                AssessError::UnreadableDocument { .. }
                | AssessError::EmptyExtraction(_)
                | AssessError::ContextTooLarge { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                AssessError::EmbeddingUnavailable(_) | AssessError::GenerationServiceError(_) => {
                    StatusCode::BAD_GATEWAY
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::Assess(err) => err.code(),
            AppError::Internal(_) => "internal_error",
        }
    }

    fn user_message(&self) -> String {
        match self {
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Assess(err) => err.user_message(),
            AppError::Internal(_) => "internal error".to_string(),
        }
    }

    fn log(&self) {
        if self.status().is_server_error() {
            error!("internal_error" = %self, code = self.code());
        } else {
            info!(code = self.code(), "request rejected");
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();
        let body = json!({
            "error": { "code": self.code(), "message": self.user_message() }
        });
        (self.status(), Json(body)).into_response()
    }
}
