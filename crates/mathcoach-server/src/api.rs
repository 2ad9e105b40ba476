//! HTTP API for MathCoach.
//!
//! # Endpoints
//!
//! - `POST /api/math-problem` - Generate a problem or submit an answer
//! - `GET /api/health` - Report the active generator and store
//! - `GET /` - Single-page client
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mathcoach_server::{create_router, AppState, Config, InMemoryStore, ScriptedGenerator};
//!
//! # async fn example() {
//! let state = AppState::new(
//!     Config::default(),
//!     Arc::new(ScriptedGenerator::new()),
//!     Arc::new(InMemoryStore::new()),
//! );
//!
//! let router = create_router(state);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await.unwrap();
//! axum::serve(listener, router).await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::answer_service::AnswerSubmissionService;
use crate::config::Config;
use crate::dispatch::ProblemRequest;
use crate::error::{CoachError, ErrorCode};
use crate::generator::TextGenerator;
use crate::problem_service::ProblemSessionService;
use crate::store::SessionStore;
use crate::view;

/// Prefix of every failure message returned to clients.
pub const ERROR_PREFIX: &str = "Something went wrong: ";

// ============================================================================
// Response Types
// ============================================================================

/// Body of every failure response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code.
    pub code: ErrorCode,
}

/// Response body for the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server is up.
    pub status: String,
    /// Name of the configured AI generator.
    pub generator: String,
    /// Name of the configured store backend.
    pub store: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Problem generation service.
    pub problems: ProblemSessionService,
    /// Answer grading service.
    pub answers: AnswerSubmissionService,
    generator_name: String,
    store_backend: &'static str,
}

impl AppState {
    /// Wires both services to the given generator and store handles.
    #[must_use]
    pub fn new(
        config: Config,
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let generator_name = generator.name().to_string();
        let store_backend = store.backend();
        Self {
            config,
            problems: ProblemSessionService::new(Arc::clone(&generator), Arc::clone(&store)),
            answers: AnswerSubmissionService::new(generator, store),
            generator_name,
            store_backend,
        }
    }

    fn api_error(&self, error: CoachError) -> ApiError {
        ApiError {
            status: status_for(&error, self.config.api.status_per_kind),
            error,
        }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// A [`CoachError`] paired with the status it is reported with.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    error: CoachError,
}

/// Chooses the HTTP status for `error`.
///
/// Every failure is a 500 unless per-kind statuses are enabled.
fn status_for(error: &CoachError, per_kind: bool) -> StatusCode {
    if !per_kind {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    match error.code() {
        ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorCode::SessionNotFound => StatusCode::NOT_FOUND,
        ErrorCode::GenerationFailed
        | ErrorCode::FeedbackFailed
        | ErrorCode::StoreReadFailed
        | ErrorCode::StoreWriteFailed => StatusCode::BAD_GATEWAY,
        ErrorCode::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.error.code();
        if self.error.is_client_error() {
            warn!(code = %code, error = %self.error, "Rejected request");
        } else {
            error!(code = %code, error = %self.error, "Request failed");
        }

        let body = Json(ErrorResponse {
            error: format!("{ERROR_PREFIX}{}", self.error.public_message()),
            code,
        });
        (self.status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with the API endpoints and the client page.
///
/// The router carries a permissive CORS layer and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/math-problem", post(handle_math_problem))
        .route("/health", get(handle_health));

    Router::new()
        .route("/", get(view::index))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `POST /api/math-problem`.
///
/// The raw body is decoded here so malformed JSON is reported like any
/// other invalid request.
async fn handle_math_problem(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = ProblemRequest::from_body(&body).map_err(|e| state.api_error(e))?;
    info!(action = request.action(), "Received math problem request");

    let response = match request {
        ProblemRequest::Generate => state
            .problems
            .generate()
            .await
            .map(|generated| Json(generated).into_response()),
        ProblemRequest::Submit(submit) => state
            .answers
            .submit(submit)
            .await
            .map(|outcome| Json(outcome).into_response()),
    };

    response.map_err(|e| state.api_error(e))
}

/// Handler for `GET /api/health`.
async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        generator: state.generator_name.clone(),
        store: state.store_backend.to_string(),
    })
}
