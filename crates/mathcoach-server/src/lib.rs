//! MathCoach server
//!
//! Generates math word problems with an AI model, stores each problem as a
//! session, grades submitted answers and returns AI-written feedback.

pub mod answer_service;
pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod generator;
pub mod problem;
pub mod problem_service;
pub mod prompts;
pub mod store;
pub mod view;

pub use answer_service::{AnswerOutcome, AnswerSubmissionService, SubmitAnswer};
pub use api::{create_router, AppState, ErrorResponse, HealthResponse, ERROR_PREFIX};
pub use config::{ApiConfig, Config, GeneratorConfig, LlmProvider, ServerConfig, StoreBackend, StoreConfig};
pub use dispatch::ProblemRequest;
pub use error::{CoachError, ErrorCode, LlmErrorKind, Result};
pub use generator::{
    build_generator, GeminiGenerator, GeneratorError, OpenAiGenerator, ScriptedGenerator,
    TextGenerator,
};
pub use problem::{
    answers_match, strip_code_fences, Problem, Session, SessionId, Submission, ANSWER_TOLERANCE,
};
pub use problem_service::{GeneratedProblem, ProblemSessionService};
pub use store::{build_store, InMemoryStore, SessionStore, StoreError, SupabaseStore};
