//! Problem generation: one AI call, one session insert.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CoachError, Result};
use crate::generator::TextGenerator;
use crate::problem::{Problem, SessionId};
use crate::prompts::problem_prompt;
use crate::store::SessionStore;

/// A freshly generated problem and the session that holds its answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedProblem {
    /// The problem shown to the student.
    pub problem: Problem,
    /// Handle the client sends back with its answer.
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
}

/// Generates problems and opens sessions for them.
#[derive(Clone)]
pub struct ProblemSessionService {
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn SessionStore>,
}

impl ProblemSessionService {
    /// Creates a service over the given generator and store.
    #[must_use]
    pub fn new(generator: Arc<dyn TextGenerator>, store: Arc<dyn SessionStore>) -> Self {
        Self { generator, store }
    }

    /// Asks the generator for a problem and persists it as a new session.
    ///
    /// Nothing is stored unless the reply decodes into a complete problem.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Generation` if the AI call fails or its reply is
    /// unusable, and `CoachError::StoreWrite` if the session cannot be saved.
    pub async fn generate(&self) -> Result<GeneratedProblem> {
        let raw = self
            .generator
            .generate(problem_prompt())
            .await
            .map_err(|e| {
                warn!(generator = self.generator.name(), error = %e, "Problem generation call failed");
                CoachError::generation(e.to_string())
            })?;

        debug!(bytes = raw.len(), "Received problem reply");

        let problem = Problem::from_model_output(&raw).map_err(|e| {
            warn!(error = %e, "Discarding unusable problem reply");
            e
        })?;

        let session = self
            .store
            .insert_session(&problem)
            .await
            .map_err(|e| CoachError::store_write("session", e.to_string()))?;

        info!(
            session_id = %session.id,
            correct_answer = session.problem.correct_answer,
            store = self.store.backend(),
            "Session created"
        );

        Ok(GeneratedProblem {
            problem: session.problem,
            session_id: session.id,
        })
    }
}

impl std::fmt::Debug for ProblemSessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProblemSessionService")
            .field("generator", &self.generator.name())
            .field("store", &self.store.backend())
            .finish()
    }
}
