//! Answer grading: look up the session, grade, ask for feedback, record.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CoachError, Result};
use crate::generator::TextGenerator;
use crate::problem::{answers_match, SessionId, Submission};
use crate::prompts::feedback_prompt;
use crate::store::SessionStore;

/// A student's answer to a previously generated problem.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitAnswer {
    /// Session returned by the generate call.
    pub session_id: SessionId,
    /// The student's numeric answer.
    pub user_answer: f64,
}

/// Result of grading one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOutcome {
    /// Whether the answer is within tolerance of the stored answer.
    pub is_correct: bool,
    /// Encouraging feedback from the AI generator.
    pub feedback: String,
}

/// Grades answers against stored sessions.
#[derive(Clone)]
pub struct AnswerSubmissionService {
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn SessionStore>,
}

impl AnswerSubmissionService {
    /// Creates a service over the given generator and store.
    #[must_use]
    pub fn new(generator: Arc<dyn TextGenerator>, store: Arc<dyn SessionStore>) -> Self {
        Self { generator, store }
    }

    /// Grades `request` and records the submission.
    ///
    /// Every call records a new submission, including repeated answers to
    /// the same session.
    ///
    /// # Errors
    ///
    /// - `CoachError::SessionNotFound` if no session has the given id
    /// - `CoachError::StoreRead` if the lookup itself fails
    /// - `CoachError::FeedbackGeneration` if the AI call fails
    /// - `CoachError::StoreWrite` if the submission cannot be saved
    pub async fn submit(&self, request: SubmitAnswer) -> Result<AnswerOutcome> {
        let session = self
            .store
            .get_session(&request.session_id)
            .await
            .map_err(|e| CoachError::store_read("session", e.to_string()))?
            .ok_or_else(|| CoachError::session_not_found(&request.session_id))?;

        let is_correct = answers_match(request.user_answer, session.problem.correct_answer);
        debug!(
            session_id = %session.id,
            user_answer = request.user_answer,
            is_correct,
            "Graded answer"
        );

        let prompt = feedback_prompt(&session, request.user_answer, is_correct);
        let feedback = self.generator.generate(&prompt).await.map_err(|e| {
            warn!(session_id = %session.id, error = %e, "Feedback generation failed");
            CoachError::feedback_generation(e.kind, e.message)
        })?;

        let submission = Submission::grade(&session, request.user_answer, feedback);
        self.store
            .insert_submission(&submission)
            .await
            .map_err(|e| CoachError::store_write("submission", e.to_string()))?;

        info!(
            session_id = %session.id,
            is_correct = submission.is_correct,
            "Submission recorded"
        );

        Ok(AnswerOutcome {
            is_correct: submission.is_correct,
            feedback: submission.feedback_text,
        })
    }
}

impl std::fmt::Debug for AnswerSubmissionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerSubmissionService")
            .field("generator", &self.generator.name())
            .field("store", &self.store.backend())
            .finish()
    }
}
