//! Domain types for generated problems, sessions and submissions.
//!
//! This module also owns the two pieces of pure logic the services depend
//! on: decoding the AI generator's problem reply and the tolerance
//! comparison that decides whether an answer is correct.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoachError, Result};

/// Largest absolute difference (exclusive) at which two answers still match.
pub const ANSWER_TOLERANCE: f64 = 0.01;

/// Matches an opening fence line such as "```" or "```json".
static OPENING_FENCE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_-]*[ \t]*\r?\n?").ok());

/// Matches a closing fence at the very end of the text.
static CLOSING_FENCE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\r?\n?```$").ok());

// ============================================================================
// SessionId
// ============================================================================

/// Opaque identifier of a stored session.
///
/// The client keeps this value between the generate and submit steps. Its
/// format is owned by the store backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps a store-issued identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ============================================================================
// Problem
// ============================================================================

/// A generated word problem together with its numeric answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    /// Full text of the word problem.
    pub problem_text: String,
    /// The numeric answer the student is expected to give.
    pub correct_answer: f64,
}

impl Problem {
    /// Decodes the AI generator's reply into a problem.
    ///
    /// Surrounding code fences are removed first. The remainder must be a
    /// JSON object with a non-empty `problem_text` string and a finite
    /// `correct_answer` number (a numeric string is accepted).
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Generation` if the reply is not JSON, is not an
    /// object, or lacks either field.
    pub fn from_model_output(raw: &str) -> Result<Self> {
        let body = strip_code_fences(raw);
        let value: Value = serde_json::from_str(body)
            .map_err(|e| CoachError::generation(format!("reply is not valid JSON: {e}")))?;

        let Value::Object(fields) = value else {
            return Err(CoachError::generation("reply is not a JSON object"));
        };

        let problem_text = match fields.get("problem_text") {
            Some(Value::String(text)) if !text.trim().is_empty() => text.trim().to_string(),
            Some(Value::String(_)) => {
                return Err(CoachError::generation("problem_text is empty"));
            }
            Some(_) => return Err(CoachError::generation("problem_text is not a string")),
            None => return Err(CoachError::generation("reply is missing problem_text")),
        };

        let correct_answer = match fields.get("correct_answer") {
            None | Some(Value::Null) => {
                return Err(CoachError::generation("reply is missing correct_answer"));
            }
            Some(value) => coerce_number(value)
                .ok_or_else(|| CoachError::generation("correct_answer is not a number"))?,
        };

        Ok(Self {
            problem_text,
            correct_answer,
        })
    }
}

/// Converts a JSON number, or a string holding one, into a finite `f64`.
pub(crate) fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// Removes a surrounding Markdown code fence from model output.
///
/// Handles "```json ... ```" and bare "``` ... ```" wrappers. Text without
/// fences is returned trimmed.
///
/// # Examples
///
/// ```
/// use mathcoach_server::strip_code_fences;
///
/// assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
/// assert_eq!(strip_code_fences("  {\"a\": 1}  "), "{\"a\": 1}");
/// ```
#[must_use]
pub fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();

    if text.starts_with("```") {
        if let Some(re) = OPENING_FENCE.as_ref() {
            if let Some(m) = re.find(text) {
                text = &text[m.end()..];
            }
        }
        if let Some(re) = CLOSING_FENCE.as_ref() {
            if let Some(m) = re.find(text) {
                text = &text[..m.start()];
            }
        }
    }

    text.trim()
}

/// Returns `true` when `user_answer` is within tolerance of `correct_answer`.
///
/// The comparison is strict: a difference of exactly [`ANSWER_TOLERANCE`]
/// does not match. Non-finite inputs never match.
///
/// # Examples
///
/// ```
/// use mathcoach_server::answers_match;
///
/// assert!(answers_match(80.0, 80.0));
/// assert!(answers_match(0.333, 1.0 / 3.0));
/// assert!(!answers_match(79.98, 80.0));
/// ```
#[must_use]
pub fn answers_match(user_answer: f64, correct_answer: f64) -> bool {
    (user_answer - correct_answer).abs() < ANSWER_TOLERANCE
}

// ============================================================================
// Session and Submission
// ============================================================================

/// A stored problem addressed by an opaque identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Identifier issued by the store.
    pub id: SessionId,
    /// The problem this session was created for.
    pub problem: Problem,
    /// When the session was stored.
    pub created_at: DateTime<Utc>,
}

/// One graded answer to a session's problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// The session the answer was submitted against.
    pub session_id: SessionId,
    /// The value the student entered.
    pub user_answer: f64,
    /// Whether the answer matched within tolerance.
    pub is_correct: bool,
    /// Feedback text produced by the AI generator.
    pub feedback_text: String,
    /// When the submission was graded.
    pub created_at: DateTime<Utc>,
}

impl Submission {
    /// Grades `user_answer` against `session` and records the feedback.
    ///
    /// `is_correct` is recomputed from the two answers, so it always agrees
    /// with [`answers_match`].
    #[must_use]
    pub fn grade(session: &Session, user_answer: f64, feedback_text: impl Into<String>) -> Self {
        Self {
            session_id: session.id.clone(),
            user_answer,
            is_correct: answers_match(user_answer, session.problem.correct_answer),
            feedback_text: feedback_text.into(),
            created_at: Utc::now(),
        }
    }
}
