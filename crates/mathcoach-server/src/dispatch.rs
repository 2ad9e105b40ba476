//! Request decoding for the single `/api/math-problem` endpoint.
//!
//! The body carries an `action` discriminator:
//!
//! ```json
//! { "action": "generate" }
//! { "action": "submit", "sessionId": "…", "userAnswer": 80 }
//! ```

use serde_json::Value;

use crate::answer_service::SubmitAnswer;
use crate::error::{CoachError, Result};
use crate::problem::{coerce_number, SessionId};

/// A decoded request to the dispatch endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum ProblemRequest {
    /// Generate a new problem and open a session.
    Generate,
    /// Grade an answer for an existing session.
    Submit(SubmitAnswer),
}

impl ProblemRequest {
    /// Decodes a raw request body.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::InvalidRequest` if the body is not a JSON object,
    /// names no known action, or a submit lacks `sessionId` or a numeric
    /// `userAnswer`.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| CoachError::invalid_request(format!("body is not valid JSON ({e})")))?;

        let Value::Object(fields) = value else {
            return Err(CoachError::invalid_request("body must be a JSON object"));
        };

        match fields.get("action") {
            Some(Value::String(action)) if action == "generate" => Ok(Self::Generate),
            Some(Value::String(action)) if action == "submit" => {
                let session_id = session_id_field(fields.get("sessionId"))?;
                let user_answer = user_answer_field(fields.get("userAnswer"))?;
                Ok(Self::Submit(SubmitAnswer {
                    session_id,
                    user_answer,
                }))
            }
            Some(Value::String(action)) => Err(CoachError::invalid_request(format!(
                "unknown action '{action}'"
            ))),
            Some(_) => Err(CoachError::invalid_request("action must be a string")),
            None => Err(CoachError::invalid_request("missing action")),
        }
    }

    /// Name of the action, for logging.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Submit(_) => "submit",
        }
    }
}

fn session_id_field(value: Option<&Value>) -> Result<SessionId> {
    match value {
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(SessionId::new(id.trim())),
        Some(Value::Number(n)) => Ok(SessionId::new(n.to_string())),
        None | Some(Value::Null) | Some(Value::String(_)) => {
            Err(CoachError::invalid_request("missing sessionId"))
        }
        Some(_) => Err(CoachError::invalid_request("sessionId must be a string")),
    }
}

fn user_answer_field(value: Option<&Value>) -> Result<f64> {
    match value {
        None | Some(Value::Null) => Err(CoachError::invalid_request("missing userAnswer")),
        Some(value) => coerce_number(value)
            .ok_or_else(|| CoachError::invalid_request("userAnswer must be a number")),
    }
}
