//! Error types for the MathCoach server.
//!
//! Every failure a request can hit is a [`CoachError`] variant. Each variant
//! maps to a machine-readable [`ErrorCode`] and a public message, which the
//! HTTP layer uses to build the failure response.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A specialized `Result` type for MathCoach operations.
pub type Result<T> = std::result::Result<T, CoachError>;

/// Errors that can occur while serving MathCoach requests.
#[derive(Debug, thiserror::Error)]
pub enum CoachError {
    // ========================================================================
    // Request Errors
    // ========================================================================
    /// The request body was malformed, named an unknown action, or was
    /// missing a required field.
    #[error("Invalid request: {reason}")]
    InvalidRequest {
        /// What was wrong with the request.
        reason: String,
    },

    /// No session matches the identifier supplied with a submission.
    #[error("Session not found: '{session_id}'")]
    SessionNotFound {
        /// The identifier the client sent.
        session_id: String,
    },

    // ========================================================================
    // AI Generator Errors
    // ========================================================================
    /// The AI generator failed to produce a usable problem: the call failed,
    /// or the reply was not valid JSON with both required fields.
    #[error("Problem generation failed: {reason}")]
    Generation {
        /// Description of the failure.
        reason: String,
    },

    /// The AI generator failed to produce feedback for a submission.
    #[error("Feedback generation failed ({kind}): {message}\n\nSuggestion: {suggestion}")]
    FeedbackGeneration {
        /// Classification of the upstream failure.
        kind: LlmErrorKind,
        /// Detailed error message from the generator.
        message: String,
        /// Actionable suggestion for the operator.
        suggestion: String,
    },

    // ========================================================================
    // Store Errors
    // ========================================================================
    /// Persisting a session or submission failed.
    #[error("Failed to save {collection}: {message}")]
    StoreWrite {
        /// Which collection the write targeted.
        collection: String,
        /// Description of the failure.
        message: String,
    },

    /// Looking up a session failed for a reason other than "not found".
    #[error("Failed to load from {collection}: {message}")]
    StoreRead {
        /// Which collection the read targeted.
        collection: String,
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in the configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your mathcoach.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },
}

/// Machine-readable error codes carried in failure responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed request, unknown action, or missing field.
    InvalidRequest,
    /// The AI generator did not produce a usable problem.
    GenerationFailed,
    /// The submitted session identifier is unknown.
    SessionNotFound,
    /// A store lookup failed.
    StoreReadFailed,
    /// A store write failed.
    StoreWriteFailed,
    /// The AI generator did not produce feedback.
    FeedbackFailed,
    /// The server is misconfigured.
    Configuration,
}

impl ErrorCode {
    /// Returns the wire representation of this code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::GenerationFailed => "generation_failed",
            Self::SessionNotFound => "session_not_found",
            Self::StoreReadFailed => "store_read_failed",
            Self::StoreWriteFailed => "store_write_failed",
            Self::FeedbackFailed => "feedback_failed",
            Self::Configuration => "configuration",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories of AI generator failures for structured error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Authentication failure (invalid API key, expired credentials).
    Authentication,
    /// Rate limit exceeded.
    RateLimit,
    /// Server error (5xx responses).
    Server,
    /// Network connectivity issues or timeouts.
    Network,
    /// Other unclassified errors, including empty replies.
    Other,
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Server => write!(f, "server"),
            Self::Network => write!(f, "network"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl LlmErrorKind {
    /// Returns a suggestion message for this error kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Authentication => "Check your API key or credentials",
            Self::RateLimit => "Wait a moment, or reduce request frequency",
            Self::Server => "Try again later; the AI provider may be experiencing issues",
            Self::Network => "Check your network connection",
            Self::Other => "Check the AI provider's status page",
        }
    }

    /// Classifies an HTTP status returned by an AI provider.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication,
            429 => Self::RateLimit,
            500..=599 => Self::Server,
            _ => Self::Other,
        }
    }
}

impl CoachError {
    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Creates a new `SessionNotFound` error.
    #[must_use]
    pub fn session_not_found(session_id: impl std::fmt::Display) -> Self {
        Self::SessionNotFound {
            session_id: session_id.to_string(),
        }
    }

    /// Creates a new `Generation` error.
    #[must_use]
    pub fn generation(reason: impl Into<String>) -> Self {
        Self::Generation {
            reason: reason.into(),
        }
    }

    /// Creates a new `FeedbackGeneration` error with automatic suggestion
    /// based on error kind.
    #[must_use]
    pub fn feedback_generation(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self::FeedbackGeneration {
            kind,
            message: message.into(),
            suggestion: kind.suggestion().to_string(),
        }
    }

    /// Creates a new `StoreWrite` error.
    #[must_use]
    pub fn store_write(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StoreWrite {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Creates a new `StoreRead` error.
    #[must_use]
    pub fn store_read(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StoreRead {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Returns the machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest { .. } => ErrorCode::InvalidRequest,
            Self::SessionNotFound { .. } => ErrorCode::SessionNotFound,
            Self::Generation { .. } => ErrorCode::GenerationFailed,
            Self::FeedbackGeneration { .. } => ErrorCode::FeedbackFailed,
            Self::StoreWrite { .. } => ErrorCode::StoreWriteFailed,
            Self::StoreRead { .. } => ErrorCode::StoreReadFailed,
            Self::ConfigParseError { .. } | Self::ConfigValidationError { .. } => {
                ErrorCode::Configuration
            }
        }
    }

    /// Returns the message shown to API clients.
    ///
    /// Request errors echo their detail back; upstream failures keep their
    /// details in the server log only.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidRequest { reason } => format!("Invalid request: {reason}"),
            Self::SessionNotFound { .. } => "Session not found".to_string(),
            Self::Generation { .. } => "Could not generate a problem".to_string(),
            Self::FeedbackGeneration { .. } => "Could not generate feedback".to_string(),
            Self::StoreWrite { collection, .. } => format!("Failed to save {collection}"),
            Self::StoreRead { .. } => "Failed to load session".to_string(),
            Self::ConfigParseError { .. } | Self::ConfigValidationError { .. } => {
                "Server is misconfigured".to_string()
            }
        }
    }

    /// Returns `true` if the caller caused this error.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest { .. } | Self::SessionNotFound { .. }
        )
    }
}
