//! AI text generator clients.
//!
//! The services only see the [`TextGenerator`] trait. Two HTTP
//! implementations are provided, [`GeminiGenerator`] and
//! [`OpenAiGenerator`], plus [`ScriptedGenerator`] for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{GeneratorConfig, LlmProvider};
use crate::error::{CoachError, LlmErrorKind, Result};

/// Error returned by a [`TextGenerator`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct GeneratorError {
    /// Classification of the failure.
    pub kind: LlmErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl GeneratorError {
    /// Creates a new generator error.
    #[must_use]
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn empty_response(provider: &str) -> Self {
        Self::new(LlmErrorKind::Other, format!("{provider} returned an empty response"))
    }

    fn from_transport(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() {
            LlmErrorKind::Network
        } else if let Some(status) = err.status() {
            LlmErrorKind::from_status(status.as_u16())
        } else {
            LlmErrorKind::Other
        };
        Self::new(kind, err.to_string())
    }

    fn from_status(provider: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        Self::new(
            LlmErrorKind::from_status(status.as_u16()),
            format!("{provider} request failed with status {status}: {snippet}"),
        )
    }
}

/// A source of generated text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Sends `prompt` to the model and returns its trimmed reply.
    async fn generate(&self, prompt: &str) -> std::result::Result<String, GeneratorError>;

    /// Short name used in logs and the health endpoint.
    fn name(&self) -> &str;
}

/// Builds the generator selected by configuration.
///
/// # Errors
///
/// Returns `CoachError::ConfigValidationError` if no API key is configured
/// or the HTTP client cannot be constructed.
pub fn build_generator(config: &GeneratorConfig) -> Result<Arc<dyn TextGenerator>> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        CoachError::config_validation(
            "generator.apiKey is not set",
            "Set MATHCOACH_LLM_API_KEY or generator.apiKey in your mathcoach.json",
        )
    })?;

    let client = Client::builder()
        .timeout(Duration::from_secs(u64::from(config.timeout_seconds)))
        .build()
        .map_err(|e| {
            CoachError::config_validation(
                format!("cannot build HTTP client: {e}"),
                "Check the TLS setup of this machine",
            )
        })?;

    let generator: Arc<dyn TextGenerator> = match config.provider {
        LlmProvider::Gemini => Arc::new(GeminiGenerator::new(
            client,
            config.resolved_base_url(),
            config.resolved_model(),
            api_key,
        )),
        LlmProvider::OpenAi => Arc::new(OpenAiGenerator::new(
            client,
            config.resolved_base_url(),
            config.resolved_model(),
            api_key,
        )),
    };
    Ok(generator)
}

// ============================================================================
// Gemini
// ============================================================================

/// Client for the Gemini `generateContent` API.
#[derive(Clone)]
pub struct GeminiGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiGenerator {
    /// Creates a client for `model` served from `base_url`.
    #[must_use]
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

impl std::fmt::Debug for GeminiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiGenerator")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, GeneratorError> {
        let payload = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: Some(prompt.to_string()),
                }],
            }],
        };

        debug!(model = %self.model, prompt_len = prompt.len(), "Calling Gemini");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| GeneratorError::from_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(model = %self.model, %status, "Gemini request failed");
            return Err(GeneratorError::from_status("Gemini", status, &body));
        }

        let body: GeminiResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::new(LlmErrorKind::Other, e.to_string()))?;

        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        let text = text.trim();
        if text.is_empty() {
            return Err(GeneratorError::empty_response("Gemini"));
        }
        Ok(text.to_string())
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

// ============================================================================
// OpenAI-compatible
// ============================================================================

/// Client for OpenAI-compatible `chat/completions` APIs.
#[derive(Clone)]
pub struct OpenAiGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiGenerator {
    /// Creates a client for `model` served from `base_url`.
    #[must_use]
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }
}

impl std::fmt::Debug for OpenAiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiGenerator")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, GeneratorError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let payload = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt.to_string(),
            }],
        };

        debug!(model = %self.model, prompt_len = prompt.len(), "Calling chat completions");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| GeneratorError::from_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(model = %self.model, %status, "Chat completions request failed");
            return Err(GeneratorError::from_status("OpenAI", status, &body));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::new(LlmErrorKind::Other, e.to_string()))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        let content = content.trim();
        if content.is_empty() {
            return Err(GeneratorError::empty_response("OpenAI"));
        }
        Ok(content.to_string())
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

// ============================================================================
// Scripted test double
// ============================================================================

/// A generator that replays queued replies and records prompts.
///
/// Used in tests in place of a real provider. When the queue is empty,
/// `generate` fails with an `Other` error.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    replies: Arc<Mutex<VecDeque<std::result::Result<String, GeneratorError>>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedGenerator {
    /// Creates a generator with no queued replies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful reply.
    #[must_use]
    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        self.push(Ok(reply.into()));
        self
    }

    /// Queues a failure.
    #[must_use]
    pub fn with_error(self, kind: LlmErrorKind, message: impl Into<String>) -> Self {
        self.push(Err(GeneratorError::new(kind, message)));
        self
    }

    /// Queues a reply on an existing handle.
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.push(Ok(reply.into()));
    }

    /// Returns every prompt received so far, oldest first.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }

    /// Returns how many times `generate` was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|prompts| prompts.len()).unwrap_or(0)
    }

    fn push(&self, reply: std::result::Result<String, GeneratorError>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, GeneratorError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front())
            .unwrap_or_else(|| Err(GeneratorError::new(LlmErrorKind::Other, "no scripted reply")))
            .map(|reply| reply.trim().to_string())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
