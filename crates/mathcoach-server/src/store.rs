//! Session store backends.
//!
//! Services talk to storage through the [`SessionStore`] trait.
//! [`InMemoryStore`] keeps everything in process memory and backs tests and
//! local runs; [`SupabaseStore`] writes to hosted Postgres tables through
//! the PostgREST API.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{CoachError, Result};
use crate::problem::{coerce_number, Problem, Session, SessionId, Submission};

/// Errors surfaced by store backends.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// The backend answered with an error status.
    #[error("rejected with status {status}: {message}")]
    Rejected {
        /// HTTP status returned by the backend.
        status: u16,
        /// Body or reason returned by the backend.
        message: String,
    },

    /// A row could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Persistence contract for sessions and submissions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a new session for `problem` and returns it with its id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the row cannot be stored.
    async fn insert_session(&self, problem: &Problem) -> std::result::Result<Session, StoreError>;

    /// Fetches a session by id. `Ok(None)` means no such session.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the lookup itself fails.
    async fn get_session(
        &self,
        id: &SessionId,
    ) -> std::result::Result<Option<Session>, StoreError>;

    /// Persists a graded submission.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the row cannot be stored.
    async fn insert_submission(
        &self,
        submission: &Submission,
    ) -> std::result::Result<(), StoreError>;

    /// Short backend name used in logs and the health endpoint.
    fn backend(&self) -> &'static str;
}

/// Builds the store selected by configuration.
///
/// # Errors
///
/// Returns `CoachError::ConfigValidationError` if the Supabase backend is
/// selected without a URL or anon key.
pub fn build_store(config: &StoreConfig, timeout: Duration) -> Result<Arc<dyn SessionStore>> {
    let store: Arc<dyn SessionStore> = match config.backend {
        StoreBackend::Memory => Arc::new(InMemoryStore::new()),
        StoreBackend::Supabase => Arc::new(SupabaseStore::from_config(config, timeout)?),
    };
    Ok(store)
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Default)]
struct MemoryTables {
    sessions: HashMap<SessionId, Session>,
    submissions: Vec<Submission>,
}

/// Process-local store for tests and single-node runs.
///
/// Ids are random UUIDs. Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<MemoryTables>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.tables.read().map_or(0, |t| t.sessions.len())
    }

    /// Returns the number of stored submissions.
    #[must_use]
    pub fn submission_count(&self) -> usize {
        self.tables.read().map_or(0, |t| t.submissions.len())
    }

    /// Returns the submissions recorded for `id`, oldest first.
    #[must_use]
    pub fn submissions_for(&self, id: &SessionId) -> Vec<Submission> {
        self.tables
            .read()
            .map(|t| {
                t.submissions
                    .iter()
                    .filter(|s| &s.session_id == id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn poisoned() -> StoreError {
        StoreError::Connection("in-memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn insert_session(&self, problem: &Problem) -> std::result::Result<Session, StoreError> {
        let session = Session {
            id: SessionId::new(uuid::Uuid::new_v4().to_string()),
            problem: problem.clone(),
            created_at: Utc::now(),
        };
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        tables.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get_session(
        &self,
        id: &SessionId,
    ) -> std::result::Result<Option<Session>, StoreError> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables.sessions.get(id).cloned())
    }

    async fn insert_submission(
        &self,
        submission: &Submission,
    ) -> std::result::Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        tables.submissions.push(submission.clone());
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// Supabase (PostgREST)
// ============================================================================

/// Store backed by Supabase tables through the PostgREST API.
#[derive(Clone)]
pub struct SupabaseStore {
    client: Client,
    rest_url: String,
    anon_key: String,
    sessions_table: String,
    submissions_table: String,
}

impl std::fmt::Debug for SupabaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseStore")
            .field("rest_url", &self.rest_url)
            .field("sessions_table", &self.sessions_table)
            .field("submissions_table", &self.submissions_table)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct NewSessionRow<'a> {
    problem_text: &'a str,
    correct_answer: f64,
}

#[derive(Debug, Serialize)]
struct NewSubmissionRow<'a> {
    session_id: &'a str,
    user_answer: f64,
    is_correct: bool,
    feedback_text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SessionRow {
    id: Value,
    #[serde(default)]
    problem_text: Option<String>,
    #[serde(default)]
    correct_answer: Option<Value>,
    #[serde(default)]
    created_at: Option<Value>,
}

/// Columns read back on lookup.
const SESSION_COLUMNS: &str = "id,problem_text,correct_answer,created_at";

/// Reads a `timestamptz` or plain `timestamp` column. Values without an
/// offset are taken as UTC.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

/// Renders a PostgREST id column (uuid text or integer) as a plain string.
fn id_to_string(id: &Value) -> Option<String> {
    match id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl SupabaseStore {
    /// Creates a store for the project at `url` (e.g. `https://xyz.supabase.co`).
    #[must_use]
    pub fn new(
        client: Client,
        url: &str,
        anon_key: impl Into<String>,
        sessions_table: impl Into<String>,
        submissions_table: impl Into<String>,
    ) -> Self {
        Self {
            client,
            rest_url: format!("{}/rest/v1", url.trim_end_matches('/')),
            anon_key: anon_key.into(),
            sessions_table: sessions_table.into(),
            submissions_table: submissions_table.into(),
        }
    }

    /// Creates a store from configuration.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::ConfigValidationError` if the URL or anon key is
    /// missing, or the HTTP client cannot be constructed.
    pub fn from_config(config: &StoreConfig, timeout: Duration) -> Result<Self> {
        let url = config.url.as_deref().ok_or_else(|| {
            CoachError::config_validation(
                "store.url is required for the supabase backend",
                "Set SUPABASE_URL or store.url in your mathcoach.json",
            )
        })?;
        let anon_key = config.anon_key.clone().ok_or_else(|| {
            CoachError::config_validation(
                "store.anonKey is required for the supabase backend",
                "Set SUPABASE_ANON_KEY in the environment",
            )
        })?;
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            CoachError::config_validation(
                format!("cannot build HTTP client: {e}"),
                "Check the TLS setup of this machine",
            )
        })?;

        Ok(Self::new(
            client,
            url,
            anon_key,
            config.sessions_table.clone(),
            config.submissions_table.clone(),
        ))
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{table}", self.rest_url)
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }

    async fn rejected(response: reqwest::Response) -> StoreError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        StoreError::Rejected { status, message }
    }
}

fn transport_error(err: &reqwest::Error) -> StoreError {
    StoreError::Connection(err.to_string())
}

#[async_trait]
impl SessionStore for SupabaseStore {
    async fn insert_session(&self, problem: &Problem) -> std::result::Result<Session, StoreError> {
        let row = NewSessionRow {
            problem_text: &problem.problem_text,
            correct_answer: problem.correct_answer,
        };

        let response = self
            .request(reqwest::Method::POST, &self.sessions_table)
            .query(&[("select", "id")])
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        if !response.status().is_success() {
            return Err(Self::rejected(response).await);
        }

        let rows: Vec<SessionRow> = response
            .json()
            .await
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let row = rows.into_iter().next().ok_or_else(|| {
            StoreError::Serialization("insert returned no rows".to_string())
        })?;
        let id = id_to_string(&row.id)
            .ok_or_else(|| StoreError::Serialization("insert returned no id".to_string()))?;

        debug!(table = %self.sessions_table, session_id = %id, "Inserted session row");

        Ok(Session {
            id: SessionId::new(id),
            problem: problem.clone(),
            created_at: row
                .created_at
                .as_ref()
                .and_then(parse_timestamp)
                .unwrap_or_else(Utc::now),
        })
    }

    async fn get_session(
        &self,
        id: &SessionId,
    ) -> std::result::Result<Option<Session>, StoreError> {
        let filter = format!("eq.{id}");
        let response = self
            .request(reqwest::Method::GET, &self.sessions_table)
            .query(&[("id", filter.as_str()), ("select", SESSION_COLUMNS)])
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        // PostgREST answers 400 when the id cannot be cast to the column
        // type; such an id cannot name a session.
        if response.status() == StatusCode::BAD_REQUEST {
            debug!(session_id = %id, "Lookup rejected as malformed id");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::rejected(response).await);
        }

        let rows: Vec<SessionRow> = response
            .json()
            .await
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };

        let problem_text = row
            .problem_text
            .ok_or_else(|| StoreError::Serialization("row has no problem_text".to_string()))?;
        let correct_answer = row
            .correct_answer
            .as_ref()
            .and_then(coerce_number)
            .ok_or_else(|| StoreError::Serialization("row has no numeric correct_answer".to_string()))?;
        let stored_id = id_to_string(&row.id).unwrap_or_else(|| id.to_string());

        Ok(Some(Session {
            id: SessionId::new(stored_id),
            problem: Problem {
                problem_text,
                correct_answer,
            },
            created_at: row
                .created_at
                .as_ref()
                .and_then(parse_timestamp)
                .unwrap_or_else(Utc::now),
        }))
    }

    async fn insert_submission(
        &self,
        submission: &Submission,
    ) -> std::result::Result<(), StoreError> {
        let row = NewSubmissionRow {
            session_id: submission.session_id.as_str(),
            user_answer: submission.user_answer,
            is_correct: submission.is_correct,
            feedback_text: &submission.feedback_text,
        };

        let response = self
            .request(reqwest::Method::POST, &self.submissions_table)
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        if !response.status().is_success() {
            let err = Self::rejected(response).await;
            warn!(table = %self.submissions_table, error = %err, "Submission insert rejected");
            return Err(err);
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "supabase"
    }
}
