//! Configuration types for the MathCoach server.
//!
//! Configuration is read from a camelCase JSON file (`mathcoach.json`),
//! then secrets are layered on from the environment with
//! [`Config::apply_env`]. Every section has defaults, so a missing file
//! yields a usable configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoachError, Result};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "mathcoach.json";

/// Environment variable holding the AI provider API key.
pub const ENV_LLM_API_KEY: &str = "MATHCOACH_LLM_API_KEY";
/// Fallback API key variable for Gemini.
pub const ENV_GOOGLE_API_KEY: &str = "GOOGLE_API_KEY";
/// Fallback API key variable for OpenAI-compatible providers.
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
/// Environment variable holding the Supabase project URL.
pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
/// Environment variable holding the Supabase anon key.
pub const ENV_SUPABASE_ANON_KEY: &str = "SUPABASE_ANON_KEY";
/// Fallback Supabase URL variable used by hosted front-end deployments.
pub const ENV_NEXT_PUBLIC_SUPABASE_URL: &str = "NEXT_PUBLIC_SUPABASE_URL";
/// Fallback Supabase anon key variable used by hosted front-end deployments.
pub const ENV_NEXT_PUBLIC_SUPABASE_ANON_KEY: &str = "NEXT_PUBLIC_SUPABASE_ANON_KEY";

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    3000
}

/// Default timeout for a single AI provider call, in seconds.
const fn default_timeout_seconds() -> u32 {
    60
}

fn default_sessions_table() -> String {
    "math_problem_sessions".to_string()
}

fn default_submissions_table() -> String {
    "math_problem_submissions".to_string()
}

/// Main configuration for the MathCoach server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Where the HTTP server listens.
    #[serde(default)]
    pub server: ServerConfig,

    /// Which AI provider generates problems and feedback.
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Where sessions and submissions are stored.
    #[serde(default)]
    pub store: StoreConfig,

    /// Behavior of the HTTP API.
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `mathcoach.json` in the current directory. If not found,
    /// returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            CoachError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `mathcoach.json` in a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::ConfigParseError` if the file exists but contains
    /// invalid JSON or invalid enum values.
    ///
    /// Returns `CoachError::ConfigValidationError` if the configuration values
    /// are invalid (e.g., zero port, empty table names).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(CoachError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| CoachError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Fills unset secrets from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    /// Fills unset secrets using `lookup` to read variables.
    ///
    /// Values already present in the file win. Blank variables are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if self.generator.api_key.is_none() {
            let fallback = match self.generator.provider {
                LlmProvider::Gemini => ENV_GOOGLE_API_KEY,
                LlmProvider::OpenAi => ENV_OPENAI_API_KEY,
            };
            self.generator.api_key = read(ENV_LLM_API_KEY).or_else(|| read(fallback));
        }
        if self.store.url.is_none() {
            self.store.url =
                read(ENV_SUPABASE_URL).or_else(|| read(ENV_NEXT_PUBLIC_SUPABASE_URL));
        }
        if self.store.anon_key.is_none() {
            self.store.anon_key =
                read(ENV_SUPABASE_ANON_KEY).or_else(|| read(ENV_NEXT_PUBLIC_SUPABASE_ANON_KEY));
        }
    }

    /// Validates the configuration values.
    ///
    /// Checks that:
    /// - `server.port` is greater than 0
    /// - `server.host` is not empty
    /// - `generator.timeoutSeconds` is greater than 0
    /// - both store table names are non-empty
    ///
    /// Credentials are checked when the generator and store are built, after
    /// environment overrides have been applied.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::ConfigValidationError` if any validation check fails.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(CoachError::config_validation(
                "server.port must be greater than 0",
                "Set server.port to a free TCP port in your mathcoach.json",
            ));
        }

        if self.server.host.trim().is_empty() {
            return Err(CoachError::config_validation(
                "server.host must not be empty",
                "Set server.host to an address such as 127.0.0.1 in your mathcoach.json",
            ));
        }

        if self.generator.timeout_seconds == 0 {
            return Err(CoachError::config_validation(
                "generator.timeoutSeconds must be greater than 0",
                "Set generator.timeoutSeconds to at least 1 second in your mathcoach.json",
            ));
        }

        if self.store.sessions_table.trim().is_empty() {
            return Err(CoachError::config_validation(
                "store.sessionsTable must not be empty",
                "Provide the sessions table name in your mathcoach.json",
            ));
        }

        if self.store.submissions_table.trim().is_empty() {
            return Err(CoachError::config_validation(
                "store.submissionsTable must not be empty",
                "Provide the submissions table name in your mathcoach.json",
            ));
        }

        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Supported AI providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LlmProvider {
    /// Google Gemini (default).
    #[default]
    Gemini,
    /// `OpenAI` or any API speaking its chat completions protocol.
    OpenAi,
}

impl LlmProvider {
    /// Parses a string into an `LlmProvider`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gemini" => Some(Self::Gemini),
            "openai" => Some(Self::OpenAi),
            _ => None,
        }
    }

    /// Model used when the configuration does not name one.
    #[must_use]
    pub const fn default_model(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini-2.5-flash",
            Self::OpenAi => "gpt-4o-mini",
        }
    }

    /// API base URL used when the configuration does not name one.
    #[must_use]
    pub const fn default_base_url(&self) -> &'static str {
        match self {
            Self::Gemini => "https://generativelanguage.googleapis.com",
            Self::OpenAi => "https://api.openai.com/v1",
        }
    }
}

impl<'de> Deserialize<'de> for LlmProvider {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid LLM provider '{s}': expected one of 'gemini', 'openai'"
            ))
        })
    }
}

impl Serialize for LlmProvider {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
        };
        serializer.serialize_str(s)
    }
}

/// AI provider settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorConfig {
    /// Which provider to call.
    #[serde(default)]
    pub provider: LlmProvider,

    /// Model name; the provider default when unset.
    #[serde(default)]
    pub model: Option<String>,

    /// API base URL; the provider default when unset.
    #[serde(default)]
    pub base_url: Option<String>,

    /// API key. Usually supplied through the environment.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Timeout for a single provider call in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u32,
}

impl GeneratorConfig {
    /// Returns the configured model or the provider default.
    #[must_use]
    pub fn resolved_model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    /// Returns the configured base URL or the provider default.
    #[must_use]
    pub fn resolved_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.provider.default_base_url().to_string())
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: None,
            base_url: None,
            api_key: None,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl std::fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<set>"))
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

/// Available store backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local maps; data is lost on restart (default).
    #[default]
    Memory,
    /// Supabase (PostgREST) tables.
    Supabase,
}

impl StoreBackend {
    /// Parses a string into a `StoreBackend`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "supabase" => Some(Self::Supabase),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for StoreBackend {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid store backend '{s}': expected one of 'memory', 'supabase'"
            ))
        })
    }
}

impl Serialize for StoreBackend {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            Self::Memory => "memory",
            Self::Supabase => "supabase",
        };
        serializer.serialize_str(s)
    }
}

/// Session store settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Which backend to use.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Supabase project URL.
    #[serde(default)]
    pub url: Option<String>,

    /// Supabase anon key. Usually supplied through the environment.
    #[serde(default, skip_serializing)]
    pub anon_key: Option<String>,

    /// Table holding generated problems.
    #[serde(default = "default_sessions_table")]
    pub sessions_table: String,

    /// Table holding graded submissions.
    #[serde(default = "default_submissions_table")]
    pub submissions_table: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            anon_key: None,
            sessions_table: default_sessions_table(),
            submissions_table: default_submissions_table(),
        }
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("backend", &self.backend)
            .field("url", &self.url)
            .field("anon_key", &self.anon_key.as_ref().map(|_| "<set>"))
            .field("sessions_table", &self.sessions_table)
            .field("submissions_table", &self.submissions_table)
            .finish()
    }
}

/// HTTP API behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Answer failures with a status chosen per error kind (400, 404, 502)
    /// instead of the uniform 500.
    #[serde(default)]
    pub status_per_kind: bool,
}
