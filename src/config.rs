//! Runtime configuration for llm-sse-relay.
//!
//! Everything is read once at startup from the process environment (after an
//! optional dotenv file has been loaded) and frozen into an immutable [`Config`]
//! that is passed explicitly to the server, the provider client and the trace
//! reporter.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

/// Default base URL of the Gemini API.
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Default LangSmith ingestion endpoint.
pub const DEFAULT_LANGSMITH_ENDPOINT: &str = "https://api.smith.langchain.com";

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "llm-sse-relay", about = "Relay LLM streams to browsers over SSE")]
pub struct Cli {
    /// Interface to bind.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind.
    #[arg(short, long, default_value_t = 8000)]
    pub port: u16,

    /// Dotenv file loaded before reading the environment (ignored if absent).
    #[arg(long, default_value = ".env")]
    pub env_file: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

impl Cli {
    /// Socket address string for the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// A credential whose value never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP surface settings.
    pub server: ServerConfig,

    /// LLM provider settings.
    pub provider: ProviderConfig,

    /// Observability backend; `None` disables the trace reporter.
    pub tracing: Option<LangSmithConfig>,
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Origins allowed by the CORS layer.
    pub cors_origins: CorsOrigins,

    /// Longest wait for the next fragment before a stream is failed.
    pub stream_idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            cors_origins: CorsOrigins::Any,
            stream_idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Provider (Gemini) settings.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: ApiKey,

    /// Model identifier, e.g. `gemini-2.0-flash`.
    pub model: String,

    /// Base URL of the generative language API.
    pub base_url: String,

    /// Sampling temperature; provider default when unset.
    pub temperature: Option<f32>,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: ApiKey::new(api_key),
            model: model.into(),
            base_url: DEFAULT_GEMINI_API_BASE.to_string(),
            temperature: None,
        }
    }
}

/// LangSmith run-ingestion settings.
#[derive(Debug, Clone)]
pub struct LangSmithConfig {
    pub api_key: ApiKey,
    pub endpoint: String,
    pub project: String,
}

/// CORS allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    /// Wildcard: any origin, no credentials.
    Any,
    /// Explicit, ordered list of origins. Empty denies every cross-origin request.
    List(Vec<String>),
}

impl CorsOrigins {
    /// Parse `*`, a JSON array (`["http://a", "http://b"]`) or a comma-separated list.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        let items: Vec<String> = if raw.starts_with('[') {
            serde_json::from_str(raw).map_err(|e| ConfigError::Invalid {
                name: "BACKEND_CORS_ORIGINS",
                reason: e.to_string(),
            })?
        } else {
            raw.split(',').map(str::to_string).collect()
        };

        let origins: Vec<String> = items
            .iter()
            .map(|o| o.trim().trim_end_matches('/').to_string())
            .filter(|o| !o.is_empty())
            .collect();

        if origins.iter().any(|o| o == "*") {
            Ok(CorsOrigins::Any)
        } else {
            Ok(CorsOrigins::List(origins))
        }
    }
}

impl Config {
    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// Blank values are treated as absent.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_key = get("GOOGLE_API_KEY").ok_or(ConfigError::Missing("GOOGLE_API_KEY"))?;
        let model = get("VERTEX_AI_MODEL").ok_or(ConfigError::Missing("VERTEX_AI_MODEL"))?;

        let temperature = match get("GEMINI_TEMPERATURE") {
            Some(v) => Some(v.trim().parse::<f32>().map_err(|e| ConfigError::Invalid {
                name: "GEMINI_TEMPERATURE",
                reason: e.to_string(),
            })?),
            None => None,
        };

        let provider = ProviderConfig {
            api_key: ApiKey::new(api_key),
            model,
            base_url: get("GEMINI_API_BASE")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
            temperature,
        };

        let mut server = ServerConfig::default();
        if let Some(raw) = get("BACKEND_CORS_ORIGINS") {
            server.cors_origins = CorsOrigins::parse(&raw)?;
        }
        if let Some(raw) = get("STREAM_IDLE_TIMEOUT_SECS") {
            let secs = raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                name: "STREAM_IDLE_TIMEOUT_SECS",
                reason: e.to_string(),
            })?;
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    name: "STREAM_IDLE_TIMEOUT_SECS",
                    reason: "must be greater than zero".to_string(),
                });
            }
            server.stream_idle_timeout = Duration::from_secs(secs);
        }

        let tracing_disabled = get("LANGSMITH_TRACING")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(false);

        let tracing = if tracing_disabled {
            None
        } else {
            get("LANGSMITH_API_KEY")
                .or_else(|| get("LANGCHAIN_API_KEY"))
                .map(|key| LangSmithConfig {
                    api_key: ApiKey::new(key),
                    endpoint: get("LANGSMITH_ENDPOINT")
                        .map(|u| u.trim_end_matches('/').to_string())
                        .unwrap_or_else(|| DEFAULT_LANGSMITH_ENDPOINT.to_string()),
                    project: get("LANGSMITH_PROJECT").unwrap_or_else(|| "default".to_string()),
                })
        };

        Ok(Config {
            server,
            provider,
            tracing,
        })
    }
}
