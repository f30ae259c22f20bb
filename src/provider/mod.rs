//! LLM provider client.
//!
//! - [`gemini`]: Google Gemini `streamGenerateContent` client
//! - [`sse`]: incremental decoder for the provider's SSE response body

pub mod gemini;
pub mod sse;

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::Stream;
use thiserror::Error;

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One incremental piece of generated text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    /// Text fragment; may be empty for metadata-only chunks.
    pub text: String,

    /// Set on the provider's final chunk.
    pub done: bool,

    /// Provider finish reason (e.g. `STOP`, `MAX_TOKENS`).
    pub finish_reason: Option<String>,

    /// Usage so far, when the provider attaches it.
    pub usage: Option<TokenUsage>,
}

impl StreamChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Any failure of the upstream generation call.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider rejected credentials ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("provider quota or rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed provider stream: {0}")]
    Decode(String),

    #[error("no fragment received within {0:?}")]
    IdleTimeout(std::time::Duration),
}

impl ProviderError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => ProviderError::Auth { status, message },
            429 => ProviderError::RateLimited(message),
            _ => ProviderError::Api { status, message },
        }
    }
}

/// Lazy, single-pass sequence of fragments for one generation call.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// A hosted model that can stream a completion for a prompt.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Provider tag used in telemetry metadata.
    fn provider_name(&self) -> &str;

    /// Open a streaming generation call.
    ///
    /// Errors that happen before the first byte (auth, quota, connect) are
    /// returned directly; later failures arrive as `Err` items in the stream.
    async fn stream(&self, model: &str, prompt: &str) -> Result<FragmentStream, ProviderError>;
}
