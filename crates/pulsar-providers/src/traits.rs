//! The language model capability.
//!
//! Every vendor backend implements [`LlmProvider`]. Callers only ever see
//! `generate(prompt) -> text`; the output is opaque and may be empty,
//! non-JSON, or malformed.

use async_trait::async_trait;
use thiserror::Error;

/// Failures talking to a language model.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider '{0}'")]
    Unknown(String),

    #[error("no provider configured")]
    NotConfigured,

    #[error("provider '{0}' needs an apiBase")]
    MissingApiBase(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Trait that all language model providers implement.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send one prompt and return the model's raw text.
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;

    /// Display name for logging.
    fn display_name(&self) -> &str;
}
