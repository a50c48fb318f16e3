//! HTTP language model provider.
//!
//! One client type covers every vendor in the registry; the request shape
//! and the path to the generated text are chosen by the registry entry's
//! [`ApiFlavor`].

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, error};

use pulsar_core::config::ProviderSettings;

use crate::registry::{find_by_name, supported_names, ApiFlavor, ProviderSpec};
use crate::traits::{LlmProvider, ProviderError};

/// `anthropic-version` header sent with Messages API calls.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Output budget for APIs that require one.
const DEFAULT_MAX_TOKENS: u32 = 4096;

// ─────────────────────────────────────────────
// HttpProvider
// ─────────────────────────────────────────────

/// A language model reached over HTTP.
pub struct HttpProvider {
    /// HTTP client (shared, connection-pooled).
    client: reqwest::Client,
    /// API base URL without a trailing slash.
    api_base: String,
    api_key: String,
    model: String,
    spec: &'static ProviderSpec,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("provider", &self.spec.display_name)
            .finish()
    }
}

impl HttpProvider {
    /// Create a provider from user settings and the matching registry spec.
    ///
    /// API key resolution: explicit `apiKey` > `envName` env var > the registry entry's env var.
    pub fn new(settings: &ProviderSettings, spec: &'static ProviderSpec) -> Result<Self, ProviderError> {
        let api_base = settings
            .api_base
            .clone()
            .filter(|b| !b.trim().is_empty())
            .or_else(|| spec.default_api_base.map(String::from))
            .ok_or_else(|| ProviderError::MissingApiBase(spec.name.to_string()))?
            .trim_end_matches('/')
            .to_string();

        let api_key = if !settings.api_key.trim().is_empty() {
            settings.api_key.clone()
        } else {
            settings
                .env_name
                .as_deref()
                .or(spec.env_key)
                .and_then(|var| std::env::var(var).ok())
                .unwrap_or_default()
        };

        let model = if settings.model.trim().is_empty() {
            spec.default_model.to_string()
        } else {
            settings.model.clone()
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        Ok(HttpProvider {
            client,
            api_base,
            api_key,
            model,
            spec,
        })
    }

    /// The model this provider sends requests for.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, suffix: &str) -> String {
        format!("{}/{}", self.api_base, suffix)
    }

    /// `<base>/<prompt>` with the prompt percent-encoded as one path segment.
    fn prompt_url(&self, prompt: &str) -> Result<reqwest::Url, ProviderError> {
        let mut url = reqwest::Url::parse(&self.api_base)
            .map_err(|e| ProviderError::MalformedResponse(format!("bad apiBase: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::MalformedResponse("apiBase cannot be a base".into()))?
            .pop_if_empty()
            .push(prompt);
        Ok(url)
    }

    fn request(&self, prompt: &str) -> Result<reqwest::RequestBuilder, ProviderError> {
        let message = json!([{ "role": "user", "content": prompt }]);

        let builder = match self.spec.flavor {
            ApiFlavor::Pollinations => self.client.get(self.prompt_url(prompt)?),
            ApiFlavor::Ollama => self.client.post(self.endpoint("api/generate")).json(&json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
            })),
            ApiFlavor::ChatCompletions => self
                .client
                .post(self.endpoint("chat/completions"))
                .bearer_auth(&self.api_key)
                .json(&json!({
                    "model": self.model,
                    "messages": message,
                    "stream": false,
                })),
            ApiFlavor::Responses => self
                .client
                .post(self.endpoint("responses"))
                .bearer_auth(&self.api_key)
                .json(&json!({
                    "model": self.model,
                    "input": prompt,
                    "stream": false,
                })),
            ApiFlavor::Messages => self
                .client
                .post(self.endpoint("messages"))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&json!({
                    "model": self.model,
                    "max_tokens": DEFAULT_MAX_TOKENS,
                    "messages": message,
                })),
            ApiFlavor::GenerateContent => self
                .client
                .post(self.endpoint(&format!("models/{}:generateContent", self.model)))
                .query(&[("key", self.api_key.as_str())])
                .json(&json!({
                    "contents": { "parts": [{ "text": prompt }] },
                })),
        };
        Ok(builder)
    }
}

/// Pull the generated text out of a JSON body for the given flavour.
fn extract_text(flavor: ApiFlavor, body: &Value) -> Option<String> {
    let text = match flavor {
        ApiFlavor::Pollinations => body.as_str(),
        ApiFlavor::Ollama => body.get("response").and_then(Value::as_str),
        ApiFlavor::ChatCompletions => {
            let message = body.pointer("/choices/0/message")?;
            message
                .get("content")
                .and_then(Value::as_str)
                .or_else(|| message.get("reasoning_content").and_then(Value::as_str))
        }
        ApiFlavor::Responses => body
            .get("output")?
            .as_array()?
            .iter()
            .filter_map(|item| item.get("content").and_then(Value::as_array))
            .flatten()
            .find_map(|part| part.get("text").and_then(Value::as_str)),
        ApiFlavor::Messages => body.pointer("/content/0/text").and_then(Value::as_str),
        ApiFlavor::GenerateContent => body
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str),
    };
    text.map(String::from)
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        debug!(
            provider = self.spec.display_name,
            model = %self.model,
            prompt_chars = prompt.chars().count(),
            "Calling LLM"
        );

        let response = self.request(prompt)?.send().await.map_err(|e| {
            error!(provider = self.spec.display_name, error = %e, "HTTP request failed");
            ProviderError::Http(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(
                provider = self.spec.display_name,
                status = %status,
                body = %body,
                "API error"
            );
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        if self.spec.flavor == ApiFlavor::Pollinations {
            return Ok(response.text().await?);
        }

        let body: Value = response.json().await?;
        let text = extract_text(self.spec.flavor, &body).ok_or_else(|| {
            error!(provider = self.spec.display_name, "No text in LLM response");
            ProviderError::MalformedResponse(format!("no generated text in {}", body))
        })?;

        debug!(
            provider = self.spec.display_name,
            chars = text.chars().count(),
            "LLM response received"
        );
        Ok(text)
    }

    fn display_name(&self) -> &str {
        self.spec.display_name
    }
}

// ─────────────────────────────────────────────
// Builder (convenience)
// ─────────────────────────────────────────────

/// Build an HttpProvider from typed settings.
///
/// Fails when no provider name is set or the name is not in the registry;
/// both are startup errors for the agent.
pub fn create_provider(settings: &ProviderSettings) -> Result<HttpProvider, ProviderError> {
    if !settings.is_configured() {
        return Err(ProviderError::NotConfigured);
    }

    let spec = find_by_name(&settings.name).ok_or_else(|| {
        error!(
            name = %settings.name,
            supported = ?supported_names(),
            "Unknown provider"
        );
        ProviderError::Unknown(settings.name.clone())
    })?;

    debug!(
        provider = spec.display_name,
        model = %settings.model,
        api_base = settings.api_base.as_deref().unwrap_or("default"),
        "Creating LLM provider"
    );

    HttpProvider::new(settings, spec)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
