//! Test doubles shared by the agent crate's unit tests.

use std::sync::Mutex;

use async_trait::async_trait;
use pulsar_providers::{LlmProvider, ProviderError};

/// A mock LLM provider that returns canned responses in order.
pub struct MockProvider {
    /// Responses to return in sequence.
    responses: Mutex<Vec<Result<String, String>>>,
    /// Every prompt received, in order.
    prompts: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new(responses: Vec<&str>) -> Self {
        Self::scripted(responses.into_iter().map(|r| Ok(r.to_string())).collect())
    }

    /// Responses where `Err` entries make `generate` fail.
    pub fn scripted(responses: Vec<Result<String, String>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Ok("(no more responses)".to_string());
        }
        responses
            .remove(0)
            .map_err(|e| ProviderError::MalformedResponse(e))
    }

    fn display_name(&self) -> &str {
        "MockProvider"
    }
}
