use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub type LLMResult<T> = anyhow::Result<T>;

/// One single-turn completion: a system instruction plus the user prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub model: String,
    #[serde(default)]
    pub input_tokens: Option<usize>,
    #[serde(default)]
    pub output_tokens: Option<usize>,
    /// Provider-specific, e.g. "end_turn", "stop", "length"
    #[serde(default)]
    pub stop_reason: Option<String>,
}

impl Completion {
    /// True when the provider cut the answer short at the token limit.
    pub fn truncated(&self) -> bool {
        matches!(
            self.stop_reason.as_deref(),
            Some("max_tokens") | Some("length")
        )
    }
}

/// Where and how to reach a provider's HTTP endpoint.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    /// Extra attempts after the first, for rate limits and 5xx only.
    pub max_retries: u32,
}

impl ProviderSettings {
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> LLMResult<Completion>;

    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;
}
