use crate::llm_provider::{Completion, CompletionRequest, LLMProvider, LLMResult, ProviderSettings};
use crate::transport::{JsonTransport, ProviderError};
use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const API_VERSION: &str = "2023-06-01";

/// Anthropic Messages API.
pub struct AnthropicProvider {
    settings: ProviderSettings,
    transport: JsonTransport,
    headers: HeaderMap,
}

impl AnthropicProvider {
    pub fn new(settings: ProviderSettings) -> anyhow::Result<Self> {
        let api_key = settings
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                anyhow!("Anthropic API key is missing; set llm.api_key or ANTHROPIC_API_KEY")
            })?;

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));

        let transport = JsonTransport::new("anthropic", &settings)?;
        Ok(Self {
            settings,
            transport,
            headers,
        })
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn complete(&self, request: &CompletionRequest) -> LLMResult<Completion> {
        let body = MessagesBody {
            model: &self.settings.model,
            system: &request.system,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: [Turn {
                role: "user",
                content: &request.prompt,
            }],
        };
        let reply: MessagesReply = self
            .transport
            .post(
                &self.settings.endpoint("messages"),
                self.headers.clone(),
                &body,
            )
            .await?;
        Ok(reply.into_completion()?)
    }

    fn provider_name(&self) -> &str {
        self.transport.provider()
    }

    fn model_name(&self) -> &str {
        &self.settings.model
    }
}

#[derive(Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    system: &'a str,
    max_tokens: usize,
    temperature: f32,
    messages: [Turn<'a>; 1],
}

#[derive(Serialize)]
struct Turn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesReply {
    model: String,
    content: Vec<Block>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Block {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: usize,
    output_tokens: usize,
}

impl MessagesReply {
    fn into_completion(self) -> Result<Completion, ProviderError> {
        let text: String = self
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect();
        if text.trim().is_empty() {
            return Err(ProviderError::Empty {
                provider: "anthropic",
            });
        }
        Ok(Completion {
            text,
            model: self.model,
            input_tokens: self.usage.as_ref().map(|u| u.input_tokens),
            output_tokens: self.usage.as_ref().map(|u| u.output_tokens),
            stop_reason: self.stop_reason,
        })
    }
}
