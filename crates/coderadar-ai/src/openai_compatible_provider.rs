use crate::llm_provider::{Completion, CompletionRequest, LLMProvider, LLMResult, ProviderSettings};
use crate::transport::{JsonTransport, ProviderError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Any `/chat/completions` endpoint: OpenAI itself, LM Studio, Ollama,
/// vLLM and similar. The API key is optional for local servers.
pub struct OpenAICompatibleProvider {
    settings: ProviderSettings,
    transport: JsonTransport,
    headers: HeaderMap,
}

impl OpenAICompatibleProvider {
    pub fn new(settings: ProviderSettings) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = settings.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", key))?);
        }
        let transport = JsonTransport::new("openai-compatible", &settings)?;
        Ok(Self {
            settings,
            transport,
            headers,
        })
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn complete(&self, request: &CompletionRequest) -> LLMResult<Completion> {
        let body = ChatBody {
            model: &self.settings.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages: [
                ChatTurn {
                    role: "system",
                    content: &request.system,
                },
                ChatTurn {
                    role: "user",
                    content: &request.prompt,
                },
            ],
        };
        let reply: ChatReply = self
            .transport
            .post(
                &self.settings.endpoint("chat/completions"),
                self.headers.clone(),
                &body,
            )
            .await?;
        Ok(reply.into_completion(&self.settings.model)?)
    }

    fn provider_name(&self) -> &str {
        self.transport.provider()
    }

    fn model_name(&self) -> &str {
        &self.settings.model
    }
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: [ChatTurn<'a>; 2],
}

#[derive(Serialize)]
struct ChatTurn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: Option<usize>,
    #[serde(default)]
    completion_tokens: Option<usize>,
}

impl ChatReply {
    fn into_completion(self, requested_model: &str) -> Result<Completion, ProviderError> {
        let empty = ProviderError::Empty {
            provider: "openai-compatible",
        };
        let choice = self.choices.into_iter().next().ok_or(empty)?;
        let text = choice
            .message
            .content
            .filter(|t| !t.trim().is_empty())
            .ok_or(ProviderError::Empty {
                provider: "openai-compatible",
            })?;
        Ok(Completion {
            text,
            model: self.model.unwrap_or_else(|| requested_model.to_string()),
            input_tokens: self.usage.as_ref().and_then(|u| u.prompt_tokens),
            output_tokens: self.usage.as_ref().and_then(|u| u.completion_tokens),
            stop_reason: choice.finish_reason,
        })
    }
}
