//! LLM access for deep analyses: provider implementations behind cargo
//! features and the insight synthesizer built on top of them.

pub mod llm_factory;
pub mod llm_provider;
pub mod synthesis;

#[cfg(any(feature = "anthropic", feature = "openai-compatible"))]
mod transport;

#[cfg(feature = "anthropic")]
pub mod anthropic_provider;
#[cfg(feature = "openai-compatible")]
pub mod openai_compatible_provider;

pub use llm_factory::LLMProviderFactory;
pub use llm_provider::*;
pub use synthesis::LlmInsightSynthesizer;

#[cfg(feature = "anthropic")]
pub use anthropic_provider::AnthropicProvider;
#[cfg(feature = "openai-compatible")]
pub use openai_compatible_provider::OpenAICompatibleProvider;
#[cfg(any(feature = "anthropic", feature = "openai-compatible"))]
pub use transport::ProviderError;
