//! LLM-backed insight synthesis for deep analyses.
//!
//! The model receives a compact JSON digest of the effective partitions and
//! must answer with a JSON array of insights. Anything that does not parse is
//! reported as an error; the caller decides whether that is fatal.

use crate::llm_factory::LLMProviderFactory;
use crate::llm_provider::{CompletionRequest, LLMProvider};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use coderadar_core::config_manager::LLMConfig;
use coderadar_core::{InsightDraft, InsightSynthesizer, Severity, SynthesisRequest};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_INSIGHTS: usize = 12;
const MAX_FINDINGS_IN_PROMPT: usize = 40;

const SYSTEM_PROMPT: &str = "You are a senior software architect reviewing automated analysis \
results for a code repository. Respond ONLY with a JSON array. Each element must be an object \
with the keys: type (one of architecture, security, performance, quality, dependency), title, \
description, severity (low, medium, high, critical), recommendation, confidence (0.0-1.0).";

pub struct LlmInsightSynthesizer {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    timeout: Duration,
}

impl LlmInsightSynthesizer {
    pub fn new(provider: Arc<dyn LLMProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            temperature: 0.3,
            max_tokens: 2048,
            timeout,
        }
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: usize) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn from_config(config: &LLMConfig) -> Result<Self> {
        let provider = LLMProviderFactory::create_from_config(config)?;
        Ok(Self::new(provider, Duration::from_secs(config.timeout_secs))
            .with_sampling(config.temperature, config.max_tokens))
    }
}

#[async_trait]
impl InsightSynthesizer for LlmInsightSynthesizer {
    fn name(&self) -> &str {
        self.provider.provider_name()
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<InsightDraft>> {
        let completion_request = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: build_prompt(request),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let completion = tokio::time::timeout(
            self.timeout,
            self.provider.complete(&completion_request),
        )
        .await
        .map_err(|_| anyhow!("insight synthesis timed out after {:?}", self.timeout))?
        .context("insight synthesis request failed")?;

        debug!(
            model = %completion.model,
            input_tokens = ?completion.input_tokens,
            output_tokens = ?completion.output_tokens,
            "received synthesis response"
        );
        if completion.truncated() {
            warn!(model = %completion.model, "synthesis response hit the token limit");
        }
        parse_insights(&completion.text)
    }
}

pub fn build_prompt(request: &SynthesisRequest) -> String {
    let partitions = &request.partitions;
    let structure = partitions.structure().map(|s| {
        json!({
            "total_files": s.total_files,
            "total_lines": s.total_lines,
            "languages": s.languages,
            "frameworks": s.frameworks,
            "has_tests": s.has_tests,
            "has_docs": s.has_docs,
            "has_ci": s.has_ci,
        })
    });
    let patterns = partitions.patterns().map(|p| {
        p.patterns
            .iter()
            .map(|d| json!({"type": d.pattern_type, "name": d.name, "confidence": d.confidence}))
            .collect::<Vec<_>>()
    });
    let security = partitions.security().map(|s| {
        json!({
            "files_scanned": s.files_scanned,
            "findings": s.findings.iter().take(MAX_FINDINGS_IN_PROMPT).map(|f| json!({
                "rule": f.rule,
                "severity": f.severity,
                "title": f.title,
                "file": f.file,
            })).collect::<Vec<_>>(),
        })
    });
    let dependencies = partitions.dependencies().map(|d| {
        json!({
            "ecosystems": d.ecosystems.iter().map(|e| e.ecosystem.as_str()).collect::<Vec<_>>(),
            "total": d.total_dependencies(),
            "unpinned": d.unpinned_dependencies(),
        })
    });

    let digest = json!({
        "repository": request.repository.name,
        "depth": request.analysis_depth,
        "scores": request.scores,
        "failed_tasks": request.failed_tasks,
        "structure": structure,
        "patterns": patterns,
        "security": security,
        "dependencies": dependencies,
    });

    format!(
        "Analysis results:\n{}\n\nProduce at most {} prioritized insights with concrete recommendations.",
        digest, MAX_INSIGHTS
    )
}

#[derive(Debug, Deserialize)]
struct RawInsight {
    #[serde(rename = "type", alias = "insight_type", default)]
    insight_type: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    recommendation: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Extracts insight drafts from model output, tolerating code fences, prose
/// around the array, or an `{"insights": [...]}` wrapper.
pub fn parse_insights(text: &str) -> Result<Vec<InsightDraft>> {
    let value = extract_json(text)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("insights") {
            Some(Value::Array(items)) => items,
            _ => return Err(anyhow!("synthesis response has no insights array")),
        },
        _ => return Err(anyhow!("synthesis response is not a JSON array")),
    };

    let drafts = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RawInsight>(item).ok())
        .filter_map(|raw| {
            let title = raw.title.filter(|t| !t.trim().is_empty())?;
            Some(InsightDraft {
                insight_type: raw.insight_type.unwrap_or_else(|| "general".to_string()),
                title,
                description: raw.description.unwrap_or_default(),
                severity: raw
                    .severity
                    .as_deref()
                    .map(Severity::parse_lenient)
                    .unwrap_or_default(),
                recommendation: raw.recommendation.unwrap_or_default(),
                confidence: raw.confidence.unwrap_or(0.7).clamp(0.0, 1.0),
            })
        })
        .take(MAX_INSIGHTS)
        .collect();
    Ok(drafts)
}

fn extract_json(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }
    let start = trimmed
        .find(['[', '{'])
        .ok_or_else(|| anyhow!("no JSON found in synthesis response"))?;
    let end = trimmed
        .rfind([']', '}'])
        .filter(|end| *end > start)
        .ok_or_else(|| anyhow!("unterminated JSON in synthesis response"))?;
    serde_json::from_str(&trimmed[start..=end]).context("malformed JSON in synthesis response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_provider::{Completion, LLMResult};
    use coderadar_core::{AnalysisDepth, Partitions, RepositoryDescriptor, Scores};

    struct CannedProvider {
        reply: String,
        delay: Duration,
    }

    #[async_trait]
    impl LLMProvider for CannedProvider {
        async fn complete(&self, _request: &CompletionRequest) -> LLMResult<Completion> {
            tokio::time::sleep(self.delay).await;
            Ok(Completion {
                text: self.reply.clone(),
                model: "canned".into(),
                input_tokens: None,
                output_tokens: None,
                stop_reason: Some("stop".into()),
            })
        }

        fn provider_name(&self) -> &str {
            "canned"
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    fn request() -> SynthesisRequest {
        SynthesisRequest {
            repository: RepositoryDescriptor::new("r1", "demo", "/tmp/demo"),
            analysis_depth: AnalysisDepth::Deep,
            partitions: Partitions::new(),
            failed_tasks: vec![],
            scores: Scores {
                security: 70.0,
                performance: 80.0,
                quality: 70.0,
            },
        }
    }

    #[test]
    fn parses_fenced_array_with_lenient_fields() {
        let text = "Here you go:\n```json\n[{\"type\":\"security\",\"title\":\"Rotate keys\",\"severity\":\"blocker\",\"confidence\":1.7},{\"description\":\"no title\"}]\n```";
        let drafts = parse_insights(text).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].severity, Severity::Critical);
        assert_eq!(drafts[0].confidence, 1.0);
    }

    #[test]
    fn parses_wrapped_object() {
        let drafts = parse_insights(r#"{"insights":[{"title":"Add CI"}]}"#).unwrap();
        assert_eq!(drafts[0].insight_type, "general");
    }

    #[test]
    fn rejects_prose() {
        assert!(parse_insights("I could not analyze this repository.").is_err());
    }

    #[tokio::test]
    async fn synthesizer_returns_drafts() {
        let synth = LlmInsightSynthesizer::new(
            Arc::new(CannedProvider {
                reply: r#"[{"type":"quality","title":"Add docs","severity":"low"}]"#.into(),
                delay: Duration::ZERO,
            }),
            Duration::from_secs(5),
        );
        let drafts = synth.synthesize(&request()).await.unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(synth.name(), "canned");
    }

    #[tokio::test(start_paused = true)]
    async fn synthesizer_times_out() {
        let synth = LlmInsightSynthesizer::new(
            Arc::new(CannedProvider {
                reply: "[]".into(),
                delay: Duration::from_secs(120),
            }),
            Duration::from_secs(1),
        );
        let err = synth.synthesize(&request()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn prompt_mentions_failed_tasks() {
        let mut req = request();
        req.failed_tasks = vec![coderadar_core::TaskType::Security];
        assert!(build_prompt(&req).contains(r#""failed_tasks":["security"]"#));
    }
}
