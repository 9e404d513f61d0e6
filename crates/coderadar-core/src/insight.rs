use crate::{AnalysisId, CodeRadarError, Result, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightStatus {
    Open,
    Acknowledged,
    Applied,
    Dismissed,
}

impl InsightStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightStatus::Open => "open",
            InsightStatus::Acknowledged => "acknowledged",
            InsightStatus::Applied => "applied",
            InsightStatus::Dismissed => "dismissed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InsightStatus::Applied | InsightStatus::Dismissed)
    }

    /// Checks a requested move. `Ok(false)` means the insight is already there.
    pub fn check_transition(&self, target: InsightStatus) -> Result<bool> {
        if target == InsightStatus::Open {
            return Err(CodeRadarError::InvalidTransition(
                "insights cannot be reopened".to_string(),
            ));
        }
        if *self == target {
            return Ok(false);
        }
        match (self, target) {
            (InsightStatus::Open, _) => Ok(true),
            (InsightStatus::Acknowledged, InsightStatus::Applied)
            | (InsightStatus::Acknowledged, InsightStatus::Dismissed) => Ok(true),
            (from, to) => Err(CodeRadarError::InvalidTransition(format!(
                "cannot move insight from {} to {}",
                from, to
            ))),
        }
    }
}

impl fmt::Display for InsightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InsightStatus {
    type Err = CodeRadarError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(InsightStatus::Open),
            "acknowledged" => Ok(InsightStatus::Acknowledged),
            "applied" => Ok(InsightStatus::Applied),
            "dismissed" => Ok(InsightStatus::Dismissed),
            other => Err(CodeRadarError::Validation(format!(
                "invalid insight status '{}': must be one of acknowledged, applied, dismissed",
                other
            ))),
        }
    }
}

/// Where an insight came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightOrigin {
    Synthesis,
    Cli,
}

impl InsightOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightOrigin::Synthesis => "synthesis",
            InsightOrigin::Cli => "cli",
        }
    }
}

/// Insight content before it is bound to an analysis. Synthesizers and CLI
/// bundles both produce these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightDraft {
    #[serde(rename = "type", alias = "insight_type", default = "default_insight_type")]
    pub insight_type: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub recommendation: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_insight_type() -> String {
    "general".to_string()
}

fn default_confidence() -> f64 {
    0.7
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub insight_id: String,
    pub analysis_id: AnalysisId,
    pub origin: InsightOrigin,
    #[serde(rename = "type")]
    pub insight_type: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub recommendation: String,
    pub confidence: f64,
    pub status: InsightStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dismissed_at: Option<DateTime<Utc>>,
}

impl Insight {
    /// Binds a draft to an analysis. The id depends only on the inputs, so
    /// re-running synthesis or re-ingesting a bundle upserts the same rows.
    pub fn from_draft(
        analysis_id: &str,
        origin: InsightOrigin,
        ordinal: usize,
        draft: InsightDraft,
    ) -> Self {
        Self {
            insight_id: insight_id(analysis_id, origin, ordinal, &draft.title),
            analysis_id: analysis_id.to_string(),
            origin,
            insight_type: draft.insight_type,
            title: draft.title,
            description: draft.description,
            severity: draft.severity,
            recommendation: draft.recommendation,
            confidence: draft.confidence.clamp(0.0, 1.0),
            status: InsightStatus::Open,
            created_at: Utc::now(),
            acknowledged_at: None,
            applied_at: None,
            dismissed_at: None,
        }
    }

    /// Moves the insight forward and stamps `{status}_at`. Returns whether
    /// anything changed.
    pub fn transition(&mut self, target: InsightStatus, now: DateTime<Utc>) -> Result<bool> {
        if !self.status.check_transition(target)? {
            return Ok(false);
        }
        self.status = target;
        match target {
            InsightStatus::Acknowledged => self.acknowledged_at = Some(now),
            InsightStatus::Applied => self.applied_at = Some(now),
            InsightStatus::Dismissed => self.dismissed_at = Some(now),
            InsightStatus::Open => {}
        }
        Ok(true)
    }
}

pub fn insight_id(analysis_id: &str, origin: InsightOrigin, ordinal: usize, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(analysis_id.as_bytes());
    hasher.update(b"|");
    hasher.update(origin.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(ordinal.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(title.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest[..12].iter().map(|b| format!("{:02x}", b)).collect();
    format!("ins_{}", hex)
}

/// Query filter for an analysis' insights.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InsightFilter {
    #[serde(default)]
    pub status: Option<InsightStatus>,
    #[serde(default)]
    pub insight_type: Option<String>,
}

impl InsightFilter {
    pub fn matches(&self, insight: &Insight) -> bool {
        self.status.map_or(true, |s| insight.status == s)
            && self
                .insight_type
                .as_deref()
                .map_or(true, |t| insight.insight_type == t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(title: &str) -> InsightDraft {
        InsightDraft {
            insight_type: "security".into(),
            title: title.into(),
            description: String::new(),
            severity: Severity::High,
            recommendation: "rotate the key".into(),
            confidence: 0.9,
        }
    }

    #[test]
    fn ids_are_deterministic() {
        let a = Insight::from_draft("a1", InsightOrigin::Cli, 0, draft("leaked key"));
        let b = Insight::from_draft("a1", InsightOrigin::Cli, 0, draft("leaked key"));
        let c = Insight::from_draft("a1", InsightOrigin::Synthesis, 0, draft("leaked key"));
        assert_eq!(a.insight_id, b.insight_id);
        assert_ne!(a.insight_id, c.insight_id);
    }

    #[test]
    fn transitions_only_move_forward() {
        let mut insight = Insight::from_draft("a1", InsightOrigin::Cli, 0, draft("x"));
        let now = Utc::now();
        assert!(insight.transition(InsightStatus::Acknowledged, now).unwrap());
        assert!(!insight.transition(InsightStatus::Acknowledged, now).unwrap());
        assert!(insight.transition(InsightStatus::Open, now).is_err());
        assert!(insight.transition(InsightStatus::Dismissed, now).unwrap());
        assert!(insight.dismissed_at.is_some());
        assert!(matches!(
            insight.transition(InsightStatus::Applied, now),
            Err(CodeRadarError::InvalidTransition(_))
        ));
        assert_eq!(insight.status, InsightStatus::Dismissed);
    }

    #[test]
    fn draft_defaults_missing_fields() {
        let parsed: InsightDraft =
            serde_json::from_str(r#"{"type":"quality","title":"No docs"}"#).unwrap();
        assert_eq!(parsed.insight_type, "quality");
        assert_eq!(parsed.severity, Severity::Medium);
        assert_eq!(parsed.confidence, 0.7);
    }
}
