use crate::{Phase, RepositoryDescriptor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The fixed set of analyzers a phase can fan out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Structure,
    Pattern,
    Security,
    Dependency,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Structure => "structure",
            TaskType::Pattern => "pattern",
            TaskType::Security => "security",
            TaskType::Dependency => "dependency",
        }
    }

    /// Stage tag reported while this task is the most recent to finish.
    pub fn stage(&self) -> &'static str {
        match self {
            TaskType::Structure => "structure_analysis",
            TaskType::Pattern => "pattern_detection",
            TaskType::Security => "security_scan",
            TaskType::Dependency => "package_intelligence",
        }
    }

    pub fn all() -> [TaskType; 4] {
        [
            TaskType::Structure,
            TaskType::Pattern,
            TaskType::Security,
            TaskType::Dependency,
        ]
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = crate::CodeRadarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "structure" => Ok(TaskType::Structure),
            "pattern" | "patterns" | "pattern_detection" => Ok(TaskType::Pattern),
            "security" => Ok(TaskType::Security),
            "dependency" | "dependencies" | "package_intelligence" => Ok(TaskType::Dependency),
            other => Err(crate::CodeRadarError::Validation(format!(
                "unknown task type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Lenient parse used for model output; anything unrecognised is medium.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "info" | "minor" => Severity::Low,
            "high" | "major" => Severity::High,
            "critical" | "blocker" => Severity::Critical,
            _ => Severity::Medium,
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureReport {
    #[serde(default)]
    pub total_files: u64,
    #[serde(default)]
    pub total_lines: u64,
    #[serde(default)]
    pub directories: u64,
    #[serde(default)]
    pub max_depth: u32,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub frameworks: Vec<String>,
    #[serde(default)]
    pub has_tests: bool,
    #[serde(default)]
    pub has_docs: bool,
    #[serde(default)]
    pub has_ci: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPattern {
    pub pattern_type: String,
    pub name: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternReport {
    #[serde(default)]
    pub patterns: Vec<DetectedPattern>,
}

impl PatternReport {
    pub fn has_pattern_type(&self, pattern_type: &str) -> bool {
        self.patterns.iter().any(|p| p.pattern_type == pattern_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityFinding {
    pub rule: String,
    pub severity: Severity,
    pub title: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityReport {
    #[serde(default)]
    pub findings: Vec<SecurityFinding>,
    #[serde(default)]
    pub files_scanned: u64,
}

impl SecurityReport {
    pub fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl Dependency {
    /// A dependency without an exact or bounded version requirement.
    pub fn is_unpinned(&self) -> bool {
        match self.version.as_deref().map(str::trim) {
            None | Some("") | Some("*") | Some("latest") => true,
            Some(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageEcosystem {
    pub ecosystem: String,
    pub manifest: String,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyReport {
    #[serde(default)]
    pub ecosystems: Vec<PackageEcosystem>,
}

impl DependencyReport {
    pub fn total_dependencies(&self) -> usize {
        self.ecosystems.iter().map(|e| e.dependencies.len()).sum()
    }

    pub fn unpinned_dependencies(&self) -> usize {
        self.ecosystems
            .iter()
            .flat_map(|e| e.dependencies.iter())
            .filter(|d| d.is_unpinned())
            .count()
    }
}

/// Strongly-typed analyzer output, tagged by the analyzer that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task_type", content = "payload", rename_all = "snake_case")]
pub enum TaskPayload {
    Structure(StructureReport),
    Pattern(PatternReport),
    Security(SecurityReport),
    Dependency(DependencyReport),
}

impl TaskPayload {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskPayload::Structure(_) => TaskType::Structure,
            TaskPayload::Pattern(_) => TaskType::Pattern,
            TaskPayload::Security(_) => TaskType::Security,
            TaskPayload::Dependency(_) => TaskType::Dependency,
        }
    }
}

/// One unit of work handed to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisTask {
    pub task_type: TaskType,
    pub phase: Phase,
    /// Deep-phase tasks run without sampling limits.
    pub thorough: bool,
}

impl AnalysisTask {
    pub fn new(task_type: TaskType, phase: Phase) -> Self {
        Self {
            task_type,
            phase,
            thorough: phase == Phase::Deep,
        }
    }
}

/// Everything an executor receives for one invocation.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub repository: RepositoryDescriptor,
    pub task: AnalysisTask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
}

/// Why a task ended without a payload. Timeouts and cancellations are
/// ordinary failures for the barrier and the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Error,
    Timeout,
    Cancelled,
    Panicked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OutcomeResult {
    Completed { payload: TaskPayload },
    Failed { kind: FailureKind, error: String },
}

/// Terminal result of one analyzer invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_type: TaskType,
    pub phase: Phase,
    #[serde(flatten)]
    pub result: OutcomeResult,
    #[serde(default)]
    pub duration_ms: u64,
}

impl TaskOutcome {
    pub fn completed(phase: Phase, payload: TaskPayload, duration_ms: u64) -> Self {
        Self {
            task_type: payload.task_type(),
            phase,
            result: OutcomeResult::Completed { payload },
            duration_ms,
        }
    }

    pub fn failed(
        task_type: TaskType,
        phase: Phase,
        kind: FailureKind,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            task_type,
            phase,
            result: OutcomeResult::Failed {
                kind,
                error: error.into(),
            },
            duration_ms,
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self.result {
            OutcomeResult::Completed { .. } => TaskStatus::Completed,
            OutcomeResult::Failed { .. } => TaskStatus::Failed,
        }
    }

    pub fn payload(&self) -> Option<&TaskPayload> {
        match &self.result {
            OutcomeResult::Completed { payload } => Some(payload),
            OutcomeResult::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.result {
            OutcomeResult::Completed { .. } => None,
            OutcomeResult::Failed { error, .. } => Some(error),
        }
    }
}

fn default_confidence() -> f64 {
    0.7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serializes_with_task_tag() {
        let payload = TaskPayload::Security(SecurityReport::default());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["task_type"], "security");
        assert!(json["payload"]["findings"].is_array());
    }

    #[test]
    fn outcome_flattens_status() {
        let outcome = TaskOutcome::failed(
            TaskType::Security,
            Phase::Standard,
            FailureKind::Timeout,
            "deadline exceeded",
            120_000,
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "timeout");
        assert_eq!(outcome.status(), TaskStatus::Failed);
        assert!(outcome.payload().is_none());
    }

    #[test]
    fn unpinned_dependencies_are_counted() {
        let report = DependencyReport {
            ecosystems: vec![PackageEcosystem {
                ecosystem: "npm".into(),
                manifest: "package.json".into(),
                dependencies: vec![
                    Dependency {
                        name: "react".into(),
                        version: Some("^18.2.0".into()),
                    },
                    Dependency {
                        name: "lodash".into(),
                        version: Some("*".into()),
                    },
                    Dependency {
                        name: "left-pad".into(),
                        version: None,
                    },
                ],
            }],
        };
        assert_eq!(report.total_dependencies(), 3);
        assert_eq!(report.unpinned_dependencies(), 2);
    }

    #[test]
    fn lenient_severity_defaults_to_medium() {
        assert_eq!(Severity::parse_lenient("HIGH"), Severity::High);
        assert_eq!(Severity::parse_lenient("whatever"), Severity::Medium);
    }
}
