use crate::{
    scoring, CodeRadarError, DependencyReport, FailureKind, Insight, PatternReport,
    SecurityReport, StructureReport, TaskPayload, TaskType,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

pub type AnalysisId = String;

/// Newest file-change notifications kept on a record.
pub const MAX_FILE_EVENTS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisDepth {
    Quick,
    Standard,
    Deep,
}

impl AnalysisDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisDepth::Quick => "quick",
            AnalysisDepth::Standard => "standard",
            AnalysisDepth::Deep => "deep",
        }
    }

    /// Phases executed for this depth, in order.
    pub fn phases(&self) -> &'static [Phase] {
        match self {
            AnalysisDepth::Quick => &[Phase::Quick],
            AnalysisDepth::Standard => &[Phase::Quick, Phase::Standard],
            AnalysisDepth::Deep => &[Phase::Quick, Phase::Standard, Phase::Deep],
        }
    }

    pub fn synthesizes(&self) -> bool {
        matches!(self, AnalysisDepth::Deep)
    }
}

impl Default for AnalysisDepth {
    fn default() -> Self {
        AnalysisDepth::Standard
    }
}

impl fmt::Display for AnalysisDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisDepth {
    type Err = CodeRadarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(AnalysisDepth::Quick),
            "standard" => Ok(AnalysisDepth::Standard),
            "deep" => Ok(AnalysisDepth::Deep),
            other => Err(CodeRadarError::Validation(format!(
                "invalid analysis_depth '{}': must be one of quick, standard, deep",
                other
            ))),
        }
    }
}

/// One depth tier of a run, with a fixed task set and progress window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Quick,
    Standard,
    Deep,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Quick => "quick",
            Phase::Standard => "standard",
            Phase::Deep => "deep",
        }
    }

    /// Job-level percentage range owned by this phase.
    pub fn progress_window(&self) -> (u8, u8) {
        match self {
            Phase::Quick => (0, 30),
            Phase::Standard => (30, 70),
            Phase::Deep => (70, 100),
        }
    }

    /// Job percentage after `completed` of `total` tasks in this phase finished.
    pub fn progress_at(&self, completed: usize, total: usize) -> f64 {
        let (start, end) = self.progress_window();
        if total == 0 {
            return end as f64;
        }
        let ratio = (completed.min(total) as f64) / (total as f64);
        start as f64 + (end - start) as f64 * ratio
    }

    pub fn tasks(&self) -> &'static [TaskType] {
        match self {
            Phase::Quick => &[TaskType::Structure],
            Phase::Standard => &[TaskType::Pattern, TaskType::Dependency, TaskType::Security],
            Phase::Deep => &[
                TaskType::Structure,
                TaskType::Pattern,
                TaskType::Security,
                TaskType::Dependency,
            ],
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who wrote a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Live,
    Cli,
}

impl ResultSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultSource::Live => "live",
            ResultSource::Cli => "cli",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub security: f64,
    pub performance: f64,
    pub quality: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionEntry {
    pub source: ResultSource,
    pub phase: Option<Phase>,
    pub payload: TaskPayload,
}

/// The effective result per task type. Each entry is an independent field
/// group: writers replace whole entries and never touch their neighbours.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Partitions(BTreeMap<TaskType, PartitionEntry>);

impl Partitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: PartitionEntry) {
        self.0.insert(entry.payload.task_type(), entry);
    }

    pub fn get(&self, task_type: TaskType) -> Option<&PartitionEntry> {
        self.0.get(&task_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TaskType, &PartitionEntry)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn structure(&self) -> Option<&StructureReport> {
        match self.0.get(&TaskType::Structure).map(|e| &e.payload) {
            Some(TaskPayload::Structure(r)) => Some(r),
            _ => None,
        }
    }

    pub fn patterns(&self) -> Option<&PatternReport> {
        match self.0.get(&TaskType::Pattern).map(|e| &e.payload) {
            Some(TaskPayload::Pattern(r)) => Some(r),
            _ => None,
        }
    }

    pub fn security(&self) -> Option<&SecurityReport> {
        match self.0.get(&TaskType::Security).map(|e| &e.payload) {
            Some(TaskPayload::Security(r)) => Some(r),
            _ => None,
        }
    }

    pub fn dependencies(&self) -> Option<&DependencyReport> {
        match self.0.get(&TaskType::Dependency).map(|e| &e.payload) {
            Some(TaskPayload::Dependency(r)) => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailureRecord {
    /// Phase name, or "cli" for bundle ingestion.
    pub phase_key: String,
    pub task_type: TaskType,
    pub kind: FailureKind,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeEvent {
    pub path: String,
    #[serde(default = "default_change")]
    pub change: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

fn default_change() -> String {
    "modified".to_string()
}

/// A merge step's contribution to a record. Applying the same batch twice
/// leaves the record unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeBatch {
    pub source: ResultSource,
    /// Phase name -> task -> payload, successful outcomes only.
    pub results: BTreeMap<String, BTreeMap<TaskType, TaskPayload>>,
    pub partitions: Partitions,
    pub failures: Vec<TaskFailureRecord>,
    pub file_events: Vec<FileChangeEvent>,
}

impl MergeBatch {
    pub fn empty(source: ResultSource) -> Self {
        Self {
            source,
            results: BTreeMap::new(),
            partitions: Partitions::new(),
            failures: Vec::new(),
            file_events: Vec::new(),
        }
    }

    pub fn failed_tasks(&self) -> Vec<TaskType> {
        let set: BTreeSet<TaskType> = self.failures.iter().map(|f| f.task_type).collect();
        set.into_iter().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub analysis_id: AnalysisId,
    pub repository_id: String,
    pub analysis_depth: AnalysisDepth,
    pub origin: ResultSource,
    #[serde(default)]
    pub job_id: Option<String>,
    pub results: BTreeMap<String, BTreeMap<TaskType, TaskPayload>>,
    pub partitions: Partitions,
    pub failed_tasks: Vec<TaskType>,
    /// "phase.task" -> error message for failed outcomes.
    pub task_errors: BTreeMap<String, String>,
    pub scores: Scores,
    #[serde(default)]
    pub file_events: Vec<FileChangeEvent>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisRecord {
    pub fn new(
        analysis_id: impl Into<AnalysisId>,
        repository_id: impl Into<String>,
        analysis_depth: AnalysisDepth,
        origin: ResultSource,
        job_id: Option<String>,
    ) -> Self {
        let partitions = Partitions::new();
        Self {
            analysis_id: analysis_id.into(),
            repository_id: repository_id.into(),
            analysis_depth,
            origin,
            job_id,
            results: BTreeMap::new(),
            scores: scoring::compute_scores(&partitions),
            partitions,
            failed_tasks: Vec::new(),
            task_errors: BTreeMap::new(),
            file_events: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Once finalized, only the owning source may write to the record again.
    pub fn accepts_writes_from(&self, source: ResultSource) -> bool {
        !self.is_finalized() || source == self.origin
    }

    /// Upserts a batch and rescores from the resulting partitions.
    pub fn apply(&mut self, batch: &MergeBatch) {
        for (phase_key, tasks) in &batch.results {
            let phase_results = self.results.entry(phase_key.clone()).or_default();
            for (task_type, payload) in tasks {
                phase_results.insert(*task_type, payload.clone());
                self.task_errors
                    .remove(&failure_key(phase_key, *task_type));
            }
        }

        for (_, entry) in batch.partitions.iter() {
            self.partitions.insert(entry.clone());
        }

        for failure in &batch.failures {
            self.task_errors.insert(
                failure_key(&failure.phase_key, failure.task_type),
                failure.error.clone(),
            );
        }
        self.failed_tasks = self
            .task_errors
            .keys()
            .filter_map(|key| key.rsplit('.').next())
            .filter_map(|task| task.parse::<TaskType>().ok())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        for event in &batch.file_events {
            if !self.file_events.contains(event) {
                self.file_events.push(event.clone());
            }
        }
        if self.file_events.len() > MAX_FILE_EVENTS {
            let excess = self.file_events.len() - MAX_FILE_EVENTS;
            self.file_events.drain(..excess);
        }

        self.scores = scoring::compute_scores(&self.partitions);
    }

    /// Stamps completion once; later calls keep the first timestamp.
    pub fn finalize(&mut self, at: DateTime<Utc>) {
        if self.completed_at.is_none() {
            self.completed_at = Some(at);
        }
    }
}

fn failure_key(phase_key: &str, task_type: TaskType) -> String {
    format!("{}.{}", phase_key, task_type)
}

/// A record together with its insight rows, as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(flatten)]
    pub record: AnalysisRecord,
    pub insights: Vec<Insight>,
}
