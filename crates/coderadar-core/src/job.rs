use crate::{AnalysisDepth, AnalysisId, AnalysisReport, CodeRadarError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type JobId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CodeRadarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(CodeRadarError::Validation(format!(
                "invalid job status: {}",
                other
            ))),
        }
    }
}

/// Per-run switches carried from the analyze request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    #[serde(default = "default_true")]
    pub include_patterns: bool,
    #[serde(default = "default_true")]
    pub include_insights: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            include_patterns: true,
            include_insights: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub analysis_id: AnalysisId,
    pub repository_id: String,
    pub analysis_depth: AnalysisDepth,
    #[serde(default)]
    pub requester: Option<String>,
    #[serde(default)]
    pub options: RunOptions,
    pub status: JobStatus,
    pub progress_percentage: u8,
    pub current_stage: String,
    pub stage_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A write against a job record. Stores apply these atomically per job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    Progress {
        percent: f64,
        stage: String,
        message: String,
    },
    Completed {
        result: Box<AnalysisReport>,
        message: String,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// Progress lower than what was already written.
    Stale,
    /// The job is terminal.
    Rejected,
}

impl Job {
    pub fn new(
        job_id: impl Into<JobId>,
        analysis_id: impl Into<AnalysisId>,
        repository_id: impl Into<String>,
        analysis_depth: AnalysisDepth,
        requester: Option<String>,
        options: RunOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            analysis_id: analysis_id.into(),
            repository_id: repository_id.into(),
            analysis_depth,
            requester,
            options,
            status: JobStatus::Pending,
            progress_percentage: 0,
            current_stage: "queued".to_string(),
            stage_message: "Analysis queued".to_string(),
            result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn apply(&mut self, update: &JobUpdate, now: DateTime<Utc>) -> UpdateOutcome {
        if self.is_terminal() {
            return UpdateOutcome::Rejected;
        }

        match update {
            JobUpdate::Progress {
                percent,
                stage,
                message,
            } => {
                let percent = clamp_percent(*percent);
                if percent < self.progress_percentage {
                    return UpdateOutcome::Stale;
                }
                self.progress_percentage = percent;
                self.current_stage = stage.clone();
                self.stage_message = message.clone();
                self.status = JobStatus::Processing;
            }
            JobUpdate::Completed { result, message } => {
                self.status = JobStatus::Completed;
                self.progress_percentage = 100;
                self.current_stage = "completed".to_string();
                self.stage_message = message.clone();
                self.result = Some(result.as_ref().clone());
                self.error_message = None;
                self.completed_at = Some(now);
            }
            JobUpdate::Failed { error } => {
                self.status = JobStatus::Failed;
                self.current_stage = "failed".to_string();
                self.stage_message = error.clone();
                self.result = None;
                self.error_message = Some(error.clone());
                self.completed_at = Some(now);
            }
        }

        self.updated_at = now;
        UpdateOutcome::Applied
    }
}

fn clamp_percent(percent: f64) -> u8 {
    if percent.is_nan() {
        return 0;
    }
    percent.clamp(0.0, 100.0).floor() as u8
}
