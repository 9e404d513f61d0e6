use crate::{AnalysisReport, Insight};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Topic a job's events are published on.
pub fn topic_for(job_id: &str) -> String {
    format!("analysis.{}", job_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventKind {
    Progress {
        percent: f64,
        stage: String,
        message: String,
    },
    Insight {
        insight: Box<Insight>,
    },
    Completed {
        result: Box<AnalysisReport>,
    },
    Failed {
        message: String,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Progress { .. } => "progress",
            EventKind::Insight { .. } => "insight",
            EventKind::Completed { .. } => "completed",
            EventKind::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisEvent {
    pub job_id: String,
    /// Assigned by the channel on publish, per topic.
    #[serde(default)]
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl AnalysisEvent {
    pub fn new(job_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            job_id: job_id.into(),
            seq: 0,
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// What a subscriber receives: an event, or notice that it fell behind.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(AnalysisEvent),
    Lagged(u64),
}
