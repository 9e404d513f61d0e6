use crate::{
    AnalysisDepth, AnalysisId, DependencyReport, FileChangeEvent, InsightDraft, PatternReport,
    SecurityReport, StructureReport,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
}

/// Bookkeeping for one offline bundle, keyed by the client's analysis id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub sync_token: String,
    pub cli_analysis_id: String,
    pub analysis_id: AnalysisId,
    pub repository_id: String,
    pub cli_version: String,
    pub machine_id: String,
    pub status: SyncStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
}

impl SyncRecord {
    /// Never moves back to pending.
    pub fn mark_synced(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == SyncStatus::Synced {
            return false;
        }
        self.status = SyncStatus::Synced;
        self.synced_at = Some(now);
        true
    }
}

/// Result of reserving a sync slot for a `cli_analysis_id`.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncReservation {
    Created(SyncRecord),
    Existing(SyncRecord),
}

impl SyncReservation {
    pub fn into_record(self) -> SyncRecord {
        match self {
            SyncReservation::Created(r) | SyncReservation::Existing(r) => r,
        }
    }
}

/// The sub-results an offline client may send. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliAnalysisResults {
    #[serde(default)]
    pub depth: Option<AnalysisDepth>,
    #[serde(default)]
    pub structure: Option<StructureReport>,
    #[serde(default)]
    pub patterns: Option<PatternReport>,
    #[serde(default)]
    pub security: Option<SecurityReport>,
    #[serde(default)]
    pub dependencies: Option<DependencyReport>,
    #[serde(default)]
    pub findings: Vec<InsightDraft>,
    #[serde(default)]
    pub events: Vec<FileChangeEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliSyncRequest {
    pub cli_analysis_id: String,
    #[serde(default)]
    pub cli_version: String,
    #[serde(default)]
    pub machine_id: String,
    #[serde(default)]
    pub analysis_results: CliAnalysisResults,
    pub local_path: String,
    #[serde(default)]
    pub repo_name: Option<String>,
    /// Folds the bundle into an existing record instead of creating one.
    #[serde(default)]
    pub analysis_id: Option<AnalysisId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliSyncResponse {
    pub sync_token: String,
    pub analysis_id: AnalysisId,
    pub status: SyncStatus,
}

impl From<&SyncRecord> for CliSyncResponse {
    fn from(record: &SyncRecord) -> Self {
        Self {
            sync_token: record.sync_token.clone(),
            analysis_id: record.analysis_id.clone(),
            status: record.status,
        }
    }
}
