//! Ingestion of offline analysis bundles produced by the CLI.
//!
//! A bundle goes through the same merge-and-score path as a live run, but as
//! a single outcome set with no scheduling. Re-submitting a bundle with the
//! same `cli_analysis_id` returns the original sync record.

use crate::aggregator::{merge_bundle, Aggregator};
use crate::retry::RetryPolicy;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use coderadar_core::{
    AnalysisRecord, AnalysisStore, CliSyncRequest, CliSyncResponse, CodeRadarError, Insight,
    InsightOrigin, InsightStore, RepositoryDescriptor, RepositoryStore, Result, ResultSource,
    SyncRecord, SyncReservation, SyncStatus, SyncStore, TaskPayload,
};
use rand::Rng;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const TOKEN_BYTES: usize = 24;

/// Opaque, unguessable sync token.
pub fn generate_sync_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes[..]);
    format!("sync_{}", URL_SAFE_NO_PAD.encode(bytes))
}

#[derive(Clone)]
pub struct CliSyncIngestor {
    repositories: Arc<dyn RepositoryStore>,
    analyses: Arc<dyn AnalysisStore>,
    insights: Arc<dyn InsightStore>,
    syncs: Arc<dyn SyncStore>,
    aggregator: Aggregator,
    retry: RetryPolicy,
}

impl CliSyncIngestor {
    pub fn new(
        repositories: Arc<dyn RepositoryStore>,
        analyses: Arc<dyn AnalysisStore>,
        insights: Arc<dyn InsightStore>,
        syncs: Arc<dyn SyncStore>,
        aggregator: Aggregator,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            repositories,
            analyses,
            insights,
            syncs,
            aggregator,
            retry,
        }
    }

    pub async fn ingest(&self, request: CliSyncRequest) -> Result<CliSyncResponse> {
        validate(&request)?;

        if let Some(existing) = self
            .syncs
            .get_by_cli_analysis_id(&request.cli_analysis_id)
            .await?
            .filter(|r| r.status == SyncStatus::Synced)
        {
            debug!(cli_analysis_id = %existing.cli_analysis_id, "bundle already synced");
            return Ok(CliSyncResponse::from(&existing));
        }

        let name = request
            .repo_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| repo_name_from_path(&request.local_path));
        let repository = self
            .repositories
            .get_or_register_path(RepositoryDescriptor::generated(
                name,
                request.local_path.clone(),
            ))
            .await?;

        let analysis_id = match &request.analysis_id {
            Some(id) => {
                let record = self
                    .analyses
                    .get(id)
                    .await?
                    .ok_or_else(|| CodeRadarError::NotFound(format!("analysis {}", id)))?;
                if !record.accepts_writes_from(ResultSource::Cli) {
                    return Err(CodeRadarError::Conflict(format!(
                        "analysis {} was finalized by its {} owner",
                        id,
                        record.origin.as_str()
                    )));
                }
                id.clone()
            }
            None => Uuid::new_v4().to_string(),
        };

        let reservation = self
            .syncs
            .reserve(SyncRecord {
                sync_token: generate_sync_token(),
                cli_analysis_id: request.cli_analysis_id.clone(),
                analysis_id,
                repository_id: repository.id.clone(),
                cli_version: request.cli_version.clone(),
                machine_id: request.machine_id.clone(),
                status: SyncStatus::Pending,
                created_at: Utc::now(),
                synced_at: None,
            })
            .await?;

        let sync = match reservation {
            SyncReservation::Existing(existing) if existing.status == SyncStatus::Synced => {
                debug!(
                    cli_analysis_id = %existing.cli_analysis_id,
                    "bundle already synced"
                );
                return Ok(CliSyncResponse::from(&existing));
            }
            // A pending reservation left by an interrupted ingest is resumed.
            other => other.into_record(),
        };

        let results = request.analysis_results;
        let created = self
            .analyses
            .create_if_absent(AnalysisRecord::new(
                sync.analysis_id.clone(),
                sync.repository_id.clone(),
                results.depth.unwrap_or_default(),
                ResultSource::Cli,
                None,
            ))
            .await?;
        let finalize = created
            || self
                .analyses
                .get(&sync.analysis_id)
                .await?
                .is_some_and(|r| r.origin == ResultSource::Cli);

        let payloads: Vec<TaskPayload> = [
            results.structure.map(TaskPayload::Structure),
            results.patterns.map(TaskPayload::Pattern),
            results.security.map(TaskPayload::Security),
            results.dependencies.map(TaskPayload::Dependency),
        ]
        .into_iter()
        .flatten()
        .collect();
        let partitions = payloads.len();
        let batch = merge_bundle(payloads, results.events);
        self.aggregator
            .merge(&sync.analysis_id, &batch, finalize)
            .await?;

        let insights: Vec<Insight> = results
            .findings
            .into_iter()
            .enumerate()
            .map(|(i, draft)| Insight::from_draft(&sync.analysis_id, InsightOrigin::Cli, i, draft))
            .collect();
        let findings = insights.len();
        if !insights.is_empty() {
            self.retry
                .run("insight upsert", || self.insights.upsert(insights.clone()))
                .await?;
        }

        let synced = self
            .retry
            .run("sync status", || self.syncs.mark_synced(&sync.sync_token))
            .await?;
        info!(
            cli_analysis_id = %synced.cli_analysis_id,
            analysis_id = %synced.analysis_id,
            repository_id = %synced.repository_id,
            partitions,
            findings,
            "cli bundle synced"
        );
        Ok(CliSyncResponse::from(&synced))
    }

    pub async fn sync_status(&self, sync_token: &str) -> Result<SyncRecord> {
        self.syncs
            .get_by_token(sync_token)
            .await?
            .ok_or_else(|| CodeRadarError::NotFound(format!("sync token {}", sync_token)))
    }
}

fn validate(request: &CliSyncRequest) -> Result<()> {
    if request.cli_analysis_id.trim().is_empty() {
        return Err(CodeRadarError::Validation(
            "cli_analysis_id must not be empty".to_string(),
        ));
    }
    if request.local_path.trim().is_empty() {
        return Err(CodeRadarError::Validation(
            "local_path must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn repo_name_from_path(local_path: &str) -> String {
    Path::new(local_path.trim_end_matches(['/', '\\']))
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| local_path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let a = generate_sync_token();
        let b = generate_sync_token();
        assert_ne!(a, b);
        assert!(a.starts_with("sync_"));
        assert!(a[5..]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(a.len(), 5 + 32);
    }

    #[test]
    fn repo_name_defaults_to_last_path_component() {
        assert_eq!(repo_name_from_path("/home/dev/projects/radar/"), "radar");
        assert_eq!(repo_name_from_path("service"), "service");
    }
}
