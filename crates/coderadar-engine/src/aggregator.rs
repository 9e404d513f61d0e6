//! Merges task outcomes into analysis records and closes out jobs.

use crate::progress::ProgressReporter;
use crate::retry::RetryPolicy;
use coderadar_core::{
    AnalysisRecord, AnalysisReport, AnalysisStore, CodeRadarError, FileChangeEvent, Insight,
    InsightFilter, InsightOrigin, InsightStore, InsightSynthesizer, Job, MergeBatch, OutcomeResult,
    PartitionEntry, RepositoryDescriptor, Result, ResultSource, SynthesisRequest,
    TaskFailureRecord, TaskOutcome, TaskPayload, Phase,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds the live-run contribution of a set of outcomes. When several
/// phases report the same task type, the latest phase wins the partition
/// regardless of the order the outcomes arrived in.
pub fn merge_outcomes(outcomes: &[TaskOutcome]) -> MergeBatch {
    let mut batch = MergeBatch::empty(ResultSource::Live);
    let mut ordered: Vec<&TaskOutcome> = outcomes.iter().collect();
    ordered.sort_by_key(|o| (o.phase, o.task_type));

    for outcome in ordered {
        match &outcome.result {
            OutcomeResult::Completed { payload } => {
                add_success(
                    &mut batch,
                    outcome.phase.as_str(),
                    Some(outcome.phase),
                    payload.clone(),
                );
            }
            OutcomeResult::Failed { kind, error } => batch.failures.push(TaskFailureRecord {
                phase_key: outcome.phase.as_str().to_string(),
                task_type: outcome.task_type,
                kind: *kind,
                error: error.clone(),
            }),
        }
    }
    batch
}

/// Builds the contribution of an offline CLI bundle.
pub fn merge_bundle(payloads: Vec<TaskPayload>, events: Vec<FileChangeEvent>) -> MergeBatch {
    let mut batch = MergeBatch::empty(ResultSource::Cli);
    for payload in payloads {
        add_success(&mut batch, "cli", None, payload);
    }
    batch.file_events = events;
    batch
}

fn add_success(batch: &mut MergeBatch, phase_key: &str, phase: Option<Phase>, payload: TaskPayload) {
    batch
        .results
        .entry(phase_key.to_string())
        .or_default()
        .insert(payload.task_type(), payload.clone());
    batch.partitions.insert(PartitionEntry {
        source: batch.source,
        phase,
        payload,
    });
}

/// How a run ends once its outcomes are merged.
#[derive(Debug, Clone, Default)]
pub struct AggregateOptions {
    /// Run AI synthesis before completing.
    pub synthesize: bool,
    /// Fail the job with this message instead of completing it. Partial
    /// results are still merged.
    pub fail_with: Option<String>,
}

#[derive(Clone)]
pub struct Aggregator {
    analyses: Arc<dyn AnalysisStore>,
    insights: Arc<dyn InsightStore>,
    progress: ProgressReporter,
    synthesizer: Option<Arc<dyn InsightSynthesizer>>,
    retry: RetryPolicy,
}

impl Aggregator {
    pub fn new(
        analyses: Arc<dyn AnalysisStore>,
        insights: Arc<dyn InsightStore>,
        progress: ProgressReporter,
        synthesizer: Option<Arc<dyn InsightSynthesizer>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            analyses,
            insights,
            progress,
            synthesizer,
            retry,
        }
    }

    /// Merges one phase's outcomes without finalizing the record.
    pub async fn merge_phase(
        &self,
        analysis_id: &str,
        outcomes: &[TaskOutcome],
    ) -> Result<AnalysisRecord> {
        let batch = merge_outcomes(outcomes);
        self.merge(analysis_id, &batch, false).await
    }

    pub async fn merge(
        &self,
        analysis_id: &str,
        batch: &MergeBatch,
        finalize: bool,
    ) -> Result<AnalysisRecord> {
        self.retry
            .run("analysis merge", || {
                self.analyses.merge(analysis_id, batch, finalize)
            })
            .await
    }

    /// Final merge, optional synthesis, insight persistence and the job's
    /// terminal write. Re-running it with the same outcomes converges on the
    /// same record and insight rows.
    pub async fn aggregate(
        &self,
        job: &Job,
        repository: &RepositoryDescriptor,
        outcomes: &[TaskOutcome],
        options: AggregateOptions,
    ) -> Result<AnalysisReport> {
        let batch = merge_outcomes(outcomes);
        let record = self.merge(&job.analysis_id, &batch, true).await?;

        let new_insights = if options.synthesize && options.fail_with.is_none() {
            let earlier: Vec<Insight> = self
                .insights
                .list_for_analysis(&record.analysis_id, &InsightFilter::default())
                .await?
                .into_iter()
                .filter(|i| i.origin == InsightOrigin::Synthesis)
                .collect();
            if !earlier.is_empty() {
                debug!(
                    analysis_id = %record.analysis_id,
                    insights = earlier.len(),
                    "reusing insights from an earlier synthesis"
                );
                earlier
            } else {
                self.synthesize_and_store(repository, &record).await?
            }
        } else {
            Vec::new()
        };

        let insights = self
            .insights
            .list_for_analysis(&record.analysis_id, &InsightFilter::default())
            .await?;
        let report = AnalysisReport { record, insights };

        match options.fail_with {
            Some(message) => {
                warn!(job_id = %job.job_id, "analysis failed: {}", message);
                self.progress.fail(&job.job_id, &message).await?;
            }
            None => {
                for insight in report
                    .insights
                    .iter()
                    .filter(|i| new_insights.iter().any(|n| n.insight_id == i.insight_id))
                {
                    self.progress.publish_insight(&job.job_id, insight).await;
                }
                let message = if report.record.failed_tasks.is_empty() {
                    "Analysis complete".to_string()
                } else {
                    format!(
                        "Analysis complete with {} failed task(s)",
                        report.record.failed_tasks.len()
                    )
                };
                self.progress.complete(&job.job_id, &report, &message).await?;
                info!(
                    job_id = %job.job_id,
                    analysis_id = %report.record.analysis_id,
                    insights = report.insights.len(),
                    failed_tasks = report.record.failed_tasks.len(),
                    "analysis completed"
                );
            }
        }
        Ok(report)
    }

    async fn synthesize_and_store(
        &self,
        repository: &RepositoryDescriptor,
        record: &AnalysisRecord,
    ) -> Result<Vec<Insight>> {
        let drafts = self.synthesize(repository, record).await;
        let insights: Vec<Insight> = drafts
            .into_iter()
            .enumerate()
            .map(|(i, draft)| {
                Insight::from_draft(&record.analysis_id, InsightOrigin::Synthesis, i, draft)
            })
            .collect();
        if !insights.is_empty() {
            self.retry
                .run("insight upsert", || self.insights.upsert(insights.clone()))
                .await?;
        }
        Ok(insights)
    }

    /// Synthesis is best-effort: any error yields no insights.
    async fn synthesize(
        &self,
        repository: &RepositoryDescriptor,
        record: &AnalysisRecord,
    ) -> Vec<coderadar_core::InsightDraft> {
        let Some(synthesizer) = &self.synthesizer else {
            return Vec::new();
        };
        let request = SynthesisRequest {
            repository: repository.clone(),
            analysis_depth: record.analysis_depth,
            partitions: record.partitions.clone(),
            failed_tasks: record.failed_tasks.clone(),
            scores: record.scores,
        };
        match synthesizer.synthesize(&request).await {
            Ok(drafts) => drafts,
            Err(e) => {
                let err = CodeRadarError::Synthesis(format!("{:#}", e));
                warn!(
                    analysis_id = %record.analysis_id,
                    synthesizer = synthesizer.name(),
                    "{}; continuing without insights",
                    err
                );
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coderadar_core::{
        FailureKind, SecurityReport, StructureReport, TaskType,
    };

    fn structure(files: u64) -> TaskPayload {
        TaskPayload::Structure(StructureReport {
            total_files: files,
            ..Default::default()
        })
    }

    #[test]
    fn latest_phase_wins_regardless_of_arrival_order() {
        let outcomes = vec![
            TaskOutcome::completed(Phase::Deep, structure(20), 5),
            TaskOutcome::completed(Phase::Quick, structure(10), 5),
        ];
        let batch = merge_outcomes(&outcomes);
        assert_eq!(batch.partitions.structure().unwrap().total_files, 20);
        assert_eq!(
            batch.partitions.get(TaskType::Structure).unwrap().phase,
            Some(Phase::Deep)
        );
        assert_eq!(batch.results.len(), 2);
    }

    #[test]
    fn failures_are_recorded_per_phase() {
        let outcomes = vec![
            TaskOutcome::completed(Phase::Standard, TaskPayload::Security(SecurityReport::default()), 1),
            TaskOutcome::failed(TaskType::Dependency, Phase::Standard, FailureKind::Timeout, "timed out", 9),
        ];
        let batch = merge_outcomes(&outcomes);
        assert_eq!(batch.failed_tasks(), vec![TaskType::Dependency]);
        assert_eq!(batch.failures[0].phase_key, "standard");
        assert_eq!(batch.partitions.len(), 1);
    }

    #[test]
    fn bundles_are_tagged_cli() {
        let batch = merge_bundle(vec![structure(3)], vec![]);
        let entry = batch.partitions.get(TaskType::Structure).unwrap();
        assert_eq!(entry.source, ResultSource::Cli);
        assert_eq!(entry.phase, None);
        assert!(batch.results.contains_key("cli"));
    }
}
