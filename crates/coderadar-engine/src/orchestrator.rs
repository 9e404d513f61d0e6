//! Phase orchestrator: runs quick, standard and deep phases in order, each
//! gated on the previous phase's scheduler barrier.

use crate::aggregator::{AggregateOptions, Aggregator};
use crate::progress::ProgressReporter;
use crate::scheduler::{Scheduler, TaskObserver};
use async_trait::async_trait;
use coderadar_core::{
    topic_for, AnalysisDepth, AnalysisRecord, AnalysisStore, AnalysisTask, CodeRadarError, Job,
    JobId, JobStore, RepositoryDescriptor, RepositoryStore, Result, ResultSource, RunOptions,
    TaskOutcome, TaskStatus, TaskType,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const CANCELLED_MESSAGE: &str = "cancelled by requester";

/// Share of the job's progress the final phase may claim before the terminal
/// write sets 100.
const MAX_RUNNING_PERCENT: f64 = 99.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub repository_id: String,
    #[serde(default = "default_depth")]
    pub analysis_depth: String,
    #[serde(default)]
    pub requester: Option<String>,
    #[serde(flatten)]
    pub options: RunOptions,
    /// Makes the request idempotent: an existing job with this id is returned as is.
    #[serde(default)]
    pub job_id: Option<JobId>,
}

fn default_depth() -> String {
    AnalysisDepth::default().as_str().to_string()
}

/// What `run` hands back while the work proceeds in the background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTicket {
    pub job_id: JobId,
    pub analysis_id: String,
    pub monitor_url: String,
    pub event_channel: String,
}

impl JobTicket {
    pub fn for_job(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            analysis_id: job.analysis_id.clone(),
            monitor_url: format!("/jobs/{}", job.job_id),
            event_channel: topic_for(&job.job_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    TimedOut,
    Cancelled,
}

struct RunControl {
    token: CancellationToken,
    reason: Mutex<Option<StopReason>>,
}

impl RunControl {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Mutex::new(None),
        }
    }

    /// The first reason sticks.
    fn stop(&self, reason: StopReason) {
        {
            let mut current = self.reason.lock();
            if current.is_none() {
                *current = Some(reason);
            }
        }
        self.token.cancel();
    }

    fn reason(&self) -> Option<StopReason> {
        *self.reason.lock()
    }
}

struct Inner {
    jobs: Arc<dyn JobStore>,
    analyses: Arc<dyn AnalysisStore>,
    repositories: Arc<dyn RepositoryStore>,
    scheduler: Scheduler,
    progress: ProgressReporter,
    aggregator: Aggregator,
    job_timeout: Duration,
    runs: DashMap<JobId, Arc<RunControl>>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        analyses: Arc<dyn AnalysisStore>,
        repositories: Arc<dyn RepositoryStore>,
        scheduler: Scheduler,
        progress: ProgressReporter,
        aggregator: Aggregator,
        job_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs,
                analyses,
                repositories,
                scheduler,
                progress,
                aggregator,
                job_timeout,
                runs: DashMap::new(),
            }),
        }
    }

    /// Validates the request, records a pending job and starts it in the
    /// background. Returns as soon as the job exists.
    pub async fn run(&self, request: AnalyzeRequest) -> Result<JobTicket> {
        let depth: AnalysisDepth = request.analysis_depth.parse()?;
        let repository = self
            .inner
            .repositories
            .get(&request.repository_id)
            .await?
            .ok_or_else(|| {
                CodeRadarError::NotFound(format!("repository {}", request.repository_id))
            })?;

        if let Some(job_id) = &request.job_id {
            if let Some(existing) = self.inner.jobs.get(job_id).await? {
                return Ok(JobTicket::for_job(&existing));
            }
        }

        let job_id = request
            .job_id
            .unwrap_or_else(|| format!("analysis_{}_{}", repository.id, Uuid::new_v4().simple()));
        let analysis_id = Uuid::new_v4().to_string();

        self.inner
            .analyses
            .create_if_absent(AnalysisRecord::new(
                analysis_id.clone(),
                repository.id.clone(),
                depth,
                ResultSource::Live,
                Some(job_id.clone()),
            ))
            .await?;

        let job = Job::new(
            job_id,
            analysis_id,
            repository.id.clone(),
            depth,
            request.requester,
            request.options,
        );
        match self.inner.jobs.insert(job.clone()).await {
            Ok(()) => {}
            Err(CodeRadarError::Conflict(_)) => {
                // Lost a race with an identical idempotent request.
                if let Some(existing) = self.inner.jobs.get(&job.job_id).await? {
                    return Ok(JobTicket::for_job(&existing));
                }
            }
            Err(e) => return Err(e),
        }

        info!(
            job_id = %job.job_id,
            repository_id = %repository.id,
            depth = %depth,
            "analysis queued"
        );
        let ticket = JobTicket::for_job(&job);
        self.spawn_run(job, repository);
        Ok(ticket)
    }

    pub async fn job(&self, job_id: &str) -> Result<Job> {
        self.inner
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| CodeRadarError::NotFound(format!("job {}", job_id)))
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.inner.runs.contains_key(job_id)
    }

    /// Stops an active run. The current phase's barrier still fires and its
    /// outcomes are merged before the job is marked failed.
    pub async fn cancel(&self, job_id: &str) -> Result<()> {
        let job = self.job(job_id).await?;
        if job.is_terminal() {
            return Err(CodeRadarError::Conflict(format!(
                "job {} is already {}",
                job_id,
                job.status.as_str()
            )));
        }
        match self.inner.runs.get(job_id).map(|r| r.clone()) {
            Some(control) => {
                info!(job_id, "cancellation requested");
                control.stop(StopReason::Cancelled);
            }
            None => {
                self.inner.progress.fail(job_id, CANCELLED_MESSAGE).await?;
            }
        }
        Ok(())
    }

    /// Re-drives jobs left unfinished by a previous process. Returns how many
    /// were restarted.
    pub async fn reconcile_interrupted(&self) -> Result<usize> {
        let mut restarted = 0;
        for job in self.inner.jobs.list_unfinished().await? {
            if self.is_running(&job.job_id) {
                continue;
            }
            match self.inner.repositories.get(&job.repository_id).await? {
                Some(repository) => {
                    info!(job_id = %job.job_id, "resuming interrupted analysis");
                    self.spawn_run(job, repository);
                    restarted += 1;
                }
                None => {
                    warn!(job_id = %job.job_id, "repository for interrupted job is gone");
                    self.inner
                        .progress
                        .fail(
                            &job.job_id,
                            &format!("repository {} is no longer registered", job.repository_id),
                        )
                        .await?;
                }
            }
        }
        Ok(restarted)
    }

    fn spawn_run(&self, job: Job, repository: RepositoryDescriptor) {
        let control = Arc::new(RunControl::new());
        self.inner.runs.insert(job.job_id.clone(), control.clone());
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.drive(&job, &repository, &control).await {
                error!(job_id = %job.job_id, "analysis failed: {}", e);
                if let Err(write_err) = inner.progress.fail(&job.job_id, &e.to_string()).await {
                    error!(job_id = %job.job_id, "could not record job failure: {}", write_err);
                }
            }
            inner.runs.remove(&job.job_id);
        });
    }
}

impl Inner {
    async fn drive(
        &self,
        job: &Job,
        repository: &RepositoryDescriptor,
        control: &RunControl,
    ) -> Result<()> {
        let deadline = Instant::now() + self.job_timeout;
        let phases = job.analysis_depth.phases();
        let mut final_outcomes: Vec<TaskOutcome> = Vec::new();

        for (index, phase) in phases.iter().copied().enumerate() {
            if control.reason().is_some() {
                break;
            }
            let is_final = index + 1 == phases.len();
            let tasks: Vec<AnalysisTask> = phase
                .tasks()
                .iter()
                .copied()
                .filter(|t| job.options.include_patterns || *t != TaskType::Pattern)
                .map(|t| AnalysisTask::new(t, phase))
                .collect();

            let (start, _) = phase.progress_window();
            self.progress
                .report(
                    &job.job_id,
                    start as f64,
                    phase.as_str(),
                    &format!("Running {} analysis ({} tasks)", phase, tasks.len()),
                )
                .await?;
            info!(job_id = %job.job_id, phase = %phase, tasks = tasks.len(), "phase started");

            let observer = Arc::new(PhaseObserver {
                progress: self.progress.clone(),
                job_id: job.job_id.clone(),
            });
            let aggregator = self.aggregator.clone();
            let analysis_id = job.analysis_id.clone();
            let handle = self.scheduler.execute(
                repository.clone(),
                tasks,
                control.token.child_token(),
                Some(observer),
                move |outcomes| async move {
                    if is_final {
                        (outcomes, Ok(()))
                    } else {
                        let merged = aggregator.merge_phase(&analysis_id, &outcomes).await;
                        (outcomes, merged.map(|_| ()))
                    }
                },
            )?;

            let joined = handle.join();
            tokio::pin!(joined);
            let (outcomes, merged) = tokio::select! {
                result = &mut joined => result?,
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(job_id = %job.job_id, phase = %phase, "job deadline reached; finalizing with partial results");
                    control.stop(StopReason::TimedOut);
                    joined.await?
                }
            };
            merged?;

            let failed = outcomes
                .iter()
                .filter(|o| o.status() == TaskStatus::Failed)
                .count();
            info!(
                job_id = %job.job_id,
                phase = %phase,
                completed = outcomes.len() - failed,
                failed,
                "phase finished"
            );
            if is_final {
                final_outcomes = outcomes;
            }
        }

        let options = match control.reason() {
            None => AggregateOptions {
                synthesize: job.analysis_depth.synthesizes() && job.options.include_insights,
                fail_with: None,
            },
            Some(StopReason::TimedOut) => AggregateOptions::default(),
            Some(StopReason::Cancelled) => AggregateOptions {
                synthesize: false,
                fail_with: Some(CANCELLED_MESSAGE.to_string()),
            },
        };
        if options.synthesize {
            self.progress
                .report(
                    &job.job_id,
                    MAX_RUNNING_PERCENT,
                    "synthesis",
                    "Generating insights",
                )
                .await?;
        }
        self.aggregator
            .aggregate(job, repository, &final_outcomes, options)
            .await?;
        Ok(())
    }
}

/// Turns per-task completions into intra-phase progress.
struct PhaseObserver {
    progress: ProgressReporter,
    job_id: JobId,
}

#[async_trait]
impl TaskObserver for PhaseObserver {
    async fn on_task_finished(&self, outcome: &TaskOutcome, finished: usize, total: usize) {
        let percent = outcome
            .phase
            .progress_at(finished, total)
            .min(MAX_RUNNING_PERCENT);
        let message = match outcome.error() {
            None => format!("{} finished ({}/{})", outcome.task_type, finished, total),
            Some(error) => format!(
                "{} failed ({}/{}): {}",
                outcome.task_type, finished, total, error
            ),
        };
        if let Err(e) = self
            .progress
            .report(&self.job_id, percent, outcome.task_type.stage(), &message)
            .await
        {
            warn!(job_id = %self.job_id, "progress write failed: {}", e);
        }
    }
}
