use crate::{
    AnalysisDepth, AnalysisEvent, AnalysisRecord, Delivery, Insight, InsightDraft, InsightFilter,
    InsightStatus, Job, JobStatus, JobUpdate, MergeBatch, Partitions, RepositoryDescriptor,
    Result, Scores, SyncRecord, SyncReservation, TaskContext, TaskPayload, TaskType,
    UpdateOutcome,
};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Durable job records; the source of truth for pollers.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Fails with `Conflict` when the id is taken.
    async fn insert(&self, job: Job) -> Result<()>;
    async fn get(&self, job_id: &str) -> Result<Option<Job>>;
    /// Applies one update atomically against the stored job.
    async fn update(&self, job_id: &str, update: JobUpdate) -> Result<UpdateOutcome>;
    /// Newest first.
    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>>;
    async fn list_unfinished(&self) -> Result<Vec<Job>>;
}

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Returns false when a record with that id already exists.
    async fn create_if_absent(&self, record: AnalysisRecord) -> Result<bool>;
    async fn get(&self, analysis_id: &str) -> Result<Option<AnalysisRecord>>;
    /// Upserts `batch` into the record under its own lock and returns the result.
    async fn merge(
        &self,
        analysis_id: &str,
        batch: &MergeBatch,
        finalize: bool,
    ) -> Result<AnalysisRecord>;
    /// Newest first.
    async fn list_for_repository(
        &self,
        repository_id: &str,
        limit: usize,
    ) -> Result<Vec<AnalysisRecord>>;
}

#[async_trait]
pub trait InsightStore: Send + Sync {
    /// Inserts new rows; existing rows keep their status and timestamps.
    async fn upsert(&self, insights: Vec<Insight>) -> Result<Vec<Insight>>;
    async fn get(&self, insight_id: &str) -> Result<Option<Insight>>;
    /// Ordered by confidence, highest first.
    async fn list_for_analysis(
        &self,
        analysis_id: &str,
        filter: &InsightFilter,
    ) -> Result<Vec<Insight>>;
    async fn transition(&self, insight_id: &str, target: InsightStatus) -> Result<Insight>;
}

#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Atomically claims `record.cli_analysis_id`, or hands back the earlier claim.
    async fn reserve(&self, record: SyncRecord) -> Result<SyncReservation>;
    async fn mark_synced(&self, sync_token: &str) -> Result<SyncRecord>;
    async fn get_by_token(&self, sync_token: &str) -> Result<Option<SyncRecord>>;
    async fn get_by_cli_analysis_id(&self, cli_analysis_id: &str) -> Result<Option<SyncRecord>>;
}

#[async_trait]
pub trait RepositoryStore: Send + Sync {
    /// Insert or replace by id.
    async fn register(&self, descriptor: RepositoryDescriptor) -> Result<RepositoryDescriptor>;
    async fn get(&self, repository_id: &str) -> Result<Option<RepositoryDescriptor>>;
    /// Returns the repository mapped to `local_path`, registering `candidate` if none is.
    async fn get_or_register_path(
        &self,
        candidate: RepositoryDescriptor,
    ) -> Result<RepositoryDescriptor>;
    async fn list(&self) -> Result<Vec<RepositoryDescriptor>>;
}

/// Best-effort publish/subscribe keyed by topic.
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Returns the number of live subscribers that received the event.
    async fn publish(&self, topic: &str, event: AnalysisEvent) -> Result<usize>;
    fn subscribe(&self, topic: &str) -> BoxStream<'static, Delivery>;
    /// Ends current subscriptions once they have drained.
    async fn close(&self, _topic: &str) {}
}

/// One analyzer. Errors become failed outcomes at the scheduler.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    fn task_type(&self) -> TaskType;
    async fn execute(&self, ctx: &TaskContext) -> anyhow::Result<TaskPayload>;
}

/// Input to the AI insight step of deep runs.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub repository: RepositoryDescriptor,
    pub analysis_depth: AnalysisDepth,
    pub partitions: Partitions,
    pub failed_tasks: Vec<TaskType>,
    pub scores: Scores,
}

#[async_trait]
pub trait InsightSynthesizer: Send + Sync {
    fn name(&self) -> &str;
    async fn synthesize(&self, request: &SynthesisRequest) -> anyhow::Result<Vec<InsightDraft>>;
}
