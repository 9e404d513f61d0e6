use async_trait::async_trait;
use chrono::Utc;
use coderadar_core::{
    CodeRadarError, Job, JobStatus, JobStore, JobUpdate, Result, UpdateOutcome,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: DashMap<String, Job>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: Job) -> Result<()> {
        match self.jobs.entry(job.job_id.clone()) {
            Entry::Occupied(_) => Err(CodeRadarError::Conflict(format!(
                "job {} already exists",
                job.job_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(job);
                Ok(())
            }
        }
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.get(job_id).map(|j| j.clone()))
    }

    async fn update(&self, job_id: &str, update: JobUpdate) -> Result<UpdateOutcome> {
        let mut job = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| CodeRadarError::NotFound(format!("job {}", job_id)))?;
        let outcome = job.apply(&update, Utc::now());
        if outcome != UpdateOutcome::Applied {
            debug!(job_id, ?outcome, "job update not applied");
        }
        Ok(outcome)
    }

    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .map(|j| j.clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn list_unfinished(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|j| !j.is_terminal())
            .map(|j| j.clone())
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }
}
