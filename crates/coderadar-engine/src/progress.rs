//! Job progress propagation: durable write first, best-effort publish second.

use crate::retry::RetryPolicy;
use coderadar_core::{
    topic_for, AnalysisEvent, AnalysisReport, EventChannel, EventKind, Insight, JobStore,
    JobUpdate, Result, UpdateOutcome,
};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ProgressReporter {
    jobs: Arc<dyn JobStore>,
    events: Arc<dyn EventChannel>,
    retry: RetryPolicy,
}

impl ProgressReporter {
    pub fn new(jobs: Arc<dyn JobStore>, events: Arc<dyn EventChannel>, retry: RetryPolicy) -> Self {
        Self {
            jobs,
            events,
            retry,
        }
    }

    /// Writes progress and, when the store accepted it, publishes the same
    /// tuple. Stale or post-terminal reports are dropped silently.
    pub async fn report(
        &self,
        job_id: &str,
        percent: f64,
        stage: &str,
        message: &str,
    ) -> Result<UpdateOutcome> {
        let update = JobUpdate::Progress {
            percent,
            stage: stage.to_string(),
            message: message.to_string(),
        };
        let outcome = self.write(job_id, update).await?;
        if outcome == UpdateOutcome::Applied {
            self.publish(
                job_id,
                EventKind::Progress {
                    percent: percent.clamp(0.0, 100.0),
                    stage: stage.to_string(),
                    message: message.to_string(),
                },
            )
            .await;
        }
        Ok(outcome)
    }

    pub async fn complete(
        &self,
        job_id: &str,
        report: &AnalysisReport,
        message: &str,
    ) -> Result<UpdateOutcome> {
        let update = JobUpdate::Completed {
            result: Box::new(report.clone()),
            message: message.to_string(),
        };
        let outcome = self.write(job_id, update).await?;
        if outcome == UpdateOutcome::Applied {
            self.publish(
                job_id,
                EventKind::Completed {
                    result: Box::new(report.clone()),
                },
            )
            .await;
            self.events.close(&topic_for(job_id)).await;
        }
        Ok(outcome)
    }

    pub async fn fail(&self, job_id: &str, error: &str) -> Result<UpdateOutcome> {
        let update = JobUpdate::Failed {
            error: error.to_string(),
        };
        let outcome = self.write(job_id, update).await?;
        if outcome == UpdateOutcome::Applied {
            self.publish(
                job_id,
                EventKind::Failed {
                    message: error.to_string(),
                },
            )
            .await;
            self.events.close(&topic_for(job_id)).await;
        }
        Ok(outcome)
    }

    pub async fn publish_insight(&self, job_id: &str, insight: &Insight) {
        self.publish(
            job_id,
            EventKind::Insight {
                insight: Box::new(insight.clone()),
            },
        )
        .await;
    }

    async fn write(&self, job_id: &str, update: JobUpdate) -> Result<UpdateOutcome> {
        let outcome = self
            .retry
            .run("job update", || self.jobs.update(job_id, update.clone()))
            .await?;
        if outcome != UpdateOutcome::Applied {
            debug!(job_id, ?outcome, "progress report ignored");
        }
        Ok(outcome)
    }

    async fn publish(&self, job_id: &str, kind: EventKind) {
        let event = AnalysisEvent::new(job_id, kind);
        if let Err(e) = self.events.publish(&topic_for(job_id), event).await {
            warn!(job_id, "dropping event: {}", e);
        }
    }
}
