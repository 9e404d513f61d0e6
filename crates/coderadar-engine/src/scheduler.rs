//! Fan-out/fan-in task scheduler.
//!
//! `execute` dispatches every task of a phase onto a shared, semaphore-bounded
//! worker pool and returns a handle immediately. A coordinator task joins all
//! branches and then calls `on_complete` exactly once with one outcome per
//! dispatched task, whether the branches succeeded, failed, timed out,
//! panicked or were cancelled.

use crate::executor::ExecutorRegistry;
use async_trait::async_trait;
use coderadar_core::{
    AnalysisTask, CodeRadarError, FailureKind, RepositoryDescriptor, Result, TaskContext,
    TaskExecutor, TaskOutcome,
};
use dashmap::DashMap;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

pub type WorkflowId = Uuid;

/// Sees each outcome as it lands, before the barrier fires. Calls for one
/// workflow are sequential.
#[async_trait]
pub trait TaskObserver: Send + Sync {
    async fn on_task_finished(&self, outcome: &TaskOutcome, finished: usize, total: usize);
}

pub struct WorkflowHandle<T> {
    id: WorkflowId,
    cancel: CancellationToken,
    join: JoinHandle<T>,
}

impl<T> WorkflowHandle<T> {
    pub fn id(&self) -> WorkflowId {
        self.id
    }

    /// Requests cooperative cancellation; the barrier still fires.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the barrier callback and returns its value.
    pub async fn join(self) -> Result<T> {
        self.join.await.map_err(|e| {
            CodeRadarError::Scheduling(format!("workflow {} aborted: {}", self.id, e))
        })
    }
}

#[derive(Clone)]
pub struct Scheduler {
    executors: Arc<ExecutorRegistry>,
    permits: Arc<Semaphore>,
    task_timeout: Duration,
    active: Arc<DashMap<WorkflowId, CancellationToken>>,
}

impl Scheduler {
    pub fn new(executors: ExecutorRegistry, max_concurrent_tasks: usize, task_timeout: Duration) -> Self {
        Self {
            executors: Arc::new(executors),
            permits: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
            task_timeout,
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn from_config(executors: ExecutorRegistry, config: &coderadar_core::SchedulerConfig) -> Self {
        Self::new(
            executors,
            config.max_concurrent_tasks,
            Duration::from_secs(config.task_timeout_secs),
        )
    }

    pub fn active_workflows(&self) -> usize {
        self.active.len()
    }

    /// Cancels a running workflow by id. Returns false if it already finished.
    pub fn cancel(&self, id: WorkflowId) -> bool {
        match self.active.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Dispatches `tasks` and arranges for `on_complete` to run once all of
    /// them are terminal. Fails without dispatching anything if a task has no
    /// executor. `cancel` may be a child of a wider token.
    pub fn execute<F, Fut, T>(
        &self,
        repository: RepositoryDescriptor,
        tasks: Vec<AnalysisTask>,
        cancel: CancellationToken,
        observer: Option<Arc<dyn TaskObserver>>,
        on_complete: F,
    ) -> Result<WorkflowHandle<T>>
    where
        F: FnOnce(Vec<TaskOutcome>) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut dispatch = Vec::with_capacity(tasks.len());
        for task in tasks {
            let executor = self.executors.get(task.task_type).ok_or_else(|| {
                CodeRadarError::Scheduling(format!(
                    "no executor registered for task type {}",
                    task.task_type
                ))
            })?;
            dispatch.push((task, executor));
        }

        let id = Uuid::new_v4();
        self.active.insert(id, cancel.clone());

        let permits = self.permits.clone();
        let timeout = self.task_timeout;
        let active = self.active.clone();
        let token = cancel.clone();

        let join = tokio::spawn(async move {
            let outcomes = run_barrier(repository, dispatch, permits, timeout, token, observer).await;
            active.remove(&id);
            on_complete(outcomes).await
        });

        Ok(WorkflowHandle { id, cancel, join })
    }
}

async fn run_barrier(
    repository: RepositoryDescriptor,
    dispatch: Vec<(AnalysisTask, Arc<dyn TaskExecutor>)>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    cancel: CancellationToken,
    observer: Option<Arc<dyn TaskObserver>>,
) -> Vec<TaskOutcome> {
    let total = dispatch.len();
    let mut pending: Vec<Option<AnalysisTask>> = dispatch.iter().map(|(t, _)| Some(*t)).collect();
    let mut join_set = JoinSet::new();

    for (index, (task, executor)) in dispatch.into_iter().enumerate() {
        let ctx = TaskContext {
            repository: repository.clone(),
            task,
        };
        let permits = permits.clone();
        let cancel = cancel.clone();
        join_set.spawn(async move {
            let outcome = run_task(executor, ctx, permits, timeout, cancel).await;
            (index, outcome)
        });
    }

    let mut outcomes = Vec::with_capacity(total);
    while let Some(joined) = join_set.join_next().await {
        let outcome = match joined {
            Ok((index, outcome)) => {
                pending[index] = None;
                outcome
            }
            Err(e) => {
                // Branches catch their own panics; this is a runtime abort.
                warn!("task branch aborted: {}", e);
                continue;
            }
        };
        debug!(
            task = %outcome.task_type,
            phase = %outcome.phase,
            status = ?outcome.status(),
            duration_ms = outcome.duration_ms,
            "task finished"
        );
        if let Some(observer) = &observer {
            observer
                .on_task_finished(&outcome, outcomes.len() + 1, total)
                .await;
        }
        outcomes.push(outcome);
    }

    for task in pending.into_iter().flatten() {
        outcomes.push(TaskOutcome::failed(
            task.task_type,
            task.phase,
            FailureKind::Cancelled,
            "task aborted before completion",
            0,
        ));
    }

    outcomes
}

async fn run_task(
    executor: Arc<dyn TaskExecutor>,
    ctx: TaskContext,
    permits: Arc<Semaphore>,
    timeout: Duration,
    cancel: CancellationToken,
) -> TaskOutcome {
    let task = ctx.task;
    let started = Instant::now();
    let elapsed = |started: Instant| started.elapsed().as_millis() as u64;

    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return TaskOutcome::failed(task.task_type, task.phase, FailureKind::Cancelled, "cancelled before start", 0);
        }
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                return TaskOutcome::failed(task.task_type, task.phase, FailureKind::Error, "worker pool closed", 0);
            }
        }
    };

    let work = AssertUnwindSafe(executor.execute(&ctx)).catch_unwind();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => TaskOutcome::failed(
            task.task_type,
            task.phase,
            FailureKind::Cancelled,
            "cancelled",
            elapsed(started),
        ),
        result = tokio::time::timeout(timeout, work) => match result {
            Err(_) => TaskOutcome::failed(
                task.task_type,
                task.phase,
                FailureKind::Timeout,
                format!("timed out after {}s", timeout.as_secs_f64()),
                elapsed(started),
            ),
            Ok(Err(panic)) => TaskOutcome::failed(
                task.task_type,
                task.phase,
                FailureKind::Panicked,
                format!("analyzer panicked: {}", panic_message(panic.as_ref())),
                elapsed(started),
            ),
            Ok(Ok(Err(e))) => TaskOutcome::failed(
                task.task_type,
                task.phase,
                FailureKind::Error,
                format!("{:#}", e),
                elapsed(started),
            ),
            Ok(Ok(Ok(payload))) if payload.task_type() != task.task_type => TaskOutcome::failed(
                task.task_type,
                task.phase,
                FailureKind::Error,
                format!("executor returned a {} payload", payload.task_type()),
                elapsed(started),
            ),
            Ok(Ok(Ok(payload))) => TaskOutcome::completed(task.phase, payload, elapsed(started)),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
