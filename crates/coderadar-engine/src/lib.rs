//! Progressive analysis engine: scheduler, aggregation, phase orchestration
//! and CLI sync, wired over the store traits from `coderadar-core`.

pub mod aggregator;
pub mod analyzers;
pub mod cli_sync;
pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod scheduler;

pub use aggregator::{merge_bundle, merge_outcomes, AggregateOptions, Aggregator};
pub use cli_sync::{generate_sync_token, CliSyncIngestor};
pub use events::BroadcastEventChannel;
pub use executor::ExecutorRegistry;
pub use orchestrator::{AnalyzeRequest, JobTicket, Orchestrator, CANCELLED_MESSAGE};
pub use progress::ProgressReporter;
pub use retry::RetryPolicy;
pub use scheduler::{Scheduler, TaskObserver, WorkflowHandle, WorkflowId};

use coderadar_core::{
    AnalysisStore, CodeRadarConfig, EventChannel, InsightStore, InsightSynthesizer, JobStore,
    RepositoryConfig, RepositoryDescriptor, RepositoryStore, Result, SyncStore,
};
use coderadar_store::{
    MemoryAnalysisStore, MemoryInsightStore, MemoryJobStore, MemoryRepositoryStore,
    MemorySyncStore,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The persistence and event seams the engine runs against.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub analyses: Arc<dyn AnalysisStore>,
    pub insights: Arc<dyn InsightStore>,
    pub syncs: Arc<dyn SyncStore>,
    pub repositories: Arc<dyn RepositoryStore>,
    pub events: Arc<dyn EventChannel>,
}

impl Stores {
    pub fn in_memory(channel_capacity: usize) -> Self {
        Self {
            jobs: Arc::new(MemoryJobStore::new()),
            analyses: Arc::new(MemoryAnalysisStore::new()),
            insights: Arc::new(MemoryInsightStore::new()),
            syncs: Arc::new(MemorySyncStore::new()),
            repositories: Arc::new(MemoryRepositoryStore::new()),
            events: Arc::new(BroadcastEventChannel::new(channel_capacity)),
        }
    }
}

/// A fully wired engine.
#[derive(Clone)]
pub struct Engine {
    pub stores: Stores,
    pub orchestrator: Orchestrator,
    pub ingestor: CliSyncIngestor,
    pub progress: ProgressReporter,
    pub scheduler: Scheduler,
}

impl Engine {
    pub fn builder(config: CodeRadarConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Registers repositories listed in configuration. Returns how many were
    /// registered.
    pub async fn register_repositories(&self, repositories: &[RepositoryConfig]) -> Result<usize> {
        for repo in repositories {
            let name = repo.name.clone().unwrap_or_else(|| repo.id.clone());
            self.stores
                .repositories
                .register(RepositoryDescriptor::new(
                    repo.id.clone(),
                    name,
                    repo.path.clone(),
                ))
                .await?;
        }
        if !repositories.is_empty() {
            info!("registered {} configured repositories", repositories.len());
        }
        Ok(repositories.len())
    }
}

pub struct EngineBuilder {
    config: CodeRadarConfig,
    stores: Option<Stores>,
    executors: Option<ExecutorRegistry>,
    synthesizer: Option<Arc<dyn InsightSynthesizer>>,
}

impl EngineBuilder {
    pub fn new(config: CodeRadarConfig) -> Self {
        Self {
            config,
            stores: None,
            executors: None,
            synthesizer: None,
        }
    }

    pub fn stores(mut self, stores: Stores) -> Self {
        self.stores = Some(stores);
        self
    }

    /// Replaces the built-in filesystem analyzers.
    pub fn executors(mut self, executors: ExecutorRegistry) -> Self {
        self.executors = Some(executors);
        self
    }

    pub fn synthesizer(mut self, synthesizer: Arc<dyn InsightSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn build(self) -> anyhow::Result<Engine> {
        let config = self.config;
        let stores = self
            .stores
            .unwrap_or_else(|| Stores::in_memory(config.events.channel_capacity));
        let executors = match self.executors {
            Some(executors) => executors,
            None => ExecutorRegistry::with_builtin_analyzers()?,
        };
        let retry = RetryPolicy::from_config(&config.persistence);
        let synthesis = self.synthesizer.is_some();

        let scheduler = Scheduler::from_config(executors, &config.scheduler);
        let progress = ProgressReporter::new(stores.jobs.clone(), stores.events.clone(), retry);
        let aggregator = Aggregator::new(
            stores.analyses.clone(),
            stores.insights.clone(),
            progress.clone(),
            self.synthesizer,
            retry,
        );
        let orchestrator = Orchestrator::new(
            stores.jobs.clone(),
            stores.analyses.clone(),
            stores.repositories.clone(),
            scheduler.clone(),
            progress.clone(),
            aggregator.clone(),
            Duration::from_secs(config.scheduler.job_timeout_secs),
        );
        let ingestor = CliSyncIngestor::new(
            stores.repositories.clone(),
            stores.analyses.clone(),
            stores.insights.clone(),
            stores.syncs.clone(),
            aggregator,
            retry,
        );

        info!(
            max_concurrent_tasks = config.scheduler.max_concurrent_tasks,
            task_timeout_secs = config.scheduler.task_timeout_secs,
            job_timeout_secs = config.scheduler.job_timeout_secs,
            synthesis,
            "engine ready"
        );
        Ok(Engine {
            stores,
            orchestrator,
            ingestor,
            progress,
            scheduler,
        })
    }
}
