#![allow(dead_code)]

use async_trait::async_trait;
use coderadar_core::{
    AnalysisRecord, AnalysisStore, CodeRadarConfig, CodeRadarError, DependencyReport, Dependency,
    DetectedPattern, InsightDraft, InsightSynthesizer, Job, JobStatus, JobStore, JobUpdate,
    MergeBatch, PackageEcosystem, PatternReport, RepositoryDescriptor, SecurityFinding,
    SecurityReport, Severity, StructureReport, SynthesisRequest, TaskContext, TaskExecutor,
    TaskPayload, TaskType, UpdateOutcome,
};
use coderadar_engine::{Engine, ExecutorRegistry, Stores};
use coderadar_store::{MemoryAnalysisStore, MemoryJobStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy)]
pub enum Script {
    Succeed,
    Fail,
    Hang,
    Panic,
    Delay(Duration),
}

/// Executor that follows a fixed script and counts its invocations.
pub struct ScriptedExecutor {
    pub task_type: TaskType,
    pub script: Script,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedExecutor {
    pub fn new(task_type: TaskType, script: Script) -> Self {
        Self {
            task_type,
            script,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    async fn execute(&self, _ctx: &TaskContext) -> anyhow::Result<TaskPayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Succeed => {}
            Script::Fail => anyhow::bail!("{} analyzer crashed", self.task_type),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
            }
            Script::Panic => panic!("{} analyzer bug", self.task_type),
            Script::Delay(d) => tokio::time::sleep(d).await,
        }
        Ok(sample_payload(self.task_type))
    }
}

pub fn sample_payload(task_type: TaskType) -> TaskPayload {
    match task_type {
        TaskType::Structure => TaskPayload::Structure(StructureReport {
            total_files: 42,
            total_lines: 4_200,
            directories: 7,
            max_depth: 3,
            languages: vec!["rust".into()],
            frameworks: vec!["axum".into()],
            has_tests: true,
            has_docs: true,
            has_ci: false,
        }),
        TaskType::Pattern => TaskPayload::Pattern(PatternReport {
            patterns: vec![DetectedPattern {
                pattern_type: "testing".into(),
                name: "test-suite".into(),
                confidence: 0.8,
                description: "tests".into(),
            }],
        }),
        TaskType::Security => TaskPayload::Security(SecurityReport {
            findings: vec![SecurityFinding {
                rule: "eval-usage".into(),
                severity: Severity::Medium,
                title: "eval".into(),
                file: Some("src/app.js".into()),
                line: Some(3),
            }],
            files_scanned: 40,
        }),
        TaskType::Dependency => TaskPayload::Dependency(DependencyReport {
            ecosystems: vec![PackageEcosystem {
                ecosystem: "cargo".into(),
                manifest: "Cargo.toml".into(),
                dependencies: vec![Dependency {
                    name: "serde".into(),
                    version: Some("1".into()),
                }],
            }],
        }),
    }
}

/// Registry with a succeeding executor for every task type except those
/// overridden.
pub fn registry(overrides: Vec<ScriptedExecutor>) -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    for task_type in TaskType::all() {
        registry.register(Arc::new(ScriptedExecutor::new(task_type, Script::Succeed)));
    }
    for executor in overrides {
        registry.register(Arc::new(executor));
    }
    registry
}

pub struct FailingSynthesizer;

#[async_trait]
impl InsightSynthesizer for FailingSynthesizer {
    fn name(&self) -> &str {
        "failing"
    }

    async fn synthesize(&self, _request: &SynthesisRequest) -> anyhow::Result<Vec<InsightDraft>> {
        anyhow::bail!("model endpoint returned 503")
    }
}

pub struct FixedSynthesizer;

#[async_trait]
impl InsightSynthesizer for FixedSynthesizer {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> anyhow::Result<Vec<InsightDraft>> {
        Ok(vec![
            InsightDraft {
                insight_type: "security".into(),
                title: format!("Review findings in {}", request.repository.name),
                description: "eval usage".into(),
                severity: Severity::Medium,
                recommendation: "Remove eval".into(),
                confidence: 0.9,
            },
            InsightDraft {
                insight_type: "quality".into(),
                title: "Add CI".into(),
                description: "No pipeline detected".into(),
                severity: Severity::Low,
                recommendation: "Add a workflow".into(),
                confidence: 0.6,
            },
        ])
    }
}

/// Returns a differently titled insight on every call.
#[derive(Default)]
pub struct DriftingSynthesizer {
    pub calls: AtomicUsize,
}

#[async_trait]
impl InsightSynthesizer for DriftingSynthesizer {
    fn name(&self) -> &str {
        "drifting"
    }

    async fn synthesize(&self, _request: &SynthesisRequest) -> anyhow::Result<Vec<InsightDraft>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![InsightDraft {
            insight_type: "quality".into(),
            title: format!("Observation #{}", call),
            description: "varies per call".into(),
            severity: Severity::Low,
            recommendation: "none".into(),
            confidence: 0.5,
        }])
    }
}

pub fn test_config() -> CodeRadarConfig {
    let mut config = CodeRadarConfig::default();
    config.scheduler.max_concurrent_tasks = 4;
    config.scheduler.task_timeout_secs = 2;
    config.scheduler.job_timeout_secs = 600;
    config.persistence.retry_backoff_ms = 1;
    config
}

/// Store wrapper whose first `fail_first` writes report a persistence
/// failure before reaching the inner store. Reads always pass through.
pub struct Flaky<S> {
    pub inner: S,
    pub fail_first: usize,
    pub writes: AtomicUsize,
}

impl<S> Flaky<S> {
    pub fn new(inner: S, fail_first: usize) -> Self {
        Self {
            inner,
            fail_first,
            writes: AtomicUsize::new(0),
        }
    }

    fn check(&self, what: &str) -> coderadar_core::Result<()> {
        let attempt = self.writes.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(CodeRadarError::Persistence(format!(
                "{} write {} rejected: connection reset",
                what, attempt
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for Flaky<MemoryJobStore> {
    async fn insert(&self, job: Job) -> coderadar_core::Result<()> {
        self.inner.insert(job).await
    }

    async fn get(&self, job_id: &str) -> coderadar_core::Result<Option<Job>> {
        self.inner.get(job_id).await
    }

    async fn update(&self, job_id: &str, update: JobUpdate) -> coderadar_core::Result<UpdateOutcome> {
        self.check("job")?;
        self.inner.update(job_id, update).await
    }

    async fn list(&self, status: Option<JobStatus>, limit: usize) -> coderadar_core::Result<Vec<Job>> {
        self.inner.list(status, limit).await
    }

    async fn list_unfinished(&self) -> coderadar_core::Result<Vec<Job>> {
        self.inner.list_unfinished().await
    }
}

#[async_trait]
impl AnalysisStore for Flaky<MemoryAnalysisStore> {
    async fn create_if_absent(&self, record: AnalysisRecord) -> coderadar_core::Result<bool> {
        self.inner.create_if_absent(record).await
    }

    async fn get(&self, analysis_id: &str) -> coderadar_core::Result<Option<AnalysisRecord>> {
        self.inner.get(analysis_id).await
    }

    async fn merge(
        &self,
        analysis_id: &str,
        batch: &MergeBatch,
        finalize: bool,
    ) -> coderadar_core::Result<AnalysisRecord> {
        self.check("analysis")?;
        self.inner.merge(analysis_id, batch, finalize).await
    }

    async fn list_for_repository(
        &self,
        repository_id: &str,
        limit: usize,
    ) -> coderadar_core::Result<Vec<AnalysisRecord>> {
        self.inner.list_for_repository(repository_id, limit).await
    }
}

/// In-memory stores whose job updates and analysis merges fail a fixed
/// number of times first.
pub fn flaky_stores(
    config: &CodeRadarConfig,
    job_failures: usize,
    analysis_failures: usize,
) -> (Stores, Arc<Flaky<MemoryJobStore>>, Arc<Flaky<MemoryAnalysisStore>>) {
    let jobs = Arc::new(Flaky::new(MemoryJobStore::new(), job_failures));
    let analyses = Arc::new(Flaky::new(MemoryAnalysisStore::new(), analysis_failures));
    let mut stores = Stores::in_memory(config.events.channel_capacity);
    stores.jobs = jobs.clone();
    stores.analyses = analyses.clone();
    (stores, jobs, analyses)
}

pub async fn engine_with(
    config: CodeRadarConfig,
    executors: ExecutorRegistry,
    synthesizer: Option<Arc<dyn InsightSynthesizer>>,
) -> Engine {
    engine_with_stores(config, executors, synthesizer, None).await
}

pub async fn engine_with_stores(
    config: CodeRadarConfig,
    executors: ExecutorRegistry,
    synthesizer: Option<Arc<dyn InsightSynthesizer>>,
    stores: Option<Stores>,
) -> Engine {
    let mut builder = Engine::builder(config).executors(executors);
    if let Some(stores) = stores {
        builder = builder.stores(stores);
    }
    if let Some(synthesizer) = synthesizer {
        builder = builder.synthesizer(synthesizer);
    }
    let engine = builder.build().unwrap();
    for id in ["r1", "r2", "r3", "r4"] {
        engine
            .stores
            .repositories
            .register(RepositoryDescriptor::new(id, format!("repo-{}", id), format!("/srv/{}", id)))
            .await
            .unwrap();
    }
    engine
}

/// Polls until the job is terminal.
pub async fn wait_terminal(engine: &Engine, job_id: &str) -> Job {
    for _ in 0..2_000 {
        let job = engine.orchestrator.job(job_id).await.unwrap();
        if job.is_terminal() && !engine.orchestrator.is_running(job_id) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not finish", job_id);
}
