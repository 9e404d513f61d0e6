mod common;

use common::*;
use coderadar_core::{
    scoring, topic_for, AnalysisEvent, CliAnalysisResults, CliSyncRequest, Delivery, EventKind,
    JobStatus, ResultSource, RunOptions, SecurityFinding, SecurityReport, Severity, TaskType,
};
use coderadar_engine::{AnalyzeRequest, CANCELLED_MESSAGE};
use futures::StreamExt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn request(repo: &str, depth: &str) -> AnalyzeRequest {
    AnalyzeRequest {
        repository_id: repo.to_string(),
        analysis_depth: depth.to_string(),
        requester: Some("tests".to_string()),
        options: RunOptions::default(),
        job_id: None,
    }
}

#[tokio::test]
async fn quick_run_completes_without_insights() {
    let engine = engine_with(test_config(), registry(vec![]), Some(Arc::new(FixedSynthesizer))).await;
    let ticket = engine.orchestrator.run(request("r1", "quick")).await.unwrap();
    assert_eq!(ticket.monitor_url, format!("/jobs/{}", ticket.job_id));
    assert_eq!(ticket.event_channel, format!("analysis.{}", ticket.job_id));

    let job = wait_terminal(&engine, &ticket.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_percentage, 100);
    let report = job.result.unwrap();
    assert_eq!(report.record.results.len(), 1);
    assert!(report.record.results.contains_key("quick"));
    assert!(report.record.failed_tasks.is_empty());
    assert!(report.record.completed_at.is_some());
    assert!(report.insights.is_empty());
}

#[tokio::test(start_paused = true)]
async fn standard_run_survives_security_timeout() {
    let engine = engine_with(
        test_config(),
        registry(vec![ScriptedExecutor::new(TaskType::Security, Script::Hang)]),
        None,
    )
    .await;
    let ticket = engine.orchestrator.run(request("r2", "standard")).await.unwrap();

    let job = wait_terminal(&engine, &ticket.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_percentage, 100);
    let record = job.result.unwrap().record;
    assert_eq!(record.failed_tasks, vec![TaskType::Security]);
    assert!(record.task_errors["standard.security"].contains("timed out"));
    assert!(record.partitions.security().is_none());
    assert_eq!(record.scores.security, scoring::NEUTRAL_SECURITY);
    assert!(record.partitions.patterns().is_some());
    assert!(record.partitions.dependencies().is_some());
}

#[tokio::test]
async fn deep_run_absorbs_synthesis_failure() {
    let engine = engine_with(test_config(), registry(vec![]), Some(Arc::new(FailingSynthesizer))).await;
    let ticket = engine.orchestrator.run(request("r3", "deep")).await.unwrap();

    let job = wait_terminal(&engine, &ticket.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    let report = job.result.unwrap();
    assert_eq!(report.record.results.len(), 3);
    assert_eq!(report.record.partitions.len(), 4);
    assert!(report.insights.is_empty());
}

#[tokio::test]
async fn deep_run_persists_and_streams_insights() {
    let engine = engine_with(test_config(), registry(vec![]), Some(Arc::new(FixedSynthesizer))).await;
    let mut req = request("r3", "deep");
    req.job_id = Some("job-deep-insights".to_string());
    let mut events = engine.stores.events.subscribe(&topic_for("job-deep-insights"));

    engine.orchestrator.run(req).await.unwrap();
    let job = wait_terminal(&engine, "job-deep-insights").await;
    let report = job.result.unwrap();
    assert_eq!(report.insights.len(), 2);
    assert!(report.insights[0].confidence >= report.insights[1].confidence);

    let mut kinds = Vec::new();
    while let Some(delivery) = events.next().await {
        if let Delivery::Event(AnalysisEvent { kind, .. }) = delivery {
            kinds.push(kind.name());
        }
    }
    assert_eq!(kinds.iter().filter(|k| **k == "insight").count(), 2);
    assert_eq!(kinds.last(), Some(&"completed"));
}

#[tokio::test]
async fn include_insights_false_skips_synthesis() {
    let engine = engine_with(test_config(), registry(vec![]), Some(Arc::new(FixedSynthesizer))).await;
    let mut req = request("r3", "deep");
    req.options.include_insights = false;
    req.options.include_patterns = false;
    let ticket = engine.orchestrator.run(req).await.unwrap();

    let report = wait_terminal(&engine, &ticket.job_id).await.result.unwrap();
    assert!(report.insights.is_empty());
    assert!(report.record.partitions.patterns().is_none());
}

#[tokio::test]
async fn live_run_and_cli_sync_write_disjoint_partitions() {
    let engine = engine_with(
        test_config(),
        registry(vec![
            ScriptedExecutor::new(TaskType::Security, Script::Fail),
            ScriptedExecutor::new(TaskType::Pattern, Script::Delay(Duration::from_millis(150))),
        ]),
        None,
    )
    .await;
    let ticket = engine.orchestrator.run(request("r4", "deep")).await.unwrap();

    let sync = engine
        .ingestor
        .ingest(CliSyncRequest {
            cli_analysis_id: "cli-r4-1".into(),
            cli_version: "1.2.0".into(),
            machine_id: "laptop".into(),
            analysis_results: CliAnalysisResults {
                security: Some(SecurityReport::default()),
                ..Default::default()
            },
            local_path: "/home/dev/r4".into(),
            repo_name: None,
            analysis_id: Some(ticket.analysis_id.clone()),
        })
        .await
        .unwrap();
    assert_eq!(sync.analysis_id, ticket.analysis_id);

    let job = wait_terminal(&engine, &ticket.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    let record = engine
        .stores
        .analyses
        .get(&ticket.analysis_id)
        .await
        .unwrap()
        .unwrap();
    let security = record.partitions.get(TaskType::Security).unwrap();
    assert_eq!(security.source, ResultSource::Cli);
    let patterns = record.partitions.get(TaskType::Pattern).unwrap();
    assert_eq!(patterns.source, ResultSource::Live);
    assert_eq!(record.origin, ResultSource::Live);
    assert_eq!(record.scores.security, 100.0);
}

#[tokio::test]
async fn repeated_cli_sync_is_idempotent() {
    let engine = engine_with(test_config(), registry(vec![]), None).await;
    let bundle = CliSyncRequest {
        cli_analysis_id: "cli-42".into(),
        cli_version: "1.0.0".into(),
        machine_id: "m".into(),
        analysis_results: CliAnalysisResults {
            security: Some(SecurityReport::default()),
            findings: vec![serde_json::from_value(serde_json::json!({
                "type": "security",
                "title": "Rotate keys",
                "severity": "high"
            }))
            .unwrap()],
            ..Default::default()
        },
        local_path: "/home/dev/radar".into(),
        repo_name: Some("radar".into()),
        analysis_id: None,
    };

    let first = engine.ingestor.ingest(bundle.clone()).await.unwrap();
    let second = engine.ingestor.ingest(bundle).await.unwrap();
    assert_eq!(first, second);

    let repos = engine.stores.repositories.list().await.unwrap();
    let radar: Vec<_> = repos.iter().filter(|r| r.local_path == "/home/dev/radar").collect();
    assert_eq!(radar.len(), 1);
    let analyses = engine
        .stores
        .analyses
        .list_for_repository(&radar[0].id, 10)
        .await
        .unwrap();
    assert_eq!(analyses.len(), 1);
    assert_eq!(analyses[0].origin, ResultSource::Cli);
    assert!(analyses[0].completed_at.is_some());

    let insights = engine
        .stores
        .insights
        .list_for_analysis(&first.analysis_id, &Default::default())
        .await
        .unwrap();
    assert_eq!(insights.len(), 1);

    let status = engine.ingestor.sync_status(&first.sync_token).await.unwrap();
    assert_eq!(status.status, coderadar_core::SyncStatus::Synced);
}

#[tokio::test]
async fn cli_sync_into_unknown_analysis_is_not_found() {
    let engine = engine_with(test_config(), registry(vec![]), None).await;
    let err = engine
        .ingestor
        .ingest(CliSyncRequest {
            cli_analysis_id: "cli-x".into(),
            cli_version: String::new(),
            machine_id: String::new(),
            analysis_results: CliAnalysisResults::default(),
            local_path: "/tmp/x".into(),
            repo_name: None,
            analysis_id: Some("missing".into()),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, coderadar_core::CodeRadarError::NotFound(_)));
}

#[tokio::test]
async fn cli_sync_cannot_rewrite_a_finalized_live_analysis() {
    let engine = engine_with(test_config(), registry(vec![]), None).await;
    let ticket = engine.orchestrator.run(request("r1", "quick")).await.unwrap();
    let job = wait_terminal(&engine, &ticket.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    let before = engine
        .stores
        .analyses
        .get(&ticket.analysis_id)
        .await
        .unwrap()
        .unwrap();

    let critical = SecurityReport {
        findings: (0..5)
            .map(|i| SecurityFinding {
                rule: "hardcoded-secret".into(),
                severity: Severity::Critical,
                title: format!("secret {}", i),
                file: None,
                line: None,
            })
            .collect(),
        files_scanned: 5,
    };
    let err = engine
        .ingestor
        .ingest(CliSyncRequest {
            cli_analysis_id: "cli-late".into(),
            cli_version: "1.0.0".into(),
            machine_id: "m".into(),
            analysis_results: CliAnalysisResults {
                security: Some(critical),
                ..Default::default()
            },
            local_path: "/home/dev/r1".into(),
            repo_name: None,
            analysis_id: Some(ticket.analysis_id.clone()),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, coderadar_core::CodeRadarError::Conflict(_)));

    let after = engine
        .stores
        .analyses
        .get(&ticket.analysis_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after, before);
    assert_eq!(after.scores, before.scores);
    assert_eq!(after.partitions.len(), before.partitions.len());
    // No sync row is left behind for the rejected bundle.
    assert!(engine
        .stores
        .syncs
        .get_by_cli_analysis_id("cli-late")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn run_survives_transient_store_failures() {
    let config = test_config();
    assert!(config.persistence.max_write_retries >= 2);
    let (stores, jobs, analyses) = flaky_stores(&config, 2, 2);
    let engine = engine_with_stores(config, registry(vec![]), None, Some(stores)).await;

    let ticket = engine.orchestrator.run(request("r2", "standard")).await.unwrap();
    let job = wait_terminal(&engine, &ticket.job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.error_message.is_none());
    let report = job.result.unwrap();
    assert!(report.record.completed_at.is_some());
    assert!(report.record.partitions.security().is_some());
    assert!(jobs.writes.load(Ordering::SeqCst) > 2);
    assert!(analyses.writes.load(Ordering::SeqCst) > 2);
}

#[tokio::test]
async fn exhausted_write_retries_fail_the_job() {
    let config = test_config();
    let retries = config.persistence.max_write_retries as usize;
    let (stores, _jobs, analyses) = flaky_stores(&config, 0, usize::MAX);
    let engine = engine_with_stores(config, registry(vec![]), None, Some(stores)).await;

    let ticket = engine.orchestrator.run(request("r3", "standard")).await.unwrap();
    let job = wait_terminal(&engine, &ticket.job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.result.is_none());
    let message = job.error_message.unwrap();
    assert!(message.contains("analysis merge"), "{}", message);
    assert_eq!(analyses.writes.load(Ordering::SeqCst), retries + 1);

    let record = engine
        .stores
        .analyses
        .get(&ticket.analysis_id)
        .await
        .unwrap()
        .unwrap();
    assert!(record.partitions.is_empty());
    assert!(!record.is_finalized());
}

#[tokio::test(start_paused = true)]
async fn cancel_merges_partial_results_and_fails_job() {
    let hanging = ScriptedExecutor::new(TaskType::Structure, Script::Hang);
    let mut config = test_config();
    config.scheduler.task_timeout_secs = 3600 * 48;
    let engine = engine_with(config, registry(vec![hanging]), None).await;
    let ticket = engine.orchestrator.run(request("r1", "deep")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.orchestrator.cancel(&ticket.job_id).await.unwrap();

    let job = wait_terminal(&engine, &ticket.job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some(CANCELLED_MESSAGE));
    assert!(job.result.is_none());

    let record = engine
        .stores
        .analyses
        .get(&ticket.analysis_id)
        .await
        .unwrap()
        .unwrap();
    assert!(record.completed_at.is_some());
    assert_eq!(record.failed_tasks, vec![TaskType::Structure]);

    let again = engine.orchestrator.cancel(&ticket.job_id).await.unwrap_err();
    assert!(matches!(again, coderadar_core::CodeRadarError::Conflict(_)));
}

#[tokio::test(start_paused = true)]
async fn job_deadline_finalizes_with_partial_results() {
    let mut config = test_config();
    config.scheduler.task_timeout_secs = 3600 * 48;
    config.scheduler.job_timeout_secs = 5;
    let engine = engine_with(
        config,
        registry(vec![ScriptedExecutor::new(TaskType::Dependency, Script::Hang)]),
        Some(Arc::new(FixedSynthesizer)),
    )
    .await;
    let ticket = engine.orchestrator.run(request("r2", "deep")).await.unwrap();

    let job = wait_terminal(&engine, &ticket.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    let report = job.result.unwrap();
    // The deep phase never started; standard was cut off mid-flight.
    assert!(!report.record.results.contains_key("deep"));
    assert!(report.record.failed_tasks.contains(&TaskType::Dependency));
    assert!(report.record.partitions.structure().is_some());
    assert!(report.insights.is_empty());
}

#[tokio::test]
async fn unknown_depth_and_repository_are_rejected() {
    let engine = engine_with(test_config(), registry(vec![]), None).await;
    let err = engine.orchestrator.run(request("r1", "exhaustive")).await.unwrap_err();
    assert!(matches!(err, coderadar_core::CodeRadarError::Validation(_)));

    let err = engine.orchestrator.run(request("nope", "quick")).await.unwrap_err();
    assert!(matches!(err, coderadar_core::CodeRadarError::NotFound(_)));
    assert!(engine.stores.jobs.list(None, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn caller_supplied_job_id_is_idempotent() {
    let executor = ScriptedExecutor::new(TaskType::Structure, Script::Succeed);
    let calls = executor.calls.clone();
    let engine = engine_with(test_config(), registry(vec![executor]), None).await;
    let mut req = request("r1", "quick");
    req.job_id = Some("job-fixed".into());

    let first = engine.orchestrator.run(req.clone()).await.unwrap();
    wait_terminal(&engine, "job-fixed").await;
    let second = engine.orchestrator.run(req).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_executor_fails_the_job() {
    let mut executors = coderadar_engine::ExecutorRegistry::new();
    executors.register(Arc::new(ScriptedExecutor::new(TaskType::Structure, Script::Succeed)));
    let engine = engine_with(test_config(), executors, None).await;
    let ticket = engine.orchestrator.run(request("r1", "standard")).await.unwrap();

    let job = wait_terminal(&engine, &ticket.job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("no executor registered"));
    assert!(job.result.is_none());
}

#[tokio::test]
async fn reconcile_redrives_unfinished_jobs() {
    let engine = engine_with(test_config(), registry(vec![]), None).await;
    let job = coderadar_core::Job::new(
        "job-orphan",
        "analysis-orphan",
        "r1",
        coderadar_core::AnalysisDepth::Quick,
        None,
        RunOptions::default(),
    );
    engine
        .stores
        .analyses
        .create_if_absent(coderadar_core::AnalysisRecord::new(
            "analysis-orphan",
            "r1",
            coderadar_core::AnalysisDepth::Quick,
            ResultSource::Live,
            Some("job-orphan".into()),
        ))
        .await
        .unwrap();
    engine.stores.jobs.insert(job).await.unwrap();

    let gone = coderadar_core::Job::new(
        "job-gone",
        "analysis-gone",
        "deleted-repo",
        coderadar_core::AnalysisDepth::Quick,
        None,
        RunOptions::default(),
    );
    engine.stores.jobs.insert(gone).await.unwrap();

    assert_eq!(engine.orchestrator.reconcile_interrupted().await.unwrap(), 1);
    let job = wait_terminal(&engine, "job-orphan").await;
    assert_eq!(job.status, JobStatus::Completed);
    let gone = engine.orchestrator.job("job-gone").await.unwrap();
    assert_eq!(gone.status, JobStatus::Failed);
}

#[tokio::test]
async fn event_stream_reports_monotonic_progress() {
    let engine = engine_with(test_config(), registry(vec![]), None).await;
    let mut req = request("r1", "deep");
    req.job_id = Some("job-stream".into());
    let mut stream = engine.stores.events.subscribe(&topic_for("job-stream"));
    engine.orchestrator.run(req).await.unwrap();

    let mut last = 0.0;
    let mut last_seq = 0;
    let mut terminal = None;
    while let Some(delivery) = stream.next().await {
        let Delivery::Event(event) = delivery else {
            panic!("subscriber lagged");
        };
        assert!(event.seq > last_seq);
        last_seq = event.seq;
        match event.kind {
            EventKind::Progress { percent, .. } => {
                assert!(percent >= last, "{} < {}", percent, last);
                last = percent;
            }
            other => terminal = Some(other),
        }
    }
    assert!(matches!(terminal, Some(EventKind::Completed { .. })));
    assert!(last < 100.0);
}
