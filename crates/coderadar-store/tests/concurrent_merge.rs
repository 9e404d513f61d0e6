//! Concurrent writers on one analysis record.

use coderadar_core::{
    AnalysisDepth, AnalysisRecord, AnalysisStore, CodeRadarError, MergeBatch, PartitionEntry,
    PatternReport, Phase, ResultSource, SecurityReport, TaskPayload, TaskType,
};
use coderadar_store::MemoryAnalysisStore;
use std::sync::Arc;

fn batch(source: ResultSource, phase: Option<Phase>, payload: TaskPayload) -> MergeBatch {
    let mut batch = MergeBatch::empty(source);
    let key = phase.map(|p| p.as_str()).unwrap_or("cli").to_string();
    batch
        .results
        .entry(key)
        .or_default()
        .insert(payload.task_type(), payload.clone());
    batch.partitions.insert(PartitionEntry {
        source,
        phase,
        payload,
    });
    batch
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disjoint_partitions_survive_concurrent_writers() {
    let store = Arc::new(MemoryAnalysisStore::new());
    store
        .create_if_absent(AnalysisRecord::new(
            "a1",
            "r1",
            AnalysisDepth::Deep,
            ResultSource::Live,
            Some("j1".into()),
        ))
        .await
        .unwrap();

    let live = batch(
        ResultSource::Live,
        Some(Phase::Standard),
        TaskPayload::Pattern(PatternReport::default()),
    );
    let cli = batch(
        ResultSource::Cli,
        None,
        TaskPayload::Security(SecurityReport::default()),
    );

    let mut handles = Vec::new();
    for i in 0..50 {
        let store = store.clone();
        let b = if i % 2 == 0 { live.clone() } else { cli.clone() };
        handles.push(tokio::spawn(async move {
            store.merge("a1", &b, false).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let record = store.get("a1").await.unwrap().unwrap();
    assert_eq!(
        record.partitions.get(TaskType::Pattern).map(|e| e.source),
        Some(ResultSource::Live)
    );
    assert_eq!(
        record.partitions.get(TaskType::Security).map(|e| e.source),
        Some(ResultSource::Cli)
    );
    assert_eq!(record.scores.security, 100.0);
}

#[tokio::test]
async fn merge_into_missing_record_fails() {
    let store = MemoryAnalysisStore::new();
    let b = MergeBatch::empty(ResultSource::Cli);
    assert!(store.merge("missing", &b, false).await.is_err());
}

#[tokio::test]
async fn finalized_record_rejects_a_foreign_source() {
    let store = MemoryAnalysisStore::new();
    store
        .create_if_absent(AnalysisRecord::new(
            "a1",
            "r1",
            AnalysisDepth::Quick,
            ResultSource::Live,
            Some("j1".into()),
        ))
        .await
        .unwrap();
    let live = batch(
        ResultSource::Live,
        Some(Phase::Quick),
        TaskPayload::Security(SecurityReport::default()),
    );
    let finalized = store.merge("a1", &live, true).await.unwrap();

    let cli = batch(
        ResultSource::Cli,
        None,
        TaskPayload::Pattern(PatternReport::default()),
    );
    assert!(matches!(
        store.merge("a1", &cli, false).await,
        Err(CodeRadarError::Conflict(_))
    ));
    assert_eq!(store.get("a1").await.unwrap().unwrap(), finalized);

    // The owner may re-apply its own batch, e.g. when a run is re-driven.
    let again = store.merge("a1", &live, true).await.unwrap();
    assert_eq!(again.partitions, finalized.partitions);
    assert_eq!(again.completed_at, finalized.completed_at);
}
