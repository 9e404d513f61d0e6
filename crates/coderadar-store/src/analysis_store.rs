use async_trait::async_trait;
use chrono::Utc;
use coderadar_core::{AnalysisRecord, AnalysisStore, CodeRadarError, MergeBatch, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

#[derive(Default)]
pub struct MemoryAnalysisStore {
    records: DashMap<String, AnalysisRecord>,
}

impl MemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnalysisStore for MemoryAnalysisStore {
    async fn create_if_absent(&self, record: AnalysisRecord) -> Result<bool> {
        match self.records.entry(record.analysis_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
        }
    }

    async fn get(&self, analysis_id: &str) -> Result<Option<AnalysisRecord>> {
        Ok(self.records.get(analysis_id).map(|r| r.clone()))
    }

    async fn merge(
        &self,
        analysis_id: &str,
        batch: &MergeBatch,
        finalize: bool,
    ) -> Result<AnalysisRecord> {
        let mut record = self
            .records
            .get_mut(analysis_id)
            .ok_or_else(|| CodeRadarError::NotFound(format!("analysis {}", analysis_id)))?;
        if !record.accepts_writes_from(batch.source) {
            return Err(CodeRadarError::Conflict(format!(
                "analysis {} was finalized by its {} owner",
                analysis_id,
                record.origin.as_str()
            )));
        }
        record.apply(batch);
        if finalize {
            record.finalize(Utc::now());
        }
        debug!(
            analysis_id,
            source = batch.source.as_str(),
            partitions = record.partitions.len(),
            "merged batch into analysis"
        );
        Ok(record.clone())
    }

    async fn list_for_repository(
        &self,
        repository_id: &str,
        limit: usize,
    ) -> Result<Vec<AnalysisRecord>> {
        let mut records: Vec<AnalysisRecord> = self
            .records
            .iter()
            .filter(|r| r.repository_id == repository_id)
            .map(|r| r.clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }
}
