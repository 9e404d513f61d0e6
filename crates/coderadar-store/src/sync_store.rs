use async_trait::async_trait;
use chrono::Utc;
use coderadar_core::{CodeRadarError, Result, SyncRecord, SyncReservation, SyncStore};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Sync records keyed by `cli_analysis_id`, with a token index for lookups.
#[derive(Default)]
pub struct MemorySyncStore {
    by_cli_id: DashMap<String, SyncRecord>,
    tokens: DashMap<String, String>,
}

impl MemorySyncStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncStore for MemorySyncStore {
    async fn reserve(&self, record: SyncRecord) -> Result<SyncReservation> {
        match self.by_cli_id.entry(record.cli_analysis_id.clone()) {
            Entry::Occupied(existing) => Ok(SyncReservation::Existing(existing.get().clone())),
            Entry::Vacant(slot) => {
                self.tokens
                    .insert(record.sync_token.clone(), record.cli_analysis_id.clone());
                slot.insert(record.clone());
                Ok(SyncReservation::Created(record))
            }
        }
    }

    async fn mark_synced(&self, sync_token: &str) -> Result<SyncRecord> {
        let cli_id = self
            .tokens
            .get(sync_token)
            .map(|id| id.clone())
            .ok_or_else(|| CodeRadarError::NotFound(format!("sync token {}", sync_token)))?;
        let mut record = self
            .by_cli_id
            .get_mut(&cli_id)
            .ok_or_else(|| CodeRadarError::NotFound(format!("sync record {}", cli_id)))?;
        record.mark_synced(Utc::now());
        Ok(record.clone())
    }

    async fn get_by_token(&self, sync_token: &str) -> Result<Option<SyncRecord>> {
        let Some(cli_id) = self.tokens.get(sync_token).map(|id| id.clone()) else {
            return Ok(None);
        };
        Ok(self.by_cli_id.get(&cli_id).map(|r| r.clone()))
    }

    async fn get_by_cli_analysis_id(&self, cli_analysis_id: &str) -> Result<Option<SyncRecord>> {
        Ok(self.by_cli_id.get(cli_analysis_id).map(|r| r.clone()))
    }
}
