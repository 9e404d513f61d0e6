use async_trait::async_trait;
use chrono::Utc;
use coderadar_core::{
    CodeRadarError, Insight, InsightFilter, InsightStatus, InsightStore, Result,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::cmp::Ordering;

#[derive(Default)]
pub struct MemoryInsightStore {
    insights: DashMap<String, Insight>,
}

impl MemoryInsightStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InsightStore for MemoryInsightStore {
    async fn upsert(&self, insights: Vec<Insight>) -> Result<Vec<Insight>> {
        let mut stored = Vec::with_capacity(insights.len());
        for insight in insights {
            match self.insights.entry(insight.insight_id.clone()) {
                Entry::Occupied(mut existing) => {
                    let row = existing.get_mut();
                    row.insight_type = insight.insight_type;
                    row.title = insight.title;
                    row.description = insight.description;
                    row.severity = insight.severity;
                    row.recommendation = insight.recommendation;
                    row.confidence = insight.confidence;
                    stored.push(row.clone());
                }
                Entry::Vacant(slot) => {
                    stored.push(insight.clone());
                    slot.insert(insight);
                }
            }
        }
        Ok(stored)
    }

    async fn get(&self, insight_id: &str) -> Result<Option<Insight>> {
        Ok(self.insights.get(insight_id).map(|i| i.clone()))
    }

    async fn list_for_analysis(
        &self,
        analysis_id: &str,
        filter: &InsightFilter,
    ) -> Result<Vec<Insight>> {
        let mut rows: Vec<Insight> = self
            .insights
            .iter()
            .filter(|i| i.analysis_id == analysis_id && filter.matches(i))
            .map(|i| i.clone())
            .collect();
        rows.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.insight_id.cmp(&b.insight_id))
        });
        Ok(rows)
    }

    async fn transition(&self, insight_id: &str, target: InsightStatus) -> Result<Insight> {
        let mut insight = self
            .insights
            .get_mut(insight_id)
            .ok_or_else(|| CodeRadarError::NotFound(format!("insight {}", insight_id)))?;
        insight.transition(target, Utc::now())?;
        Ok(insight.clone())
    }
}
