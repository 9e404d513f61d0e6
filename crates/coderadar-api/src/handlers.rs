use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use coderadar_core::{
    AnalysisReport, CliSyncRequest, CliSyncResponse, CodeRadarError, Insight, InsightFilter,
    InsightStatus, Job, JobStatus, RepositoryDescriptor, RunOptions, SyncRecord,
};
use coderadar_engine::{AnalyzeRequest, JobTicket};
use serde::{Deserialize, Serialize};

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        started_at: state.started_at,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeBody {
    #[serde(default)]
    pub analysis_depth: Option<String>,
    #[serde(default)]
    pub requester: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(flatten)]
    pub options: RunOptions,
}

pub async fn start_analysis(
    State(state): State<AppState>,
    Path(repository_id): Path<String>,
    body: Option<Json<AnalyzeBody>>,
) -> ApiResult<(StatusCode, Json<JobTicket>)> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let request = AnalyzeRequest {
        repository_id,
        analysis_depth: body
            .analysis_depth
            .unwrap_or_else(|| coderadar_core::AnalysisDepth::default().to_string()),
        requester: body.requester,
        options: body.options,
        job_id: body.job_id,
    };
    let ticket = state.engine.orchestrator.run(request).await?;
    Ok((StatusCode::ACCEPTED, Json(ticket)))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.engine.orchestrator.job(&job_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> ApiResult<Json<Vec<Job>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()?;
    let jobs = state
        .engine
        .stores
        .jobs
        .list(status, clamp_limit(query.limit))
        .await?;
    Ok(Json(jobs))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    state.engine.orchestrator.cancel(&job_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "job_id": job_id, "status": "cancelling" })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRepositoryRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub path: String,
}

pub async fn register_repository(
    State(state): State<AppState>,
    Json(request): Json<RegisterRepositoryRequest>,
) -> ApiResult<(StatusCode, Json<RepositoryDescriptor>)> {
    if request.name.trim().is_empty() || request.path.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "name and path must not be empty".to_string(),
        ));
    }
    let descriptor = match request.id.filter(|id| !id.trim().is_empty()) {
        Some(id) => RepositoryDescriptor::new(id, request.name, request.path),
        None => RepositoryDescriptor::generated(request.name, request.path),
    };
    let stored = state.engine.stores.repositories.register(descriptor).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn list_repositories(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<RepositoryDescriptor>>> {
    Ok(Json(state.engine.stores.repositories.list().await?))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

pub async fn list_repository_analyses(
    State(state): State<AppState>,
    Path(repository_id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Vec<coderadar_core::AnalysisRecord>>> {
    let stores = &state.engine.stores;
    if stores.repositories.get(&repository_id).await?.is_none() {
        return Err(CodeRadarError::NotFound(format!("repository {}", repository_id)).into());
    }
    let records = stores
        .analyses
        .list_for_repository(&repository_id, clamp_limit(query.limit))
        .await?;
    Ok(Json(records))
}

pub async fn get_analysis(
    State(state): State<AppState>,
    Path(analysis_id): Path<String>,
) -> ApiResult<Json<AnalysisReport>> {
    let stores = &state.engine.stores;
    let record = stores
        .analyses
        .get(&analysis_id)
        .await?
        .ok_or_else(|| CodeRadarError::NotFound(format!("analysis {}", analysis_id)))?;
    let insights = stores
        .insights
        .list_for_analysis(&analysis_id, &InsightFilter::default())
        .await?;
    Ok(Json(AnalysisReport { record, insights }))
}

#[derive(Debug, Deserialize)]
pub struct InsightQuery {
    pub status: Option<String>,
    pub insight_type: Option<String>,
}

pub async fn list_insights(
    State(state): State<AppState>,
    Path(analysis_id): Path<String>,
    Query(query): Query<InsightQuery>,
) -> ApiResult<Json<Vec<Insight>>> {
    let stores = &state.engine.stores;
    if stores.analyses.get(&analysis_id).await?.is_none() {
        return Err(CodeRadarError::NotFound(format!("analysis {}", analysis_id)).into());
    }
    let filter = InsightFilter {
        status: query
            .status
            .as_deref()
            .map(str::parse::<InsightStatus>)
            .transpose()?,
        insight_type: query.insight_type,
    };
    Ok(Json(
        stores.insights.list_for_analysis(&analysis_id, &filter).await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct InsightStatusRequest {
    pub status: String,
}

pub async fn update_insight_status(
    State(state): State<AppState>,
    Path(insight_id): Path<String>,
    Json(request): Json<InsightStatusRequest>,
) -> ApiResult<Json<Insight>> {
    let target: InsightStatus = request.status.parse()?;
    let insight = state
        .engine
        .stores
        .insights
        .transition(&insight_id, target)
        .await?;
    tracing::info!(insight_id = %insight_id, status = %target.as_str(), "insight status updated");
    Ok(Json(insight))
}

pub async fn cli_sync(
    State(state): State<AppState>,
    Json(request): Json<CliSyncRequest>,
) -> ApiResult<Json<CliSyncResponse>> {
    Ok(Json(state.engine.ingestor.ingest(request).await?))
}

pub async fn cli_sync_status(
    State(state): State<AppState>,
    Path(sync_token): Path<String>,
) -> ApiResult<Json<SyncRecord>> {
    Ok(Json(state.engine.ingestor.sync_status(&sync_token).await?))
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}
