use crate::{handlers, sse, AppState};
use axum::{
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Analyses
        .route("/analyze/{repository_id}", post(handlers::start_analysis))
        .route("/analyses/{analysis_id}", get(handlers::get_analysis))
        .route("/analyses/{analysis_id}/insights", get(handlers::list_insights))
        // Jobs
        .route("/jobs", get(handlers::list_jobs))
        .route(
            "/jobs/{job_id}",
            get(handlers::get_job).delete(handlers::cancel_job),
        )
        .route("/jobs/{job_id}/events", get(sse::job_events))
        // Repositories
        .route(
            "/repositories",
            get(handlers::list_repositories).post(handlers::register_repository),
        )
        .route(
            "/repositories/{repository_id}/analyses",
            get(handlers::list_repository_analyses),
        )
        // Insights
        .route(
            "/insights/{insight_id}/status",
            put(handlers::update_insight_status),
        )
        // CLI sync
        .route("/cli/sync", post(handlers::cli_sync))
        .route("/cli/sync/{sync_token}", get(handlers::cli_sync_status))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(tower_http::cors::Any)
                        .allow_methods(tower_http::cors::Any)
                        .allow_headers(tower_http::cors::Any),
                ),
        )
}
