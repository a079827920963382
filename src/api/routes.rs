use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::api::{handlers, ws};
use crate::state::AppContext;

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/", get(handlers::service_info))
        .route("/meetings", post(handlers::create_meeting))
        .route("/ingest/segment", post(handlers::ingest_segment))
        .route("/meetings/{meeting_id}/summary", get(handlers::get_summary))
        .route("/meetings/{meeting_id}/finalize", post(handlers::finalize_meeting))
        .route("/meetings/{meeting_id}/stream", get(ws::stream))
        .route("/process-audio", post(handlers::process_audio))
        .route("/jobs/{job_id}", get(handlers::get_job))
        .route("/jobs", get(handlers::list_jobs))
        .route("/stats", get(handlers::get_stats))
        .route("/healthz", get(handlers::healthz))
        .with_state(ctx)
}
