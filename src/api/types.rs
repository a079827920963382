use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::models::JobStatus;

#[derive(Debug, Deserialize)]
pub struct CreateMeetingRequest {
    pub title: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct SegmentIngestRequest {
    pub meeting_id: String,
    pub speaker: String,
    pub timestamp_iso: String,
    pub text_segment: String,
}

#[derive(Debug, Serialize)]
pub struct SegmentIngestResponse {
    pub segment_id: String,
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    #[serde(default)]
    pub summary_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FinalizeResponse {
    pub status: &'static str,
    pub meeting_id: String,
}

#[derive(Debug, Serialize)]
pub struct ProcessAudioResponse {
    pub job_id: String,
    pub filename: String,
    pub status: JobStatus,
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    #[serde(default = "default_jobs_limit")]
    pub limit: i64,
}

fn default_jobs_limit() -> i64 {
    100
}

#[derive(Debug, Serialize)]
pub struct JobsListResponse<T> {
    pub jobs: Vec<T>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total: i64,
    pub by_status: HashMap<&'static str, i64>,
    pub queue_size: i64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: String,
    pub inference: String,
    pub timestamp: DateTime<Utc>,
}
