use std::path::Path as FsPath;
use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::info;

use crate::api::types::{
    CreateMeetingRequest, FinalizeResponse, HealthResponse, JobsListResponse, JobsQuery,
    ProcessAudioResponse, SegmentIngestRequest, SegmentIngestResponse, StatsResponse,
    SummaryQuery,
};
use crate::audio::transcription::{is_supported_format, supported_formats_list};
use crate::database::models::{Job, JobType, Meeting, Summary, SummaryType};
use crate::database::repositories::{
    JobsRepository, MeetingsRepository, SegmentsRepository, SummariesRepository,
};
use crate::error::AppError;
use crate::notifications::StreamEvent;
use crate::state::AppContext;
use crate::summary::chunker::estimate_tokens;

pub async fn service_info() -> Json<Value> {
    Json(json!({
        "service": "recapd",
        "version": env!("CARGO_PKG_VERSION"),
        "health": "/healthz",
        "endpoints": {
            "create_meeting": "/meetings",
            "ingest_segment": "/ingest/segment",
            "summary": "/meetings/{id}/summary",
            "finalize": "/meetings/{id}/finalize",
            "stream": "/meetings/{id}/stream",
            "process_audio": "/process-audio",
            "jobs": "/jobs",
            "stats": "/stats",
        },
    }))
}

pub async fn create_meeting(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<CreateMeetingRequest>,
) -> Result<Json<Meeting>, AppError> {
    let metadata = request.metadata.unwrap_or_else(|| json!({}));
    let meeting = MeetingsRepository::create(ctx.pool(), &request.title, metadata).await?;
    info!("created meeting {} ({})", meeting.id, meeting.title);
    Ok(Json(meeting))
}

/// Appends one transcript segment. Token counting on this hot path uses the
/// cheap estimator; the chunker's tokenizer is authoritative inside jobs.
/// Crossing the batch threshold enqueues a chunk-summary job, with the batch
/// monitor as the safety net behind this advisory check.
pub async fn ingest_segment(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<SegmentIngestRequest>,
) -> Result<Json<SegmentIngestResponse>, AppError> {
    let ts = DateTime::parse_from_rfc3339(&request.timestamp_iso)
        .map_err(|_| AppError::Validation("invalid timestamp format".into()))?
        .with_timezone(&Utc);

    if request.text_segment.chars().count() > ctx.config.max_input_length {
        return Err(AppError::Validation(format!(
            "text segment exceeds the {}-character limit",
            ctx.config.max_input_length
        )));
    }

    let pool = ctx.pool();
    let meeting = MeetingsRepository::get(pool, &request.meeting_id)
        .await?
        .ok_or_else(|| AppError::NotFound("meeting not found".into()))?;
    if meeting.finalized {
        return Err(AppError::Conflict("meeting already finalized".into()));
    }

    let token_count = estimate_tokens(&request.text_segment, ctx.config.chars_per_token) as i64;
    let tokens_before = SegmentsRepository::total_tokens(pool, &meeting.id).await?;

    let segment = SegmentsRepository::create(
        pool,
        &meeting.id,
        &request.speaker,
        ts,
        &request.text_segment,
        token_count,
    )
    .await?;

    let tokens_after = tokens_before + token_count;
    if tokens_before < ctx.config.batch_tokens && tokens_after >= ctx.config.batch_tokens {
        JobsRepository::enqueue(pool, &meeting.id, JobType::ChunkSummary, json!({})).await?;
        info!(
            "triggered chunk summary job for meeting {} ({} tokens)",
            meeting.id, tokens_after
        );
    }

    let count = SegmentsRepository::count_by_meeting(pool, &meeting.id).await?;
    ctx.bus.broadcast(
        &meeting.id,
        StreamEvent::SegmentAdded {
            segment_id: segment.id.clone(),
            count,
        },
    );

    Ok(Json(SegmentIngestResponse {
        segment_id: segment.id,
        status: "accepted",
    }))
}

pub async fn get_summary(
    State(ctx): State<Arc<AppContext>>,
    Path(meeting_id): Path<String>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<Option<Summary>>, AppError> {
    let pool = ctx.pool();
    MeetingsRepository::get(pool, &meeting_id)
        .await?
        .ok_or_else(|| AppError::NotFound("meeting not found".into()))?;

    let summary_type = match query.summary_type.as_deref() {
        None => None,
        Some(raw) => Some(SummaryType::parse(raw).ok_or_else(|| {
            AppError::Validation(format!(
                "unknown summary type '{}', expected incremental or final",
                raw
            ))
        })?),
    };

    let summary = SummariesRepository::latest(pool, &meeting_id, summary_type).await?;
    Ok(Json(summary))
}

/// Idempotent: the second finalize reports `already_finalized` and enqueues
/// nothing.
pub async fn finalize_meeting(
    State(ctx): State<Arc<AppContext>>,
    Path(meeting_id): Path<String>,
) -> Result<Json<FinalizeResponse>, AppError> {
    let pool = ctx.pool();
    let meeting = MeetingsRepository::get(pool, &meeting_id)
        .await?
        .ok_or_else(|| AppError::NotFound("meeting not found".into()))?;

    if meeting.finalized {
        return Ok(Json(FinalizeResponse {
            status: "already_finalized",
            meeting_id,
        }));
    }

    let flipped = MeetingsRepository::finalize_and_enqueue(pool, &meeting_id).await?;
    Ok(Json(FinalizeResponse {
        status: if flipped { "finalized" } else { "already_finalized" },
        meeting_id,
    }))
}

/// Accepts an audio upload, stores it in the input directory and enqueues a
/// process-audio job against a synthetic meeting. The job is enqueued before
/// the file write lands; the worker retries until the bytes are visible.
pub async fn process_audio(
    State(ctx): State<Arc<AppContext>>,
    mut multipart: Multipart,
) -> Result<Json<ProcessAudioResponse>, AppError> {
    let mut upload: Option<(String, axum::body::Bytes)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("invalid multipart body: {}", e)))?
    {
        if field.name() == Some("file") {
            let filename = field
                .file_name()
                .map(str::to_string)
                .ok_or_else(|| AppError::Validation("filename is required".into()))?;
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::Validation(format!("failed to read upload: {}", e)))?;
            upload = Some((filename, bytes));
            break;
        }
    }

    let (raw_filename, bytes) =
        upload.ok_or_else(|| AppError::Validation("file field is required".into()))?;

    // Strip any client-supplied directory components.
    let filename = FsPath::new(&raw_filename)
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| AppError::Validation("filename is required".into()))?
        .to_string();

    if !is_supported_format(&filename) {
        return Err(AppError::Validation(format!(
            "unsupported format: {}. Supported: {}",
            filename,
            supported_formats_list()
        )));
    }

    let pool = ctx.pool();
    let path = ctx.config.input_dir.join(&filename);
    let meeting = MeetingsRepository::create(
        pool,
        &filename,
        json!({"source": "audio", "filename": filename}),
    )
    .await?;
    let job = JobsRepository::enqueue(
        pool,
        &meeting.id,
        JobType::ProcessAudio,
        json!({"path": path.to_string_lossy(), "filename": filename}),
    )
    .await?;

    tokio::fs::create_dir_all(&ctx.config.input_dir)
        .await
        .map_err(|e| AppError::Internal(format!("failed to create input directory: {}", e)))?;
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| AppError::Internal(format!("failed to store upload: {}", e)))?;

    info!("audio uploaded: {} ({} bytes), job {}", filename, bytes.len(), job.id);
    Ok(Json(ProcessAudioResponse {
        job_id: job.id,
        filename,
        status: job.status,
        message: "file queued for processing",
    }))
}

pub async fn get_job(
    State(ctx): State<Arc<AppContext>>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, AppError> {
    let job = JobsRepository::get(ctx.pool(), &job_id)
        .await?
        .ok_or_else(|| AppError::NotFound("job not found".into()))?;
    Ok(Json(job))
}

pub async fn list_jobs(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<JobsQuery>,
) -> Result<Json<JobsListResponse<Job>>, AppError> {
    let jobs = JobsRepository::list(ctx.pool(), query.limit).await?;
    let total = jobs.len();
    Ok(Json(JobsListResponse { jobs, total }))
}

pub async fn get_stats(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<StatsResponse>, AppError> {
    let by_status = JobsRepository::counts_by_status(ctx.pool()).await?;
    let total = by_status.values().sum();
    let queue_size = by_status.get("pending").copied().unwrap_or(0);
    Ok(Json(StatsResponse {
        total,
        by_status,
        queue_size,
    }))
}

pub async fn healthz(State(ctx): State<Arc<AppContext>>) -> Json<HealthResponse> {
    let database = match sqlx::query("SELECT 1").execute(ctx.pool()).await {
        Ok(_) => "healthy".to_string(),
        Err(e) => format!("unhealthy: {}", e),
    };
    let inference = if ctx.inference.health().await {
        "healthy".to_string()
    } else {
        "unreachable".to_string()
    };

    let status = if database == "healthy" && inference == "healthy" {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        database,
        inference,
        timestamp: Utc::now(),
    })
}
