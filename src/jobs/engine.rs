use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::database::models::{Job, JobType, Segment, SummaryContent, SummaryType};
use crate::database::repositories::{
    JobsRepository, MeetingsRepository, SegmentsRepository, SummariesRepository,
};
use crate::state::AppContext;
use crate::summary::chunker::estimate_tokens;
use crate::summary::llm_client::extract_json;
use crate::summary::prompts::{build_annotation_prompt, build_chunk_prompt};

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_COMPLETION_TOKENS: u32 = 1024;
const COMPLETION_TEMPERATURE: f32 = 0.3;
const COMPLETION_STOP: &[&str] = &["User", "Assistant"];

/// How a dispatched job failed, which decides its next lifecycle transition.
#[derive(Debug)]
enum JobFailure {
    /// Nothing to do or unusable model output. The job completes with no
    /// output; retrying would loop forever on the same input.
    Skip(String),
    /// Transient failure; requeue with backoff while attempts remain.
    Retry(String),
    /// Unrecoverable; the job fails without touching other meetings.
    Fatal(String),
}

fn db_failure(e: sqlx::Error) -> JobFailure {
    JobFailure::Retry(format!("database error: {}", e))
}

/// Starts the configured number of parallel worker loops.
pub fn spawn_workers(ctx: Arc<AppContext>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
    let count = ctx.config.worker_count();
    info!("starting {} job workers", count);
    (0..count)
        .map(|worker_id| {
            let ctx = ctx.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(worker_loop(ctx, shutdown, worker_id))
        })
        .collect()
}

/// Returns true when the shutdown signal fired before the delay elapsed.
async fn wait(shutdown: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

async fn worker_loop(ctx: Arc<AppContext>, shutdown: CancellationToken, worker_id: usize) {
    debug!("worker {} started", worker_id);

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let claimed = match JobsRepository::claim_pending(ctx.pool(), ctx.config.claim_batch).await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("worker {}: failed to claim jobs: {}", worker_id, e);
                if wait(&shutdown, Duration::from_secs(5)).await {
                    break;
                }
                continue;
            }
        };

        if claimed.is_empty() {
            if wait(&shutdown, POLL_INTERVAL).await {
                break;
            }
            continue;
        }

        // Backoff requested by a failed job is slept here, after the job has
        // been requeued, never while holding it.
        let mut pause: Option<u64> = None;
        for job in &claimed {
            if shutdown.is_cancelled() {
                // Hand unstarted claims back so they survive the restart.
                if let Err(e) =
                    JobsRepository::requeue(ctx.pool(), &job.id, "interrupted by shutdown").await
                {
                    error!("worker {}: failed to requeue job {}: {}", worker_id, job.id, e);
                }
                continue;
            }
            if let Some(backoff) = process_job(&ctx, &shutdown, job).await {
                pause = Some(pause.map_or(backoff, |p| p.max(backoff)));
            }
        }

        if let Some(secs) = pause {
            if wait(&shutdown, Duration::from_secs(secs)).await {
                break;
            }
        }
    }

    debug!("worker {} stopped", worker_id);
}

/// Dispatches one claimed job and applies the retry policy. Returns the
/// backoff in seconds the worker should sleep before its next iteration.
async fn process_job(
    ctx: &Arc<AppContext>,
    shutdown: &CancellationToken,
    job: &Job,
) -> Option<u64> {
    info!(
        "processing job {} ({}) for meeting {}, attempt {}",
        job.id, job.job_type, job.meeting_id, job.attempts
    );

    let result = dispatch(ctx, shutdown, job).await;
    let pool = ctx.pool();

    match result {
        Ok(()) => {
            if let Err(e) = JobsRepository::mark_completed(pool, &job.id).await {
                error!("failed to mark job {} completed: {}", job.id, e);
            } else {
                info!("job {} completed successfully", job.id);
            }
            None
        }
        Err(JobFailure::Skip(reason)) => {
            warn!("job {} completed without output: {}", job.id, reason);
            if let Err(e) = JobsRepository::mark_completed_with_note(pool, &job.id, &reason).await {
                error!("failed to mark job {} completed: {}", job.id, e);
            }
            None
        }
        Err(JobFailure::Retry(reason)) => {
            if job.attempts >= ctx.config.max_retries {
                error!("job {} failed after {} attempts: {}", job.id, job.attempts, reason);
                if let Err(e) = JobsRepository::mark_failed(pool, &job.id, &reason).await {
                    error!("failed to mark job {} failed: {}", job.id, e);
                }
                None
            } else {
                let backoff = ctx.config.backoff_base.saturating_pow(job.attempts as u32);
                warn!(
                    "job {} failed, retry {}/{} after {}s: {}",
                    job.id, job.attempts, ctx.config.max_retries, backoff, reason
                );
                if let Err(e) = JobsRepository::requeue(pool, &job.id, &reason).await {
                    error!("failed to requeue job {}: {}", job.id, e);
                }
                Some(backoff)
            }
        }
        Err(JobFailure::Fatal(reason)) => {
            error!("job {} failed: {}", job.id, reason);
            if let Err(e) = JobsRepository::mark_failed(pool, &job.id, &reason).await {
                error!("failed to mark job {} failed: {}", job.id, e);
            }
            None
        }
    }
}

async fn dispatch(
    ctx: &Arc<AppContext>,
    shutdown: &CancellationToken,
    job: &Job,
) -> Result<(), JobFailure> {
    match job.job_type {
        JobType::ChunkSummary => handle_chunk_summary(ctx, shutdown, job).await,
        JobType::ComposeSummary => handle_compose_summary(ctx, shutdown, job).await,
        JobType::AnnotateActionItems => handle_annotate_action_items(ctx, shutdown, job).await,
        JobType::ProcessAudio => handle_process_audio(ctx, shutdown, job).await,
    }
}

/// Runs one inference call under the shutdown signal; an in-flight call is
/// abandoned when the signal fires.
async fn complete_prompt(
    ctx: &Arc<AppContext>,
    shutdown: &CancellationToken,
    prompt: &str,
) -> Result<String, JobFailure> {
    let call = ctx.inference.complete(
        prompt,
        MAX_COMPLETION_TOKENS,
        COMPLETION_TEMPERATURE,
        COMPLETION_STOP,
    );

    let result = tokio::select! {
        _ = shutdown.cancelled() => return Err(JobFailure::Retry("interrupted by shutdown".into())),
        result = call => result,
    };

    result.map_err(|e| {
        if e.is_retryable() {
            JobFailure::Retry(e.to_string())
        } else {
            JobFailure::Fatal(e.to_string())
        }
    })
}

fn parse_chunk_summary(raw: &str) -> Result<SummaryContent, serde_json::Error> {
    serde_json::from_str(extract_json(raw))
}

/// Summarizes the given segments chunk by chunk, persisting one incremental
/// summary per parseable completion. Returns (persisted, chunk_count);
/// unparseable output is logged and skipped, never retried.
async fn summarize_segments(
    ctx: &Arc<AppContext>,
    shutdown: &CancellationToken,
    meeting_id: &str,
    segments: &[Segment],
) -> Result<(usize, usize), JobFailure> {
    let chunks = ctx.chunker.chunk_segments(segments);
    let mut persisted = 0;

    for chunk in &chunks {
        let prompt = build_chunk_prompt(chunk);
        let raw = complete_prompt(ctx, shutdown, &prompt).await?;

        match parse_chunk_summary(&raw) {
            Ok(mut content) => {
                for decision in &mut content.decisions {
                    decision.source_segment_ids = chunk.segment_ids.clone();
                }
                for item in &mut content.action_items {
                    item.source_segment_ids = chunk.segment_ids.clone();
                }

                SummariesRepository::create(
                    ctx.pool(),
                    &ctx.updates,
                    meeting_id,
                    SummaryType::Incremental,
                    content,
                )
                .await
                .map_err(db_failure)?;
                persisted += 1;
            }
            Err(e) => {
                warn!(
                    "discarding unparseable model output for meeting {}: {}",
                    meeting_id, e
                );
            }
        }
    }

    Ok((persisted, chunks.len()))
}

async fn handle_chunk_summary(
    ctx: &Arc<AppContext>,
    shutdown: &CancellationToken,
    job: &Job,
) -> Result<(), JobFailure> {
    let segments = SegmentsRepository::list_by_meeting(ctx.pool(), &job.meeting_id)
        .await
        .map_err(db_failure)?;

    if segments.is_empty() {
        return Err(JobFailure::Skip("no segments to summarize".into()));
    }

    let (persisted, chunk_count) =
        summarize_segments(ctx, shutdown, &job.meeting_id, &segments).await?;

    if persisted == 0 {
        return Err(JobFailure::Skip(
            "model output could not be parsed into a summary".into(),
        ));
    }

    info!(
        "created {} incremental summaries from {} chunks for meeting {}",
        persisted, chunk_count, job.meeting_id
    );
    Ok(())
}

/// Composes the final summary. Segments that arrived after the last chunk
/// run are summarized inline first, so a meeting that never crossed the
/// batch threshold still gets real content; the merge then covers every
/// incremental in creation order. Exactly one final row is written per run.
async fn handle_compose_summary(
    ctx: &Arc<AppContext>,
    shutdown: &CancellationToken,
    job: &Job,
) -> Result<(), JobFailure> {
    let pool = ctx.pool();
    let meeting_id = &job.meeting_id;

    let watermark = SummariesRepository::latest_incremental_created_at(pool, meeting_id)
        .await
        .map_err(db_failure)?;
    let tail = match watermark {
        Some(since) => SegmentsRepository::list_created_after(pool, meeting_id, since)
            .await
            .map_err(db_failure)?,
        None => SegmentsRepository::list_by_meeting(pool, meeting_id)
            .await
            .map_err(db_failure)?,
    };

    if !tail.is_empty() {
        let (persisted, chunk_count) =
            summarize_segments(ctx, shutdown, meeting_id, &tail).await?;
        debug!(
            "compose summarized {} trailing chunks ({} persisted) for meeting {}",
            chunk_count, persisted, meeting_id
        );
    }

    let incrementals = SummariesRepository::list_incremental(pool, meeting_id)
        .await
        .map_err(db_failure)?;
    if incrementals.is_empty() {
        warn!("no incremental summaries for meeting {}", meeting_id);
    }

    let contents: Vec<SummaryContent> = incrementals.into_iter().map(|s| s.content.0).collect();
    let merged = ctx.merger.merge(&contents);

    SummariesRepository::create(pool, &ctx.updates, meeting_id, SummaryType::Final, merged)
        .await
        .map_err(db_failure)?;

    info!("created final summary for meeting {}", meeting_id);
    Ok(())
}

#[derive(Debug, Deserialize)]
struct Annotation {
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    due_date_iso: Option<String>,
}

/// Fills in owner and due date on action items of the latest final summary,
/// then appends a new final carrying the enriched content.
async fn handle_annotate_action_items(
    ctx: &Arc<AppContext>,
    shutdown: &CancellationToken,
    job: &Job,
) -> Result<(), JobFailure> {
    let pool = ctx.pool();
    let meeting_id = &job.meeting_id;

    let latest = SummariesRepository::latest(pool, meeting_id, Some(SummaryType::Final))
        .await
        .map_err(db_failure)?;
    let Some(latest) = latest else {
        return Err(JobFailure::Skip("no final summary to annotate".into()));
    };

    let mut content = latest.content.0;
    for item in &mut content.action_items {
        if item.owner.is_some() && item.due_date_iso.is_some() {
            continue;
        }

        let prompt = build_annotation_prompt(&item.text);
        let raw = complete_prompt(ctx, shutdown, &prompt).await?;

        match serde_json::from_str::<Annotation>(extract_json(&raw)) {
            Ok(annotation) => {
                if item.owner.is_none() {
                    item.owner = annotation.owner;
                }
                if item.due_date_iso.is_none() {
                    item.due_date_iso = annotation.due_date_iso;
                }
            }
            Err(e) => {
                warn!(
                    "discarding unparseable annotation for meeting {}: {}",
                    meeting_id, e
                );
            }
        }
    }

    SummariesRepository::create(pool, &ctx.updates, meeting_id, SummaryType::Final, content)
        .await
        .map_err(db_failure)?;

    info!("annotated action items for meeting {}", meeting_id);
    Ok(())
}

/// Transcribes an uploaded audio file, stores the transcript as segments of
/// the synthetic meeting created at upload time, and finalizes it so the
/// regular summarization pipeline takes over.
async fn handle_process_audio(
    ctx: &Arc<AppContext>,
    shutdown: &CancellationToken,
    job: &Job,
) -> Result<(), JobFailure> {
    let pool = ctx.pool();
    let meeting_id = &job.meeting_id;

    let path_str = job
        .payload
        .0
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| JobFailure::Fatal("process_audio payload missing path".into()))?;
    let path = PathBuf::from(path_str);

    if !path.exists() {
        // The upload handler enqueues before the file write lands; retry
        // instead of failing on that window.
        return Err(JobFailure::Retry(format!(
            "audio file {} not yet available",
            path_str
        )));
    }

    let meeting = MeetingsRepository::get(pool, meeting_id)
        .await
        .map_err(db_failure)?
        .ok_or_else(|| JobFailure::Fatal("meeting row missing for audio job".into()))?;

    if meeting.finalized {
        info!("meeting {} already processed, archiving {}", meeting_id, path_str);
        archive_input_file(ctx, &path).await;
        return Ok(());
    }

    let transcription = tokio::select! {
        _ = shutdown.cancelled() => return Err(JobFailure::Retry("interrupted by shutdown".into())),
        result = ctx.transcriber.transcribe(&path) => result,
    }
    .map_err(|e| {
        if e.is_retryable() {
            JobFailure::Retry(e.to_string())
        } else {
            JobFailure::Fatal(e.to_string())
        }
    })?;

    if transcription.text.trim().is_empty() {
        return Err(JobFailure::Skip("transcription produced no text".into()));
    }

    save_transcript_text(ctx, &path, &transcription.text).await;

    let chars_per_token = ctx.config.chars_per_token;
    if transcription.segments.is_empty() {
        let tokens = estimate_tokens(&transcription.text, chars_per_token) as i64;
        SegmentsRepository::create(
            pool,
            meeting_id,
            "Speaker",
            meeting.created_at,
            transcription.text.trim(),
            tokens,
        )
        .await
        .map_err(db_failure)?;
    } else {
        for segment in &transcription.segments {
            let offset = chrono::Duration::milliseconds((segment.start * 1000.0) as i64);
            let tokens = estimate_tokens(&segment.text, chars_per_token) as i64;
            SegmentsRepository::create(
                pool,
                meeting_id,
                "Speaker",
                meeting.created_at + offset,
                segment.text.trim(),
                tokens,
            )
            .await
            .map_err(db_failure)?;
        }
    }

    MeetingsRepository::finalize_and_enqueue(pool, meeting_id)
        .await
        .map_err(db_failure)?;

    archive_input_file(ctx, &path).await;
    info!(
        "transcribed {} into meeting {} ({} segments, {:.1}s of audio)",
        path_str,
        meeting_id,
        transcription.segments.len().max(1),
        transcription.duration
    );
    Ok(())
}

/// Best-effort archive of the raw transcript text, one file per recording.
/// The structured summary lives in the database; this keeps the plain text
/// around for operators.
async fn save_transcript_text(ctx: &Arc<AppContext>, audio_path: &PathBuf, text: &str) {
    let dir = ctx.config.output_dir.join("transcriptions");
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        warn!("failed to create {}: {}", dir.display(), e);
        return;
    }

    let stem = audio_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("transcript");
    let target = dir.join(format!("{}.txt", stem));
    match tokio::fs::write(&target, text).await {
        Ok(()) => info!("transcription saved: {}", target.display()),
        Err(e) => warn!("failed to save transcription {}: {}", target.display(), e),
    }
}

/// Best-effort cleanup of the consumed input file.
async fn archive_input_file(ctx: &Arc<AppContext>, path: &PathBuf) {
    if ctx.config.delete_after_processing {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("failed to delete {}: {}", path.display(), e);
        }
        return;
    }

    let processed_dir = ctx.config.input_dir.join("processed");
    if let Err(e) = tokio::fs::create_dir_all(&processed_dir).await {
        warn!("failed to create {}: {}", processed_dir.display(), e);
        return;
    }
    if let Some(name) = path.file_name() {
        let target = processed_dir.join(name);
        if let Err(e) = tokio::fs::rename(path, &target).await {
            warn!("failed to archive {}: {}", path.display(), e);
        }
    }
}
