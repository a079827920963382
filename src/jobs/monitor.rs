use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::database::models::JobType;
use crate::database::repositories::{
    JobsRepository, MeetingsRepository, SegmentsRepository, SummariesRepository,
};
use crate::state::AppContext;

/// Periodic safety net behind the ingest-side threshold check: wakes every
/// `batch_timeout` and enqueues a chunk-summary job for any active meeting
/// whose unsummarized-token count crossed the batch threshold. A lost
/// ingest-side enqueue therefore never stalls progress.
pub async fn run(ctx: Arc<AppContext>, shutdown: CancellationToken) {
    let interval = ctx.config.batch_timeout();
    info!("batch monitor started (interval {:?})", interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        if let Err(e) = tick(&ctx).await {
            error!("batch monitor tick failed: {}", e);
        }
    }

    info!("batch monitor stopped");
}

/// One monitor pass over all active meetings.
pub async fn tick(ctx: &AppContext) -> Result<(), sqlx::Error> {
    let pool = ctx.pool();
    let meetings = MeetingsRepository::list_active(pool).await?;

    for meeting in meetings {
        let watermark =
            SummariesRepository::latest_incremental_created_at(pool, &meeting.id).await?;
        let unsummarized =
            SegmentsRepository::total_tokens_since(pool, &meeting.id, watermark).await?;

        if unsummarized < ctx.config.batch_tokens {
            continue;
        }
        if JobsRepository::has_active(pool, &meeting.id, JobType::ChunkSummary).await? {
            debug!(
                "meeting {} already has an active chunk job, skipping",
                meeting.id
            );
            continue;
        }

        JobsRepository::enqueue(pool, &meeting.id, JobType::ChunkSummary, json!({})).await?;
        info!(
            "created batch job for meeting {} ({} unsummarized tokens)",
            meeting.id, unsummarized
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::transcription::{Transcription, TranscriptionBackend, TranscriptionError};
    use crate::config::Config;
    use crate::database::manager::DatabaseManager;
    use crate::database::models::{JobStatus, SummaryContent, SummaryType};
    use crate::summary::llm_client::{InferenceBackend, InferenceError};
    use async_trait::async_trait;
    use chrono::Utc;
    use clap::Parser;
    use std::path::Path;

    struct NoInference;

    #[async_trait]
    impl InferenceBackend for NoInference {
        async fn complete(
            &self,
            _prompt: &str,
            _max_tokens: u32,
            _temperature: f32,
            _stop: &[&str],
        ) -> Result<String, InferenceError> {
            Err(InferenceError::Transient("not wired in this test".into()))
        }

        async fn health(&self) -> bool {
            false
        }
    }

    struct NoTranscriber;

    #[async_trait]
    impl TranscriptionBackend for NoTranscriber {
        async fn transcribe(&self, _path: &Path) -> Result<Transcription, TranscriptionError> {
            Err(TranscriptionError::InvalidAudio("not wired".into()))
        }
    }

    async fn test_ctx(batch_tokens: i64) -> Arc<AppContext> {
        let mut config = Config::parse_from(["recapd"]);
        config.batch_tokens = batch_tokens;
        let db = DatabaseManager::in_memory().await.unwrap();
        AppContext::new(config, db, Arc::new(NoInference), Arc::new(NoTranscriber)).unwrap()
    }

    #[tokio::test]
    async fn enqueues_when_unsummarized_tokens_cross_the_threshold() {
        let ctx = test_ctx(50).await;
        let meeting = MeetingsRepository::create(ctx.pool(), "M", serde_json::json!({}))
            .await
            .unwrap();
        SegmentsRepository::create(ctx.pool(), &meeting.id, "Alice", Utc::now(), "text", 60)
            .await
            .unwrap();

        tick(&ctx).await.unwrap();
        assert!(
            JobsRepository::has_active(ctx.pool(), &meeting.id, JobType::ChunkSummary)
                .await
                .unwrap()
        );

        // A second pass must not stack another job on the queue.
        tick(&ctx).await.unwrap();
        let pending = JobsRepository::count_by_status(ctx.pool(), JobStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending, 1);
    }

    #[tokio::test]
    async fn stays_quiet_below_the_threshold() {
        let ctx = test_ctx(100).await;
        let meeting = MeetingsRepository::create(ctx.pool(), "M", serde_json::json!({}))
            .await
            .unwrap();
        SegmentsRepository::create(ctx.pool(), &meeting.id, "Alice", Utc::now(), "text", 99)
            .await
            .unwrap();

        tick(&ctx).await.unwrap();
        let pending = JobsRepository::count_by_status(ctx.pool(), JobStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending, 0);
    }

    #[tokio::test]
    async fn summarized_tokens_do_not_retrigger() {
        let ctx = test_ctx(50).await;
        let meeting = MeetingsRepository::create(ctx.pool(), "M", serde_json::json!({}))
            .await
            .unwrap();
        SegmentsRepository::create(ctx.pool(), &meeting.id, "Alice", Utc::now(), "text", 60)
            .await
            .unwrap();

        // An incremental summary newer than every segment moves the
        // unsummarized watermark past them.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        SummariesRepository::create(
            ctx.pool(),
            &ctx.updates,
            &meeting.id,
            SummaryType::Incremental,
            SummaryContent::default(),
        )
        .await
        .unwrap();

        tick(&ctx).await.unwrap();
        let pending = JobsRepository::count_by_status(ctx.pool(), JobStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending, 0);
    }

    #[tokio::test]
    async fn finalized_meetings_are_ignored() {
        let ctx = test_ctx(50).await;
        let meeting = MeetingsRepository::create(ctx.pool(), "M", serde_json::json!({}))
            .await
            .unwrap();
        SegmentsRepository::create(ctx.pool(), &meeting.id, "Alice", Utc::now(), "text", 60)
            .await
            .unwrap();
        MeetingsRepository::finalize_and_enqueue(ctx.pool(), &meeting.id)
            .await
            .unwrap();

        tick(&ctx).await.unwrap();
        assert!(
            !JobsRepository::has_active(ctx.pool(), &meeting.id, JobType::ChunkSummary)
                .await
                .unwrap()
        );
    }
}
