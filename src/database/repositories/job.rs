use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::SqliteConnection;
use sqlx::types::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::database::models::{Job, JobStatus, JobType};

/// Inserts a job row on the given connection. Exposed at module level so the
/// meetings repository can enqueue inside its finalize transaction.
pub(crate) async fn insert_job(
    conn: &mut SqliteConnection,
    meeting_id: &str,
    job_type: JobType,
    payload: Value,
) -> Result<Job, sqlx::Error> {
    let now = Utc::now();
    let job = Job {
        id: Uuid::new_v4().to_string(),
        meeting_id: meeting_id.to_string(),
        job_type,
        payload: Json(payload),
        status: JobStatus::Pending,
        attempts: 0,
        last_error: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
    };

    sqlx::query(
        "INSERT INTO jobs (id, meeting_id, type, payload, status, attempts, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&job.id)
    .bind(&job.meeting_id)
    .bind(job.job_type)
    .bind(&job.payload)
    .bind(job.status)
    .bind(job.attempts)
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(conn)
    .await?;

    Ok(job)
}

pub struct JobsRepository;

impl JobsRepository {
    pub async fn enqueue(
        pool: &SqlitePool,
        meeting_id: &str,
        job_type: JobType,
        payload: Value,
    ) -> Result<Job, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        insert_job(&mut conn, meeting_id, job_type, payload).await
    }

    pub async fn get(pool: &SqlitePool, job_id: &str) -> Result<Option<Job>, sqlx::Error> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &SqlitePool, limit: i64) -> Result<Vec<Job>, sqlx::Error> {
        sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Claims up to `limit` pending jobs, oldest first. The pending to
    /// processing transition and the attempt-count increment happen in one
    /// guarded UPDATE, so a job is in processing for at most one worker.
    pub async fn claim_pending(pool: &SqlitePool, limit: i64) -> Result<Vec<Job>, sqlx::Error> {
        let candidates: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM jobs WHERE status = ? ORDER BY created_at, rowid LIMIT ?",
        )
        .bind(JobStatus::Pending)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        let mut claimed = Vec::new();
        for id in candidates {
            let updated = sqlx::query(
                "UPDATE jobs SET status = ?, attempts = attempts + 1, updated_at = ?
                 WHERE id = ? AND status = ?",
            )
            .bind(JobStatus::Processing)
            .bind(Utc::now())
            .bind(&id)
            .bind(JobStatus::Pending)
            .execute(pool)
            .await?;

            // Lost the race to another worker.
            if updated.rows_affected() == 0 {
                continue;
            }
            if let Some(job) = Self::get(pool, &id).await? {
                claimed.push(job);
            }
        }
        Ok(claimed)
    }

    pub async fn mark_completed(pool: &SqlitePool, job_id: &str) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        sqlx::query("UPDATE jobs SET status = ?, updated_at = ?, completed_at = ? WHERE id = ?")
            .bind(JobStatus::Completed)
            .bind(now)
            .bind(now)
            .bind(job_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Terminal completion for jobs that produced no output (malformed model
    /// output, missing prerequisites); the reason lands in `last_error`.
    pub async fn mark_completed_with_note(
        pool: &SqlitePool,
        job_id: &str,
        note: &str,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE jobs SET status = ?, last_error = ?, updated_at = ?, completed_at = ? WHERE id = ?",
        )
        .bind(JobStatus::Completed)
        .bind(note)
        .bind(now)
        .bind(now)
        .bind(job_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn requeue(
        pool: &SqlitePool,
        job_id: &str,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE jobs SET status = ?, last_error = ?, updated_at = ? WHERE id = ?")
            .bind(JobStatus::Pending)
            .bind(error)
            .bind(Utc::now())
            .bind(job_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn mark_failed(
        pool: &SqlitePool,
        job_id: &str,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE jobs SET status = ?, last_error = ?, updated_at = ? WHERE id = ?")
            .bind(JobStatus::Failed)
            .bind(error)
            .bind(Utc::now())
            .bind(job_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn count_by_status(
        pool: &SqlitePool,
        status: JobStatus,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE status = ?")
            .bind(status)
            .fetch_one(pool)
            .await?;
        Ok(row.0)
    }

    pub async fn counts_by_status(
        pool: &SqlitePool,
    ) -> Result<HashMap<&'static str, i64>, sqlx::Error> {
        let mut counts = HashMap::new();
        for status in JobStatus::ALL {
            counts.insert(status.as_str(), Self::count_by_status(pool, status).await?);
        }
        Ok(counts)
    }

    /// True when the meeting already has a pending or processing job of the
    /// given type. Used by the batch monitor to avoid flooding the queue.
    pub async fn has_active(
        pool: &SqlitePool,
        meeting_id: &str,
        job_type: JobType,
    ) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM jobs WHERE meeting_id = ? AND type = ? AND status IN (?, ?) LIMIT 1",
        )
        .bind(meeting_id)
        .bind(job_type)
        .bind(JobStatus::Pending)
        .bind(JobStatus::Processing)
        .fetch_optional(pool)
        .await?;
        Ok(row.is_some())
    }

    /// True when a process-audio job already references the given input path.
    pub async fn exists_for_path(pool: &SqlitePool, path: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM jobs WHERE type = ? AND json_extract(payload, '$.path') = ? LIMIT 1",
        )
        .bind(JobType::ProcessAudio)
        .bind(path)
        .fetch_optional(pool)
        .await?;
        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::manager::DatabaseManager;
    use crate::database::repositories::MeetingsRepository;
    use serde_json::json;

    async fn setup() -> (DatabaseManager, String) {
        let db = DatabaseManager::in_memory().await.unwrap();
        let meeting = MeetingsRepository::create(db.pool(), "M", json!({}))
            .await
            .unwrap();
        (db, meeting.id)
    }

    #[tokio::test]
    async fn claim_marks_processing_and_increments_attempts() {
        let (db, mid) = setup().await;
        let job = JobsRepository::enqueue(db.pool(), &mid, JobType::ChunkSummary, json!({}))
            .await
            .unwrap();
        assert_eq!(job.attempts, 0);

        let claimed = JobsRepository::claim_pending(db.pool(), 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, job.id);
        assert_eq!(claimed[0].status, JobStatus::Processing);
        assert_eq!(claimed[0].attempts, 1);

        // A processing job cannot be claimed again.
        let again = JobsRepository::claim_pending(db.pool(), 10).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn claim_takes_oldest_first() {
        let (db, mid) = setup().await;
        let first = JobsRepository::enqueue(db.pool(), &mid, JobType::ChunkSummary, json!({}))
            .await
            .unwrap();
        let second = JobsRepository::enqueue(db.pool(), &mid, JobType::ComposeSummary, json!({}))
            .await
            .unwrap();

        let claimed = JobsRepository::claim_pending(db.pool(), 1).await.unwrap();
        assert_eq!(claimed[0].id, first.id);

        let claimed = JobsRepository::claim_pending(db.pool(), 1).await.unwrap();
        assert_eq!(claimed[0].id, second.id);
    }

    #[tokio::test]
    async fn requeue_and_fail_record_the_last_error() {
        let (db, mid) = setup().await;
        let job = JobsRepository::enqueue(db.pool(), &mid, JobType::ChunkSummary, json!({}))
            .await
            .unwrap();
        JobsRepository::claim_pending(db.pool(), 1).await.unwrap();

        JobsRepository::requeue(db.pool(), &job.id, "backend 503")
            .await
            .unwrap();
        let fetched = JobsRepository::get(db.pool(), &job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(fetched.last_error.as_deref(), Some("backend 503"));

        JobsRepository::claim_pending(db.pool(), 1).await.unwrap();
        JobsRepository::mark_failed(db.pool(), &job.id, "gave up")
            .await
            .unwrap();
        let fetched = JobsRepository::get(db.pool(), &job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Failed);
        assert_eq!(fetched.last_error.as_deref(), Some("gave up"));
        assert_eq!(fetched.attempts, 2);
    }

    #[tokio::test]
    async fn completed_with_note_keeps_the_reason() {
        let (db, mid) = setup().await;
        let job = JobsRepository::enqueue(db.pool(), &mid, JobType::ChunkSummary, json!({}))
            .await
            .unwrap();
        JobsRepository::mark_completed_with_note(db.pool(), &job.id, "model output was not JSON")
            .await
            .unwrap();

        let fetched = JobsRepository::get(db.pool(), &job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Completed);
        assert!(fetched.completed_at.is_some());
        assert_eq!(
            fetched.last_error.as_deref(),
            Some("model output was not JSON")
        );
    }

    #[tokio::test]
    async fn has_active_sees_pending_and_processing_only() {
        let (db, mid) = setup().await;
        assert!(!JobsRepository::has_active(db.pool(), &mid, JobType::ChunkSummary)
            .await
            .unwrap());

        let job = JobsRepository::enqueue(db.pool(), &mid, JobType::ChunkSummary, json!({}))
            .await
            .unwrap();
        assert!(JobsRepository::has_active(db.pool(), &mid, JobType::ChunkSummary)
            .await
            .unwrap());

        JobsRepository::claim_pending(db.pool(), 1).await.unwrap();
        assert!(JobsRepository::has_active(db.pool(), &mid, JobType::ChunkSummary)
            .await
            .unwrap());

        JobsRepository::mark_completed(db.pool(), &job.id).await.unwrap();
        assert!(!JobsRepository::has_active(db.pool(), &mid, JobType::ChunkSummary)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn payload_path_lookup_matches_exactly() {
        let (db, mid) = setup().await;
        JobsRepository::enqueue(
            db.pool(),
            &mid,
            JobType::ProcessAudio,
            json!({"path": "/in/call.wav", "filename": "call.wav"}),
        )
        .await
        .unwrap();

        assert!(JobsRepository::exists_for_path(db.pool(), "/in/call.wav")
            .await
            .unwrap());
        assert!(!JobsRepository::exists_for_path(db.pool(), "/in/other.wav")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn status_counts_cover_every_state() {
        let (db, mid) = setup().await;
        JobsRepository::enqueue(db.pool(), &mid, JobType::ChunkSummary, json!({}))
            .await
            .unwrap();
        let counts = JobsRepository::counts_by_status(db.pool()).await.unwrap();
        assert_eq!(counts["pending"], 1);
        assert_eq!(counts["processing"], 0);
        assert_eq!(counts["completed"], 0);
        assert_eq!(counts["failed"], 0);
    }
}
