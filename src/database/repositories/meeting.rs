use chrono::Utc;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::database::models::{JobType, Meeting};
use crate::database::repositories::job;

pub struct MeetingsRepository;

impl MeetingsRepository {
    pub async fn create(
        pool: &SqlitePool,
        title: &str,
        metadata: Value,
    ) -> Result<Meeting, sqlx::Error> {
        let meeting = Meeting {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            metadata: Json(metadata),
            created_at: Utc::now(),
            finalized: false,
            finalized_at: None,
        };

        sqlx::query(
            "INSERT INTO meetings (id, title, metadata, created_at, finalized) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&meeting.id)
        .bind(&meeting.title)
        .bind(&meeting.metadata)
        .bind(meeting.created_at)
        .bind(meeting.finalized)
        .execute(pool)
        .await?;

        Ok(meeting)
    }

    pub async fn get(pool: &SqlitePool, meeting_id: &str) -> Result<Option<Meeting>, sqlx::Error> {
        sqlx::query_as::<_, Meeting>("SELECT * FROM meetings WHERE id = ?")
            .bind(meeting_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_active(pool: &SqlitePool) -> Result<Vec<Meeting>, sqlx::Error> {
        sqlx::query_as::<_, Meeting>("SELECT * FROM meetings WHERE NOT finalized ORDER BY created_at")
            .fetch_all(pool)
            .await
    }

    pub async fn count_active(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM meetings WHERE NOT finalized")
            .fetch_one(pool)
            .await?;
        Ok(row.0)
    }

    /// Flips the finalized flag and enqueues the compose and annotate jobs in
    /// one transaction, so a reader never observes a finalized meeting whose
    /// finalization jobs are absent. Returns false when the meeting was
    /// already finalized (no jobs are created in that case).
    pub async fn finalize_and_enqueue(
        pool: &SqlitePool,
        meeting_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let mut transaction = pool.begin().await?;
        let now = Utc::now();

        let updated = sqlx::query(
            "UPDATE meetings SET finalized = TRUE, finalized_at = ? WHERE id = ? AND NOT finalized",
        )
        .bind(now)
        .bind(meeting_id)
        .execute(&mut *transaction)
        .await?;

        if updated.rows_affected() == 0 {
            transaction.rollback().await?;
            return Ok(false);
        }

        job::insert_job(
            &mut *transaction,
            meeting_id,
            JobType::ComposeSummary,
            Value::Object(Default::default()),
        )
        .await?;
        job::insert_job(
            &mut *transaction,
            meeting_id,
            JobType::AnnotateActionItems,
            Value::Object(Default::default()),
        )
        .await?;

        transaction.commit().await?;
        info!("Finalized meeting {} and enqueued compose/annotate jobs", meeting_id);
        Ok(true)
    }
}
