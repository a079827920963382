use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::database::models::{Summary, SummaryContent, SummaryType};
use crate::notifications::SummaryChannel;

pub struct SummariesRepository;

impl SummariesRepository {
    /// Persists a summary row and publishes the meeting id on the
    /// `summary_update` channel once the write is durable.
    pub async fn create(
        pool: &SqlitePool,
        updates: &SummaryChannel,
        meeting_id: &str,
        summary_type: SummaryType,
        content: SummaryContent,
    ) -> Result<Summary, sqlx::Error> {
        let summary = Summary {
            id: Uuid::new_v4().to_string(),
            meeting_id: meeting_id.to_string(),
            summary_type,
            content: Json(content),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO summaries (id, meeting_id, type, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&summary.id)
        .bind(&summary.meeting_id)
        .bind(summary.summary_type)
        .bind(&summary.content)
        .bind(summary.created_at)
        .execute(pool)
        .await?;

        updates.publish(meeting_id);
        Ok(summary)
    }

    /// Latest summary for a meeting, optionally restricted by type. Reads
    /// always take the newest row; summaries are append-only.
    pub async fn latest(
        pool: &SqlitePool,
        meeting_id: &str,
        summary_type: Option<SummaryType>,
    ) -> Result<Option<Summary>, sqlx::Error> {
        match summary_type {
            Some(summary_type) => {
                sqlx::query_as::<_, Summary>(
                    "SELECT * FROM summaries WHERE meeting_id = ? AND type = ?
                     ORDER BY created_at DESC, rowid DESC LIMIT 1",
                )
                .bind(meeting_id)
                .bind(summary_type)
                .fetch_optional(pool)
                .await
            }
            None => {
                sqlx::query_as::<_, Summary>(
                    "SELECT * FROM summaries WHERE meeting_id = ?
                     ORDER BY created_at DESC, rowid DESC LIMIT 1",
                )
                .bind(meeting_id)
                .fetch_optional(pool)
                .await
            }
        }
    }

    /// All incremental summaries in creation order; the merger consumes them
    /// in exactly this order.
    pub async fn list_incremental(
        pool: &SqlitePool,
        meeting_id: &str,
    ) -> Result<Vec<Summary>, sqlx::Error> {
        sqlx::query_as::<_, Summary>(
            "SELECT * FROM summaries WHERE meeting_id = ? AND type = ?
             ORDER BY created_at, rowid",
        )
        .bind(meeting_id)
        .bind(SummaryType::Incremental)
        .fetch_all(pool)
        .await
    }

    pub async fn latest_incremental_created_at(
        pool: &SqlitePool,
        meeting_id: &str,
    ) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT MAX(created_at) FROM summaries WHERE meeting_id = ? AND type = ?",
        )
        .bind(meeting_id)
        .bind(SummaryType::Incremental)
        .fetch_one(pool)
        .await
    }

    pub async fn count_by_type(
        pool: &SqlitePool,
        meeting_id: &str,
        summary_type: SummaryType,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM summaries WHERE meeting_id = ? AND type = ?")
                .bind(meeting_id)
                .bind(summary_type)
                .fetch_one(pool)
                .await?;
        Ok(row.0)
    }
}
