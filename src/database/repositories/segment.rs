use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::database::models::Segment;

pub struct SegmentsRepository;

impl SegmentsRepository {
    pub async fn create(
        pool: &SqlitePool,
        meeting_id: &str,
        speaker: &str,
        ts: DateTime<Utc>,
        text: &str,
        token_count: i64,
    ) -> Result<Segment, sqlx::Error> {
        let segment = Segment {
            id: Uuid::new_v4().to_string(),
            meeting_id: meeting_id.to_string(),
            speaker: speaker.to_string(),
            ts,
            text: text.to_string(),
            token_count,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO segments (id, meeting_id, speaker, ts, text, token_count, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&segment.id)
        .bind(&segment.meeting_id)
        .bind(&segment.speaker)
        .bind(segment.ts)
        .bind(&segment.text)
        .bind(segment.token_count)
        .bind(segment.created_at)
        .execute(pool)
        .await?;

        Ok(segment)
    }

    /// Segments of a meeting ordered by their utterance timestamp, not by
    /// arrival order.
    pub async fn list_by_meeting(
        pool: &SqlitePool,
        meeting_id: &str,
    ) -> Result<Vec<Segment>, sqlx::Error> {
        sqlx::query_as::<_, Segment>(
            "SELECT * FROM segments WHERE meeting_id = ? ORDER BY ts, rowid",
        )
        .bind(meeting_id)
        .fetch_all(pool)
        .await
    }

    /// Segments stored after `since`, in utterance order.
    pub async fn list_created_after(
        pool: &SqlitePool,
        meeting_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Segment>, sqlx::Error> {
        sqlx::query_as::<_, Segment>(
            "SELECT * FROM segments WHERE meeting_id = ? AND created_at > ? ORDER BY ts, rowid",
        )
        .bind(meeting_id)
        .bind(since)
        .fetch_all(pool)
        .await
    }

    pub async fn total_tokens(pool: &SqlitePool, meeting_id: &str) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(token_count), 0) FROM segments WHERE meeting_id = ?",
        )
        .bind(meeting_id)
        .fetch_one(pool)
        .await?;
        Ok(row.0)
    }

    /// Token total of segments stored after `since`; the whole meeting when
    /// `since` is None. Drives the batch monitor's unsummarized-token check.
    pub async fn total_tokens_since(
        pool: &SqlitePool,
        meeting_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = match since {
            Some(since) => {
                sqlx::query_as(
                    "SELECT COALESCE(SUM(token_count), 0) FROM segments
                     WHERE meeting_id = ? AND created_at > ?",
                )
                .bind(meeting_id)
                .bind(since)
                .fetch_one(pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT COALESCE(SUM(token_count), 0) FROM segments WHERE meeting_id = ?",
                )
                .bind(meeting_id)
                .fetch_one(pool)
                .await?
            }
        };
        Ok(row.0)
    }

    pub async fn count_by_meeting(
        pool: &SqlitePool,
        meeting_id: &str,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM segments WHERE meeting_id = ?")
            .bind(meeting_id)
            .fetch_one(pool)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::manager::DatabaseManager;
    use crate::database::repositories::MeetingsRepository;
    use chrono::TimeZone;
    use serde_json::json;

    async fn meeting(db: &DatabaseManager) -> String {
        MeetingsRepository::create(db.pool(), "M", json!({}))
            .await
            .unwrap()
            .id
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 31, 10, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn token_total_equals_sum_of_segment_counts() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let mid = meeting(&db).await;

        for (minute, tokens) in [(0, 12), (1, 30), (2, 7)] {
            SegmentsRepository::create(db.pool(), &mid, "Alice", at(minute), "text", tokens)
                .await
                .unwrap();
        }

        assert_eq!(
            SegmentsRepository::total_tokens(db.pool(), &mid).await.unwrap(),
            49
        );
        assert_eq!(
            SegmentsRepository::count_by_meeting(db.pool(), &mid).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn listing_orders_by_utterance_timestamp_not_arrival() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let mid = meeting(&db).await;

        // Arrives late but spoken first.
        SegmentsRepository::create(db.pool(), &mid, "Bob", at(5), "later", 1)
            .await
            .unwrap();
        SegmentsRepository::create(db.pool(), &mid, "Alice", at(1), "earlier", 1)
            .await
            .unwrap();

        let segments = SegmentsRepository::list_by_meeting(db.pool(), &mid)
            .await
            .unwrap();
        assert_eq!(segments[0].speaker, "Alice");
        assert_eq!(segments[1].speaker, "Bob");
    }

    #[tokio::test]
    async fn tokens_since_watermark_ignores_older_segments() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let mid = meeting(&db).await;

        let first = SegmentsRepository::create(db.pool(), &mid, "A", at(0), "a", 10)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        SegmentsRepository::create(db.pool(), &mid, "B", at(1), "b", 20)
            .await
            .unwrap();

        let since_first = SegmentsRepository::total_tokens_since(
            db.pool(),
            &mid,
            Some(first.created_at),
        )
        .await
        .unwrap();
        assert_eq!(since_first, 20);

        let all = SegmentsRepository::total_tokens_since(db.pool(), &mid, None)
            .await
            .unwrap();
        assert_eq!(all, 30);
    }
}
