use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Meeting {
    pub id: String,
    pub title: String,
    pub metadata: Json<Value>,
    pub created_at: DateTime<Utc>,
    pub finalized: bool,
    pub finalized_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub meeting_id: String,
    pub speaker: String,
    pub ts: DateTime<Utc>,
    pub text: String,
    pub token_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SummaryType {
    Incremental,
    Final,
}

impl SummaryType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "incremental" => Some(Self::Incremental),
            "final" => Some(Self::Final),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Summary {
    pub id: String,
    pub meeting_id: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub summary_type: SummaryType,
    pub content: Json<SummaryContent>,
    pub created_at: DateTime<Utc>,
}

/// Structured payload persisted for every summary row. Chunk-level model
/// output parses into the same shape; fields the model omits default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryContent {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub agenda: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<Decision>,
    #[serde(default)]
    pub action_items: Vec<ActionItem>,
    #[serde(default)]
    pub topics: Vec<Topic>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub text: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub source_segment_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub text: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub due_date_iso: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub source_segment_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ChunkSummary,
    ComposeSummary,
    AnnotateActionItems,
    ProcessAudio,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ChunkSummary => "chunk_summary",
            Self::ComposeSummary => "compose_summary",
            Self::AnnotateActionItems => "annotate_action_items",
            Self::ProcessAudio => "process_audio",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub meeting_id: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub payload: Json<Value>,
    pub status: JobStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_content_defaults_for_partial_model_output() {
        // Chunk-level model output carries no agenda and no source ids.
        let parsed: SummaryContent = serde_json::from_str(
            r#"{
                "summary": "budget approved",
                "decisions": [{"text": "Approve the budget", "confidence": 0.9}],
                "action_items": [{"text": "Send recap", "owner": null, "due_date_iso": null, "confidence": 0.8}],
                "topics": [{"name": "Budget", "confidence": 0.9}]
            }"#,
        )
        .unwrap();

        assert_eq!(parsed.summary, "budget approved");
        assert!(parsed.agenda.is_empty());
        assert!(parsed.decisions[0].source_segment_ids.is_empty());
        assert_eq!(parsed.action_items[0].owner, None);
    }

    #[test]
    fn empty_object_is_a_valid_summary() {
        let parsed: SummaryContent = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, SummaryContent::default());
    }

    #[test]
    fn job_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobType::AnnotateActionItems).unwrap(),
            "\"annotate_action_items\""
        );
        assert_eq!(JobType::ChunkSummary.to_string(), "chunk_summary");
    }
}
