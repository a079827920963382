use super::chunker::Chunk;

/// Renders the summarization prompt for one transcript chunk. Deterministic:
/// no wall-clock, no randomness, output depends only on the chunk text.
pub fn build_chunk_prompt(chunk: &Chunk) -> String {
    format!(
        r#"System: You are a concise meeting summarizer. Extract structured information from transcripts.

User: Given the following transcript chunk with speaker names and timestamps, return valid JSON with this exact structure:
{{
  "summary": "brief summary of this chunk",
  "decisions": [
    {{"text": "decision made", "confidence": 0.9}}
  ],
  "action_items": [
    {{"text": "action description", "owner": "person name or null", "due_date_iso": "YYYY-MM-DD or null", "confidence": 0.8}}
  ],
  "topics": [
    {{"name": "topic name", "confidence": 0.9}}
  ]
}}

Transcript chunk:
{}
Assistant: Return only valid JSON, no additional text.
"#,
        chunk.text
    )
}

/// Asks the model for the owner and due date of one action item, and nothing
/// else.
pub fn build_annotation_prompt(action_text: &str) -> String {
    format!(
        r#"Extract owner and due date from this action item.
Return JSON: {{"owner": "name or null", "due_date_iso": "YYYY-MM-DD or null"}}

Action: {}"#,
        action_text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk() -> Chunk {
        Chunk {
            text: "[Alice @ 2025-10-31T10:00:00+00:00]: Let's discuss the project timeline."
                .to_string(),
            token_count: 7,
            segment_ids: vec!["seg1".to_string()],
            start_idx: 0,
            end_idx: 7,
        }
    }

    #[test]
    fn chunk_prompt_embeds_transcript_and_schema() {
        let prompt = build_chunk_prompt(&chunk());
        assert!(prompt.contains("System:"));
        assert!(prompt.contains("User:"));
        assert!(prompt.contains("valid JSON"));
        for key in ["\"summary\"", "\"decisions\"", "\"action_items\"", "\"topics\""] {
            assert!(prompt.contains(key), "missing key {}", key);
        }
        assert!(prompt.contains(&chunk().text));
    }

    #[test]
    fn prompts_are_deterministic() {
        assert_eq!(build_chunk_prompt(&chunk()), build_chunk_prompt(&chunk()));
        assert_eq!(
            build_annotation_prompt("Send the recap"),
            build_annotation_prompt("Send the recap")
        );
    }

    #[test]
    fn annotation_prompt_requests_owner_and_due_date_only() {
        let prompt = build_annotation_prompt("Prepare the budget breakdown");
        assert!(prompt.contains("\"owner\""));
        assert!(prompt.contains("\"due_date_iso\""));
        assert!(prompt.contains("Prepare the budget breakdown"));
        assert!(!prompt.contains("\"topics\""));
    }
}
