use thiserror::Error;

use crate::database::models::Segment;

#[derive(Debug, Error)]
pub enum ChunkerError {
    #[error("overlap of {overlap} tokens must be smaller than the chunk size of {chunk_size}")]
    OverlapTooLarge { overlap: usize, chunk_size: usize },
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,
}

/// A token-bounded window over the concatenated transcript, sized to fit an
/// LLM context.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub token_count: usize,
    /// Ids of every segment whose rendered range intersects this chunk.
    pub segment_ids: Vec<String>,
    /// Window bounds in token space, `[start_idx, end_idx)`.
    pub start_idx: usize,
    pub end_idx: usize,
}

/// Cheap token estimate for the ingest hot path. The chunker's own tokenizer
/// is authoritative inside jobs.
pub fn estimate_tokens(text: &str, chars_per_token: usize) -> usize {
    if chars_per_token == 0 {
        return 0;
    }
    text.chars().count() / chars_per_token
}

/// Byte range of one whitespace-delimited word. The word-based tokenizer is
/// the authoritative fallback: recording offsets makes the token-to-character
/// mapping exact, so chunk text is recovered by lookup rather than
/// interpolation.
#[derive(Debug, Clone, Copy)]
struct TokenSpan {
    start: usize,
    end: usize,
}

fn tokenize(text: &str) -> Vec<TokenSpan> {
    let mut spans = Vec::new();
    let mut start = None;

    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push(TokenSpan { start: s, end: idx });
            }
        } else if start.is_none() {
            start = Some(idx);
        }
    }
    if let Some(s) = start {
        spans.push(TokenSpan {
            start: s,
            end: text.len(),
        });
    }
    spans
}

pub struct TranscriptChunker {
    chunk_size: usize,
    overlap_tokens: usize,
}

impl TranscriptChunker {
    pub fn new(chunk_size: usize, overlap_ratio: f64) -> Result<Self, ChunkerError> {
        if chunk_size == 0 {
            return Err(ChunkerError::ZeroChunkSize);
        }
        let overlap_tokens = (chunk_size as f64 * overlap_ratio) as usize;
        if overlap_tokens >= chunk_size {
            return Err(ChunkerError::OverlapTooLarge {
                overlap: overlap_tokens,
                chunk_size,
            });
        }
        Ok(Self {
            chunk_size,
            overlap_tokens,
        })
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        tokenize(text).len()
    }

    /// Splits the rendered transcript into overlapping token-bounded chunks.
    /// Every input segment appears in at least one chunk; a segment larger
    /// than the window appears in several.
    pub fn chunk_segments(&self, segments: &[Segment]) -> Vec<Chunk> {
        if segments.is_empty() {
            return Vec::new();
        }

        // Render segments and record the byte range each one occupies in the
        // concatenation.
        let mut full_text = String::new();
        let mut boundaries = Vec::with_capacity(segments.len());
        for segment in segments {
            let start = full_text.len();
            full_text.push_str(&format!(
                "[{} @ {}]: {}\n",
                segment.speaker,
                segment.ts.to_rfc3339(),
                segment.text
            ));
            boundaries.push((segment.id.clone(), start, full_text.len()));
        }

        let spans = tokenize(&full_text);
        if spans.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut start_idx = 0;

        loop {
            let end_idx = usize::min(start_idx + self.chunk_size, spans.len());
            let char_start = spans[start_idx].start;
            let char_end = spans[end_idx - 1].end;

            let segment_ids = boundaries
                .iter()
                .filter(|(_, seg_start, seg_end)| *seg_start < char_end && *seg_end > char_start)
                .map(|(id, _, _)| id.clone())
                .collect();

            chunks.push(Chunk {
                text: full_text[char_start..char_end].to_string(),
                token_count: end_idx - start_idx,
                segment_ids,
                start_idx,
                end_idx,
            });

            if end_idx >= spans.len() {
                break;
            }
            start_idx = end_idx - self.overlap_tokens;
        }

        chunks
    }
}
