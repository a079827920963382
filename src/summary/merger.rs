use std::collections::HashSet;

use crate::database::models::{ActionItem, Decision, SummaryContent, Topic};

const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Deduplicates and ranks decisions, action items, topics and agenda entries
/// across partial summaries. Pure and deterministic given its input ordering.
pub struct SummaryMerger {
    similarity_threshold: f64,
}

impl Default for SummaryMerger {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl SummaryMerger {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            similarity_threshold,
        }
    }

    pub fn merge(&self, partials: &[SummaryContent]) -> SummaryContent {
        let mut narratives = Vec::new();
        let mut agenda = Vec::new();
        let mut decisions = Vec::new();
        let mut action_items = Vec::new();
        let mut topics = Vec::new();

        for partial in partials {
            if !partial.summary.is_empty() {
                narratives.push(partial.summary.clone());
            }
            agenda.extend(partial.agenda.iter().cloned());
            decisions.extend(partial.decisions.iter().cloned());
            action_items.extend(partial.action_items.iter().cloned());
            topics.extend(partial.topics.iter().cloned());
        }

        SummaryContent {
            summary: narratives.join(" "),
            agenda: dedupe_agenda(agenda),
            decisions: self.dedupe_decisions(decisions),
            action_items: self.dedupe_action_items(action_items),
            topics: self.dedupe_topics(topics),
        }
    }

    fn similar(&self, a: &str, b: &str) -> bool {
        strsim::normalized_levenshtein(&a.to_lowercase(), &b.to_lowercase())
            > self.similarity_threshold
    }

    fn dedupe_decisions(&self, decisions: Vec<Decision>) -> Vec<Decision> {
        let mut unique: Vec<Decision> = Vec::new();

        for decision in decisions {
            match unique.iter_mut().find(|d| self.similar(&d.text, &decision.text)) {
                Some(existing) => {
                    existing.confidence = max_confidence(existing.confidence, decision.confidence);
                    extend_sources(&mut existing.source_segment_ids, decision.source_segment_ids);
                }
                None => unique.push(decision),
            }
        }

        sort_by_confidence(&mut unique, |d| d.confidence);
        unique
    }

    /// Folding prefers the richest fields: a duplicate supplying an owner or
    /// a due date fills the incumbent's gap, and the higher confidence wins.
    fn dedupe_action_items(&self, items: Vec<ActionItem>) -> Vec<ActionItem> {
        let mut unique: Vec<ActionItem> = Vec::new();

        for item in items {
            match unique.iter_mut().find(|i| self.similar(&i.text, &item.text)) {
                Some(existing) => {
                    if existing.owner.is_none() {
                        existing.owner = item.owner;
                    }
                    if existing.due_date_iso.is_none() {
                        existing.due_date_iso = item.due_date_iso;
                    }
                    existing.confidence = max_confidence(existing.confidence, item.confidence);
                    extend_sources(&mut existing.source_segment_ids, item.source_segment_ids);
                }
                None => unique.push(item),
            }
        }

        sort_by_confidence(&mut unique, |i| i.confidence);
        unique
    }

    fn dedupe_topics(&self, topics: Vec<Topic>) -> Vec<Topic> {
        let mut unique: Vec<Topic> = Vec::new();

        for topic in topics {
            match unique.iter_mut().find(|t| self.similar(&t.name, &topic.name)) {
                Some(existing) => {
                    existing.confidence = max_confidence(existing.confidence, topic.confidence);
                }
                None => unique.push(topic),
            }
        }

        sort_by_confidence(&mut unique, |t| t.confidence);
        unique
    }
}

/// Order-preserving deduplication by case-insensitive exact match.
fn dedupe_agenda(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.to_lowercase()))
        .collect()
}

fn max_confidence(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn extend_sources(existing: &mut Vec<String>, incoming: Vec<String>) {
    for id in incoming {
        if !existing.contains(&id) {
            existing.push(id);
        }
    }
}

/// Stable descending sort, so entries tied on confidence keep insertion
/// order.
fn sort_by_confidence<T, F: Fn(&T) -> Option<f64>>(items: &mut [T], confidence: F) {
    items.sort_by(|a, b| {
        let a = confidence(a).unwrap_or(0.0);
        let b = confidence(b).unwrap_or(0.0);
        b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
    });
}
