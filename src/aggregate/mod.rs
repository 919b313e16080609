//! Per-document aggregation of sentence hits.
//!
//! The ranked hit list of one query is folded into one result per document:
//! the first (best) hit of a document fixes its score, later hits only extend
//! its hit list. Documents are then ranked, truncated, and screened for
//! degenerate titles.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{AggregatedResult, NeighborHit, SortMode};
use crate::storage::metadata::MetadataTable;

/// Hits whose sentence has fewer whitespace-delimited tokens are dropped.
pub const MIN_SENTENCE_TOKENS: usize = 5;

/// Documents whose trimmed title is shorter than this are not shown.
pub const MIN_TITLE_CHARS: usize = 6;

/// Filters and ranking applied during aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateOptions {
    /// Keep only documents whose topic flag is set
    pub topic_only: bool,

    /// Ranking key
    pub sort_mode: SortMode,

    /// Maximum number of documents to rank
    pub top_n: usize,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            topic_only: false,
            sort_mode: SortMode::Relevance,
            top_n: crate::DEFAULT_TOP_DOCUMENTS,
        }
    }
}

/// Aggregation key of a hit: the document id up to its first `.`.
pub fn document_key(document_id: &str) -> &str {
    document_id.split('.').next().unwrap_or(document_id)
}

/// Fold ranked hits into ranked per-document results.
///
/// `hits` must be in non-increasing similarity order, as produced by the
/// similarity search. The result holds at most `options.top_n` documents;
/// documents with a title shorter than [`MIN_TITLE_CHARS`] after trimming are
/// removed after truncation and are not replaced.
pub fn aggregate<I>(hits: I, metadata: &MetadataTable, options: &AggregateOptions) -> Vec<AggregatedResult>
where
    I: IntoIterator<Item = NeighborHit>,
{
    let mut results: Vec<AggregatedResult> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut short_hits = 0usize;

    for hit in hits {
        if hit.token_count() < MIN_SENTENCE_TOKENS {
            short_hits += 1;
            continue;
        }

        let key = document_key(&hit.document_id);
        if let Some(&position) = positions.get(key) {
            results[position].push_hit(hit);
            continue;
        }

        let Some(paper) = metadata.get(key) else {
            warn!("Missing metadata for document {}, dropping hit", key);
            continue;
        };
        if options.topic_only && !paper.topic_flag {
            continue;
        }

        let key = key.to_string();
        positions.insert(key.clone(), results.len());
        results.push(AggregatedResult::new(key, paper.clone(), hit));
    }

    debug!(
        "Aggregated hits into {} documents ({} short sentences skipped)",
        results.len(),
        short_hits
    );

    // Stable sorts keep first-encountered order among equal keys.
    match options.sort_mode {
        SortMode::Relevance => results.sort_by(|a, b| b.score.total_cmp(&a.score)),
        SortMode::PublishDate => results.sort_by(|a, b| b.paper.publish_date.cmp(&a.paper.publish_date)),
    }
    results.truncate(options.top_n);

    results.retain(|result| {
        let keep = result.paper.title.trim().chars().count() >= MIN_TITLE_CHARS;
        if !keep {
            debug!("Excluding document {} with short title", result.document_id);
        }
        keep
    });
    results
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::models::PaperMetadata;

    fn paper(id: &str, title: &str, year: i32, topic: bool) -> PaperMetadata {
        PaperMetadata {
            id: id.to_string(),
            title: title.to_string(),
            authors: String::new(),
            venue: "Journal".to_string(),
            publish_time: year.to_string(),
            publish_date: NaiveDate::from_ymd_opt(year, 1, 1).unwrap(),
            doi: format!("10.1/{}", id),
            topic_flag: topic,
        }
    }

    fn hit(document_id: &str, section_id: u32, similarity: f32) -> NeighborHit {
        NeighborHit {
            document_id: document_id.to_string(),
            section_id,
            sentence_index: 0,
            sentence_text: "one two three four five".to_string(),
            similarity,
        }
    }

    fn table() -> MetadataTable {
        [
            paper("a", "Viral shedding in adults", 2018, true),
            paper("b", "Masks and transmission", 2020, false),
            paper("c", "Serology of recovered patients", 2019, true),
            paper("d", "AB", 2021, true),
        ]
        .into_iter()
        .collect()
    }

    fn options(sort_mode: SortMode, top_n: usize) -> AggregateOptions {
        AggregateOptions {
            topic_only: false,
            sort_mode,
            top_n,
        }
    }

    #[test]
    fn test_score_is_first_hit() {
        let hits = vec![hit("a", 1, 0.9), hit("b", 0, 0.8), hit("a", 2, 0.7), hit("a", 1, 0.6)];
        let results = aggregate(hits, &table(), &options(SortMode::Relevance, 20));

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document_id, "a");
        assert_eq!(results[0].score, 0.9);
        assert_eq!(results[0].hits.len(), 3);
        assert_eq!(results[1].document_id, "b");
        assert_eq!(results[1].score, 0.8);
    }

    #[test]
    fn test_short_sentences_dropped() {
        let mut short = hit("c", 0, 0.99);
        short.sentence_text = "too short here".to_string();
        let hits = vec![short, hit("a", 0, 0.5)];

        let results = aggregate(hits, &table(), &options(SortMode::Relevance, 20));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, "a");
        assert!(results.iter().flat_map(|r| &r.hits).all(|h| h.token_count() >= MIN_SENTENCE_TOKENS));
    }

    #[test]
    fn test_missing_metadata_dropped() {
        let hits = vec![hit("zzz", 0, 0.99), hit("b", 0, 0.5)];
        let results = aggregate(hits, &table(), &options(SortMode::Relevance, 20));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, "b");
    }

    #[test]
    fn test_key_is_prefix_before_dot() {
        let hits = vec![hit("a.xml", 0, 0.9), hit("a", 1, 0.8)];
        let results = aggregate(hits, &table(), &options(SortMode::Relevance, 20));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, "a");
        assert_eq!(results[0].hits.len(), 2);
        assert_eq!(document_key("PMC1.2.3"), "PMC1");
    }

    #[test]
    fn test_topic_only_filter() {
        let hits = vec![hit("b", 0, 0.9), hit("a", 0, 0.8), hit("c", 0, 0.7)];
        let opts = AggregateOptions {
            topic_only: true,
            ..options(SortMode::Relevance, 20)
        };
        let results = aggregate(hits, &table(), &opts);
        let ids: Vec<&str> = results.iter().map(|r| r.document_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_sort_by_publish_date() {
        let hits = vec![hit("a", 0, 0.9), hit("b", 0, 0.8), hit("c", 0, 0.7)];
        let results = aggregate(hits, &table(), &options(SortMode::PublishDate, 20));
        let ids: Vec<&str> = results.iter().map(|r| r.document_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_truncates_to_top_n() {
        let hits = vec![hit("a", 0, 0.9), hit("b", 0, 0.8), hit("c", 0, 0.7)];
        let results = aggregate(hits, &table(), &options(SortMode::Relevance, 2));
        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn test_short_title_excluded_without_backfill() {
        let hits = vec![hit("d", 0, 0.99), hit("a", 0, 0.9), hit("b", 0, 0.8)];
        let results = aggregate(hits, &table(), &options(SortMode::Relevance, 2));
        let ids: Vec<&str> = results.iter().map(|r| r.document_id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(aggregate(Vec::new(), &table(), &AggregateOptions::default()).is_empty());
    }
}
