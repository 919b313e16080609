//! Core data models for the passage search system.
//!
//! This module contains the fundamental data structures shared across the
//! application: the per-sentence records held by the vector index, paper
//! metadata, entity and match spans used by the highlighter, and the
//! query-scoped hit and result types.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Identifier of a section (paragraph) within a document.
pub type SectionId = u32;

/// One sentence of the corpus, parallel to one row of the vector index.
///
/// Records are created when the corpus is built and held, unchanged, for the
/// lifetime of the serving process. The field order matches the persisted
/// `(document_id, section_id, sentence_index, sentence_text)` tuples.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SentenceRecord {
    /// Source document identifier (may carry a file extension such as `.json`)
    pub document_id: String,

    /// Section the sentence was extracted from
    pub section_id: SectionId,

    /// Position of the sentence within its section
    pub sentence_index: u32,

    /// Raw sentence text, verbatim from the section
    pub sentence_text: String,
}

impl SentenceRecord {
    /// Create a new sentence record.
    pub fn new(
        document_id: impl Into<String>,
        section_id: SectionId,
        sentence_index: u32,
        sentence_text: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            section_id,
            sentence_index,
            sentence_text: sentence_text.into(),
        }
    }
}

/// A single nearest-neighbor hit produced by the similarity search.
///
/// Hits are ephemeral: they are produced per query and consumed immediately by
/// the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NeighborHit {
    /// Document identifier with any `.json` suffix removed
    pub document_id: String,

    /// Section containing the matched sentence
    pub section_id: SectionId,

    /// Position of the sentence within its section
    pub sentence_index: u32,

    /// Matched sentence text
    pub sentence_text: String,

    /// Cosine similarity to the query (higher is better)
    pub similarity: f32,
}

impl NeighborHit {
    /// Build a hit from an index record and its similarity score.
    pub fn from_record(record: &SentenceRecord, similarity: f32) -> Self {
        let document_id = record
            .document_id
            .strip_suffix(".json")
            .unwrap_or(&record.document_id)
            .to_string();
        Self {
            document_id,
            section_id: record.section_id,
            sentence_index: record.sentence_index,
            sentence_text: record.sentence_text.clone(),
            similarity,
        }
    }

    /// Number of whitespace-delimited tokens in the sentence.
    pub fn token_count(&self) -> usize {
        self.sentence_text.split_whitespace().count()
    }
}

/// Metadata for one paper, keyed by the configured identifier field.
///
/// `topic_flag` and `publish_date` are derived when the metadata table is
/// loaded; the remaining fields are carried verbatim from the source record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperMetadata {
    /// Paper identifier (value of the configured key column)
    pub id: String,

    /// Paper title
    pub title: String,

    /// Raw author field, possibly a serialized list and possibly malformed
    pub authors: String,

    /// Journal or venue name
    pub venue: String,

    /// Publication time exactly as found in the source record
    pub publish_time: String,

    /// Parsed publication date (falls back to the default epoch year)
    pub publish_date: NaiveDate,

    /// Digital object identifier, without the resolver prefix
    pub doi: String,

    /// Whether the title or abstract mentions one of the topic keywords
    pub topic_flag: bool,
}

impl PaperMetadata {
    /// Link to the paper through the DOI resolver.
    pub fn doi_link(&self) -> String {
        format!("https://doi.org/{}", self.doi)
    }
}

/// A pre-computed entity annotation over one section's raw text.
///
/// Offsets are character offsets (not bytes), half-open `[start, end)`, as
/// produced by the upstream entity linker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntitySpan {
    /// First character covered by the entity
    pub start: usize,

    /// One past the last character covered by the entity
    pub end: usize,

    /// Entity type (e.g. "disease", "gene"), used for color lookup
    #[serde(rename = "type")]
    pub kind: String,

    /// Link target for the entity label
    #[serde(rename = "url")]
    pub target_url: String,

    /// Secondary link target, when the linker produced one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_url: Option<String>,
}

impl EntitySpan {
    /// Create an entity span without a secondary link.
    pub fn new(start: usize, end: usize, kind: impl Into<String>, target_url: impl Into<String>) -> Self {
        Self {
            start,
            end,
            kind: kind.into(),
            target_url: target_url.into(),
            alt_url: None,
        }
    }
}

/// A region of section text that matched the query.
///
/// Offsets are byte offsets into the section text, half-open `[start, end)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct MatchSpan {
    /// First byte of the matched sentence
    pub start: usize,

    /// One past the last byte of the matched sentence
    pub end: usize,
}

impl MatchSpan {
    /// Create a new match span.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Locate `sentence` inside `section` (first occurrence).
    ///
    /// Returns `None` when the sentence does not appear verbatim.
    pub fn locate(section: &str, sentence: &str) -> Option<Self> {
        section
            .find(sentence)
            .map(|start| Self::new(start, start + sentence.len()))
    }
}

/// Ordering applied to aggregated documents.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    /// Highest similarity first
    #[default]
    Relevance,

    /// Most recently published first
    PublishDate,
}

impl SortMode {
    /// Pick the sort mode from the query surface's date switch.
    pub fn from_sort_by_date(sort_by_date: bool) -> Self {
        if sort_by_date {
            SortMode::PublishDate
        } else {
            SortMode::Relevance
        }
    }
}

/// Options that shape the result list of a query, apart from its text.
///
/// Two queries with the same text and equal options produce the same output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Rank by publication date instead of similarity
    pub sort_by_date: bool,

    /// Keep only on-topic papers
    pub topic_only: bool,

    /// Nearest sentences retrieved (K)
    pub neighbors: usize,

    /// Maximum number of documents
    pub top_documents: usize,
}

/// All hits for one document, collapsed into a single ranked result.
///
/// Built incrementally while the hit stream is folded, then frozen for ranking.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedResult {
    /// Document identifier (aggregation key)
    pub document_id: String,

    /// Similarity of the first (highest-ranked) hit for this document
    pub score: f32,

    /// Paper metadata shared with the process-wide metadata table
    pub paper: Arc<PaperMetadata>,

    /// Every retained hit, in the order it was encountered
    pub hits: Vec<NeighborHit>,
}

impl AggregatedResult {
    /// Start a result from its first (best) hit.
    pub fn new(document_id: String, paper: Arc<PaperMetadata>, first_hit: NeighborHit) -> Self {
        Self {
            document_id,
            score: first_hit.similarity,
            paper,
            hits: vec![first_hit],
        }
    }

    /// Append a later hit. The score is never changed by later hits.
    pub fn push_hit(&mut self, hit: NeighborHit) {
        self.hits.push(hit);
    }

    /// Hits grouped by section, in ascending section-id order.
    pub fn sections(&self) -> BTreeMap<SectionId, Vec<&NeighborHit>> {
        let mut sections: BTreeMap<SectionId, Vec<&NeighborHit>> = BTreeMap::new();
        for hit in &self.hits {
            sections.entry(hit.section_id).or_default().push(hit);
        }
        sections
    }
}
