//! Read-only document stores.
//!
//! This module defines the lookup interfaces the search engine needs from its
//! collaborators (section text and entity links) and provides in-memory,
//! JSON-backed implementations of them. Paper metadata lives in
//! [`metadata::MetadataTable`], loaded from CSV; precomputed query responses
//! live in [`cache::CachedResults`].
//!
//! Everything here is loaded once at startup and never mutated afterwards, so
//! the stores are shared between concurrent queries without locking.

pub mod cache;
pub mod metadata;

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{EntitySpan, SectionId};

/// Errors that can occur while loading or saving stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to open, read or write a store file
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A store file could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A store file is missing required columns or fields
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Failed to serialize a store for writing
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Lookup of raw section text by document and section.
pub trait CorpusStore: Send + Sync {
    /// Raw text of one section, if the document and section are known.
    fn section_text(&self, document_id: &str, section_id: SectionId) -> Option<&str>;
}

/// Lookup of pre-computed entity spans by document and section.
pub trait EntityLinkStore: Send + Sync {
    /// Whether any entity links were recorded for the document.
    fn has_document(&self, document_id: &str) -> bool;

    /// Entity spans for one section; empty when none were recorded.
    fn entity_spans(&self, document_id: &str, section_id: SectionId) -> &[EntitySpan];
}

/// In-memory `document_id -> {section_id -> text}` map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectionCorpus {
    documents: HashMap<String, BTreeMap<SectionId, String>>,
}

impl SectionCorpus {
    /// Create an empty corpus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a corpus from a JSON object of objects.
    ///
    /// # Errors
    /// Returns `StorageError` if the file cannot be read or parsed
    pub fn from_json_path(path: &Path) -> StorageResult<Self> {
        read_json(path)
    }

    /// Add or replace one section.
    pub fn insert(&mut self, document_id: impl Into<String>, section_id: SectionId, text: impl Into<String>) {
        self.documents
            .entry(document_id.into())
            .or_default()
            .insert(section_id, text.into());
    }

    /// Number of documents in the corpus.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the corpus holds no documents.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl CorpusStore for SectionCorpus {
    fn section_text(&self, document_id: &str, section_id: SectionId) -> Option<&str> {
        self.documents
            .get(document_id)
            .and_then(|sections| sections.get(&section_id))
            .map(String::as_str)
    }
}

/// In-memory `document_id -> {section_id -> [EntitySpan]}` map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityLinks {
    documents: HashMap<String, BTreeMap<SectionId, Vec<EntitySpan>>>,
}

impl EntityLinks {
    /// Create an empty link store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load entity links from JSON.
    ///
    /// # Errors
    /// Returns `StorageError` if the file cannot be read or parsed
    pub fn from_json_path(path: &Path) -> StorageResult<Self> {
        read_json(path)
    }

    /// Append a span to one section of a document.
    pub fn insert(&mut self, document_id: impl Into<String>, section_id: SectionId, span: EntitySpan) {
        self.documents
            .entry(document_id.into())
            .or_default()
            .entry(section_id)
            .or_default()
            .push(span);
    }

    /// Number of documents with links.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether no document has links.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl EntityLinkStore for EntityLinks {
    fn has_document(&self, document_id: &str) -> bool {
        self.documents.contains_key(document_id)
    }

    fn entity_spans(&self, document_id: &str, section_id: SectionId) -> &[EntitySpan] {
        self.documents
            .get(document_id)
            .and_then(|sections| sections.get(&section_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Read and deserialize a JSON file.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> StorageResult<T> {
    let file = File::open(path)?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| StorageError::ParseError(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_corpus_lookup() {
        let mut corpus = SectionCorpus::new();
        corpus.insert("doc1", 0, "Intro text.");
        corpus.insert("doc1", 3, "Methods text.");

        assert_eq!(corpus.section_text("doc1", 3), Some("Methods text."));
        assert_eq!(corpus.section_text("doc1", 1), None);
        assert_eq!(corpus.section_text("doc2", 0), None);
        assert_eq!(corpus.len(), 1);
    }

    #[test]
    fn test_section_corpus_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sections.json");
        std::fs::write(&path, r#"{"doc1": {"0": "Intro.", "12": "Results."}}"#).unwrap();

        let corpus = SectionCorpus::from_json_path(&path).unwrap();
        assert_eq!(corpus.section_text("doc1", 12), Some("Results."));
    }

    #[test]
    fn test_entity_links_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.json");
        std::fs::write(
            &path,
            r#"{"doc1": {"2": [{"start": 0, "end": 5, "type": "disease", "url": "https://medgen/x"},
                               {"start": 9, "end": 12, "type": "gene", "url": "https://uniprot/y",
                                "alt_url": "https://ncbi/gene/1"}]}}"#,
        )
        .unwrap();

        let links = EntityLinks::from_json_path(&path).unwrap();
        assert!(links.has_document("doc1"));
        assert!(!links.has_document("doc2"));

        let spans = links.entity_spans("doc1", 2);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].alt_url.as_deref(), Some("https://ncbi/gene/1"));
        assert!(links.entity_spans("doc1", 7).is_empty());
    }

    #[test]
    fn test_read_json_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();

        match SectionCorpus::from_json_path(&path) {
            Err(StorageError::ParseError(msg)) => assert!(msg.contains("bad.json")),
            other => panic!("Expected ParseError, got {:?}", other),
        }
    }
}
