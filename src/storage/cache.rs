//! Precomputed query responses, keyed by query text and options.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{read_json, StorageError, StorageResult};
use crate::models::QueryOptions;

/// One precomputed fragment and the options it was rendered with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// Sort, filter and size options of the query
    pub options: QueryOptions,

    /// Rendered HTML fragment
    pub html: String,
}

/// Rendered fragments for queries that were run ahead of time.
///
/// A query text may be cached under several option sets; a lookup only hits
/// when both the text and the options match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CachedResults {
    responses: HashMap<String, Vec<CachedResponse>>,
}

impl CachedResults {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a cache file written by [`CachedResults::save`].
    pub fn load(path: &Path) -> StorageResult<Self> {
        let cache: Self = read_json(path)?;
        info!("Loaded {} cached query results from {}", cache.len(), path.display());
        Ok(cache)
    }

    /// Write the cache as JSON through a temp file and a rename.
    pub fn save(&self, path: &Path) -> StorageResult<()> {
        let encoded =
            serde_json::to_vec(&self.responses).map_err(|e| StorageError::SerializationError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = Path::new(&tmp_name);
        fs::write(tmp_path, encoded)?;
        fs::rename(tmp_path, path)?;
        Ok(())
    }

    /// Cached fragment for an exact query string rendered with `options`.
    pub fn get(&self, query: &str, options: &QueryOptions) -> Option<&str> {
        self.responses
            .get(query)?
            .iter()
            .find(|response| response.options == *options)
            .map(|response| response.html.as_str())
    }

    /// Store the fragment for a query, replacing one with the same options.
    pub fn insert(&mut self, query: impl Into<String>, options: QueryOptions, html: impl Into<String>) {
        let html = html.into();
        let responses = self.responses.entry(query.into()).or_default();
        match responses.iter_mut().find(|response| response.options == options) {
            Some(existing) => existing.html = html,
            None => responses.push(CachedResponse { options, html }),
        }
    }

    /// Number of cached fragments, over all queries and options.
    pub fn len(&self) -> usize {
        self.responses.values().map(Vec::len).sum()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(sort_by_date: bool, topic_only: bool) -> QueryOptions {
        QueryOptions {
            sort_by_date,
            topic_only,
            neighbors: 100,
            top_documents: 20,
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cached_results.json");

        let mut cache = CachedResults::new();
        cache.insert("incubation period", options(false, false), "<div>fragment</div>");
        cache.save(&path).unwrap();

        let loaded = CachedResults::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            loaded.get("incubation period", &options(false, false)),
            Some("<div>fragment</div>")
        );
        assert_eq!(loaded.get("Incubation period", &options(false, false)), None);
    }

    #[test]
    fn test_options_must_match() {
        let mut cache = CachedResults::new();
        cache.insert("q", options(false, false), "by relevance");
        cache.insert("q", options(true, true), "by date, on topic");

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("q", &options(false, false)), Some("by relevance"));
        assert_eq!(cache.get("q", &options(true, true)), Some("by date, on topic"));
        assert_eq!(cache.get("q", &options(true, false)), None);

        let fewer = QueryOptions {
            top_documents: 1,
            ..options(false, false)
        };
        assert_eq!(cache.get("q", &fewer), None);
    }

    #[test]
    fn test_insert_replaces_same_options() {
        let mut cache = CachedResults::new();
        cache.insert("q", options(false, false), "old");
        cache.insert("q", options(false, false), "new");
        assert_eq!(cache.get("q", &options(false, false)), Some("new"));
        assert_eq!(cache.len(), 1);
        assert!(!cache.is_empty());
    }
}
