//! Paper metadata table loaded from CSV.
//!
//! Rows are keyed by a configurable identifier column (`cord_uid` by default).
//! Two fields are derived while loading:
//! - `topic_flag`: whether the title or abstract mentions one of
//!   [`TOPIC_KEYWORDS`] (case-insensitive);
//! - `publish_date`: `publish_time` parsed leniently, falling back to
//!   January 1st of [`DEFAULT_PUBLISH_YEAR`].

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use tracing::{debug, info, warn};

use super::{StorageError, StorageResult};
use crate::models::PaperMetadata;

/// Default identifier column.
pub const DEFAULT_PAPER_ID_FIELD: &str = "cord_uid";

/// Year used when `publish_time` cannot be parsed.
pub const DEFAULT_PUBLISH_YEAR: i32 = 2019;

/// Keywords that mark a paper as on-topic.
pub const TOPIC_KEYWORDS: &[&str] = &[
    "covid-19",
    "covid19",
    "covid",
    "sars-cov-2",
    "sars-cov2",
    "sarscov2",
    "novel coronavirus",
    "2019-ncov",
    "2019ncov",
];

/// Columns every metadata file must provide besides the key column.
pub const REQUIRED_FIELDS: &[&str] = &["title", "authors", "journal", "publish_time", "doi"];

static TOPIC_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let alternation = TOPIC_KEYWORDS
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&alternation)
        .case_insensitive(true)
        .build()
        .expect("Invalid topic keyword pattern")
});

/// Formats tried, in order, for full dates.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y %b %d", "%Y %B %d", "%d %b %Y", "%B %d, %Y", "%b %d, %Y"];

/// Whether `text` mentions any topic keyword.
pub fn is_on_topic(text: &str) -> bool {
    TOPIC_PATTERN.is_match(text)
}

/// Fallback publication date.
pub fn default_publish_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(DEFAULT_PUBLISH_YEAR, 1, 1).unwrap_or_default()
}

/// Parse a free-form publication time.
///
/// Accepts full dates in a handful of common layouts, `"YYYY Mon"` and bare
/// years (mapped to January 1st). Anything else yields `None`.
pub fn parse_publish_time(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }

    // "2020 Mar" and similar month-only values
    let with_day = format!("{} 1", raw);
    for format in ["%Y %b %d", "%Y %B %d"] {
        if let Ok(date) = NaiveDate::parse_from_str(&with_day, format) {
            return Some(date);
        }
    }

    if raw.len() == 4 && raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw.parse::<i32>().ok().and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1));
    }

    None
}

/// Process-wide paper metadata, keyed by paper id.
#[derive(Debug, Clone, Default)]
pub struct MetadataTable {
    papers: HashMap<String, Arc<PaperMetadata>>,
}

impl MetadataTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the table from a CSV file.
    ///
    /// # Arguments
    /// * `path` - CSV file with a header row
    /// * `key_field` - Column holding the paper identifier
    ///
    /// # Errors
    /// Returns `StorageError::SchemaError` if the key column or a required
    /// column is missing, or other `StorageError` variants if the file cannot
    /// be read
    pub fn from_csv_path(path: &Path, key_field: &str) -> StorageResult<Self> {
        let started = Instant::now();
        info!("Loading paper metadata from {}", path.display());

        let file = std::fs::File::open(path)?;
        let table = Self::from_reader(file, key_field)?;

        info!(
            "Found {} on-topic papers out of {} total in {:.2}s",
            table.topic_count(),
            table.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(table)
    }

    /// Load the table from any CSV reader.
    ///
    /// Rows that cannot be decoded or have an empty key are skipped with a
    /// warning. A later row with the same key replaces the earlier one.
    pub fn from_reader<R: Read>(reader: R, key_field: &str) -> StorageResult<Self> {
        let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

        let headers = csv_reader
            .headers()
            .map_err(|e| StorageError::ParseError(e.to_string()))?
            .clone();
        for field in std::iter::once(&key_field).chain(REQUIRED_FIELDS.iter()) {
            if !headers.iter().any(|h| h == *field) {
                return Err(StorageError::SchemaError(format!(
                    "metadata is missing required column '{}'",
                    field
                )));
            }
        }

        let mut table = Self::new();
        for (line_no, row) in csv_reader.deserialize::<HashMap<String, String>>().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!("Skipping malformed metadata row {}: {}", line_no + 1, e);
                    continue;
                }
            };

            let field = |name: &str| row.get(name).cloned().unwrap_or_default();
            let id = field(key_field).trim().to_string();
            if id.is_empty() {
                debug!("Skipping metadata row {} with empty '{}'", line_no + 1, key_field);
                continue;
            }

            let title = field("title");
            let publish_time = field("publish_time");
            let topic_flag = is_on_topic(&title) || is_on_topic(&field("abstract"));
            let publish_date = parse_publish_time(&publish_time).unwrap_or_else(default_publish_date);

            table.insert(PaperMetadata {
                id,
                title,
                authors: field("authors"),
                venue: field("journal"),
                publish_time,
                publish_date,
                doi: field("doi"),
                topic_flag,
            });
        }

        Ok(table)
    }

    /// Add or replace a paper.
    pub fn insert(&mut self, paper: PaperMetadata) {
        self.papers.insert(paper.id.clone(), Arc::new(paper));
    }

    /// Look up a paper by id.
    pub fn get(&self, id: &str) -> Option<&Arc<PaperMetadata>> {
        self.papers.get(id)
    }

    /// Number of papers.
    pub fn len(&self) -> usize {
        self.papers.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.papers.is_empty()
    }

    /// Number of papers with the topic flag set.
    pub fn topic_count(&self) -> usize {
        self.papers.values().filter(|p| p.topic_flag).count()
    }
}

impl FromIterator<PaperMetadata> for MetadataTable {
    fn from_iter<I: IntoIterator<Item = PaperMetadata>>(iter: I) -> Self {
        let mut table = Self::new();
        for paper in iter {
            table.insert(paper);
        }
        table
    }
}
