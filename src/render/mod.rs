//! HTML rendering of aggregated search results.
//!
//! Each retained document becomes one fragment: a header with publication
//! details, the highlighted text of every section that produced a hit, and a
//! fixed color legend. Fragments for a query are concatenated in rank order.

pub mod highlight;

use html_escape::{encode_double_quoted_attribute, encode_text};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{AggregatedResult, EntitySpan, MatchSpan};
use crate::storage::{CorpusStore, EntityLinkStore};

pub use highlight::{highlight, ColorTable, HighlightError};

/// Maximum number of authors listed before "et al".
pub const MAX_AUTHORS: usize = 10;

/// Legend explaining the mark colors.
pub const LEGEND_HTML: &str = concat!(
    r#"<div class="legend">"#,
    r#"<div><div class="circle yellow"></div><p>Disease</p></div>"#,
    r#"<div><div class="circle orange"></div><p>Gene</p></div>"#,
    r#"<div><div class="circle purple"></div><p>Text Matching Search</p></div>"#,
    r#"</div>"#
);

/// Errors that can occur while rendering results.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Highlighting failed (e.g. an entity type has no color)
    #[error(transparent)]
    Highlight(#[from] HighlightError),

    /// The raw author field could not be parsed
    #[error("Malformed author field: {0}")]
    MalformedAuthorField(String),
}

/// Result type for rendering.
pub type RenderResult<T> = Result<T, RenderError>;

/// Parse a raw author field into individual names.
///
/// Two layouts are accepted: a serialized list of quoted names
/// (`['Li, Q.', "O'Hara, K."]`) and a semicolon-separated list
/// (`Li, Q.; Guan, X.`). Square brackets are ignored.
///
/// # Errors
/// Returns `RenderError::MalformedAuthorField` for an unterminated quote or
/// stray text between quoted names
pub fn parse_author_list(raw: &str) -> RenderResult<Vec<String>> {
    let cleaned = raw.replace(['[', ']'], "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Ok(Vec::new());
    }

    if cleaned.starts_with(['\'', '"']) {
        return parse_quoted_names(cleaned).ok_or_else(|| RenderError::MalformedAuthorField(raw.to_string()));
    }

    Ok(cleaned
        .split(';')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect())
}

fn parse_quoted_names(list: &str) -> Option<Vec<String>> {
    let mut names = Vec::new();
    let mut chars = list.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let quote = match chars.next() {
            None => break,
            Some(q @ ('\'' | '"')) => q,
            Some(_) => return None,
        };

        let mut name = String::new();
        loop {
            match chars.next() {
                None => return None,
                Some(c) if c == quote => break,
                Some(c) => name.push(c),
            }
        }
        let name = name.trim();
        if !name.is_empty() {
            names.push(name.to_string());
        }

        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        match chars.next() {
            None => break,
            Some(',') => continue,
            Some(_) => return None,
        }
    }

    Some(names)
}

/// Author line for the result header.
///
/// At most [`MAX_AUTHORS`] names are kept, followed by "et al". A malformed
/// field yields an empty line.
pub fn format_authors(raw: &str) -> String {
    let mut names = match parse_author_list(raw) {
        Ok(names) => names,
        Err(e) => {
            warn!("{}", e);
            Vec::new()
        }
    };
    if names.len() > MAX_AUTHORS {
        names.truncate(MAX_AUTHORS);
        names.push("et al".to_string());
    }
    names.join("; ")
}

/// Byte offset of the `n`th character of `text` (`text.len()` for one past
/// the last character).
fn char_to_byte(text: &str, n: usize) -> Option<usize> {
    if text.is_ascii() {
        return (n <= text.len()).then_some(n);
    }
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .nth(n)
}

/// Convert an entity span from character offsets to byte offsets in `text`.
///
/// Returns `None` when either offset lies past the end of the text.
pub fn to_byte_span(text: &str, span: &EntitySpan) -> Option<EntitySpan> {
    let start = char_to_byte(text, span.start)?;
    let end = char_to_byte(text, span.end)?;
    Some(EntitySpan {
        start,
        end,
        ..span.clone()
    })
}

/// Renders aggregated results against the corpus and entity-link stores.
pub struct ResultRenderer<'a> {
    corpus: &'a dyn CorpusStore,
    links: &'a dyn EntityLinkStore,
    colors: &'a ColorTable,
}

impl<'a> ResultRenderer<'a> {
    /// Create a renderer over borrowed stores.
    pub fn new(corpus: &'a dyn CorpusStore, links: &'a dyn EntityLinkStore, colors: &'a ColorTable) -> Self {
        Self { corpus, links, colors }
    }

    /// Render every result, in order, into one fragment.
    ///
    /// # Errors
    /// Returns the first `RenderError` raised by any document
    pub fn render_results(&self, results: &[AggregatedResult]) -> RenderResult<String> {
        let mut html = String::new();
        for result in results {
            html.push_str(&self.render_document(result)?);
        }
        Ok(html)
    }

    /// Render one document: header, highlighted sections and legend.
    ///
    /// Sections are emitted in ascending section-id order. A hit whose
    /// sentence cannot be found in its section contributes no match mark.
    /// Section text and entity links are looked up by the document key of
    /// the result, not by the raw hit id.
    ///
    /// # Errors
    /// Returns `RenderError::Highlight` if an entity type has no color
    pub fn render_document(&self, result: &AggregatedResult) -> RenderResult<String> {
        let paper = &result.paper;
        let mut html = format!(
            concat!(
                r#"<div class="wrap"><div class="res_text"><div class="paper-details">"#,
                r#"<span class="year">{} | {}</span>"#,
                r#"<h2><b><a href="{}" rel="noopener noreferrer" target="_blank">{}<i class="fa">&#xf08e;</i></a></b></h2>"#,
                r#"<i>{}</i><BR/><BR/><BR/>"#
            ),
            encode_text(&paper.publish_time),
            encode_text(&paper.venue),
            encode_double_quoted_attribute(&paper.doi_link()),
            encode_text(&paper.title),
            encode_text(&format_authors(&paper.authors)),
        );

        let has_links = self.links.has_document(&result.document_id);
        if !has_links {
            warn!("No links found for document {}", result.document_id);
        }

        for (section_id, hits) in result.sections() {
            let Some(text) = self.corpus.section_text(&result.document_id, section_id) else {
                warn!("Section {} of document {} is missing from the corpus", section_id, result.document_id);
                continue;
            };

            let mut matches = Vec::with_capacity(hits.len());
            for hit in &hits {
                match MatchSpan::locate(text, &hit.sentence_text) {
                    Some(span) => matches.push(span),
                    None => warn!(
                        "Sentence {} not found in section {} of document {}",
                        hit.sentence_index, section_id, hit.document_id
                    ),
                }
            }

            let entities: Vec<EntitySpan> = if has_links {
                self.links
                    .entity_spans(&result.document_id, section_id)
                    .iter()
                    .filter_map(|span| {
                        let converted = to_byte_span(text, span);
                        if converted.is_none() {
                            warn!(
                                "Entity span [{}, {}) is outside section {} of document {}",
                                span.start, span.end, section_id, result.document_id
                            );
                        }
                        converted
                    })
                    .collect()
            } else {
                Vec::new()
            };

            debug!(
                "Rendering section {} of {} with {} matches and {} entities",
                section_id,
                result.document_id,
                matches.len(),
                entities.len()
            );
            html.push_str(&highlight(text, &entities, &matches, self.colors)?);
        }

        html.push_str("</div>");
        html.push_str(LEGEND_HTML);
        html.push_str("</div></div>");
        Ok(html)
    }
}
