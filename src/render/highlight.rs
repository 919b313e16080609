//! Entity and match highlighting over raw section text.
//!
//! Spans are merged right to left. Entity spans take precedence over the
//! passage-match spans they overlap: a match that collides with an entity is
//! kept pending while the entity is rendered, and is rendered later around
//! the entity's finished markup.
//!
//! The source text is never rewritten. Rendered fragments are stored by their
//! original byte offsets and the output is assembled by slicing the source,
//! so offsets of spans that are still pending stay valid. A span that
//! intersects an already rendered fragment is widened to enclose it; markup
//! is therefore always properly nested and no rendered element is split.
//!
//! Entities sharing a start offset are rendered shortest first, so an entity
//! inside another (a gene name within a disease mention) keeps its own mark
//! and link. A match lying strictly inside rendered markup is dropped; a
//! match with exactly the same extent wraps that markup instead.

use std::collections::{BTreeMap, HashMap};

use html_escape::{encode_double_quoted_attribute, encode_text};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::models::{EntitySpan, MatchSpan};

/// Background of passage-match marks.
pub const DEFAULT_HIGHLIGHT_COLOR: &str = "linear-gradient(90deg, #aa9cfc, #fc9ce7)";

/// Background of disease entity marks.
pub const DEFAULT_DISEASE_COLOR: &str = "#ffe4b5";

/// Background of gene entity marks.
pub const DEFAULT_GENE_COLOR: &str = "#ffa07a";

/// Label shown on passage-match marks.
pub const HIGHLIGHT_LABEL: &str = "Highlight";

/// Label shown on entity marks (an external-link icon).
pub const ENTITY_LABEL: &str = r#"<i class="fa">&#xf08e;</i>"#;

const MARK_STYLE: &str = "padding: 0.15em 0.15em; margin: 0 0.25em; line-height: 1.5; border-radius: 0.15em";
const LABEL_STYLE: &str = "font-size: 0.8em; font-weight: bold; line-height: 1.5; border-radius: 0.15em; \
                           text-transform: uppercase; vertical-align: middle; margin-right: 0.15rem";

/// Errors that can occur while highlighting.
#[derive(Debug, Error)]
pub enum HighlightError {
    /// An entity's type has no entry in the color table
    #[error("Unknown entity type '{0}'")]
    UnknownEntityType(String),
}

/// Result type for highlighting.
pub type HighlightResult<T> = Result<T, HighlightError>;

/// Display colors for entity types and passage matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorTable {
    /// Background of passage-match marks
    pub highlight: String,

    /// Background per entity type
    pub entities: HashMap<String, String>,
}

impl Default for ColorTable {
    fn default() -> Self {
        Self::new(DEFAULT_HIGHLIGHT_COLOR)
            .with_entity("disease", DEFAULT_DISEASE_COLOR)
            .with_entity("gene", DEFAULT_GENE_COLOR)
    }
}

impl ColorTable {
    /// Create a table with only a match color.
    pub fn new(highlight: impl Into<String>) -> Self {
        Self {
            highlight: highlight.into(),
            entities: HashMap::new(),
        }
    }

    /// Add or replace the color of an entity type.
    pub fn with_entity(mut self, kind: impl Into<String>, color: impl Into<String>) -> Self {
        self.entities.insert(kind.into(), color.into());
        self
    }

    /// Color for an entity type.
    ///
    /// # Errors
    /// Returns `HighlightError::UnknownEntityType` if the type has no color
    pub fn color_for(&self, kind: &str) -> HighlightResult<&str> {
        self.entities
            .get(kind)
            .map(String::as_str)
            .ok_or_else(|| HighlightError::UnknownEntityType(kind.to_string()))
    }
}

/// Overlay entity and match markup onto `text`.
///
/// All offsets are byte offsets into `text`, half-open. Empty spans and spans
/// that fall outside the text or inside a UTF-8 sequence are skipped with a
/// warning. Text outside markup is HTML-escaped.
///
/// # Errors
/// Returns `HighlightError::UnknownEntityType` if any entity's type has no
/// color, before anything is rendered
pub fn highlight(
    text: &str,
    entities: &[EntitySpan],
    matches: &[MatchSpan],
    colors: &ColorTable,
) -> HighlightResult<String> {
    for entity in entities {
        colors.color_for(&entity.kind)?;
    }

    let mut entities: Vec<&EntitySpan> = entities
        .iter()
        .filter(|e| is_valid_span(text, e.start, e.end))
        .collect();
    let mut matches: Vec<MatchSpan> = matches
        .iter()
        .filter(|m| is_valid_span(text, m.start, m.end))
        .copied()
        .collect();
    entities.sort_by_key(|e| (e.start, e.end));
    matches.sort();

    let mut overlay = Overlay::new(text);
    loop {
        match (entities.last(), matches.last()) {
            (Some(entity), Some(pending)) => {
                // Entity wins whenever it reaches past the start of the match.
                if entity.end > pending.start {
                    render_entity_group(&mut overlay, &mut entities, colors)?;
                } else {
                    overlay.render_match(*pending, colors);
                    matches.pop();
                }
            }
            (Some(_), None) => render_entity_group(&mut overlay, &mut entities, colors)?,
            (None, Some(pending)) => {
                overlay.render_match(*pending, colors);
                matches.pop();
            }
            (None, None) => break,
        }
    }

    Ok(overlay.finish())
}

/// Render every pending entity that shares the start of the last one.
///
/// `entities` is sorted by `(start, end)`, so the group comes out shortest
/// first and each longer entity encloses the marks before it.
fn render_entity_group(
    overlay: &mut Overlay<'_>,
    entities: &mut Vec<&EntitySpan>,
    colors: &ColorTable,
) -> HighlightResult<()> {
    let Some(start) = entities.last().map(|e| e.start) else {
        return Ok(());
    };
    let split = entities.partition_point(|e| e.start < start);
    for entity in entities.split_off(split) {
        overlay.render_entity(entity, colors)?;
    }
    Ok(())
}

fn is_valid_span(text: &str, start: usize, end: usize) -> bool {
    let valid = start < end && end <= text.len() && text.is_char_boundary(start) && text.is_char_boundary(end);
    if !valid {
        warn!("Skipping invalid span [{}, {}) over text of {} bytes", start, end, text.len());
    }
    valid
}

/// A finished piece of markup covering `[start, end)` of the source.
#[derive(Debug)]
struct Fragment {
    end: usize,
    html: String,
}

/// Source text plus non-overlapping rendered fragments keyed by start offset.
struct Overlay<'a> {
    text: &'a str,
    fragments: BTreeMap<usize, Fragment>,
}

impl<'a> Overlay<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            fragments: BTreeMap::new(),
        }
    }

    fn render_entity(&mut self, entity: &EntitySpan, colors: &ColorTable) -> HighlightResult<()> {
        let color = colors.color_for(&entity.kind)?;
        let label = format!(
            r#"<a href="{}" target="_blank" style="text-decoration: none; color: black;">{}</a>"#,
            encode_double_quoted_attribute(&entity.target_url),
            ENTITY_LABEL
        );
        self.render(entity.start, entity.end, color, &label);
        Ok(())
    }

    fn render_match(&mut self, span: MatchSpan, colors: &ColorTable) {
        if let Some((covering, covering_end)) = self.strictly_covering(span.start, span.end) {
            warn!(
                "Dropping highlight [{}, {}) inside markup [{}, {})",
                span.start, span.end, covering, covering_end
            );
            return;
        }
        self.render(span.start, span.end, &colors.highlight, HIGHLIGHT_LABEL);
    }

    /// Extent of a rendered fragment that contains `[start, end)` and is larger.
    fn strictly_covering(&self, start: usize, end: usize) -> Option<(usize, usize)> {
        self.fragments
            .range(..=start)
            .next_back()
            .filter(|(&s, fragment)| fragment.end >= end && (s < start || fragment.end > end))
            .map(|(&s, fragment)| (s, fragment.end))
    }

    /// Wrap `[start, end)` in a mark, widening it over any fragment it touches.
    fn render(&mut self, mut start: usize, mut end: usize, color: &str, label: &str) {
        loop {
            let mut widened = false;
            for (&fragment_start, fragment) in self.fragments.range(..end) {
                if fragment.end > start && (fragment_start < start || fragment.end > end) {
                    start = start.min(fragment_start);
                    end = end.max(fragment.end);
                    widened = true;
                }
            }
            if !widened {
                break;
            }
        }

        let enclosed: Vec<usize> = self.fragments.range(start..end).map(|(&s, _)| s).collect();

        let mut html = format!(
            r#"<mark class="entity" style="background: {}; {}">"#,
            encode_double_quoted_attribute(color),
            MARK_STYLE
        );
        let mut cursor = start;
        for fragment_start in enclosed {
            if let Some(fragment) = self.fragments.remove(&fragment_start) {
                html.push_str(&encode_text(&self.text[cursor..fragment_start]));
                html.push_str(&fragment.html);
                cursor = fragment.end;
            }
        }
        html.push_str(&encode_text(&self.text[cursor..end]));
        html.push_str(&format!(r#"<span class="label" style="{}">{}</span></mark>"#, LABEL_STYLE, label));

        self.fragments.insert(start, Fragment { end, html });
    }

    fn finish(self) -> String {
        let mut out = String::with_capacity(self.text.len() * 2);
        let mut cursor = 0;
        for (start, fragment) in self.fragments {
            out.push_str(&encode_text(&self.text[cursor..start]));
            out.push_str(&fragment.html);
            cursor = fragment.end;
        }
        out.push_str(&encode_text(&self.text[cursor..]));
        out
    }
}
