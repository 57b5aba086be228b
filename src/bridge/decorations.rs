//! Tracker reference decorations.
//!
//! A decoration marks one tracker reference in a document and carries the
//! server's hover text for that spot, ready for an editor to render.

use std::sync::Arc;

use lsp_types::{Position, Range, Url};
use tracing::debug;

use crate::api::TrlcApi;
use crate::lsp::types::hover_text;

use super::ItemPattern;

/// One decorated tracker reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoration {
    /// Span of the reference, in LSP (UTF-16) coordinates.
    pub range: Range,
    /// Referenced tracker item.
    pub item_id: String,
    /// Hover text from the server, if it had any.
    pub hover: Option<String>,
}

/// Builds decorations from the capability API.
pub struct DecorationProvider {
    api: Arc<dyn TrlcApi>,
    pattern: ItemPattern,
}

impl std::fmt::Debug for DecorationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecorationProvider")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

impl DecorationProvider {
    /// Creates a provider that queries `api` for each match of `pattern`.
    pub fn new(api: Arc<dyn TrlcApi>, pattern: ItemPattern) -> Self {
        Self { api, pattern }
    }

    /// Decorations for every tracker reference in `text`.
    pub async fn decorations(&self, uri: &Url, text: &str) -> Vec<Decoration> {
        let index = LineIndex::new(text);
        let mut decorations = Vec::new();

        for (span, item_id) in self.pattern.find(text) {
            let range = Range {
                start: index.position(span.start),
                end: index.position(span.end),
            };
            let hover = self
                .api
                .hover_details(uri.clone(), range.start)
                .await
                .map(|h| hover_text(h.contents));

            decorations.push(Decoration {
                range,
                item_id: item_id.to_string(),
                hover,
            });
        }

        debug!(%uri, count = decorations.len(), "computed decorations");
        decorations
    }
}

/// Byte offset to LSP position conversion for one text.
struct LineIndex<'a> {
    text: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(text: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { text, line_starts }
    }

    fn position(&self, offset: usize) -> Position {
        let line = self.line_starts.partition_point(|&start| start <= offset) - 1;
        let start = self.line_starts[line];
        let character = self.text[start..offset].encode_utf16().count();
        Position::new(
            u32::try_from(line).unwrap_or(u32::MAX),
            u32::try_from(character).unwrap_or(u32::MAX),
        )
    }
}
