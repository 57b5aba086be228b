//! Helper types and conversions for talking to the TRLC server.

use std::path::Path;

use glob::Pattern;
use lsp_types::{HoverContents, MarkedString, Position, Url};

use crate::error::{ConfigError, LspError};

use super::LspResult;

/// Default document selector of the TRLC client.
pub const DEFAULT_DOCUMENT_PATTERNS: &[&str] = &["**/*.rsl", "**/*.trlc"];

/// Default glob of workspace files whose changes are forwarded to the server.
pub const DEFAULT_WATCH_PATTERN: &str = "**/.clientrc";

/// Converts a path to an LSP file:// URI.
///
/// Relative paths are resolved against the current directory and the result
/// is canonicalized, so the file must exist.
///
/// # Errors
/// Returns [`LspError::DocumentNotFound`] if the path cannot be resolved.
pub fn path_to_url(path: &Path) -> LspResult<Url> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| {
                LspError::DocumentNotFound(format!("failed to get current directory: {e}"))
            })?
            .join(path)
    };

    let canonical = absolute.canonicalize().map_err(|e| {
        LspError::DocumentNotFound(format!(
            "failed to canonicalize path '{}': {}",
            path.display(),
            e
        ))
    })?;

    Url::from_file_path(&canonical)
        .map_err(|()| LspError::DocumentNotFound(format!("invalid path: {}", canonical.display())))
}

/// Converts user-facing 1-indexed line/column to an LSP 0-indexed position.
///
/// # Errors
/// Returns error if line or column is 0.
pub fn to_lsp_position(line: u32, column: u32) -> LspResult<Position> {
    if line == 0 || column == 0 {
        return Err(LspError::InvalidPosition { line, column });
    }
    Ok(Position {
        line: line - 1,
        character: column - 1,
    })
}

/// Maps a file to the language identifier sent in `didOpen`.
pub fn language_id_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("rsl") => "rsl",
        Some("trlc") => "trlc",
        _ => "plaintext",
    }
}

/// Flattens hover contents into display text.
pub fn hover_text(content: HoverContents) -> String {
    fn marked(ms: MarkedString) -> String {
        match ms {
            MarkedString::String(s) => s,
            MarkedString::LanguageString(ls) => format!("```{}\n{}\n```", ls.language, ls.value),
        }
    }

    match content {
        HoverContents::Scalar(ms) => marked(ms),
        HoverContents::Array(items) => items
            .into_iter()
            .map(marked)
            .collect::<Vec<_>>()
            .join("\n\n"),
        HoverContents::Markup(markup) => markup.value,
    }
}

/// Compiles a glob setting.
///
/// # Errors
/// Returns [`ConfigError::InvalidPattern`] naming `setting` on a bad glob.
pub fn compile_glob(setting: &'static str, pattern: &str) -> Result<Pattern, ConfigError> {
    Pattern::new(pattern).map_err(|e| ConfigError::InvalidPattern {
        setting,
        message: format!("'{pattern}': {e}"),
    })
}

/// Set of globs selecting the documents the server handles.
#[derive(Debug, Clone)]
pub struct DocumentSelector {
    patterns: Vec<Pattern>,
}

impl DocumentSelector {
    /// Builds a selector from glob strings.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidPattern`] if any glob is malformed.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|p| compile_glob("trlc.documentPatterns", p.as_ref()))
            .collect::<Result<_, _>>()?;
        Ok(Self { patterns })
    }

    /// Whether the server should see `path`.
    pub fn matches(&self, path: &Path) -> bool {
        self.patterns.iter().any(|p| p.matches_path(path))
    }
}

impl Default for DocumentSelector {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_DOCUMENT_PATTERNS
                .iter()
                .filter_map(|p| Pattern::new(p).ok())
                .collect(),
        }
    }
}
