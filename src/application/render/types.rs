use std::{collections::BTreeMap, fmt, path::Path};

use serde::Serialize;
use thiserror::Error;

use crate::domain::error::ValidationError;

/// HTML produced by the pipeline. Everything inside has already been escaped
/// or sanitized, so callers embed it as-is and must not escape it again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SafeHtml(String);

impl SafeHtml {
    pub(crate) fn new(html: String) -> Self {
        Self(html)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SafeHtml {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SafeHtml {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One heading listed in the table of contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TocEntry {
    pub level: u8,
    pub id: String,
    pub title: String,
}

/// Structured render result for callers that need more than the HTML string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedDocument {
    pub html: SafeHtml,
    /// Front matter collected by the `meta` extension, keyed by lower-cased name.
    pub metadata: BTreeMap<String, String>,
    /// Headings in document order, populated when the `toc` extension is active.
    pub toc: Vec<TocEntry>,
}

impl RenderedDocument {
    pub(crate) fn from_html(html: String) -> Self {
        Self {
            html: SafeHtml::new(html),
            metadata: BTreeMap::new(),
            toc: Vec::new(),
        }
    }
}

/// Structured errors surfaced by the rendering pipeline. The public entry
/// points turn every variant into an error panel.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to decode document as {encoding}: {message}")]
    Decode { encoding: String, message: String },
    #[error("markdown conversion failed: {message}")]
    Markdown { message: String },
    #[error("syntax highlighting failed: {language}: {message}")]
    Highlighting { language: String, message: String },
    #[error("document processing failed: {message}")]
    Document { message: String },
}

impl RenderError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Stable identifier used for log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Decode { .. } => "decode",
            Self::Markdown { .. } => "markdown",
            Self::Highlighting { .. } => "highlighting",
            Self::Document { .. } => "document",
        }
    }

    pub(crate) fn document(message: impl Into<String>) -> Self {
        Self::Document {
            message: message.into(),
        }
    }
}

/// Rendering entry points exposed to host applications. Implementations never
/// fail: errors come back as an escaped error panel.
pub trait RenderService: Send + Sync {
    fn render_file(&self, path: &Path) -> SafeHtml;

    fn render_content(&self, text: &str, origin: Option<&Path>) -> SafeHtml;
}
