//! Document preview rendering.
//!
//! The pipeline is pure: it takes a path or Markdown text, produces sanitized
//! HTML, and reports failures as an escaped error panel. Structured results
//! are available through the `try_render_*` methods.

mod options;
mod service;
mod types;

pub use options::{
    DEFAULT_EXTENSIONS, Extension, RenderConfig, UNSAFE_EXTENSIONS, default_extension_configs,
};
pub use service::{
    DecodedContent, MarkdownRenderer, decode_document, error_panel, highlight_stylesheet,
    render_markdown_content, render_markdown_file,
};
pub use types::{RenderError, RenderService, RenderedDocument, SafeHtml, TocEntry};
