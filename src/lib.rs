//! Validated, sandboxed document preview rendering.
//!
//! [`application::validation::FileValidator`] decides whether a path may be
//! read; [`application::render::MarkdownRenderer`] turns admitted documents
//! (or raw Markdown) into sanitized HTML.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod util;

pub use application::{
    render::{
        MarkdownRenderer, RenderConfig, RenderError, RenderService, RenderedDocument, SafeHtml,
        render_markdown_content, render_markdown_file,
    },
    validation::{FileValidator, ValidationPolicy},
};
pub use domain::{documents::ValidatedPath, error::ValidationError};
