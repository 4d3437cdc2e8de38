mod config;
mod decode;
mod highlight;
mod images;
mod math;
mod postprocess;
mod rewrite;

use std::{
    hash::{BuildHasher, RandomState},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use comrak::{Arena, format_html, nodes::AstNode, parse_document};
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use syntect::{dumps::from_uncompressed_data, html::ClassStyle, parsing::SyntaxSet};
use tracing::{debug, error, warn};

use crate::{
    application::validation::{FileValidator, ValidationPolicy},
    config::{ImagePolicy, Settings},
    domain::documents::{DocumentKind, ValidatedPath},
    infra::telemetry::{METRIC_RENDER_FAILURES, METRIC_RENDER_MS, METRIC_RENDER_TOTAL},
    util::{bytes::format_bytes, html::escape_html},
};

use super::{
    options::{CodehiliteOptions, RenderConfig},
    types::{RenderError, RenderService, RenderedDocument, SafeHtml},
};
use images::ImageResolver;
use rewrite::{Fragment, RewriteContext, RewriteOutcome, rewrite_ast};

pub use decode::DecodedContent;

/// Decode raw document bytes with the same fallback chain used for files.
pub fn decode_document(bytes: &[u8]) -> Result<DecodedContent, RenderError> {
    decode::decode_bytes(bytes)
}

static SYNTAX_SET: Lazy<SyntaxSet> = Lazy::new(|| {
    let syntax_bytes = include_bytes!(env!("SYNTAX_PACK_FILE"));
    from_uncompressed_data(syntax_bytes).unwrap_or_else(|err| {
        error!(
            target = "application::render",
            error = %err,
            "Bundled syntax pack is unreadable; falling back to syntect defaults"
        );
        SyntaxSet::load_defaults_newlines()
    })
});

const CLASS_STYLE: ClassStyle = ClassStyle::SpacedPrefixed { prefix: "syntax-" };

static RENDER_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Stylesheet for the `syntax-` classes emitted by the highlighter.
pub fn highlight_stylesheet() -> &'static str {
    include_str!(env!("HIGHLIGHT_CSS_FILE"))
}

/// Comrak-based preview renderer with syntect highlighting and ammonia sanitizing.
///
/// Immutable after construction; one instance can serve concurrent renders.
pub struct MarkdownRenderer {
    config: RenderConfig,
    validator: FileValidator,
    options: comrak::Options<'static>,
    sanitizer: ammonia::Builder<'static>,
}

impl MarkdownRenderer {
    pub fn new(config: RenderConfig, validator: FileValidator) -> Self {
        let options = config::comrak_options(config.features());
        let sanitizer = config::build_sanitizer();
        Self {
            config,
            validator,
            options,
            sanitizer,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            RenderConfig::from_settings(&settings.render),
            FileValidator::new(ValidationPolicy::from_settings(settings)),
        )
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn validator(&self) -> &FileValidator {
        &self.validator
    }

    /// Validate, decode and render a document. Never fails: errors become an
    /// escaped error panel.
    pub fn render_file(&self, path: &Path) -> SafeHtml {
        match self.try_render_file(path) {
            Ok(document) => document.html,
            Err(err) => error_panel(&err, Some(path)),
        }
    }

    /// Render Markdown text. Relative images resolve against `origin` when given.
    pub fn render_content(&self, text: &str, origin: Option<&Path>) -> SafeHtml {
        match self.try_render_content(text, origin) {
            Ok(document) => document.html,
            Err(err) => error_panel(&err, None),
        }
    }

    pub fn try_render_file(&self, path: &Path) -> Result<RenderedDocument, RenderError> {
        let started_at = Instant::now();
        let result = self
            .validator
            .validate(path)
            .map_err(RenderError::from)
            .and_then(|validated| self.render_validated(&validated));
        record_outcome(&result, started_at, "file");
        result
    }

    pub fn try_render_content(
        &self,
        text: &str,
        origin: Option<&Path>,
    ) -> Result<RenderedDocument, RenderError> {
        let started_at = Instant::now();
        let result = self.render_markdown(text, origin);
        record_outcome(&result, started_at, "content");
        result
    }

    /// Read and decode a validated document.
    pub fn decode_file(&self, validated: &ValidatedPath) -> Result<DecodedContent, RenderError> {
        let bytes = read_validated(validated)?;
        decode::decode_bytes(&bytes)
    }

    fn render_validated(&self, validated: &ValidatedPath) -> Result<RenderedDocument, RenderError> {
        let kind = validated.kind();
        debug!(
            target = "application::render",
            path = %validated.as_path().display(),
            kind = ?kind,
            "Rendering document"
        );

        match kind {
            DocumentKind::Markdown => {
                let decoded = self.decode_file(validated)?;
                self.render_markdown(&decoded.text, Some(validated.as_path()))
            }
            DocumentKind::PlainText => {
                let decoded = self.decode_file(validated)?;
                Ok(self.render_code_document(&decoded.text, None))
            }
            DocumentKind::Code { language } => {
                let decoded = self.decode_file(validated)?;
                Ok(self.render_code_document(&decoded.text, Some(language)))
            }
            DocumentKind::Image => render_image_document(validated),
            DocumentKind::Pdf | DocumentKind::Office => Ok(render_unavailable_notice(validated)),
        }
    }

    fn render_markdown(
        &self,
        text: &str,
        origin: Option<&Path>,
    ) -> Result<RenderedDocument, RenderError> {
        let features = self.config.features();
        let origin_dir = origin.map(origin_directory);
        let images = match (self.config.image_policy(), origin_dir.as_deref()) {
            (ImagePolicy::Embed, Some(dir)) => Some(ImageResolver::new(
                dir,
                self.config.image_root(),
                self.config.max_image_bytes(),
            )),
            _ => None,
        };
        let fragment_prefix = fragment_prefix(text);
        let context = RewriteContext {
            features,
            syntax_set: &SYNTAX_SET,
            class_style: &CLASS_STYLE,
            images,
            fragment_prefix: &fragment_prefix,
        };

        let arena = Arena::new();
        let root = parse_document(&arena, text, &self.options);

        let rewrite_outcome = rewrite_ast(root, &context)?;
        let rendered_html = render_html_stage(root, &self.options)?;
        let sanitized_html = self.sanitizer.clean(&rendered_html).to_string();
        let restored_html = restore_stage(sanitized_html, &rewrite_outcome.fragments);
        let permalink = features
            .toc
            .as_ref()
            .and_then(|toc| toc.permalink.as_deref());
        let html = postprocess::post_process(&restored_html, &rewrite_outcome.headings, permalink)?;

        Ok(assemble_document(html, rewrite_outcome))
    }

    fn render_code_document(&self, text: &str, language: Option<&str>) -> RenderedDocument {
        let options = self
            .config
            .features()
            .codehilite
            .clone()
            .unwrap_or_else(|| CodehiliteOptions {
                css_class: "highlight".to_string(),
                linenums: false,
                guess_lang: false,
            });
        let language = language.or(Some("text"));

        let block = highlight::highlight_code(language, text, &options, &SYNTAX_SET, &CLASS_STYLE)
            .map(|html| self.sanitizer.clean(&html).to_string())
            .unwrap_or_else(|err| {
                warn!(
                    target = "application::render::highlight",
                    error = %err,
                    "Highlighting failed; emitting plain block"
                );
                highlight::plain_code_block(language, text, &options.css_class)
            });

        RenderedDocument::from_html(format!(
            "<div class=\"document-preview document-code\">{block}</div>"
        ))
    }
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl RenderService for MarkdownRenderer {
    fn render_file(&self, path: &Path) -> SafeHtml {
        MarkdownRenderer::render_file(self, path)
    }

    fn render_content(&self, text: &str, origin: Option<&Path>) -> SafeHtml {
        MarkdownRenderer::render_content(self, text, origin)
    }
}

/// Validate and render `path` with an explicit configuration and policy.
pub fn render_markdown_file(
    config: &RenderConfig,
    policy: &ValidationPolicy,
    path: &Path,
) -> SafeHtml {
    MarkdownRenderer::new(config.clone(), FileValidator::new(policy.clone())).render_file(path)
}

/// Render Markdown text without file validation. Images still resolve against
/// `origin` when one is supplied.
pub fn render_markdown_content(
    config: &RenderConfig,
    text: &str,
    origin: Option<&Path>,
) -> SafeHtml {
    let policy = ValidationPolicy::new(Vec::new(), config.max_size());
    MarkdownRenderer::new(config.clone(), FileValidator::new(policy)).render_content(text, origin)
}

fn read_validated(validated: &ValidatedPath) -> Result<Vec<u8>, RenderError> {
    std::fs::read(validated.as_path()).map_err(|err| {
        RenderError::document(format!(
            "failed to read {}: {err}",
            validated.as_path().display()
        ))
    })
}

/// Directory that relative references resolve against. A directory origin is
/// used as-is; a file origin contributes its parent.
fn origin_directory(origin: &Path) -> PathBuf {
    if origin.is_dir() {
        return origin.to_path_buf();
    }
    match origin.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn render_html_stage<'a>(
    root: &'a AstNode<'a>,
    options: &comrak::Options<'static>,
) -> Result<String, RenderError> {
    let mut html = String::new();
    format_html(root, options, &mut html).map_err(|err| RenderError::Markdown {
        message: err.to_string(),
    })?;
    Ok(html)
}

/// Placeholder prefix carrying a random per-render nonce, so text written in
/// the document can never be mistaken for a fragment.
fn fragment_prefix(text: &str) -> String {
    loop {
        let sequence = RENDER_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let nonce = RandomState::new().hash_one(sequence);
        let prefix = format!("__DOCMGR_{nonce:016x}_FRAGMENT_");
        if !text.contains(&prefix) {
            return prefix;
        }
    }
}

fn restore_stage(html: String, fragments: &[Fragment]) -> String {
    fragments.iter().fold(html, |acc, fragment| {
        if fragment.is_block {
            let placeholder = format!("<div>{}</div>", fragment.placeholder);
            acc.replace(&placeholder, &fragment.html)
        } else {
            acc.replace(&fragment.placeholder, &fragment.html)
        }
    })
}

fn assemble_document(html: String, outcome: RewriteOutcome) -> RenderedDocument {
    let toc = outcome.toc_entries();
    RenderedDocument {
        html: SafeHtml::new(html),
        metadata: outcome.metadata,
        toc,
    }
}

fn render_image_document(validated: &ValidatedPath) -> Result<RenderedDocument, RenderError> {
    let bytes = read_validated(validated)?;
    let mime = images::image_mime(validated.as_path())
        .unwrap_or_else(|| validated.mime_type().to_string());
    let name = display_name(validated.as_path());
    let dimensions = imagesize::blob_size(&bytes)
        .map(|size| format!(" width=\"{}\" height=\"{}\"", size.width, size.height))
        .unwrap_or_default();

    Ok(RenderedDocument::from_html(format!(
        "<figure class=\"document-preview document-image\"><img src=\"{}\" alt=\"{name}\"{dimensions} /><figcaption>{name}</figcaption></figure>",
        images::data_uri(&mime, &bytes),
    )))
}

fn render_unavailable_notice(validated: &ValidatedPath) -> RenderedDocument {
    RenderedDocument::from_html(format!(
        "<div class=\"document-preview document-unavailable\"><p>Preview is not available for <strong>{}</strong> ({}, {}).</p></div>",
        display_name(validated.as_path()),
        escape_html(validated.mime_type()),
        format_bytes(validated.size())
    ))
}

fn display_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    escape_html(&name)
}

/// Escaped error panel returned in place of a document. Validation failures
/// carry the `markdown-validation-error` class.
pub fn error_panel(err: &RenderError, path: Option<&Path>) -> SafeHtml {
    let (classes, heading) = if err.is_validation() {
        ("markdown-error markdown-validation-error", "File validation error")
    } else {
        ("markdown-error", "Markdown rendering error")
    };

    let mut html = format!("<div class=\"{classes}\"><h3>{heading}</h3>");
    if !err.is_validation()
        && let Some(path) = path
    {
        html.push_str(&format!(
            "<p>File: {}</p>",
            escape_html(&path.display().to_string())
        ));
    }
    html.push_str(&format!("<p>{}</p></div>", escape_html(&err.to_string())));
    SafeHtml::new(html)
}

fn record_outcome(
    result: &Result<RenderedDocument, RenderError>,
    started_at: Instant,
    source: &'static str,
) {
    counter!(METRIC_RENDER_TOTAL, "source" => source).increment(1);
    histogram!(METRIC_RENDER_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

    if let Err(err) = result {
        counter!(METRIC_RENDER_FAILURES, "kind" => err.kind()).increment(1);
        if err.is_validation() {
            debug!(
                target = "application::render",
                error = %err,
                "Render refused by validation"
            );
        } else {
            warn!(
                target = "application::render",
                error = %err,
                kind = err.kind(),
                "Render failed"
            );
        }
    }
}
