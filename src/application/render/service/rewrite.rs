use std::collections::BTreeMap;

use comrak::nodes::{AstNode, NodeHtmlBlock, NodeValue};
use syntect::{html::ClassStyle, parsing::SyntaxSet};
use tracing::{debug, warn};

use crate::{
    application::render::{
        options::{CodehiliteOptions, Features, MathOptions, TocOptions},
        types::{RenderError, TocEntry},
    },
    domain::slug::AnchorSlugger,
    util::html::{escape_attribute, escape_html},
};

use super::{
    highlight,
    images::{self, ImageOutcome, ImageResolver},
    math,
};

/// Everything the AST walk needs besides the tree itself.
pub(crate) struct RewriteContext<'a> {
    pub(crate) features: &'a Features,
    pub(crate) syntax_set: &'a SyntaxSet,
    pub(crate) class_style: &'a ClassStyle,
    /// Present only when an origin is known and images are embedded.
    pub(crate) images: Option<ImageResolver<'a>>,
    /// Prefix of every fragment placeholder; unique per render.
    pub(crate) fragment_prefix: &'a str,
}

#[derive(Debug, Clone)]
pub(crate) struct HeadingInfo {
    pub(crate) level: u8,
    pub(crate) slug: String,
    pub(crate) text: String,
}

/// HTML produced outside comrak, swapped in for its placeholder after sanitizing.
#[derive(Debug, Clone)]
pub(crate) struct Fragment {
    pub(crate) placeholder: String,
    pub(crate) html: String,
    pub(crate) is_block: bool,
}

#[derive(Debug, Default)]
pub(crate) struct RewriteOutcome {
    pub(crate) headings: Vec<HeadingInfo>,
    pub(crate) fragments: Vec<Fragment>,
    pub(crate) metadata: BTreeMap<String, String>,
    toc_placeholders: Vec<String>,
    fragment_prefix: String,
    fragment_counter: usize,
}

impl RewriteOutcome {
    pub(crate) fn toc_entries(&self) -> Vec<TocEntry> {
        self.headings
            .iter()
            .map(|heading| TocEntry {
                level: heading.level,
                id: heading.slug.clone(),
                title: heading.text.clone(),
            })
            .collect()
    }

    fn next_placeholder(&mut self) -> String {
        let placeholder = format!("{}{}__", self.fragment_prefix, self.fragment_counter);
        self.fragment_counter = self.fragment_counter.saturating_add(1);
        placeholder
    }

    fn push_fragment(&mut self, html: String, is_block: bool) -> String {
        let placeholder = self.next_placeholder();
        self.fragments.push(Fragment {
            placeholder: placeholder.clone(),
            html,
            is_block,
        });
        placeholder
    }
}

pub(crate) fn rewrite_ast<'a>(
    root: &'a AstNode<'a>,
    context: &RewriteContext<'_>,
) -> Result<RewriteOutcome, RenderError> {
    let mut walker = RewriteWalker::new(context);
    walker.visit_nodes(root)?;
    Ok(walker.finish())
}

struct RewriteWalker<'a, 'c> {
    context: &'a RewriteContext<'c>,
    outcome: RewriteOutcome,
    slugger: AnchorSlugger,
}

impl<'a, 'c> RewriteWalker<'a, 'c> {
    fn new(context: &'a RewriteContext<'c>) -> Self {
        Self {
            context,
            outcome: RewriteOutcome {
                fragment_prefix: context.fragment_prefix.to_string(),
                ..RewriteOutcome::default()
            },
            slugger: AnchorSlugger::new(),
        }
    }

    fn features(&self) -> &'a Features {
        self.context.features
    }

    fn visit_nodes(&mut self, node: &AstNode<'_>) -> Result<(), RenderError> {
        self.handle_front_matter(node);

        if !self.features().raw_html {
            escape_raw_html(node);
        }

        let context = self.context;
        if let Some(resolver) = context.images.as_ref() {
            self.process_image_node(node, resolver);
        }

        if let Some(toc) = self.features().toc.as_ref() {
            self.record_heading(node);
            self.replace_toc_marker(node, toc);
        }

        if let Some(options) = self.features().math.as_ref()
            && self.handle_math_node(node, options)
        {
            // Math nodes are fully handled.
        } else if let Some((info, literal)) = extract_code_block(node) {
            let mut segments = info.split_whitespace();
            let language = segments.next().map(str::to_string);

            if let Some(options) = self.features().math.as_ref()
                && language.as_deref() == Some("math")
            {
                self.replace_with_math(node, &literal, true, options);
            } else if let Some(options) = self.features().codehilite.as_ref() {
                self.highlight_block(node, language.as_deref(), &literal, options);
            }
        }

        let mut child = node.first_child();
        while let Some(next) = child {
            self.visit_nodes(next)?;
            child = next.next_sibling();
        }

        Ok(())
    }

    fn finish(mut self) -> RewriteOutcome {
        if let Some(toc) = self.features().toc.as_ref() {
            let html = build_toc_html(&toc.title, &self.outcome.headings);
            for placeholder in self.outcome.toc_placeholders.clone() {
                self.outcome.fragments.push(Fragment {
                    placeholder,
                    html: html.clone(),
                    is_block: true,
                });
            }
        }
        self.outcome
    }

    fn handle_front_matter(&mut self, node: &AstNode<'_>) {
        if !self.features().meta {
            return;
        }
        let data = node.data.borrow();
        if let NodeValue::FrontMatter(raw) = &data.value {
            self.outcome.metadata = parse_front_matter(raw);
            debug!(
                target = "application::render::meta",
                keys = self.outcome.metadata.len(),
                "Collected front matter"
            );
        }
    }

    fn process_image_node(&mut self, node: &AstNode<'_>, resolver: &ImageResolver<'_>) {
        let (src, title) = {
            let data = node.data.borrow();
            match &data.value {
                NodeValue::Image(link) => (link.url.clone(), link.title.clone()),
                _ => return,
            }
        };

        let alt_raw = collect_inline_text(node);
        let alt = alt_raw.split_whitespace().collect::<Vec<_>>().join(" ");

        let html = match resolver.embed(&src) {
            ImageOutcome::Keep => return,
            ImageOutcome::Embedded(image) => {
                let img = build_image_html(
                    &image.data_uri,
                    &alt,
                    (!title.is_empty()).then_some(title.as_str()),
                    image.dimensions,
                );
                self.outcome.push_fragment(img, false)
            }
            ImageOutcome::Failed(message) => images::error_marker(&alt, &message),
        };

        {
            let mut data = node.data.borrow_mut();
            data.value = NodeValue::HtmlInline(html);
        }

        while let Some(child) = node.first_child() {
            child.detach();
        }
    }

    fn record_heading(&mut self, node: &AstNode<'_>) {
        let Some(level) = heading_level(node) else {
            return;
        };
        let text = collect_inline_text(node);
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let slug = self.slugger.anchor_for(&normalized);
        self.outcome.headings.push(HeadingInfo {
            level,
            slug,
            text: normalized,
        });
    }

    fn replace_toc_marker(&mut self, node: &AstNode<'_>, toc: &TocOptions) {
        if toc.marker.is_empty() || !is_marker_paragraph(node, &toc.marker) {
            return;
        }

        let placeholder = self.outcome.next_placeholder();
        {
            let mut data = node.data.borrow_mut();
            data.value = NodeValue::HtmlBlock(NodeHtmlBlock {
                block_type: 0,
                literal: format!("<div>{placeholder}</div>"),
            });
        }
        while let Some(child) = node.first_child() {
            child.detach();
        }
        self.outcome.toc_placeholders.push(placeholder);
    }

    fn handle_math_node(&mut self, node: &AstNode<'_>, options: &MathOptions) -> bool {
        let math_data = {
            let data = node.data.borrow();
            if let NodeValue::Math(math_node) = &data.value {
                Some((math_node.literal.clone(), math_node.display_math))
            } else {
                None
            }
        };

        let Some((literal, display_mode)) = math_data else {
            return false;
        };

        self.replace_with_math(node, &literal, display_mode, options);
        true
    }

    fn replace_with_math(
        &mut self,
        node: &AstNode<'_>,
        literal: &str,
        display_mode: bool,
        options: &MathOptions,
    ) {
        match math::render_math_html(literal, display_mode, options.add_preview) {
            Ok(html) => {
                let container = if display_mode {
                    format!(
                        "<div data-role=\"math-block\" data-math-style=\"display\">{html}</div>"
                    )
                } else {
                    format!(
                        "<span data-role=\"math-inline\" data-math-style=\"inline\">{html}</span>"
                    )
                };
                let placeholder = self.outcome.push_fragment(container, display_mode);

                let mut data = node.data.borrow_mut();
                data.value = if display_mode {
                    NodeValue::HtmlBlock(NodeHtmlBlock {
                        block_type: 0,
                        literal: format!("<div>{placeholder}</div>"),
                    })
                } else {
                    NodeValue::HtmlInline(placeholder)
                };
            }
            Err(err) => {
                warn!(
                    target = "application::render::math",
                    error = %err,
                    "KaTeX rendering failed; showing source"
                );
                let mut data = node.data.borrow_mut();
                data.value = if display_mode {
                    NodeValue::HtmlBlock(NodeHtmlBlock {
                        block_type: 0,
                        literal: highlight::plain_code_block(Some("math"), literal, "math"),
                    })
                } else {
                    NodeValue::HtmlInline(format!(
                        "<code data-math-style=\"inline\">{}</code>",
                        escape_html(literal)
                    ))
                };
            }
        }
    }

    fn highlight_block(
        &mut self,
        node: &AstNode<'_>,
        language: Option<&str>,
        literal: &str,
        options: &CodehiliteOptions,
    ) {
        let html = highlight::highlight_code(
            language,
            literal,
            options,
            self.context.syntax_set,
            self.context.class_style,
        )
        .unwrap_or_else(|err| {
            warn!(
                target = "application::render::highlight",
                error = %err,
                "Highlighting failed; emitting plain block"
            );
            highlight::plain_code_block(language, literal, &options.css_class)
        });

        let mut data = node.data.borrow_mut();
        data.value = NodeValue::HtmlBlock(NodeHtmlBlock {
            block_type: 0,
            literal: html,
        });
    }
}

/// Turn raw HTML written in the source into visible text.
fn escape_raw_html(node: &AstNode<'_>) {
    let mut data = node.data.borrow_mut();
    let replacement = match &data.value {
        NodeValue::HtmlInline(raw) => NodeValue::Text(raw.clone().into()),
        NodeValue::HtmlBlock(block) => NodeValue::HtmlBlock(NodeHtmlBlock {
            block_type: 0,
            literal: format!("<p>{}</p>\n", escape_html(block.literal.trim_end())),
        }),
        _ => return,
    };
    data.value = replacement;
}

/// Parse `key: value` front matter lines. Keys are lower-cased; indented
/// lines continue the previous value.
pub(crate) fn parse_front_matter(raw: &str) -> BTreeMap<String, String> {
    let mut metadata: BTreeMap<String, String> = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed == "---" || trimmed == "..." {
            current = None;
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }

        let indented = line.starts_with(' ') || line.starts_with('\t');
        if indented && let Some(key) = current.as_ref() {
            if let Some(value) = metadata.get_mut(key) {
                if !value.is_empty() {
                    value.push('\n');
                }
                value.push_str(trimmed);
            }
            continue;
        }

        match trimmed.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() => {
                let key = key.trim().to_lowercase();
                metadata.insert(key.clone(), value.trim().to_string());
                current = Some(key);
            }
            _ => current = None,
        }
    }

    metadata
}

fn build_toc_html(title: &str, headings: &[HeadingInfo]) -> String {
    let mut html = String::from("<nav class=\"toc\">");
    if !title.is_empty() {
        html.push_str("<span class=\"toctitle\">");
        html.push_str(&escape_html(title));
        html.push_str("</span>");
    }

    let mut open: Vec<u8> = Vec::new();
    for heading in headings {
        match open.last().copied() {
            None => {
                html.push_str("<ul>");
                open.push(heading.level);
            }
            Some(last) if heading.level > last => {
                html.push_str("<ul>");
                open.push(heading.level);
            }
            Some(_) => {
                html.push_str("</li>");
                while open.len() > 1
                    && open
                        .last()
                        .is_some_and(|&level| heading.level < level)
                {
                    html.push_str("</ul></li>");
                    open.pop();
                }
            }
        }
        html.push_str("<li><a href=\"#");
        html.push_str(&escape_attribute(&heading.slug));
        html.push_str("\">");
        html.push_str(&escape_html(&heading.text));
        html.push_str("</a>");
    }
    for _ in open {
        html.push_str("</li></ul>");
    }

    html.push_str("</nav>");
    html
}

fn build_image_html(
    src: &str,
    alt: &str,
    title: Option<&str>,
    dimensions: Option<(u32, u32)>,
) -> String {
    let mut html = String::with_capacity(src.len() + alt.len() + 64);
    html.push_str("<img src=\"");
    html.push_str(&escape_attribute(src));
    html.push_str("\" alt=\"");
    html.push_str(&escape_attribute(alt));
    html.push('"');

    if let Some(title) = title.filter(|t| !t.is_empty()) {
        html.push_str(" title=\"");
        html.push_str(&escape_attribute(title));
        html.push('"');
    }

    if let Some((width, height)) = dimensions {
        html.push_str(&format!(" width=\"{width}\" height=\"{height}\""));
    }

    html.push_str(" />");
    html
}

fn is_marker_paragraph(node: &AstNode<'_>, marker: &str) -> bool {
    {
        let data = node.data.borrow();
        if !matches!(data.value, NodeValue::Paragraph) {
            return false;
        }
    }

    let mut text = String::new();
    let mut child = node.first_child();
    while let Some(next) = child {
        let data = next.data.borrow();
        match &data.value {
            NodeValue::Text(value) => text.push_str(value),
            _ => return false,
        }
        child = next.next_sibling();
    }
    text.trim() == marker
}

fn collect_inline_text(node: &AstNode<'_>) -> String {
    fn walk(node: &AstNode<'_>, buffer: &mut String) {
        {
            let data = node.data.borrow();
            match &data.value {
                NodeValue::Text(text) => buffer.push_str(text),
                NodeValue::Code(code) => buffer.push_str(&code.literal),
                NodeValue::Math(math) => buffer.push_str(&math.literal),
                NodeValue::LineBreak | NodeValue::SoftBreak => buffer.push(' '),
                _ => {}
            }
        }
        let mut child = node.first_child();
        while let Some(next) = child {
            walk(next, buffer);
            child = next.next_sibling();
        }
    }

    let mut text = String::new();
    let mut child = node.first_child();
    while let Some(next) = child {
        walk(next, &mut text);
        child = next.next_sibling();
    }
    text
}

fn extract_code_block(node: &AstNode<'_>) -> Option<(String, String)> {
    let data = node.data.borrow();
    if let NodeValue::CodeBlock(block) = &data.value {
        Some((block.info.trim().to_string(), block.literal.clone()))
    } else {
        None
    }
}

fn heading_level(node: &AstNode<'_>) -> Option<u8> {
    let data = node.data.borrow();
    if let NodeValue::Heading(heading) = &data.value {
        Some(heading.level)
    } else {
        None
    }
}
