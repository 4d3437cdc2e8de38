use std::collections::HashSet;

use ammonia::Builder as AmmoniaBuilder;
use comrak::options::Options;

use crate::application::render::options::Features;

/// Comrak options for the enabled extension set.
///
/// Raw HTML output stays enabled because the rewrite stage injects
/// highlighted code and placeholders as HTML nodes; source HTML is escaped
/// during the rewrite unless `raw_html` is active, and everything passes the
/// sanitizer afterwards.
pub(crate) fn comrak_options(features: &Features) -> Options<'static> {
    let mut options = Options::default();

    let ext = &mut options.extension;
    ext.table = features.tables;
    ext.tagfilter = false;
    if features.meta {
        ext.front_matter_delimiter = Some("---".to_string());
    }
    if let Some(math) = features.math.as_ref() {
        ext.math_dollars = math.dollar_delimiter;
    }

    options.parse.smart = features.smarty;

    let render = &mut options.render;
    render.hardbreaks = features.nl2br;
    render.r#unsafe = true;
    render.github_pre_lang = false;
    render.sourcepos = false;

    options
}

/// Sanitizer applied to the converted document before fragments are restored.
pub(crate) fn build_sanitizer() -> AmmoniaBuilder<'static> {
    let mut builder = AmmoniaBuilder::default();

    let tags: HashSet<&'static str> = HashSet::from([
        "a",
        "abbr",
        "blockquote",
        "br",
        "code",
        "dd",
        "del",
        "details",
        "div",
        "dl",
        "dt",
        "em",
        "figcaption",
        "figure",
        "h1",
        "h2",
        "h3",
        "h4",
        "h5",
        "h6",
        "hr",
        "i",
        "img",
        "input",
        "ins",
        "kbd",
        "li",
        "mark",
        "ol",
        "p",
        "pre",
        "s",
        "span",
        "strong",
        "sub",
        "summary",
        "sup",
        "table",
        "tbody",
        "td",
        "tfoot",
        "th",
        "thead",
        "tr",
        "u",
        "ul",
    ]);
    builder.tags(tags);

    let generic: HashSet<&'static str> = HashSet::from([
        "class",
        "id",
        "title",
        "lang",
        "dir",
        "aria-hidden",
        "aria-label",
        "role",
        "data-math-style",
        "data-role",
    ]);
    builder.generic_attributes(generic);

    builder.add_tag_attributes("a", &["target"]);
    builder.add_tag_attributes("img", &["title", "width", "height", "alt", "loading"]);
    builder.add_tag_attributes("code", &["data-language"]);
    builder.add_tag_attributes("pre", &["data-language"]);
    builder.add_tag_attributes("th", &["align", "colspan", "rowspan", "scope"]);
    builder.add_tag_attributes("td", &["align", "colspan", "rowspan"]);
    builder.add_tag_attributes("ol", &["start"]);
    builder.add_tag_attributes("input", &["type", "checked", "disabled"]);

    builder.add_url_schemes(["http", "https", "mailto", "tel"].iter().copied());

    builder
}
