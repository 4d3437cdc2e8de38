use std::{cell::RefCell, rc::Rc};

use lol_html::{RewriteStrSettings, element, html_content::ContentType, rewrite_str};

use crate::{application::render::types::RenderError, util::html::escape_attribute};

use super::rewrite::HeadingInfo;

pub(crate) const TABLE_CLASSES: &str = "table table-striped table-bordered";
const TABLE_WRAPPER_OPEN: &str = "<div class=\"table-responsive\">";

/// Presentation pass over sanitized HTML: heading anchors and table styling.
pub(crate) fn post_process(
    html: &str,
    headings: &[HeadingInfo],
    permalink: Option<&str>,
) -> Result<String, RenderError> {
    let with_ids = if headings.is_empty() {
        html.to_string()
    } else {
        apply_heading_ids(html, headings, permalink)?
    };
    style_tables(&with_ids)
}

fn style_tables(html: &str) -> Result<String, RenderError> {
    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("table", |el| {
                match el.get_attribute("class") {
                    None => el.set_attribute("class", TABLE_CLASSES)?,
                    Some(existing) if existing.trim().is_empty() => {
                        el.set_attribute("class", TABLE_CLASSES)?
                    }
                    Some(existing) if !existing.split_whitespace().any(|c| c == "table") => {
                        el.set_attribute("class", &format!("{} {TABLE_CLASSES}", existing.trim()))?
                    }
                    Some(_) => {}
                }
                el.before(TABLE_WRAPPER_OPEN, ContentType::Html);
                el.after("</div>", ContentType::Html);
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| RenderError::document(err.to_string()))
}

/// Assign collected slugs to headings in document order.
///
/// Headings that do not line up with the Markdown outline (raw HTML headings)
/// are left without an id.
fn apply_heading_ids(
    html: &str,
    headings: &[HeadingInfo],
    permalink: Option<&str>,
) -> Result<String, RenderError> {
    let headings_shared = Rc::new(headings.to_vec());
    let index = Rc::new(RefCell::new(0usize));
    let permalink = permalink.map(str::to_string);

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("h1, h2, h3, h4, h5, h6", {
                let headings_shared = Rc::clone(&headings_shared);
                let index = Rc::clone(&index);
                move |el| {
                    let mut idx = index.borrow_mut();
                    let Some(info) = headings_shared.get(*idx) else {
                        return Ok(());
                    };

                    let tag_name = el.tag_name();
                    let level = tag_name
                        .strip_prefix('h')
                        .and_then(|value| value.parse::<u8>().ok())
                        .unwrap_or(0);
                    if level != info.level {
                        return Ok(());
                    }
                    *idx += 1;

                    el.set_attribute("id", &info.slug)?;
                    if let Some(symbol) = permalink.as_deref() {
                        el.append(
                            &format!(
                                "<a class=\"headerlink\" href=\"#{}\" title=\"Permanent link\">{}</a>",
                                escape_attribute(&info.slug),
                                escape_attribute(symbol)
                            ),
                            ContentType::Html,
                        );
                    }
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| RenderError::document(err.to_string()))
}
