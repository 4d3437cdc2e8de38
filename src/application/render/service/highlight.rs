use syntect::{
    html::{ClassStyle, ClassedHTMLGenerator},
    parsing::{SyntaxReference, SyntaxSet},
    util::LinesWithEndings,
};

use crate::{
    application::render::{options::CodehiliteOptions, types::RenderError},
    util::html::escape_html,
};

const PLAIN_TEXT: &str = "text";

/// Highlight `code` into a `<pre><code>` fragment with `syntax-` prefixed classes.
///
/// Without an explicit language, `guess_lang` lets syntect pick a syntax from
/// the first line (shebangs, XML prologs, modelines).
pub(crate) fn highlight_code(
    language: Option<&str>,
    code: &str,
    options: &CodehiliteOptions,
    syntax_set: &SyntaxSet,
    class_style: &ClassStyle,
) -> Result<String, RenderError> {
    let (lang_token, syntax) = select_syntax(language, code, options.guess_lang, syntax_set);

    let mut code_with_newline = code.to_string();
    if !code_with_newline.ends_with('\n') {
        code_with_newline.push('\n');
    }

    let mut generator =
        ClassedHTMLGenerator::new_with_class_style(syntax, syntax_set, *class_style);

    for line in LinesWithEndings::from(code_with_newline.as_str()) {
        generator
            .parse_html_for_line_which_includes_newline(line)
            .map_err(|err| RenderError::Highlighting {
                language: lang_token.clone(),
                message: err.to_string(),
            })?;
    }

    let highlighted = generator.finalize();
    let lang_class = css_token(&lang_token);

    let mut pre_classes = Vec::with_capacity(3);
    if !options.css_class.trim().is_empty() {
        pre_classes.push(options.css_class.trim().to_string());
    }
    pre_classes.push(format!("syntax-lang-{lang_class}"));
    if options.linenums {
        pre_classes.push("linenums".to_string());
    }

    Ok(format!(
        "<pre class=\"{}\" data-language=\"{}\"><code class=\"language-{lang_class} syntax-code\">{}</code></pre>",
        pre_classes.join(" "),
        escape_html(&lang_token),
        highlighted
    ))
}

/// Escaped `<pre><code>` block used when highlighting fails.
pub(crate) fn plain_code_block(language: Option<&str>, code: &str, css_class: &str) -> String {
    let escaped = escape_html(code);
    let mut html = String::from("<pre class=\"");
    html.push_str(&escape_html(css_class));
    html.push('"');
    if let Some(language) = language.filter(|lang| !lang.is_empty()) {
        html.push_str(" data-language=\"");
        html.push_str(&escape_html(language));
        html.push('"');
    }
    html.push_str("><code>");
    html.push_str(&escaped);
    if !escaped.ends_with('\n') {
        html.push('\n');
    }
    html.push_str("</code></pre>");
    html
}

fn select_syntax<'s>(
    language: Option<&str>,
    code: &str,
    guess_lang: bool,
    syntax_set: &'s SyntaxSet,
) -> (String, &'s SyntaxReference) {
    if let Some(token) = language.filter(|token| !token.is_empty())
        && let Some(syntax) = find_syntax(syntax_set, token)
    {
        return (token.to_ascii_lowercase(), syntax);
    }

    if language.is_none() && guess_lang {
        let first_line = code.lines().next().unwrap_or_default();
        if let Some(syntax) = syntax_set.find_syntax_by_first_line(first_line) {
            let token = syntax
                .file_extensions
                .first()
                .cloned()
                .unwrap_or_else(|| syntax.name.to_ascii_lowercase());
            return (token, syntax);
        }
    }

    let token = language
        .filter(|token| !token.is_empty())
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| PLAIN_TEXT.to_string());
    (token, syntax_set.find_syntax_plain_text())
}

fn find_syntax<'a>(syntax_set: &'a SyntaxSet, token: &str) -> Option<&'a SyntaxReference> {
    let lowercase = token.to_ascii_lowercase();
    syntax_set
        .find_syntax_by_token(&lowercase)
        .or_else(|| syntax_set.find_syntax_by_name(token))
        .or_else(|| syntax_set.find_syntax_by_extension(&lowercase))
}

/// Restrict a language token to characters that are safe inside a class name.
fn css_token(token: &str) -> String {
    token
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '+' {
                ch
            } else {
                '-'
            }
        })
        .collect()
}
