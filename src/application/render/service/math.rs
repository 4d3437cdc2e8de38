use katex::{OptsBuilder, OutputType};

use crate::application::render::types::RenderError;

/// Render a KaTeX expression to HTML.
///
/// With `lenient` set, malformed input still yields a preview in which KaTeX
/// marks the offending tokens instead of failing.
pub(crate) fn render_math_html(
    literal: &str,
    display_mode: bool,
    lenient: bool,
) -> Result<String, RenderError> {
    let mut builder = OptsBuilder::default();
    builder.display_mode(display_mode);
    builder.output_type(OutputType::Html);
    builder.throw_on_error(!lenient);

    let opts = builder
        .build()
        .map_err(|err| RenderError::document(format!("failed to build KaTeX options: {err}")))?;

    katex::render_with_opts(literal, opts)
        .map_err(|err| RenderError::document(format!("KaTeX rendering failed: {err}")))
}
