use std::{fs, path::Path};

use docmgr_render::{
    MarkdownRenderer, RenderConfig, RenderService, ValidationPolicy,
    application::validation::FileValidator,
    config::{ImagePolicy, RenderSettings},
    render_markdown_content, render_markdown_file,
};
use tempfile::TempDir;

// 1x1 transparent PNG.
const PIXEL_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

fn renderer_for(dir: &Path, max_size: u64) -> MarkdownRenderer {
    let policy = ValidationPolicy::new(vec![dir.to_path_buf()], max_size);
    MarkdownRenderer::new(RenderConfig::default(), FileValidator::new(policy))
}

fn visible_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                text.push(' ');
            }
            '>' => in_tag = false,
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn write(dir: &TempDir, name: &str, contents: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write fixture");
    path
}

#[test]
fn plain_paragraph_renders_as_paragraph() {
    let html = render_markdown_content(&RenderConfig::default(), "Just a paragraph.", None);
    assert!(html.as_str().contains("<p>Just a paragraph.</p>"));
}

#[test]
fn paragraphs_round_trip_their_text() {
    let source = "First paragraph here.\n\nSecond paragraph follows.\n\nThird one ends it.";
    let html = render_markdown_content(&RenderConfig::default(), source, None);

    assert_eq!(html.as_str().matches("<p>").count(), 3);
    assert_eq!(
        visible_text(html.as_str()),
        source.split_whitespace().collect::<Vec<_>>().join(" ")
    );
}

#[test]
fn heading_and_paragraph_render_without_error_markers() {
    let renderer = MarkdownRenderer::default();
    let html = RenderService::render_content(&renderer, "# Title\n\nHello world.", None);

    assert!(html.as_str().contains("<h1"));
    assert!(html.as_str().contains("Title"));
    assert!(html.as_str().contains("<p>Hello world.</p>"));
    assert!(!html.as_str().contains("markdown-error"));
}

#[test]
fn tables_are_styled_and_wrapped() {
    let html = render_markdown_content(
        &RenderConfig::default(),
        "| a | b |\n|---|---|\n| 1 | 2 |\n",
        None,
    );

    assert!(html.as_str().contains(
        "<div class=\"table-responsive\"><table class=\"table table-striped table-bordered\">"
    ));
    assert!(html.as_str().contains("</table></div>"));
}

#[test]
fn scripts_never_survive() {
    let html = render_markdown_content(
        &RenderConfig::default(),
        "<script>alert(1)</script>\n\n[x](javascript:alert(1))\n",
        None,
    );

    assert!(!html.as_str().contains("<script"));
    assert!(!html.as_str().contains("javascript:"));
}

#[test]
fn unsafe_extensions_keep_raw_html_but_not_scripts() {
    let settings = RenderSettings {
        enable_unsafe_extensions: true,
        ..RenderSettings::default()
    };
    let config = RenderConfig::from_settings(&settings);
    let html = render_markdown_content(
        &config,
        "<div class=\"note\">kept</div>\n\n<script>alert(1)</script>\n",
        None,
    );

    assert!(html.as_str().contains("<div class=\"note\">kept</div>"));
    assert!(!html.as_str().contains("<script"));
    assert!(!html.as_str().contains("alert(1)"));

    let escaped = render_markdown_content(
        &RenderConfig::default(),
        "<div class=\"note\">kept</div>\n",
        None,
    );
    assert!(escaped.as_str().contains("&lt;div"));
}

#[test]
fn document_text_cannot_impersonate_fragments() {
    let html = render_markdown_content(
        &RenderConfig::default(),
        "Token `__DOCMGR_FRAGMENT_0__` next to $x^2$.",
        None,
    );

    assert!(html.as_str().contains("<code>__DOCMGR_FRAGMENT_0__</code>"));
    assert!(html.as_str().contains("katex"));
}

#[test]
fn link_policy_keeps_relative_references() {
    let dir = TempDir::new().expect("tempdir");
    write(&dir, "pixel.png", PIXEL_PNG);
    let doc = write(&dir, "guide.md", b"![dot](pixel.png)\n");

    let settings = RenderSettings {
        image_policy: ImagePolicy::Link,
        ..RenderSettings::default()
    };
    let policy = ValidationPolicy::new(vec![dir.path().to_path_buf()], 1024 * 1024);
    let html = render_markdown_file(&RenderConfig::from_settings(&settings), &policy, &doc);

    assert!(html.as_str().contains("src=\"pixel.png\""));
    assert!(!html.as_str().contains("data:image"));
}

#[test]
fn mismatched_bom_still_renders() {
    let dir = TempDir::new().expect("tempdir");
    let doc = write(&dir, "cafe.md", b"\xEF\xBB\xBF# Caf\xe9\n");

    let html = renderer_for(dir.path(), 1024).render_file(&doc);

    assert!(html.as_str().contains("<h1"));
    assert!(!html.as_str().contains("markdown-error"));
}

#[test]
fn relative_images_are_embedded() {
    let dir = TempDir::new().expect("tempdir");
    write(&dir, "pixel.png", PIXEL_PNG);
    let doc = write(&dir, "guide.md", b"# Guide\n\n![dot](pixel.png)\n");

    let html = renderer_for(dir.path(), 1024 * 1024).render_file(&doc);

    assert!(html.as_str().contains("src=\"data:image/png;base64,"));
    assert!(html.as_str().contains("width=\"1\" height=\"1\""));
    assert!(!html.as_str().contains("src=\"pixel.png\""));
}

#[test]
fn missing_image_leaves_a_marker_and_the_document() {
    let dir = TempDir::new().expect("tempdir");
    let doc = write(&dir, "guide.md", b"![gone](missing.png)\n\nStill here.\n");

    let html = renderer_for(dir.path(), 1024 * 1024).render_file(&doc);

    assert!(html.as_str().contains("markdown-image-error"));
    assert!(html.as_str().contains("image unavailable: gone"));
    assert!(html.as_str().contains("Still here."));
}

#[test]
fn nonexistent_file_yields_validation_panel() {
    let dir = TempDir::new().expect("tempdir");
    let missing = dir.path().join("absent.md");

    let policy = ValidationPolicy::new(vec![dir.path().to_path_buf()], 1024);
    let html = render_markdown_file(&RenderConfig::default(), &policy, &missing);

    assert!(html.as_str().contains("markdown-validation-error"));
    assert!(html.as_str().contains("File validation error"));
}

#[test]
fn oversized_file_is_refused() {
    let dir = TempDir::new().expect("tempdir");
    let doc = write(&dir, "big.md", &[b'a'; 100]);

    let renderer = renderer_for(dir.path(), 16);
    let err = renderer.try_render_file(&doc).expect_err("too large");

    assert!(err.is_validation());
    assert!(err.to_string().contains("exceeds"));
}

#[test]
fn traversal_is_refused_before_reading() {
    let dir = TempDir::new().expect("tempdir");
    let nested = dir.path().join("docs");
    fs::create_dir(&nested).expect("mkdir");
    write(&dir, "secret.md", b"secret");

    let renderer = renderer_for(&nested, 1024);
    let html = renderer.render_file(&nested.join("../secret.md"));

    assert!(html.as_str().contains("markdown-validation-error"));
    assert!(!html.as_str().contains("secret</p>"));
}

#[test]
fn plain_text_and_code_files_render_as_code_blocks() {
    let dir = TempDir::new().expect("tempdir");
    let notes = write(&dir, "notes.txt", b"line one\nline two\n");
    let source = write(&dir, "main.rs", b"fn main() {}\n");
    let renderer = renderer_for(dir.path(), 1024);

    let text_html = renderer.render_file(&notes);
    assert!(text_html.as_str().contains("document-code"));
    assert!(text_html.as_str().contains("line one"));

    let code_html = renderer.render_file(&source);
    assert!(code_html.as_str().contains("document-code"));
    assert!(code_html.as_str().contains("data-language=\"rust\""));
}

#[test]
fn image_and_pdf_files_get_their_own_previews() {
    let dir = TempDir::new().expect("tempdir");
    let image = write(&dir, "pixel.png", PIXEL_PNG);
    let pdf = write(&dir, "report.pdf", b"%PDF-1.4\n%%EOF\n");
    let renderer = renderer_for(dir.path(), 1024);

    let image_html = renderer.render_file(&image);
    assert!(image_html.as_str().contains("document-image"));
    assert!(image_html.as_str().contains("data:image/png;base64,"));

    let pdf_html = renderer.render_file(&pdf);
    assert!(pdf_html.as_str().contains("Preview is not available"));
    assert!(pdf_html.as_str().contains("report.pdf"));
}

#[test]
fn gbk_documents_are_decoded() {
    let dir = TempDir::new().expect("tempdir");
    // "你好世界" encoded as GBK.
    let doc = write(&dir, "hello.md", b"\xc4\xe3\xba\xc3\xca\xc0\xbd\xe7\n");

    let html = renderer_for(dir.path(), 1024).render_file(&doc);

    assert!(html.as_str().contains("<p>你好世界</p>"));
}

#[test]
fn front_matter_and_toc_are_reported() {
    let renderer = MarkdownRenderer::default();
    let document = renderer
        .try_render_content(
            "---\ntitle: Guide\n---\n\n[TOC]\n\n# Intro\n\n## Setup\n",
            None,
        )
        .expect("render");

    assert_eq!(document.metadata["title"], "Guide");
    assert_eq!(document.toc.len(), 2);
    assert_eq!(document.toc[0].id, "intro");
    assert_eq!(document.toc[1].level, 2);
    assert!(document.html.as_str().contains("<nav class=\"toc\">"));
    assert!(document.html.as_str().contains("<h2 id=\"setup\">"));
    assert!(!document.html.as_str().contains("title: Guide"));
}
