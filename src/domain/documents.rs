//! Document types admitted by the validator and how the renderer presents them.

use std::path::{Path, PathBuf};

/// How a validated document is turned into preview HTML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Markdown,
    PlainText,
    /// Source or configuration file highlighted with the given syntax token.
    Code { language: &'static str },
    Image,
    Pdf,
    Office,
}

/// Static description of one whitelisted extension.
#[derive(Debug, Clone, Copy)]
pub struct DocumentType {
    pub extension: &'static str,
    /// MIME type declared for the extension. `None` means the type is sniffed
    /// from the leading bytes of the file.
    pub declared_mime: Option<&'static str>,
    pub kind: DocumentKind,
}

const fn doc(
    extension: &'static str,
    declared_mime: Option<&'static str>,
    kind: DocumentKind,
) -> DocumentType {
    DocumentType {
        extension,
        declared_mime,
        kind,
    }
}

const fn code(
    extension: &'static str,
    mime: Option<&'static str>,
    language: &'static str,
) -> DocumentType {
    doc(extension, mime, DocumentKind::Code { language })
}

pub const DOCUMENT_TYPES: &[DocumentType] = &[
    doc("md", Some("text/markdown"), DocumentKind::Markdown),
    doc("markdown", Some("text/markdown"), DocumentKind::Markdown),
    doc("txt", Some("text/plain"), DocumentKind::PlainText),
    doc("log", Some("text/plain"), DocumentKind::PlainText),
    doc("csv", Some("text/csv"), DocumentKind::PlainText),
    code("json", Some("application/json"), "json"),
    code("yaml", Some("application/yaml"), "yaml"),
    code("yml", Some("application/yaml"), "yaml"),
    code("toml", Some("application/toml"), "toml"),
    code("xml", Some("application/xml"), "xml"),
    code("ini", None, "ini"),
    code("cfg", None, "ini"),
    code("conf", None, "ini"),
    code("html", Some("text/html"), "html"),
    code("htm", Some("text/html"), "html"),
    code("css", Some("text/css"), "css"),
    code("js", Some("text/javascript"), "javascript"),
    code("ts", None, "typescript"),
    code("py", None, "python"),
    code("rs", None, "rust"),
    code("go", None, "go"),
    code("java", None, "java"),
    code("c", None, "c"),
    code("h", None, "c"),
    code("cpp", None, "cpp"),
    code("sh", None, "bash"),
    code("sql", None, "sql"),
    doc("png", Some("image/png"), DocumentKind::Image),
    doc("jpg", Some("image/jpeg"), DocumentKind::Image),
    doc("jpeg", Some("image/jpeg"), DocumentKind::Image),
    doc("gif", Some("image/gif"), DocumentKind::Image),
    doc("svg", Some("image/svg+xml"), DocumentKind::Image),
    doc("webp", Some("image/webp"), DocumentKind::Image),
    doc("bmp", Some("image/bmp"), DocumentKind::Image),
    doc("pdf", Some("application/pdf"), DocumentKind::Pdf),
    doc("doc", Some("application/msword"), DocumentKind::Office),
    doc(
        "docx",
        Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
        DocumentKind::Office,
    ),
    doc("xls", Some("application/vnd.ms-excel"), DocumentKind::Office),
    doc(
        "xlsx",
        Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        DocumentKind::Office,
    ),
    doc("ppt", Some("application/vnd.ms-powerpoint"), DocumentKind::Office),
    doc(
        "pptx",
        Some("application/vnd.openxmlformats-officedocument.presentationml.presentation"),
        DocumentKind::Office,
    ),
];

/// Result of sniffing leading bytes that decode as text.
pub const SNIFFED_TEXT_MIME: &str = "text/plain";
/// Result of sniffing leading bytes that do not decode as text.
pub const SNIFFED_BINARY_MIME: &str = "application/octet-stream";

pub fn lookup(extension: &str) -> Option<&'static DocumentType> {
    let lowered = extension.to_ascii_lowercase();
    DOCUMENT_TYPES.iter().find(|entry| entry.extension == lowered)
}

/// Lower-cased extension of `path`, without the leading dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .filter(|value| !value.is_empty())
}

pub fn default_allowed_extensions() -> Vec<String> {
    DOCUMENT_TYPES
        .iter()
        .map(|entry| entry.extension.to_string())
        .collect()
}

pub fn default_allowed_mime_types() -> Vec<String> {
    let mut types: Vec<String> = DOCUMENT_TYPES
        .iter()
        .filter_map(|entry| entry.declared_mime)
        .chain(std::iter::once(SNIFFED_TEXT_MIME))
        .map(str::to_string)
        .collect();
    types.sort();
    types.dedup();
    types
}

/// A file path that has passed every validator check.
///
/// Only the validator can construct one, so anything that reads document bytes
/// by taking a `ValidatedPath` cannot be handed an unchecked path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPath {
    path: PathBuf,
    extension: String,
    mime_type: String,
    size: u64,
}

impl ValidatedPath {
    pub(crate) fn new(path: PathBuf, extension: String, mime_type: String, size: u64) -> Self {
        Self {
            path,
            extension,
            mime_type,
            size,
        }
    }

    /// Canonical absolute path of the document.
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Presentation kind. Extensions admitted through configuration but unknown
    /// to the built-in table are previewed as plain text.
    pub fn kind(&self) -> DocumentKind {
        lookup(&self.extension)
            .map(|entry| entry.kind)
            .unwrap_or(DocumentKind::PlainText)
    }
}
