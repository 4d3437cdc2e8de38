use std::path::PathBuf;

use thiserror::Error;

use crate::util::bytes::format_bytes;

/// Reasons a candidate file is refused before any of its content is read.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("access denied: `{}` is outside every allowed directory", .path.display())]
    PathNotAllowed { path: PathBuf },
    #[error("access denied: directory traversal detected in `{}`", .path.display())]
    TraversalDetected { path: PathBuf },
    #[error("unsupported file type `{extension}`; allowed types: {allowed}")]
    UnsupportedExtension { extension: String, allowed: String },
    #[error("unsupported MIME type `{mime}`")]
    UnsupportedMimeType { mime: String },
    #[error("file not found: {}", .path.display())]
    FileNotFound { path: PathBuf },
    #[error(
        "file size ({}) exceeds the allowed maximum ({})",
        human(.size),
        human(.limit)
    )]
    FileTooLarge { size: u64, limit: u64 },
    #[error("failed to inspect `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ValidationError {
    /// Stable identifier used for log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PathNotAllowed { .. } => "path_not_allowed",
            Self::TraversalDetected { .. } => "traversal_detected",
            Self::UnsupportedExtension { .. } => "unsupported_extension",
            Self::UnsupportedMimeType { .. } => "unsupported_mime_type",
            Self::FileNotFound { .. } => "file_not_found",
            Self::FileTooLarge { .. } => "file_too_large",
            Self::Io { .. } => "io",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

fn human(bytes: &u64) -> String {
    format_bytes(*bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_large_message_uses_human_units() {
        let err = ValidationError::FileTooLarge {
            size: 11 * 1024 * 1024,
            limit: 10 * 1024 * 1024,
        };
        assert_eq!(
            err.to_string(),
            "file size (11 MiB) exceeds the allowed maximum (10 MiB)"
        );
        assert_eq!(err.kind(), "file_too_large");
    }

    #[test]
    fn traversal_message_includes_path() {
        let err = ValidationError::TraversalDetected {
            path: PathBuf::from("docs/../secret.md"),
        };
        assert!(err.to_string().contains("docs/../secret.md"));
    }
}
