//! Admission checks for files handed to the preview pipeline.
//!
//! A candidate path must be contained in a trusted root, carry a whitelisted
//! extension and content type, and stay under the size ceiling. Checks run in
//! that order and stop at the first failure.

use std::{
    fs::File,
    io::{self, Read},
    path::{Component, Path, PathBuf},
};

use metrics::counter;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    config::Settings,
    domain::{
        documents::{
            SNIFFED_BINARY_MIME, SNIFFED_TEXT_MIME, ValidatedPath, default_allowed_extensions,
            default_allowed_mime_types, extension_of, lookup,
        },
        error::ValidationError,
    },
    infra::telemetry::METRIC_VALIDATION_REJECTIONS,
};

/// Number of leading bytes inspected when the type cannot be derived from the extension.
const SNIFF_LEN: u64 = 512;

/// Admission policy: trusted roots plus the type and size whitelists.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationPolicy {
    roots: Vec<PathBuf>,
    trust_parent_dir: bool,
    max_size: u64,
    allowed_extensions: Vec<String>,
    allowed_mime_types: Vec<String>,
}

impl ValidationPolicy {
    /// Policy with the built-in whitelists. Roots are canonicalized when they exist.
    pub fn new(roots: impl IntoIterator<Item = PathBuf>, max_size: u64) -> Self {
        Self {
            roots: roots.into_iter().map(|root| normalize_root(&root)).collect(),
            trust_parent_dir: false,
            max_size,
            allowed_extensions: default_allowed_extensions(),
            allowed_mime_types: default_allowed_mime_types(),
        }
    }

    /// Build the policy from resolved settings.
    ///
    /// Roots are the media root, the project base directory (the working
    /// directory when unset) and every configured external directory.
    pub fn from_settings(settings: &Settings) -> Self {
        let validation = &settings.validation;
        let mut roots = vec![validation.media_root.clone()];
        match validation.base_dir.clone() {
            Some(base) => roots.push(base),
            None => match std::env::current_dir() {
                Ok(cwd) => roots.push(cwd),
                Err(err) => warn!(
                    target = "application::validation",
                    error = %err,
                    "Working directory unavailable; base directory not trusted"
                ),
            },
        }
        roots.extend(settings.render.external_dirs.iter().cloned());

        Self::new(roots, settings.render.max_size.get())
            .with_trust_parent_dir(validation.trust_parent_dir)
            .with_allowed_extensions(validation.allowed_extensions.clone())
            .with_allowed_mime_types(validation.allowed_mime_types.clone())
    }

    /// Also trust the directory that contains the candidate file.
    ///
    /// This admits any existing file whose name passes the other checks, so it
    /// is off unless explicitly configured.
    pub fn with_trust_parent_dir(mut self, trust: bool) -> Self {
        self.trust_parent_dir = trust;
        self
    }

    pub fn with_allowed_extensions(mut self, extensions: Vec<String>) -> Self {
        self.allowed_extensions = extensions
            .into_iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn with_allowed_mime_types(mut self, mime_types: Vec<String>) -> Self {
        self.allowed_mime_types = mime_types
            .into_iter()
            .map(|mime| mime.to_ascii_lowercase())
            .collect();
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn trust_parent_dir(&self) -> bool {
        self.trust_parent_dir
    }
}

/// Runs the admission checks and hands out [`ValidatedPath`] tokens.
#[derive(Debug, Clone)]
pub struct FileValidator {
    policy: ValidationPolicy,
}

impl FileValidator {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    /// Validate `path`, returning a token that proves every check passed.
    pub fn validate(&self, path: &Path) -> Result<ValidatedPath, ValidationError> {
        let result = self.run_checks(path);
        if let Err(err) = &result {
            counter!(METRIC_VALIDATION_REJECTIONS, "reason" => err.kind()).increment(1);
            warn!(
                target = "application::validation",
                path = %path.display(),
                reason = err.kind(),
                error = %err,
                "File rejected"
            );
        }
        result
    }

    fn run_checks(&self, path: &Path) -> Result<ValidatedPath, ValidationError> {
        let resolved = self.check_containment(path)?;
        let extension = self.check_extension(&resolved)?;
        let mime_type = self.check_mime_type(&resolved, &extension)?;
        let size = self.check_size(&resolved)?;

        debug!(
            target = "application::validation",
            path = %resolved.display(),
            extension = %extension,
            mime = %mime_type,
            size,
            "File admitted"
        );

        Ok(ValidatedPath::new(resolved, extension, mime_type, size))
    }

    fn check_containment(&self, path: &Path) -> Result<PathBuf, ValidationError> {
        if has_parent_segment(path) {
            return Err(ValidationError::TraversalDetected {
                path: path.to_path_buf(),
            });
        }

        let absolute = std::path::absolute(path).map_err(|err| ValidationError::io(path, err))?;
        let resolved = resolve_existing(&absolute).map_err(|err| ValidationError::io(path, err))?;

        // Containment is judged on the canonical form, so a symlink counts
        // where its target lives.
        let contained = self
            .policy
            .roots
            .iter()
            .any(|root| resolved.starts_with(root));
        if contained {
            return Ok(resolved);
        }

        if self.policy.trust_parent_dir && resolved.is_file() {
            debug!(
                target = "application::validation",
                path = %resolved.display(),
                "Admitting file through its containing directory"
            );
            return Ok(resolved);
        }

        Err(ValidationError::PathNotAllowed { path: resolved })
    }

    fn check_extension(&self, path: &Path) -> Result<String, ValidationError> {
        let extension = extension_of(path).unwrap_or_default();
        if !extension.is_empty()
            && self
                .policy
                .allowed_extensions
                .iter()
                .any(|allowed| *allowed == extension)
        {
            return Ok(extension);
        }

        Err(ValidationError::UnsupportedExtension {
            extension: if extension.is_empty() {
                "(none)".to_string()
            } else {
                extension
            },
            allowed: self.policy.allowed_extensions.join(", "),
        })
    }

    fn check_mime_type(&self, path: &Path, extension: &str) -> Result<String, ValidationError> {
        let declared = match lookup(extension) {
            Some(entry) => entry.declared_mime.map(str::to_string),
            None => mime_guess::from_ext(extension)
                .first_raw()
                .map(str::to_string),
        };

        let mime = match declared {
            Some(mime) => mime.to_ascii_lowercase(),
            None => sniff_mime(path)?.to_string(),
        };

        if self
            .policy
            .allowed_mime_types
            .iter()
            .any(|allowed| *allowed == mime)
        {
            Ok(mime)
        } else {
            Err(ValidationError::UnsupportedMimeType { mime })
        }
    }

    fn check_size(&self, path: &Path) -> Result<u64, ValidationError> {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ValidationError::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(err) => return Err(ValidationError::io(path, err)),
        };

        if !metadata.is_file() {
            return Err(ValidationError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let size = metadata.len();
        if size > self.policy.max_size {
            return Err(ValidationError::FileTooLarge {
                size,
                limit: self.policy.max_size,
            });
        }

        Ok(size)
    }
}

fn has_parent_segment(path: &Path) -> bool {
    path.components()
        .any(|component| matches!(component, Component::ParentDir))
}

/// Canonicalize `path`, falling back to its parent directory (and then the
/// lexical form) when the file itself does not exist.
fn resolve_existing(path: &Path) -> io::Result<PathBuf> {
    match path.canonicalize() {
        Ok(resolved) => Ok(resolved),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
                return Ok(path.to_path_buf());
            };
            match parent.canonicalize() {
                Ok(parent) => Ok(parent.join(name)),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(path.to_path_buf()),
                Err(err) => Err(err),
            }
        }
        Err(err) => Err(err),
    }
}

fn normalize_root(root: &Path) -> PathBuf {
    let absolute = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
    absolute.canonicalize().unwrap_or(absolute)
}

fn sniff_mime(path: &Path) -> Result<&'static str, ValidationError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(ValidationError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        Err(err) => return Err(ValidationError::io(path, err)),
    };

    let mut header = Vec::with_capacity(SNIFF_LEN as usize);
    file.take(SNIFF_LEN)
        .read_to_end(&mut header)
        .map_err(|err| ValidationError::io(path, err))?;

    Ok(if looks_like_text(&header) {
        SNIFFED_TEXT_MIME
    } else {
        SNIFFED_BINARY_MIME
    })
}

/// UTF-8 without NUL bytes. A multi-byte sequence cut off by the sniff
/// window still counts as text.
fn looks_like_text(bytes: &[u8]) -> bool {
    if bytes.contains(&0) {
        return false;
    }
    match std::str::from_utf8(bytes) {
        Ok(_) => true,
        Err(err) => err.error_len().is_none(),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn validator_for(root: &Path, max_size: u64) -> FileValidator {
        FileValidator::new(ValidationPolicy::new([root.to_path_buf()], max_size))
    }

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, bytes).expect("write fixture");
        path
    }

    #[test]
    fn admits_markdown_inside_root() {
        let dir = TempDir::new().expect("tempdir");
        let path = write(dir.path(), "notes.md", b"# Notes\n");

        let validated = validator_for(dir.path(), 1024)
            .validate(&path)
            .expect("admitted");

        assert_eq!(validated.extension(), "md");
        assert_eq!(validated.mime_type(), "text/markdown");
        assert_eq!(validated.size(), 8);
        assert!(validated.as_path().is_absolute());
    }

    #[test]
    fn parent_segments_fail_before_touching_the_filesystem() {
        let dir = TempDir::new().expect("tempdir");
        let sneaky = dir.path().join("docs").join("..").join("secret.exe");

        let err = validator_for(dir.path(), 1024)
            .validate(&sneaky)
            .expect_err("rejected");

        assert!(matches!(err, ValidationError::TraversalDetected { .. }));
    }

    #[test]
    fn files_outside_roots_are_refused() {
        let root = TempDir::new().expect("root");
        let elsewhere = TempDir::new().expect("elsewhere");
        let path = write(elsewhere.path(), "notes.md", b"hi");

        let err = validator_for(root.path(), 1024)
            .validate(&path)
            .expect_err("rejected");

        assert!(matches!(err, ValidationError::PathNotAllowed { .. }));
    }

    #[test]
    fn sibling_prefix_is_not_containment() {
        let parent = TempDir::new().expect("parent");
        let media = parent.path().join("media");
        let evil = parent.path().join("media-evil");
        fs::create_dir_all(&media).expect("media");
        fs::create_dir_all(&evil).expect("evil");
        let path = write(&evil, "notes.md", b"hi");

        let err = validator_for(&media, 1024)
            .validate(&path)
            .expect_err("rejected");

        assert!(matches!(err, ValidationError::PathNotAllowed { .. }));
    }

    #[test]
    fn trusted_parent_dir_admits_outside_files() {
        let root = TempDir::new().expect("root");
        let elsewhere = TempDir::new().expect("elsewhere");
        let path = write(elsewhere.path(), "notes.md", b"hi");

        let validator = FileValidator::new(
            ValidationPolicy::new([root.path().to_path_buf()], 1024).with_trust_parent_dir(true),
        );

        assert!(validator.validate(&path).is_ok());
    }

    #[test]
    fn unknown_extension_is_refused() {
        let dir = TempDir::new().expect("tempdir");
        let path = write(dir.path(), "payload.exe", b"MZ");

        let err = validator_for(dir.path(), 1024)
            .validate(&path)
            .expect_err("rejected");

        match err {
            ValidationError::UnsupportedExtension { extension, allowed } => {
                assert_eq!(extension, "exe");
                assert!(allowed.contains("md"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        let dir = TempDir::new().expect("tempdir");
        let path = write(dir.path(), "README.MD", b"# hi");

        assert!(validator_for(dir.path(), 1024).validate(&path).is_ok());
    }

    #[test]
    fn sniffed_binary_content_is_refused() {
        let dir = TempDir::new().expect("tempdir");
        let path = write(dir.path(), "main.rs", &[0xff, 0xfe, 0x00, 0x01, 0x02]);

        let err = validator_for(dir.path(), 1024)
            .validate(&path)
            .expect_err("rejected");

        match err {
            ValidationError::UnsupportedMimeType { mime } => {
                assert_eq!(mime, SNIFFED_BINARY_MIME);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn sniffed_text_content_is_admitted() {
        let dir = TempDir::new().expect("tempdir");
        let path = write(dir.path(), "main.rs", b"fn main() {}\n");

        let validated = validator_for(dir.path(), 1024)
            .validate(&path)
            .expect("admitted");
        assert_eq!(validated.mime_type(), SNIFFED_TEXT_MIME);
    }

    #[test]
    fn size_limit_is_inclusive() {
        let dir = TempDir::new().expect("tempdir");
        let exact = write(dir.path(), "exact.txt", &[b'a'; 16]);
        let over = write(dir.path(), "over.txt", &[b'a'; 17]);
        let validator = validator_for(dir.path(), 16);

        assert!(validator.validate(&exact).is_ok());
        let err = validator.validate(&over).expect_err("too large");
        assert!(matches!(
            err,
            ValidationError::FileTooLarge {
                size: 17,
                limit: 16
            }
        ));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = TempDir::new().expect("tempdir");
        let missing = dir.path().join("absent.md");

        let err = validator_for(dir.path(), 1024)
            .validate(&missing)
            .expect_err("missing");
        assert!(matches!(err, ValidationError::FileNotFound { .. }));
    }

    #[test]
    fn directories_are_not_documents() {
        let dir = TempDir::new().expect("tempdir");
        let nested = dir.path().join("folder.md");
        fs::create_dir(&nested).expect("mkdir");

        let err = validator_for(dir.path(), 1024)
            .validate(&nested)
            .expect_err("directory");
        assert!(matches!(err, ValidationError::FileNotFound { .. }));
    }

    #[test]
    fn truncated_utf8_counts_as_text() {
        let text = "配置".as_bytes();
        assert!(looks_like_text(&text[..text.len() - 1]));
        assert!(!looks_like_text(b"abc\0def"));
    }
}
