//! Resolution of relative image references into self-contained `data:` URIs.

use std::{
    fs,
    path::{Path, PathBuf},
};

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use metrics::counter;
use percent_encoding::percent_decode_str;
use tracing::{debug, warn};
use url::Url;

use crate::{
    infra::telemetry::{METRIC_IMAGE_FAILURES, METRIC_IMAGES_EMBEDDED},
    util::{bytes::format_bytes, html::escape_html},
};

const IMAGES_PREFIX: &str = "images/";

/// MIME types for image extensions `mime_guess` may not know.
const FALLBACK_IMAGE_TYPES: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
    ("ico", "image/x-icon"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("avif", "image/avif"),
];

/// An image inlined into the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EmbeddedImage {
    pub(crate) data_uri: String,
    pub(crate) dimensions: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ImageOutcome {
    /// Leave the reference untouched (remote, `data:`, or linking policy).
    Keep,
    Embedded(EmbeddedImage),
    /// Replace the image with a visible marker carrying this message.
    Failed(String),
}

/// Resolves image references relative to the document being rendered.
pub(crate) struct ImageResolver<'a> {
    origin_dir: &'a Path,
    image_root: Option<&'a Path>,
    max_bytes: u64,
}

impl<'a> ImageResolver<'a> {
    pub(crate) fn new(origin_dir: &'a Path, image_root: Option<&'a Path>, max_bytes: u64) -> Self {
        Self {
            origin_dir,
            image_root,
            max_bytes,
        }
    }

    pub(crate) fn embed(&self, reference: &str) -> ImageOutcome {
        let reference = reference.trim();
        if reference.is_empty() || is_external(reference) {
            return ImageOutcome::Keep;
        }

        let relative = local_part(reference);
        let Some(path) = self.locate(&relative) else {
            return self.fail(reference, format!("image not found: {relative}"));
        };

        match load_image(&path, self.max_bytes) {
            Ok(image) => {
                counter!(METRIC_IMAGES_EMBEDDED).increment(1);
                debug!(
                    target = "application::render::images",
                    reference,
                    path = %path.display(),
                    "Embedded image"
                );
                ImageOutcome::Embedded(image)
            }
            Err(message) => self.fail(reference, message),
        }
    }

    fn locate(&self, relative: &str) -> Option<PathBuf> {
        let local = self.origin_dir.join(relative);
        if local.is_file() {
            return Some(local);
        }

        if relative.starts_with(IMAGES_PREFIX)
            && let Some(root) = self.image_root
        {
            let shared = root.join(relative);
            if shared.is_file() {
                return Some(shared);
            }
        }

        None
    }

    fn fail(&self, reference: &str, message: String) -> ImageOutcome {
        counter!(METRIC_IMAGE_FAILURES).increment(1);
        warn!(
            target = "application::render::images",
            reference,
            origin = %self.origin_dir.display(),
            "{message}"
        );
        ImageOutcome::Failed(message)
    }
}

/// References with a URL scheme (including `data:`) or a protocol-relative
/// prefix are never resolved on disk.
pub(crate) fn is_external(reference: &str) -> bool {
    if reference.starts_with("//") {
        return true;
    }
    match Url::parse(reference) {
        // Single-letter schemes are Windows drive letters.
        Ok(url) => url.scheme().len() > 1,
        Err(_) => false,
    }
}

/// Strip query and fragment, then percent-decode the path portion.
fn local_part(reference: &str) -> String {
    let end = reference.find(['?', '#']).unwrap_or(reference.len());
    percent_decode_str(&reference[..end])
        .decode_utf8_lossy()
        .into_owned()
}

fn load_image(path: &Path, max_bytes: u64) -> Result<EmbeddedImage, String> {
    let mime = image_mime(path)
        .ok_or_else(|| format!("unsupported image type: {}", path.display()))?;

    let metadata =
        fs::metadata(path).map_err(|err| format!("cannot read image {}: {err}", path.display()))?;
    if metadata.len() > max_bytes {
        return Err(format!(
            "image {} ({}) exceeds the embedding limit ({})",
            path.display(),
            format_bytes(metadata.len()),
            format_bytes(max_bytes)
        ));
    }

    let bytes =
        fs::read(path).map_err(|err| format!("cannot read image {}: {err}", path.display()))?;
    let dimensions = imagesize::blob_size(&bytes).ok().and_then(|size| {
        Some((
            u32::try_from(size.width).ok()?,
            u32::try_from(size.height).ok()?,
        ))
    });

    Ok(EmbeddedImage {
        data_uri: data_uri(&mime, &bytes),
        dimensions,
    })
}

pub(crate) fn image_mime(path: &Path) -> Option<String> {
    if let Some(mime) = mime_guess::from_path(path).first_raw()
        && mime.starts_with("image/")
    {
        return Some(mime.to_string());
    }

    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    FALLBACK_IMAGE_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mime)| mime.to_string())
}

pub(crate) fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", BASE64_STANDARD.encode(bytes))
}

/// Inline marker shown in place of an image that could not be embedded.
pub(crate) fn error_marker(alt: &str, message: &str) -> String {
    let label = if alt.trim().is_empty() {
        "image unavailable".to_string()
    } else {
        format!("image unavailable: {}", alt.trim())
    };
    format!(
        "<span class=\"markdown-image-error\" title=\"{}\">[{}]</span>",
        escape_html(message),
        escape_html(&label)
    )
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    // 1x1 transparent PNG.
    const PIXEL_PNG: &[u8] = &[
        0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
        0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
        0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00,
        0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49,
        0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
    ];

    #[test]
    fn external_references_are_kept() {
        assert!(is_external("https://example.com/a.png"));
        assert!(is_external("//cdn.example.com/a.png"));
        assert!(is_external("data:image/png;base64,AAAA"));
        assert!(!is_external("images/a.png"));
        assert!(!is_external("/srv/media/a.png"));
        assert!(!is_external("C:/images/a.png"));
    }

    #[test]
    fn relative_images_embed_with_dimensions() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("pixel.png"), PIXEL_PNG).expect("write");

        let resolver = ImageResolver::new(dir.path(), None, 1024);
        match resolver.embed("pixel.png") {
            ImageOutcome::Embedded(image) => {
                assert!(image.data_uri.starts_with("data:image/png;base64,"));
                assert_eq!(image.dimensions, Some((1, 1)));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn images_prefix_falls_back_to_image_root() {
        let doc = TempDir::new().expect("doc");
        let shared = TempDir::new().expect("shared");
        std::fs::create_dir(shared.path().join("images")).expect("mkdir");
        std::fs::write(shared.path().join("images/pixel.png"), PIXEL_PNG).expect("write");

        let resolver = ImageResolver::new(doc.path(), Some(shared.path()), 1024);
        assert!(matches!(
            resolver.embed("images/pixel.png"),
            ImageOutcome::Embedded(_)
        ));
    }

    #[test]
    fn missing_and_oversized_images_fail() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("pixel.png"), PIXEL_PNG).expect("write");

        let resolver = ImageResolver::new(dir.path(), None, 8);
        assert!(matches!(
            resolver.embed("missing.png"),
            ImageOutcome::Failed(message) if message.contains("missing.png")
        ));
        assert!(matches!(
            resolver.embed("pixel.png"),
            ImageOutcome::Failed(message) if message.contains("embedding limit")
        ));
    }

    #[test]
    fn percent_encoded_names_are_decoded() {
        assert_eq!(local_part("my%20pic.png?v=2#top"), "my pic.png");
    }

    #[test]
    fn marker_escapes_its_content() {
        let html = error_marker("<alt>", "not \"found\"");
        assert!(html.contains("&lt;alt&gt;"));
        assert!(!html.contains("\"found\""));
    }
}
