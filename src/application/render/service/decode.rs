use encoding_rs::{Encoding, GBK, UTF_8, WINDOWS_1252};
use tracing::debug;

use crate::application::render::types::RenderError;

/// Characters inspected for replacement characters after a strict decode.
const REPLACEMENT_WINDOW: usize = 100;

/// Text extracted from a document plus the encoding that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedContent {
    pub text: String,
    pub encoding: &'static str,
}

/// Decode document bytes with the fallback chain: BOM, UTF-8, GBK (which
/// also covers GB2312), statistical detection, then Windows-1252.
pub(crate) fn decode_bytes(bytes: &[u8]) -> Result<DecodedContent, RenderError> {
    let mut bytes = bytes;
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let body = &bytes[bom_len..];
        if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(body) {
            return Ok(decoded(text.into_owned(), encoding, "bom"));
        }
        debug!(
            target = "application::render::decode",
            encoding = encoding.name(),
            "Content does not match its byte order mark; trying the fallback chain"
        );
        bytes = body;
    }

    for encoding in [UTF_8, GBK] {
        if let Some(text) = strict_decode(encoding, bytes) {
            return Ok(decoded(text, encoding, "fallback-chain"));
        }
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let guessed = detector.guess(None, true);
    if let Some(text) = strict_decode(guessed, bytes) {
        return Ok(decoded(text, guessed, "detected"));
    }

    let (text, _had_errors) = WINDOWS_1252.decode_without_bom_handling(bytes);
    Ok(decoded(text.into_owned(), WINDOWS_1252, "forced"))
}

fn strict_decode(encoding: &'static Encoding, bytes: &[u8]) -> Option<String> {
    let text = encoding.decode_without_bom_handling_and_without_replacement(bytes)?;
    if text.chars().take(REPLACEMENT_WINDOW).any(|ch| ch == '\u{FFFD}') {
        return None;
    }
    Some(text.into_owned())
}

fn decoded(text: String, encoding: &'static Encoding, strategy: &'static str) -> DecodedContent {
    debug!(
        target = "application::render::decode",
        encoding = encoding.name(),
        strategy,
        chars = text.chars().count(),
        "Decoded document"
    );
    DecodedContent {
        text,
        encoding: encoding.name(),
    }
}
