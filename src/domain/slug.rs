//! Heading anchor slugs.
//!
//! ASCII slugification (`slug` crate) is combined with Chinese transliteration
//! (`pinyin` crate) so headings like “基线对齐” become `ji-xian-dui-qi`.

use std::collections::HashMap;

use pinyin::{Pinyin, ToPinyin};
use slug::slugify;
use thiserror::Error;

const FALLBACK_ANCHOR: &str = "section";

/// Errors that can occur while generating a slug.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("slug source text is empty")]
    EmptyInput,
    #[error("failed to derive slug from `{input}`")]
    Unrepresentable { input: String },
}

/// Derive a base slug from the provided human-readable text.
pub fn derive_slug(input: &str) -> Result<String, SlugError> {
    if input.trim().is_empty() {
        return Err(SlugError::EmptyInput);
    }

    let transliterated = transliterate_to_ascii(input);
    let candidate = slugify(&transliterated);

    if candidate.is_empty() {
        return Err(SlugError::Unrepresentable {
            input: input.to_string(),
        });
    }

    Ok(candidate)
}

/// Deterministically generate unique anchor slugs within a single document.
///
/// Headings processed in order receive monotonic suffixes when duplicates
/// occur (`section`, `section-2`, `section-3`). Headings that cannot produce a
/// slug share the `section` base.
#[derive(Default, Debug)]
pub struct AnchorSlugger {
    occurrences: HashMap<String, usize>,
}

impl AnchorSlugger {
    pub fn new() -> Self {
        Self {
            occurrences: HashMap::new(),
        }
    }

    pub fn anchor_for(&mut self, heading: &str) -> String {
        let base = derive_slug(heading).unwrap_or_else(|_| FALLBACK_ANCHOR.to_string());
        let count = self.occurrences.entry(base.clone()).or_insert(0);
        *count += 1;

        if *count == 1 {
            base
        } else {
            format!("{base}-{}", *count)
        }
    }
}

fn transliterate_to_ascii(input: &str) -> String {
    let mut output = String::with_capacity(input.len());

    for ch in input.chars() {
        if ch.is_ascii() {
            output.push(ch);
            continue;
        }

        match ch.to_pinyin() {
            Some(py) => append_pinyin(&mut output, py),
            None if ch.is_whitespace() => output.push(' '),
            // Left for slugify to filter.
            None => output.push(ch),
        }
    }

    output
}

fn append_pinyin(buffer: &mut String, pinyin: Pinyin) {
    if !buffer.is_empty() && !buffer.ends_with(' ') {
        buffer.push(' ');
    }
    buffer.push_str(pinyin.plain());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_slug_transliterates_chinese() {
        let slug = derive_slug("Rust 基础教程").expect("slug");
        assert_eq!(slug, "rust-ji-chu-jiao-cheng");
    }

    #[test]
    fn derive_slug_rejects_blank_input() {
        assert_eq!(derive_slug("   "), Err(SlugError::EmptyInput));
    }

    #[test]
    fn anchor_slugger_produces_unique_slugs() {
        let mut slugger = AnchorSlugger::new();

        assert_eq!(slugger.anchor_for("Overview"), "overview");
        assert_eq!(slugger.anchor_for("Overview"), "overview-2");
        assert_eq!(slugger.anchor_for("深入理解"), "shen-ru-li-jie");
    }

    #[test]
    fn anchor_slugger_falls_back_for_symbol_headings() {
        let mut slugger = AnchorSlugger::new();

        assert_eq!(slugger.anchor_for("!!!"), "section");
        assert_eq!(slugger.anchor_for("???"), "section-2");
    }
}
