//! Render configuration: the active extension list and its resolved options.

use std::{collections::BTreeMap, fmt, path::PathBuf};

use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::debug;

use crate::config::{ExtensionOptions, ImagePolicy, RenderSettings};

/// Extensions enabled when the configuration does not name any.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "tables",
    "fenced_code",
    "codehilite",
    "toc",
    "nl2br",
    "sane_lists",
    "smarty",
    "meta",
    "mdx_math",
];

/// Extensions appended only when unsafe extensions are enabled.
pub const UNSAFE_EXTENSIONS: &[&str] = &["raw_html"];

const DEFAULT_TOC_TITLE: &str = "目录";
const DEFAULT_TOC_MARKER: &str = "[TOC]";
const DEFAULT_PERMALINK_SYMBOL: &str = "¶";

/// A Markdown syntax extension known to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extension {
    Tables,
    FencedCode,
    Codehilite,
    Toc,
    Nl2br,
    SaneLists,
    Smarty,
    Meta,
    MdxMath,
    RawHtml,
    /// Accepted for compatibility but not interpreted by the engine.
    Other(String),
}

impl Extension {
    /// Parse an extension name. Dotted module paths such as
    /// `markdown.extensions.toc` resolve to their last segment.
    pub fn parse(name: &str) -> Self {
        let trimmed = name.trim();
        let short = trimmed.rsplit('.').next().unwrap_or(trimmed);
        match short.to_ascii_lowercase().as_str() {
            "tables" => Self::Tables,
            "fenced_code" => Self::FencedCode,
            "codehilite" => Self::Codehilite,
            "toc" => Self::Toc,
            "nl2br" => Self::Nl2br,
            "sane_lists" => Self::SaneLists,
            "smarty" => Self::Smarty,
            "meta" => Self::Meta,
            "mdx_math" | "math" => Self::MdxMath,
            "raw_html" => Self::RawHtml,
            _ => Self::Other(trimmed.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Tables => "tables",
            Self::FencedCode => "fenced_code",
            Self::Codehilite => "codehilite",
            Self::Toc => "toc",
            Self::Nl2br => "nl2br",
            Self::SaneLists => "sane_lists",
            Self::Smarty => "smarty",
            Self::Meta => "meta",
            Self::MdxMath => "mdx_math",
            Self::RawHtml => "raw_html",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Extension {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Immutable configuration for one renderer instance.
#[derive(Debug, Clone, Serialize)]
pub struct RenderConfig {
    extensions: Vec<Extension>,
    extension_configs: BTreeMap<String, ExtensionOptions>,
    enable_unsafe_extensions: bool,
    max_size: u64,
    image_policy: ImagePolicy,
    image_root: Option<PathBuf>,
    max_image_bytes: u64,
    #[serde(skip)]
    features: Features,
}

impl RenderConfig {
    pub fn from_settings(settings: &RenderSettings) -> Self {
        let names: Vec<String> = match settings.extensions.as_ref() {
            Some(names) => names.clone(),
            None => DEFAULT_EXTENSIONS.iter().map(|name| name.to_string()).collect(),
        };

        let mut extensions: Vec<Extension> = Vec::with_capacity(names.len() + 1);
        for name in names.iter().filter(|name| !name.trim().is_empty()) {
            let extension = Extension::parse(name);
            if extension == Extension::RawHtml && !settings.enable_unsafe_extensions {
                debug!(
                    target = "application::render::config",
                    "Ignoring raw_html because unsafe extensions are disabled"
                );
                continue;
            }
            if let Extension::Other(name) = &extension {
                debug!(
                    target = "application::render::config",
                    extension = %name,
                    "Unknown Markdown extension ignored by the engine"
                );
            }
            if !extensions.contains(&extension) {
                extensions.push(extension);
            }
        }
        if settings.enable_unsafe_extensions {
            for name in UNSAFE_EXTENSIONS {
                let extension = Extension::parse(name);
                if !extensions.contains(&extension) {
                    extensions.push(extension);
                }
            }
        }

        let extension_configs = merge_extension_configs(&settings.extension_configs);
        let features = Features::resolve(&extensions, &extension_configs);

        Self {
            extensions,
            extension_configs,
            enable_unsafe_extensions: settings.enable_unsafe_extensions,
            max_size: settings.max_size.get(),
            image_policy: settings.image_policy,
            image_root: settings.image_root.clone(),
            max_image_bytes: settings.max_image_bytes.get(),
            features,
        }
    }

    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }

    pub fn extension_configs(&self) -> &BTreeMap<String, ExtensionOptions> {
        &self.extension_configs
    }

    pub fn enable_unsafe_extensions(&self) -> bool {
        self.enable_unsafe_extensions
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn image_policy(&self) -> ImagePolicy {
        self.image_policy
    }

    pub fn image_root(&self) -> Option<&std::path::Path> {
        self.image_root.as_deref()
    }

    pub fn max_image_bytes(&self) -> u64 {
        self.max_image_bytes
    }

    pub(crate) fn features(&self) -> &Features {
        &self.features
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self::from_settings(&RenderSettings::default())
    }
}

/// Built-in option maps for the extensions that take options.
pub fn default_extension_configs() -> BTreeMap<String, ExtensionOptions> {
    let mut defaults = BTreeMap::new();

    let mut codehilite = ExtensionOptions::new();
    codehilite.insert("css_class".into(), Value::from("highlight"));
    codehilite.insert("linenums".into(), Value::from(false));
    codehilite.insert("guess_lang".into(), Value::from(true));
    defaults.insert("codehilite".to_string(), codehilite);

    let mut toc = ExtensionOptions::new();
    toc.insert("title".into(), Value::from(DEFAULT_TOC_TITLE));
    toc.insert("permalink".into(), Value::from(false));
    defaults.insert("toc".to_string(), toc);

    let mut math = ExtensionOptions::new();
    math.insert("enable_dollar_delimiter".into(), Value::from(true));
    math.insert("add_preview".into(), Value::from(true));
    defaults.insert("mdx_math".to_string(), math);

    defaults
}

/// Shallow-merge user option maps over the defaults. Known extensions merge
/// key by key; anything else is carried over verbatim.
fn merge_extension_configs(
    user: &BTreeMap<String, ExtensionOptions>,
) -> BTreeMap<String, ExtensionOptions> {
    let mut merged = default_extension_configs();
    for (name, options) in user {
        match merged.get_mut(name) {
            Some(existing) => {
                for (key, value) in options {
                    existing.insert(key.clone(), value.clone());
                }
            }
            None => {
                merged.insert(name.clone(), options.clone());
            }
        }
    }
    merged
}

/// Typed view of the enabled extensions, derived once per configuration.
#[derive(Debug, Clone, Default)]
pub(crate) struct Features {
    pub(crate) tables: bool,
    pub(crate) codehilite: Option<CodehiliteOptions>,
    pub(crate) toc: Option<TocOptions>,
    pub(crate) nl2br: bool,
    pub(crate) smarty: bool,
    pub(crate) meta: bool,
    pub(crate) math: Option<MathOptions>,
    pub(crate) raw_html: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct CodehiliteOptions {
    pub(crate) css_class: String,
    pub(crate) linenums: bool,
    pub(crate) guess_lang: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct TocOptions {
    pub(crate) title: String,
    /// Paragraph text replaced by the table of contents; empty disables it.
    pub(crate) marker: String,
    /// Symbol of the link appended to each heading, if any.
    pub(crate) permalink: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct MathOptions {
    pub(crate) dollar_delimiter: bool,
    pub(crate) add_preview: bool,
}

impl Features {
    fn resolve(extensions: &[Extension], configs: &BTreeMap<String, ExtensionOptions>) -> Self {
        let empty = ExtensionOptions::new();
        let options_for = |name: &str| configs.get(name).unwrap_or(&empty);
        let mut features = Features::default();

        for extension in extensions {
            match extension {
                Extension::Tables => features.tables = true,
                Extension::Codehilite => {
                    let options = options_for("codehilite");
                    features.codehilite = Some(CodehiliteOptions {
                        css_class: string_option(options, "css_class")
                            .unwrap_or_else(|| "highlight".to_string()),
                        linenums: bool_option(options, "linenums").unwrap_or(false),
                        guess_lang: bool_option(options, "guess_lang").unwrap_or(true),
                    });
                }
                Extension::Toc => {
                    let options = options_for("toc");
                    features.toc = Some(TocOptions {
                        title: string_option(options, "title")
                            .unwrap_or_else(|| DEFAULT_TOC_TITLE.to_string()),
                        marker: string_option(options, "marker")
                            .unwrap_or_else(|| DEFAULT_TOC_MARKER.to_string()),
                        permalink: permalink_option(options.get("permalink")),
                    });
                }
                Extension::Nl2br => features.nl2br = true,
                Extension::Smarty => features.smarty = true,
                Extension::Meta => features.meta = true,
                Extension::MdxMath => {
                    let options = options_for("mdx_math");
                    features.math = Some(MathOptions {
                        dollar_delimiter: bool_option(options, "enable_dollar_delimiter")
                            .unwrap_or(true),
                        add_preview: bool_option(options, "add_preview").unwrap_or(true),
                    });
                }
                Extension::RawHtml => features.raw_html = true,
                Extension::FencedCode | Extension::SaneLists | Extension::Other(_) => {}
            }
        }

        features
    }
}

fn string_option(options: &ExtensionOptions, key: &str) -> Option<String> {
    match options.get(key)? {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

/// Booleans may arrive as JSON booleans, numbers or strings from env overrides.
fn bool_option(options: &ExtensionOptions, key: &str) -> Option<bool> {
    match options.get(key)? {
        Value::Bool(value) => Some(*value),
        Value::Number(value) => value.as_i64().map(|n| n != 0),
        Value::String(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn permalink_option(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Bool(true) => Some(DEFAULT_PERMALINK_SYMBOL.to_string()),
        Value::String(symbol) => match symbol.trim().to_ascii_lowercase().as_str() {
            "" | "false" | "no" | "off" | "0" => None,
            "true" | "yes" | "on" | "1" => Some(DEFAULT_PERMALINK_SYMBOL.to_string()),
            _ => Some(symbol.clone()),
        },
        _ => None,
    }
}
