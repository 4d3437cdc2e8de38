//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    collections::BTreeMap,
    num::NonZeroU64,
    path::{Path, PathBuf},
    str::FromStr,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::documents::{default_allowed_extensions, default_allowed_mime_types};
use crate::util::bytes::parse_bytes;

pub use cli::{
    CliArgs, Command, ImagePolicy, RenderArgs, RenderOverrides, RenderTextArgs, ShowConfigArgs,
    ValidateArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "docmgr";
const DEFAULT_MEDIA_ROOT: &str = "media";
pub(crate) const DEFAULT_MAX_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Option map for a single Markdown extension.
pub type ExtensionOptions = serde_json::Map<String, serde_json::Value>;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub render: RenderSettings,
    pub validation: ValidationSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

/// The `[render]` section: the knobs the host application exposes for the
/// Markdown pipeline.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Ordered extension names; `None` selects the built-in default set.
    pub extensions: Option<Vec<String>>,
    pub enable_unsafe_extensions: bool,
    /// User option maps, merged over the built-in defaults at render time.
    pub extension_configs: BTreeMap<String, ExtensionOptions>,
    pub max_size: NonZeroU64,
    pub external_dirs: Vec<PathBuf>,
    pub image_policy: ImagePolicy,
    /// Fallback root for `images/...` references missing next to the document.
    pub image_root: Option<PathBuf>,
    pub max_image_bytes: NonZeroU64,
}

/// The `[validation]` section: admission policy beyond the render knobs.
#[derive(Debug, Clone)]
pub struct ValidationSettings {
    pub media_root: PathBuf,
    pub base_dir: Option<PathBuf>,
    pub trust_parent_dir: bool,
    pub allowed_extensions: Vec<String>,
    pub allowed_mime_types: Vec<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("DOCMGR")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("render.extensions")
            .with_list_parse_key("validation.allowed_extensions")
            .with_list_parse_key("validation.allowed_mime_types")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_cli(cli);

    Settings::from_raw(raw)
}

/// Resolve configuration from the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

impl Command {
    fn render_overrides(&self) -> &RenderOverrides {
        match self {
            Command::Render(args) => &args.overrides,
            Command::RenderText(args) => &args.overrides,
            Command::Validate(args) => &args.overrides,
            Command::ShowConfig(args) => &args.overrides,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    render: RawRenderSettings,
    validation: RawValidationSettings,
}

impl RawSettings {
    fn apply_cli(&mut self, cli: &CliArgs) {
        if let Some(level) = cli.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = cli.log_json {
            self.logging.json = Some(json);
        }
        self.apply_render_overrides(cli.command.render_overrides());
    }

    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        if let Some(enabled) = overrides.enable_unsafe_extensions {
            self.render.enable_unsafe_extensions = Some(enabled);
        }
        if let Some(size) = overrides.max_size.as_ref() {
            self.render.max_size = Some(RawByteSize::Text(size.clone()));
        }
        if !overrides.external_dirs.is_empty() {
            let mut dirs = self
                .render
                .external_dirs
                .take()
                .map(OneOrMany::into_vec)
                .unwrap_or_default();
            dirs.extend(overrides.external_dirs.iter().cloned());
            self.render.external_dirs = Some(OneOrMany::Many(dirs));
        }
        if let Some(policy) = overrides.image_policy {
            self.render.image_policy = Some(policy);
        }
        if let Some(root) = overrides.media_root.as_ref() {
            self.validation.media_root = Some(root.clone());
        }
        if let Some(dir) = overrides.base_dir.as_ref() {
            self.validation.base_dir = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            render,
            validation,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let render = build_render_settings(render)?;
        let validation = build_validation_settings(validation)?;

        Ok(Self {
            logging,
            render,
            validation,
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: LoggingSettings {
                level: LevelFilter::INFO,
                format: LogFormat::Compact,
            },
            render: RenderSettings::default(),
            validation: ValidationSettings::default(),
        }
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        let max_size = NonZeroU64::new(DEFAULT_MAX_SIZE_BYTES).unwrap_or(NonZeroU64::MIN);
        Self {
            extensions: None,
            enable_unsafe_extensions: false,
            extension_configs: BTreeMap::new(),
            max_size,
            external_dirs: Vec::new(),
            image_policy: ImagePolicy::default(),
            image_root: None,
            max_image_bytes: max_size,
        }
    }
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from(DEFAULT_MEDIA_ROOT),
            base_dir: None,
            trust_parent_dir: false,
            allowed_extensions: default_allowed_extensions(),
            allowed_mime_types: default_allowed_mime_types(),
        }
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let extensions = match render.extensions {
        Some(names) => {
            let cleaned: Vec<String> = names
                .into_iter()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect();
            Some(cleaned)
        }
        None => None,
    };

    let max_size_value = match render.max_size {
        Some(raw) => raw.resolve("render.max_size")?,
        None => DEFAULT_MAX_SIZE_BYTES,
    };
    let max_size = NonZeroU64::new(max_size_value)
        .ok_or_else(|| LoadError::invalid("render.max_size", "must be greater than zero"))?;

    let max_image_bytes = match render.max_image_bytes {
        Some(raw) => NonZeroU64::new(raw.resolve("render.max_image_bytes")?).ok_or_else(|| {
            LoadError::invalid("render.max_image_bytes", "must be greater than zero")
        })?,
        None => max_size,
    };

    let external_dirs = render
        .external_dirs
        .map(OneOrMany::into_vec)
        .unwrap_or_default();
    if external_dirs.iter().any(|dir| is_blank(dir)) {
        return Err(LoadError::invalid(
            "render.external_dirs",
            "paths must not be empty",
        ));
    }

    let image_root = match render.image_root {
        Some(root) if is_blank(&root) => {
            return Err(LoadError::invalid(
                "render.image_root",
                "path must not be empty",
            ));
        }
        Some(root) => Some(root),
        None => external_dirs.first().cloned(),
    };

    Ok(RenderSettings {
        extensions,
        enable_unsafe_extensions: render.enable_unsafe_extensions.unwrap_or(false),
        extension_configs: render.extension_configs.unwrap_or_default(),
        max_size,
        external_dirs,
        image_policy: render.image_policy.unwrap_or_default(),
        image_root,
        max_image_bytes,
    })
}

fn build_validation_settings(
    validation: RawValidationSettings,
) -> Result<ValidationSettings, LoadError> {
    let media_root = validation
        .media_root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MEDIA_ROOT));
    if is_blank(&media_root) {
        return Err(LoadError::invalid(
            "validation.media_root",
            "path must not be empty",
        ));
    }

    let allowed_extensions = match validation.allowed_extensions {
        Some(list) => normalize_list(list, |value| {
            value.trim().trim_start_matches('.').to_ascii_lowercase()
        }),
        None => default_allowed_extensions(),
    };
    if allowed_extensions.is_empty() {
        return Err(LoadError::invalid(
            "validation.allowed_extensions",
            "at least one extension must be allowed",
        ));
    }

    let allowed_mime_types = match validation.allowed_mime_types {
        Some(list) => normalize_list(list, |value| value.trim().to_ascii_lowercase()),
        None => default_allowed_mime_types(),
    };
    if allowed_mime_types.is_empty() {
        return Err(LoadError::invalid(
            "validation.allowed_mime_types",
            "at least one MIME type must be allowed",
        ));
    }

    Ok(ValidationSettings {
        media_root,
        base_dir: validation.base_dir.filter(|dir| !is_blank(dir)),
        trust_parent_dir: validation.trust_parent_dir.unwrap_or(false),
        allowed_extensions,
        allowed_mime_types,
    })
}

fn normalize_list(values: Vec<String>, normalize: impl Fn(&str) -> String) -> Vec<String> {
    let mut out: Vec<String> = values
        .iter()
        .map(|value| normalize(value))
        .filter(|value| !value.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn is_blank(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    extensions: Option<Vec<String>>,
    enable_unsafe_extensions: Option<bool>,
    extension_configs: Option<BTreeMap<String, ExtensionOptions>>,
    max_size: Option<RawByteSize>,
    external_dirs: Option<OneOrMany>,
    image_policy: Option<ImagePolicy>,
    image_root: Option<PathBuf>,
    max_image_bytes: Option<RawByteSize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawValidationSettings {
    media_root: Option<PathBuf>,
    base_dir: Option<PathBuf>,
    trust_parent_dir: Option<bool>,
    allowed_extensions: Option<Vec<String>>,
    allowed_mime_types: Option<Vec<String>>,
}

/// Sizes may be written as integers or as strings such as `"5 MiB"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawByteSize {
    Bytes(u64),
    Text(String),
}

impl RawByteSize {
    fn resolve(self, key: &'static str) -> Result<u64, LoadError> {
        match self {
            RawByteSize::Bytes(value) => Ok(value),
            RawByteSize::Text(text) => parse_bytes(&text)
                .ok_or_else(|| LoadError::invalid(key, format!("`{text}` is not a byte size"))),
        }
    }
}

/// A single path or a list of paths.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<PathBuf> {
        match self {
            OneOrMany::One(path) => vec![path],
            OneOrMany::Many(paths) => paths,
        }
    }
}

#[cfg(test)]
mod tests;
