use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, builder::BoolishValueParser};
use serde::{Deserialize, Serialize};

/// Command-line arguments for the docmgr binary.
#[derive(Debug, Parser)]
#[command(
    name = "docmgr",
    version,
    about = "Validate and render documents to preview HTML"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "DOCMGR_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Validate a document and render it to HTML on stdout.
    Render(RenderArgs),
    /// Render Markdown text from a file or stdin without file validation.
    #[command(name = "render-text")]
    RenderText(RenderTextArgs),
    /// Run the admission checks for a document and report the outcome.
    Validate(ValidateArgs),
    /// Print the effective render and validation configuration as TOML.
    #[command(name = "show-config")]
    ShowConfig(ShowConfigArgs),
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub overrides: RenderOverrides,

    /// Document to render.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Exit with a failure status when the output is an error panel.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub strict: bool,
}

#[derive(Debug, Args, Clone)]
pub struct RenderTextArgs {
    #[command(flatten)]
    pub overrides: RenderOverrides,

    /// Path used to resolve relative image references.
    #[arg(long = "origin", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub origin: Option<PathBuf>,

    /// Markdown source; `-` or omitted reads stdin.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub input: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub overrides: RenderOverrides,

    /// Document to check.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ShowConfigArgs {
    #[command(flatten)]
    pub overrides: RenderOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Append the raw HTML passthrough extension.
    #[arg(
        long = "render-enable-unsafe-extensions",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub enable_unsafe_extensions: Option<bool>,

    /// Override the maximum document size (bytes, or a value like `5MiB`).
    #[arg(long = "render-max-size", value_name = "SIZE")]
    pub max_size: Option<String>,

    /// Additional trusted root directory; may be repeated.
    #[arg(long = "render-external-dir", value_name = "PATH")]
    pub external_dirs: Vec<PathBuf>,

    /// How relative images are emitted.
    #[arg(long = "render-image-policy", value_name = "POLICY")]
    pub image_policy: Option<ImagePolicy>,

    /// Override the media root used as a trusted directory.
    #[arg(long = "validation-media-root", value_name = "PATH")]
    pub media_root: Option<PathBuf>,

    /// Override the project base directory used as a trusted directory.
    #[arg(long = "validation-base-dir", value_name = "PATH")]
    pub base_dir: Option<PathBuf>,
}

/// Policy for relative image references found in Markdown documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ImagePolicy {
    /// Inline the image bytes as a `data:` URI.
    #[default]
    Embed,
    /// Keep the original reference untouched.
    Link,
}
