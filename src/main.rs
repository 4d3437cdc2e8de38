use std::{
    fs,
    io::{self, Read, Write},
    path::Path,
    process,
};

use docmgr_render::{
    application::{
        error::{AppError, error_chain},
        render::{MarkdownRenderer, RenderConfig, decode_document, error_panel},
        validation::{FileValidator, ValidationPolicy},
    },
    config::{self, Command, RenderArgs, RenderTextArgs, Settings, ValidateArgs},
    infra::telemetry,
};
use serde::Serialize;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

fn main() {
    if let Err(error) = run() {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let causes = error_chain(error);
    if dispatcher::has_been_set() {
        error!(error = %error, causes = ?causes, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, causes = ?causes, "application error");
    });
}

fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        Command::Render(args) => run_render(&settings, args),
        Command::RenderText(args) => run_render_text(&settings, args),
        Command::Validate(args) => run_validate(&settings, args),
        Command::ShowConfig(_) => run_show_config(&settings),
    }
}

fn run_render(settings: &Settings, args: RenderArgs) -> Result<(), AppError> {
    let renderer = MarkdownRenderer::from_settings(settings);
    let (html, failure) = match renderer.try_render_file(&args.file) {
        Ok(document) => (document.html, None),
        Err(err) => (error_panel(&err, Some(&args.file)), Some(err)),
    };

    write_stdout(html.as_str())?;

    match failure {
        Some(err) if args.strict => Err(AppError::rejected(format!(
            "failed to render {}: {err}",
            args.file.display()
        ))),
        _ => Ok(()),
    }
}

fn run_render_text(settings: &Settings, args: RenderTextArgs) -> Result<(), AppError> {
    let input = args.input.filter(|path| path.as_os_str() != "-");
    let bytes = read_input(input.as_deref())?;
    let decoded = decode_document(&bytes).map_err(|err| AppError::rejected(err.to_string()))?;
    let origin = args.origin.or(input);

    let renderer = MarkdownRenderer::from_settings(settings);
    let html = renderer.render_content(&decoded.text, origin.as_deref());

    write_stdout(html.as_str())
}

fn run_validate(settings: &Settings, args: ValidateArgs) -> Result<(), AppError> {
    let validator = FileValidator::new(ValidationPolicy::from_settings(settings));
    let validated = validator
        .validate(&args.file)
        .map_err(|err| AppError::rejected(err.to_string()))?;

    info!(
        path = %validated.as_path().display(),
        mime = validated.mime_type(),
        "Document accepted"
    );
    write_stdout(&format!(
        "path: {}\nmime: {}\nsize: {}\n",
        validated.as_path().display(),
        validated.mime_type(),
        validated.size()
    ))
}

/// Effective configuration as printed by `show-config`.
#[derive(Serialize)]
struct EffectiveConfig<'a> {
    render: &'a RenderConfig,
    validation: &'a ValidationPolicy,
}

fn run_show_config(settings: &Settings) -> Result<(), AppError> {
    let render = RenderConfig::from_settings(&settings.render);
    let validation = ValidationPolicy::from_settings(settings);
    let effective = EffectiveConfig {
        render: &render,
        validation: &validation,
    };

    let rendered = toml::to_string(&effective)
        .map_err(|err| AppError::unexpected(format!("failed to serialize configuration: {err}")))?;
    write_stdout(&rendered)
}

fn read_input(path: Option<&Path>) -> Result<Vec<u8>, AppError> {
    match path {
        Some(path) => fs::read(path)
            .map_err(|err| AppError::rejected(format!("failed to read {}: {err}", path.display()))),
        None => {
            let mut buffer = Vec::new();
            io::stdin()
                .read_to_end(&mut buffer)
                .map_err(|err| AppError::unexpected(format!("failed to read stdin: {err}")))?;
            Ok(buffer)
        }
    }
}

fn write_stdout(text: &str) -> Result<(), AppError> {
    let write = || -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(text.as_bytes())?;
        if !text.ends_with('\n') {
            stdout.write_all(b"\n")?;
        }
        stdout.flush()
    };
    write().map_err(|err| AppError::unexpected(format!("failed to write output: {err}")))
}
