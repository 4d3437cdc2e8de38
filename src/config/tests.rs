use super::*;

fn cli(args: &[&str]) -> CliArgs {
    CliArgs::parse_from(args)
}

#[test]
fn defaults_match_documented_values() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.render.max_size.get(), DEFAULT_MAX_SIZE_BYTES);
    assert_eq!(settings.render.max_image_bytes.get(), DEFAULT_MAX_SIZE_BYTES);
    assert!(!settings.render.enable_unsafe_extensions);
    assert!(settings.render.extensions.is_none());
    assert_eq!(settings.render.image_policy, ImagePolicy::Embed);
    assert_eq!(settings.validation.media_root, PathBuf::from("media"));
    assert!(!settings.validation.trust_parent_dir);
    assert!(
        settings
            .validation
            .allowed_extensions
            .iter()
            .any(|ext| ext == "md")
    );
    assert_eq!(settings.logging.level, LevelFilter::INFO);
}

#[test]
fn max_size_accepts_human_readable_strings() {
    let mut raw = RawSettings::default();
    raw.render.max_size = Some(RawByteSize::Text("5 MiB".to_string()));

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.render.max_size.get(), 5 * 1024 * 1024);
    assert_eq!(settings.render.max_image_bytes.get(), 5 * 1024 * 1024);
}

#[test]
fn zero_max_size_is_rejected() {
    let mut raw = RawSettings::default();
    raw.render.max_size = Some(RawByteSize::Bytes(0));

    let err = Settings::from_raw(raw).expect_err("zero size rejected");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "render.max_size",
            ..
        }
    ));
}

#[test]
fn external_dirs_accept_single_path_and_seed_image_root() {
    let mut raw = RawSettings::default();
    raw.render.external_dirs = Some(OneOrMany::One(PathBuf::from("/srv/shared")));

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(
        settings.render.external_dirs,
        vec![PathBuf::from("/srv/shared")]
    );
    assert_eq!(
        settings.render.image_root.as_deref(),
        Some(Path::new("/srv/shared"))
    );
}

#[test]
fn allowed_extensions_are_normalised() {
    let mut raw = RawSettings::default();
    raw.validation.allowed_extensions =
        Some(vec![".MD".to_string(), "txt".to_string(), "md".to_string()]);

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.validation.allowed_extensions, vec!["md", "txt"]);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.render.enable_unsafe_extensions = Some(false);
    raw.logging.level = Some("info".to_string());

    let args = cli(&[
        "docmgr",
        "--log-level",
        "debug",
        "render",
        "--render-enable-unsafe-extensions",
        "true",
        "--render-max-size",
        "2MiB",
        "--render-external-dir",
        "/srv/a",
        "--render-external-dir",
        "/srv/b",
        "notes.md",
    ]);
    raw.apply_cli(&args);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(settings.render.enable_unsafe_extensions);
    assert_eq!(settings.render.max_size.get(), 2 * 1024 * 1024);
    assert_eq!(
        settings.render.external_dirs,
        vec![PathBuf::from("/srv/a"), PathBuf::from("/srv/b")]
    );
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    raw.apply_cli(&cli(&["docmgr", "--log-json", "true", "show-config"]));
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn parse_render_text_arguments() {
    let args = cli(&[
        "docmgr",
        "render-text",
        "--origin",
        "/docs/guide.md",
        "--render-image-policy",
        "link",
        "-",
    ]);

    match args.command {
        Command::RenderText(render) => {
            assert_eq!(render.origin.as_deref(), Some(Path::new("/docs/guide.md")));
            assert_eq!(render.input.as_deref(), Some(Path::new("-")));
            assert_eq!(render.overrides.image_policy, Some(ImagePolicy::Link));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_validate_arguments() {
    let args = cli(&[
        "docmgr",
        "validate",
        "--validation-base-dir",
        "/srv/app",
        "/srv/app/media/a.md",
    ]);

    match args.command {
        Command::Validate(validate) => {
            assert_eq!(validate.file, Path::new("/srv/app/media/a.md"));
            assert_eq!(
                validate.overrides.base_dir.as_deref(),
                Some(Path::new("/srv/app"))
            );
        }
        _ => panic!("wrong command parsed"),
    }
}
