use std::fs;

use docmgr_render::{FileValidator, ValidationError, ValidationPolicy, config::Settings};
use tempfile::TempDir;

#[cfg(unix)]
#[test]
fn symlinks_leaving_the_root_are_refused() {
    let root = TempDir::new().expect("root");
    let outside = TempDir::new().expect("outside");
    let target = outside.path().join("secret.md");
    fs::write(&target, "# secret").expect("write target");
    let link = root.path().join("link.md");
    std::os::unix::fs::symlink(&target, &link).expect("symlink");

    let policy = ValidationPolicy::new(vec![root.path().to_path_buf()], 1024);
    let validator = FileValidator::new(policy);
    let err = validator.validate(&link).expect_err("escape");

    assert!(matches!(err, ValidationError::PathNotAllowed { .. }));
}

#[test]
fn custom_whitelists_replace_the_defaults() {
    let root = TempDir::new().expect("root");
    let markdown = root.path().join("guide.md");
    let text = root.path().join("notes.txt");
    fs::write(&markdown, "# Guide").expect("write md");
    fs::write(&text, "notes").expect("write txt");

    let policy = ValidationPolicy::new(vec![root.path().to_path_buf()], 1024)
        .with_allowed_extensions(vec![".MD".to_string()])
        .with_allowed_mime_types(vec!["text/markdown".to_string()]);
    let validator = FileValidator::new(policy);

    let admitted = validator.validate(&markdown).expect("markdown admitted");
    assert_eq!(admitted.extension(), "md");
    assert_eq!(admitted.mime_type(), "text/markdown");
    assert_eq!(admitted.size(), 7);

    let err = validator.validate(&text).expect_err("txt refused");
    assert!(matches!(err, ValidationError::UnsupportedExtension { .. }));
}

#[test]
fn settings_roots_include_media_base_and_external_dirs() {
    let media = TempDir::new().expect("media");
    let base = TempDir::new().expect("base");
    let external = TempDir::new().expect("external");

    let mut settings = Settings::default();
    settings.validation.media_root = media.path().to_path_buf();
    settings.validation.base_dir = Some(base.path().to_path_buf());
    settings.render.external_dirs = vec![external.path().to_path_buf()];

    let policy = ValidationPolicy::from_settings(&settings);
    let roots = policy.roots();

    assert_eq!(roots.len(), 3);
    for dir in [&media, &base, &external] {
        let canonical = dir.path().canonicalize().expect("canonical");
        assert!(roots.contains(&canonical));
    }

    let doc = external.path().join("readme.md");
    fs::write(&doc, "hello").expect("write doc");
    assert!(FileValidator::new(policy).validate(&doc).is_ok());
}
