//! Sandboxed template file loading.
//!
//! # Invariants
//! - Content is only ever read from a strict descendant of the extension's
//!   canonical root. The check compares canonical path strings with a
//!   trailing separator so `foo-evil/` never matches root `foo`.
//! - A path that escapes the root is never answered from the fallback set.

use crate::template::TemplateError;
use log::warn;
use std::path::{Component, Path, MAIN_SEPARATOR};

const FALLBACK_TEMPLATES: &[(&str, &str)] = &[
    (
        "templates/prescription.html",
        include_str!("fallback/prescription.html"),
    ),
    (
        "templates/visit-summary.html",
        include_str!("fallback/visit-summary.html"),
    ),
    ("templates/receipt.html", include_str!("fallback/receipt.html")),
];

/// Built-in development template for a known file key.
pub fn fallback_template(file: &str) -> Option<&'static str> {
    let key = file.replace('\\', "/");
    let key = key.trim_start_matches("./");
    FALLBACK_TEMPLATES
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, source)| *source)
}

/// Reads `file` relative to `root`.
///
/// When `fallbacks` is set, a disk failure for a known key is answered with
/// the built-in template instead.
pub fn load_template_source(
    root: &Path,
    file: &str,
    fallbacks: bool,
) -> Result<String, TemplateError> {
    let relative = Path::new(file);
    let escapes = relative.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || file.trim().is_empty() {
        return Err(outside_root(file));
    }

    match read_within(root, file) {
        Ok(source) => Ok(source),
        Err(TemplateError::NotFound { file: name, message }) => {
            if fallbacks {
                if let Some(source) = fallback_template(file) {
                    warn!(
                        "event=template_load module=template status=warn reason=fallback file={}",
                        file
                    );
                    return Ok(source.to_string());
                }
            }
            warn!(
                "event=template_load module=template status=error reason=not_found file={}",
                file
            );
            Err(TemplateError::NotFound { file: name, message })
        }
        Err(err) => Err(err),
    }
}

fn read_within(root: &Path, file: &str) -> Result<String, TemplateError> {
    let not_found = |err: std::io::Error| TemplateError::NotFound {
        file: file.to_string(),
        message: err.to_string(),
    };

    let canonical_root = std::fs::canonicalize(root).map_err(not_found)?;
    let canonical_file = std::fs::canonicalize(canonical_root.join(file)).map_err(not_found)?;

    let mut root_prefix = canonical_root.to_string_lossy().into_owned();
    if !root_prefix.ends_with(MAIN_SEPARATOR) {
        root_prefix.push(MAIN_SEPARATOR);
    }
    if !canonical_file.to_string_lossy().starts_with(&root_prefix) {
        return Err(outside_root(file));
    }

    std::fs::read_to_string(&canonical_file).map_err(not_found)
}

fn outside_root(file: &str) -> TemplateError {
    warn!(
        "event=template_load module=template status=denied reason=outside_root file={}",
        file
    );
    TemplateError::OutsideRoot {
        file: file.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{fallback_template, load_template_source};
    use crate::template::TemplateError;
    use std::fs;

    #[test]
    fn reads_file_inside_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("templates")).expect("mkdir");
        fs::write(dir.path().join("templates/a.html"), "<p>{{x}}</p>").expect("write");

        let source = load_template_source(dir.path(), "templates/a.html", false).expect("load");
        assert_eq!(source, "<p>{{x}}</p>");
    }

    #[test]
    fn parent_traversal_is_rejected_even_with_fallbacks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_template_source(dir.path(), "../templates/receipt.html", true)
            .expect_err("traversal");
        assert!(matches!(err, TemplateError::OutsideRoot { .. }));
    }

    #[test]
    fn sibling_with_shared_prefix_is_rejected() {
        let base = tempfile::tempdir().expect("tempdir");
        let root = base.path().join("foo");
        let evil = base.path().join("foo-evil");
        fs::create_dir_all(&root).expect("mkdir root");
        fs::create_dir_all(&evil).expect("mkdir evil");
        fs::write(evil.join("x.html"), "secret").expect("write");

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(evil.join("x.html"), root.join("link.html"))
                .expect("symlink");
            let err = load_template_source(&root, "link.html", false).expect_err("escape");
            assert!(matches!(err, TemplateError::OutsideRoot { .. }));
        }
    }

    #[test]
    fn missing_file_uses_fallback_only_when_enabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_template_source(dir.path(), "templates/receipt.html", false)
            .expect_err("missing");
        assert!(matches!(err, TemplateError::NotFound { .. }));

        let source =
            load_template_source(dir.path(), "templates/receipt.html", true).expect("fallback");
        assert_eq!(Some(source.as_str()), fallback_template("templates/receipt.html"));

        let err = load_template_source(dir.path(), "templates/unknown.html", true)
            .expect_err("no fallback");
        assert!(matches!(err, TemplateError::NotFound { .. }));
    }
}
