//! Template engine: loading, compilation, caching and gated rendering.
//!
//! # Responsibility
//! - Load template files from an extension's own directory only.
//! - Compile each `(extension, template, version)` once and reuse it.
//!
//! # Invariants
//! - Compiled templates never read from disk or the registry while rendering.
//! - Render failures surface as `RenderResult`, never as panics.

pub mod cache;
pub mod compiler;
pub mod helpers;
pub mod loader;
pub mod render;

use crate::extension::manifest::TemplateContribution;
use crate::extension::registry::InstalledExtension;
use cache::{TemplateCache, TemplateCacheKey};
use compiler::{compile_template, CompiledTemplate};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Loader + compiled-template cache owned by the host.
#[derive(Debug, Default)]
pub struct TemplateEngine {
    cache: TemplateCache,
    fallbacks: bool,
}

impl TemplateEngine {
    pub fn new(fallbacks: bool) -> Self {
        Self {
            cache: TemplateCache::new(),
            fallbacks,
        }
    }

    /// Returns the cached compilation or loads and compiles the file.
    pub fn load_and_compile(
        &self,
        extension: &InstalledExtension,
        template: &TemplateContribution,
    ) -> Result<Arc<CompiledTemplate>, TemplateError> {
        let key = TemplateCacheKey::new(extension.id(), &template.id, extension.version());
        self.cache.get_or_compile(key, || {
            let source = loader::load_template_source(extension.path(), &template.file, self.fallbacks)?;
            let compiled = compile_template(&source)?;
            for diagnostic in compiled.diagnostics() {
                warn!(
                    "event=template_compile module=template status=warn extension_id={} template_id={} diagnostic={}",
                    extension.id(),
                    template.id,
                    diagnostic
                );
            }
            info!(
                "event=template_compile module=template status=ok extension_id={} template_id={} version={}",
                extension.id(),
                template.id,
                extension.version()
            );
            Ok(compiled)
        })
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

/// Template loading and compilation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    OutsideRoot {
        file: String,
    },
    NotFound {
        file: String,
        message: String,
    },
    UnterminatedTag {
        offset: usize,
    },
    EmptyTag {
        offset: usize,
    },
    UnsupportedBlock {
        name: String,
        offset: usize,
    },
    MissingBlockArgument {
        block: &'static str,
        offset: usize,
    },
    UnclosedBlock {
        block: &'static str,
        offset: usize,
    },
    UnexpectedClose {
        block: String,
        offset: usize,
    },
    MismatchedClose {
        expected: &'static str,
        found: String,
        offset: usize,
    },
}

impl Display for TemplateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutsideRoot { file } => {
                write!(f, "template path escapes the extension directory: {file}")
            }
            Self::NotFound { file, message } => {
                write!(f, "template file could not be loaded: {file} ({message})")
            }
            Self::UnterminatedTag { offset } => write!(f, "unterminated tag at offset {offset}"),
            Self::EmptyTag { offset } => write!(f, "empty tag at offset {offset}"),
            Self::UnsupportedBlock { name, offset } => {
                write!(f, "unsupported block `#{name}` at offset {offset}")
            }
            Self::MissingBlockArgument { block, offset } => {
                write!(f, "block `#{block}` at offset {offset} needs a path")
            }
            Self::UnclosedBlock { block, offset } => {
                write!(f, "block `#{block}` opened at offset {offset} is never closed")
            }
            Self::UnexpectedClose { block, offset } => {
                write!(f, "unexpected `/{block}` at offset {offset}")
            }
            Self::MismatchedClose {
                expected,
                found,
                offset,
            } => write!(
                f,
                "expected `/{expected}` but found `/{found}` at offset {offset}"
            ),
        }
    }
}

impl Error for TemplateError {}
