//! Compiled-template cache.

use crate::template::compiler::CompiledTemplate;
use crate::template::TemplateError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// A new extension version yields a new key, so upgrades never serve stale output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateCacheKey {
    pub extension_id: String,
    pub template_id: String,
    pub version: String,
}

impl TemplateCacheKey {
    pub fn new(extension_id: &str, template_id: &str, version: &str) -> Self {
        Self {
            extension_id: extension_id.to_string(),
            template_id: template_id.to_string(),
            version: version.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: Mutex<HashMap<TemplateCacheKey, Arc<CompiledTemplate>>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached entry or runs `compile` and stores its output.
    ///
    /// The lock is released while compiling; concurrent compiles of one key
    /// both succeed and the last insert wins.
    pub fn get_or_compile<F>(
        &self,
        key: TemplateCacheKey,
        compile: F,
    ) -> Result<Arc<CompiledTemplate>, TemplateError>
    where
        F: FnOnce() -> Result<CompiledTemplate, TemplateError>,
    {
        if let Some(hit) = self.lock().get(&key) {
            return Ok(Arc::clone(hit));
        }
        let compiled = Arc::new(compile()?);
        self.lock().insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TemplateCacheKey, Arc<CompiledTemplate>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{TemplateCache, TemplateCacheKey};
    use crate::template::compiler::compile_template;
    use crate::template::TemplateError;
    use std::cell::Cell;
    use std::sync::Arc;

    #[test]
    fn compiles_once_per_key() {
        let cache = TemplateCache::new();
        let calls = Cell::new(0);
        let key = TemplateCacheKey::new("acme.print", "rx", "1.0.0");

        let first = cache
            .get_or_compile(key.clone(), || {
                calls.set(calls.get() + 1);
                compile_template("{{a}}")
            })
            .expect("first");
        let second = cache
            .get_or_compile(key, || {
                calls.set(calls.get() + 1);
                compile_template("{{b}}")
            })
            .expect("second");

        assert_eq!(calls.get(), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn version_is_part_of_the_key() {
        let cache = TemplateCache::new();
        cache
            .get_or_compile(TemplateCacheKey::new("x", "t", "1.0.0"), || compile_template("v1"))
            .expect("v1");
        let upgraded = cache
            .get_or_compile(TemplateCacheKey::new("x", "t", "1.1.0"), || compile_template("v2"))
            .expect("v2");
        assert_eq!(upgraded.render(&serde_json::json!({})), "v2");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn failed_compiles_are_not_cached_and_clear_empties() {
        let cache = TemplateCache::new();
        let key = TemplateCacheKey::new("x", "t", "1.0.0");
        let err = cache
            .get_or_compile(key.clone(), || {
                Err(TemplateError::EmptyTag { offset: 0 })
            })
            .expect_err("compile error");
        assert_eq!(err, TemplateError::EmptyTag { offset: 0 });
        assert!(cache.is_empty());

        cache.get_or_compile(key, || compile_template("ok")).expect("ok");
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
