//! Host runtime configuration.
//!
//! Resolved once at process startup and passed into `ExtensionHost`; request
//! handling never reads environment variables.

use crate::logging::default_log_level;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub const ENV_EXTENSIONS_DIR: &str = "MEDEXT_EXTENSIONS_DIR";
pub const ENV_LOG_LEVEL: &str = "MEDEXT_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "MEDEXT_LOG_DIR";
pub const ENV_DB_PATH: &str = "MEDEXT_DB_PATH";
pub const ENV_CLINIC_ID: &str = "MEDEXT_CLINIC_ID";
pub const ENV_TEMPLATE_FALLBACKS: &str = "MEDEXT_TEMPLATE_FALLBACKS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    extensions_dir: PathBuf,
    log_level: String,
    log_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    clinic_id: Option<String>,
    template_fallbacks: bool,
}

impl HostConfig {
    /// Config with defaults for everything but the extensions directory.
    pub fn new(extensions_dir: impl Into<PathBuf>) -> Self {
        Self {
            extensions_dir: extensions_dir.into(),
            log_level: default_log_level().to_string(),
            log_dir: None,
            db_path: None,
            clinic_id: None,
            template_fallbacks: false,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let extensions_dir = read(ENV_EXTENSIONS_DIR).ok_or(ConfigError::Missing(ENV_EXTENSIONS_DIR))?;
        let mut config = Self::new(extensions_dir);

        if let Some(level) = read(ENV_LOG_LEVEL) {
            config.log_level = level;
        }
        config.log_dir = read(ENV_LOG_DIR).map(PathBuf::from);
        config.db_path = read(ENV_DB_PATH).map(PathBuf::from);
        config.clinic_id = read(ENV_CLINIC_ID);
        if let Some(raw) = read(ENV_TEMPLATE_FALLBACKS) {
            config.template_fallbacks =
                parse_flag(&raw).ok_or_else(|| ConfigError::Invalid {
                    key: ENV_TEMPLATE_FALLBACKS,
                    value: raw.clone(),
                })?;
        }
        Ok(config)
    }

    pub fn with_log(mut self, level: impl Into<String>, dir: Option<PathBuf>) -> Self {
        self.log_level = level.into();
        self.log_dir = dir;
        self
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn with_clinic_id(mut self, clinic_id: impl Into<String>) -> Self {
        self.clinic_id = Some(clinic_id.into());
        self
    }

    pub fn with_template_fallbacks(mut self, enabled: bool) -> Self {
        self.template_fallbacks = enabled;
        self
    }

    pub fn extensions_dir(&self) -> &Path {
        &self.extensions_dir
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn clinic_id(&self) -> Option<&str> {
        self.clinic_id.as_deref()
    }

    pub fn template_fallbacks(&self) -> bool {
        self.template_fallbacks
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { key: &'static str, value: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(key) => write!(f, "required setting `{key}` is not set"),
            Self::Invalid { key, value } => write!(f, "invalid value `{value}` for `{key}`"),
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::{ConfigError, HostConfig, ENV_EXTENSIONS_DIR, ENV_TEMPLATE_FALLBACKS};
    use std::collections::HashMap;
    use std::path::Path;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn extensions_dir_is_required() {
        assert_eq!(
            HostConfig::from_lookup(lookup(&[])),
            Err(ConfigError::Missing(ENV_EXTENSIONS_DIR))
        );
        assert_eq!(
            HostConfig::from_lookup(lookup(&[(ENV_EXTENSIONS_DIR, "  ")])),
            Err(ConfigError::Missing(ENV_EXTENSIONS_DIR))
        );
    }

    #[test]
    fn reads_all_settings() {
        let config = HostConfig::from_lookup(lookup(&[
            (ENV_EXTENSIONS_DIR, "/srv/ext"),
            ("MEDEXT_LOG_LEVEL", "warn"),
            ("MEDEXT_LOG_DIR", "/var/log/medext"),
            ("MEDEXT_DB_PATH", "/srv/medext.db"),
            ("MEDEXT_CLINIC_ID", "clinic-9"),
            (ENV_TEMPLATE_FALLBACKS, "yes"),
        ]))
        .expect("config");

        assert_eq!(config.extensions_dir(), Path::new("/srv/ext"));
        assert_eq!(config.log_level(), "warn");
        assert_eq!(config.log_dir(), Some(Path::new("/var/log/medext")));
        assert_eq!(config.db_path(), Some(Path::new("/srv/medext.db")));
        assert_eq!(config.clinic_id(), Some("clinic-9"));
        assert!(config.template_fallbacks());
    }

    #[test]
    fn rejects_unparseable_flag() {
        let err = HostConfig::from_lookup(lookup(&[
            (ENV_EXTENSIONS_DIR, "/srv/ext"),
            (ENV_TEMPLATE_FALLBACKS, "maybe"),
        ]))
        .expect_err("invalid flag");
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn defaults_are_conservative() {
        let config = HostConfig::new("/srv/ext");
        assert!(!config.template_fallbacks());
        assert!(config.db_path().is_none());
        assert!(config.clinic_id().is_none());
    }
}
