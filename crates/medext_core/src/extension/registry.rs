//! Installed-extension registry and lifecycle state machine.
//!
//! # Responsibility
//! - Hold the runtime record of every discovered/installed extension.
//! - Apply admin lifecycle transitions (grant/enable/disable/revoke/uninstall).
//! - Enumerate contribution points of enabled extensions.
//!
//! # Invariants
//! - `granted ⊆ requested` for every record at all times.
//! - `enabled_at_ms` is `Some` iff state is `Enabled`.
//! - Enumeration APIs only surface contributions of `Enabled` extensions, so
//!   disabling or revoking hides an extension immediately.
//! - Transitions are atomic: a rejected transition leaves the record unchanged.

use crate::extension::capability::CapabilitySet;
use crate::extension::manifest::{
    CommandContribution, ExtensionManifest, ManifestError, PassiveContribution,
    TemplateContribution,
};
use crate::extension::risk::{assess_capabilities, RiskAssessment};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lifecycle state of one extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionState {
    /// Known to the host, no runtime capability.
    Installed,
    Enabled,
    Disabled,
    /// Manifest invalid or load failure. Terminal until re-discovery.
    Error,
}

impl ExtensionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<ExtensionState> {
        match value {
            "installed" => Some(Self::Installed),
            "enabled" => Some(Self::Enabled),
            "disabled" => Some(Self::Disabled),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl Display for ExtensionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime record of one extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledExtension {
    pub(crate) manifest: Arc<ExtensionManifest>,
    pub(crate) state: ExtensionState,
    pub(crate) installed_at_ms: i64,
    pub(crate) enabled_at_ms: Option<i64>,
    pub(crate) path: PathBuf,
    pub(crate) granted: CapabilitySet,
    pub(crate) error: Option<String>,
}

impl InstalledExtension {
    pub(crate) fn new(manifest: Arc<ExtensionManifest>, path: PathBuf, now_ms: i64) -> Self {
        Self {
            manifest,
            state: ExtensionState::Installed,
            installed_at_ms: now_ms,
            enabled_at_ms: None,
            path,
            granted: CapabilitySet::new(),
            error: None,
        }
    }

    fn failed(dir_name: &str, path: PathBuf, message: String, now_ms: i64) -> Self {
        let mut record = Self::new(
            Arc::new(ExtensionManifest::unloadable(dir_name)),
            path,
            now_ms,
        );
        record.state = ExtensionState::Error;
        record.error = Some(message);
        record
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    pub fn publisher(&self) -> &str {
        &self.manifest.publisher
    }

    pub fn description(&self) -> &str {
        &self.manifest.description
    }

    pub fn manifest(&self) -> &Arc<ExtensionManifest> {
        &self.manifest
    }

    pub fn state(&self) -> ExtensionState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state == ExtensionState::Enabled
    }

    pub fn installed_at_ms(&self) -> i64 {
        self.installed_at_ms
    }

    pub fn enabled_at_ms(&self) -> Option<i64> {
        self.enabled_at_ms
    }

    /// Package root directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn requested(&self) -> &CapabilitySet {
        &self.manifest.capabilities
    }

    pub fn granted(&self) -> &CapabilitySet {
        &self.granted
    }

    /// `requested − granted`, always derived.
    pub fn ungranted(&self) -> CapabilitySet {
        self.requested().difference(&self.granted)
    }

    pub fn risk(&self) -> RiskAssessment {
        assess_capabilities(self.requested())
    }

    /// Snapshot of admin-controlled state for persistence.
    pub fn to_persisted(&self) -> PersistedExtensionState {
        PersistedExtensionState {
            extension_id: self.id().to_string(),
            version: self.version().to_string(),
            state: self.state,
            granted: self.granted.clone(),
            installed_at_ms: self.installed_at_ms,
            enabled_at_ms: self.enabled_at_ms,
        }
    }
}

/// Admin-controlled state persisted across restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedExtensionState {
    pub extension_id: String,
    pub version: String,
    pub state: ExtensionState,
    pub granted: CapabilitySet,
    pub installed_at_ms: i64,
    pub enabled_at_ms: Option<i64>,
}

/// Command contribution paired with its owning extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContributedCommand {
    pub extension_id: String,
    pub extension_version: String,
    pub command: CommandContribution,
}

/// Template contribution paired with its owning extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContributedTemplate {
    pub extension_id: String,
    pub extension_version: String,
    pub template: TemplateContribution,
}

/// Outcome of one directory scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Newly registered (or recovered from `error`) extension ids.
    pub loaded: Vec<String>,
    /// Existing extensions whose manifest version changed.
    pub refreshed: Vec<String>,
    /// `(directory name, error message)` pairs.
    pub failed: Vec<(String, String)>,
}

/// In-process registry of installed extensions.
#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    entries: BTreeMap<String, InstalledExtension>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers one validated manifest in `installed` state.
    pub fn install(
        &mut self,
        manifest: ExtensionManifest,
        path: PathBuf,
    ) -> Result<&InstalledExtension, RegistryError> {
        manifest.validate().map_err(RegistryError::InvalidManifest)?;
        let id = manifest.id.clone();
        match self.entries.get(&id) {
            Some(existing) if existing.state != ExtensionState::Error => {
                return Err(RegistryError::DuplicateExtensionId(id));
            }
            _ => {}
        }

        let record = InstalledExtension::new(Arc::new(manifest), path, now_epoch_ms());
        info!(
            "event=extension_install module=registry status=ok extension_id={} version={}",
            record.id(),
            record.version()
        );
        self.entries.insert(id.clone(), record);
        Ok(&self.entries[&id])
    }

    /// Scans `dir` for package directories containing a manifest.
    ///
    /// Invalid packages become `error` records keyed by directory name.
    pub fn discover(&mut self, dir: &Path) -> Result<DiscoveryReport, RegistryError> {
        let read_dir = std::fs::read_dir(dir).map_err(|err| RegistryError::Discovery {
            path: dir.display().to_string(),
            message: err.to_string(),
        })?;

        let mut package_dirs: Vec<PathBuf> = read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        package_dirs.sort();

        let mut report = DiscoveryReport::default();
        for package_dir in package_dirs {
            let dir_name = package_dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            match ExtensionManifest::from_dir(&package_dir) {
                Ok(manifest) => {
                    self.register_discovered(manifest, &dir_name, package_dir, &mut report)
                }
                Err(err) => {
                    warn!(
                        "event=extension_discover module=registry status=error dir={} error={}",
                        dir_name, err
                    );
                    self.mark_failed(&dir_name, package_dir, err.to_string());
                    report.failed.push((dir_name, err.to_string()));
                }
            }
        }

        info!(
            "event=extension_discover module=registry status=ok loaded={} refreshed={} failed={}",
            report.loaded.len(),
            report.refreshed.len(),
            report.failed.len()
        );
        Ok(report)
    }

    fn register_discovered(
        &mut self,
        manifest: ExtensionManifest,
        dir_name: &str,
        path: PathBuf,
        report: &mut DiscoveryReport,
    ) {
        // An id stays bound to the directory its grants were approved for.
        if let Some(existing) = self.entries.get(&manifest.id) {
            if existing.state != ExtensionState::Error && existing.path != path {
                let err = RegistryError::DuplicateExtensionId(manifest.id.clone());
                warn!(
                    "event=extension_discover module=registry status=error dir={} extension_id={} bound_dir={} error=duplicate_id",
                    dir_name,
                    manifest.id,
                    existing.path.display()
                );
                report.failed.push((dir_name.to_string(), err.to_string()));
                return;
            }
        }

        let stale_failure = self
            .entries
            .iter()
            .find(|(id, record)| {
                record.state == ExtensionState::Error
                    && record.path == path
                    && id.as_str() != manifest.id
            })
            .map(|(id, _)| id.clone());
        if let Some(id) = stale_failure {
            self.entries.remove(&id);
        }

        let id = manifest.id.clone();
        match self.entries.get_mut(&id) {
            Some(existing) if existing.state != ExtensionState::Error => {
                if existing.manifest.version != manifest.version {
                    existing.granted = existing.granted.intersection(&manifest.capabilities);
                    existing.manifest = Arc::new(manifest);
                    if existing.state == ExtensionState::Enabled && existing.granted.is_empty() {
                        existing.state = ExtensionState::Installed;
                        existing.enabled_at_ms = None;
                    }
                    info!(
                        "event=extension_refresh module=registry status=ok extension_id={} version={}",
                        id,
                        existing.version()
                    );
                    report.refreshed.push(id);
                }
            }
            _ => {
                let record = InstalledExtension::new(Arc::new(manifest), path, now_epoch_ms());
                self.entries.insert(id.clone(), record);
                report.loaded.push(id);
            }
        }
    }

    fn mark_failed(&mut self, dir_name: &str, path: PathBuf, message: String) {
        if let Some(existing) = self.entries.values_mut().find(|record| record.path == path) {
            existing.state = ExtensionState::Error;
            existing.enabled_at_ms = None;
            existing.error = Some(message);
            return;
        }
        // A broken folder named like another package's id must not displace it.
        if let Some(existing) = self.entries.get(dir_name) {
            if existing.state != ExtensionState::Error {
                warn!(
                    "event=extension_discover module=registry status=error dir={} error=name_shadows_extension_id",
                    dir_name
                );
                return;
            }
        }
        self.entries.insert(
            dir_name.to_string(),
            InstalledExtension::failed(dir_name, path, message, now_epoch_ms()),
        );
    }

    /// Sets granted = requested ∩ `offered`. State is unchanged.
    pub fn grant(
        &mut self,
        extension_id: &str,
        offered: &CapabilitySet,
    ) -> Result<&InstalledExtension, RegistryError> {
        let record = self.require_mut(extension_id)?;
        reject_error_state(record, "grant")?;
        record.granted = record.requested().intersection(offered);
        info!(
            "event=extension_grant module=registry status=ok extension_id={} granted={}",
            extension_id, record.granted
        );
        Ok(&*record)
    }

    /// Grants every requested capability.
    pub fn grant_all(&mut self, extension_id: &str) -> Result<&InstalledExtension, RegistryError> {
        let requested = self.require(extension_id)?.requested().clone();
        self.grant(extension_id, &requested)
    }

    /// Enables an extension; requires a non-empty granted set.
    pub fn enable(&mut self, extension_id: &str) -> Result<&InstalledExtension, RegistryError> {
        let record = self.require_mut(extension_id)?;
        reject_error_state(record, "enable")?;
        if record.granted.is_empty() {
            warn!(
                "event=extension_enable module=registry status=denied extension_id={} reason=nothing_granted",
                extension_id
            );
            return Err(RegistryError::NothingGranted(extension_id.to_string()));
        }
        if record.state != ExtensionState::Enabled {
            record.state = ExtensionState::Enabled;
            record.enabled_at_ms = Some(now_epoch_ms());
        }
        info!(
            "event=extension_enable module=registry status=ok extension_id={}",
            extension_id
        );
        Ok(&*record)
    }

    /// Disables an enabled extension; capabilities are retained.
    pub fn disable(&mut self, extension_id: &str) -> Result<&InstalledExtension, RegistryError> {
        let record = self.require_mut(extension_id)?;
        if record.state != ExtensionState::Enabled {
            return Err(RegistryError::InvalidTransition {
                extension_id: extension_id.to_string(),
                state: record.state,
                action: "disable",
            });
        }
        record.state = ExtensionState::Disabled;
        record.enabled_at_ms = None;
        info!(
            "event=extension_disable module=registry status=ok extension_id={}",
            extension_id
        );
        Ok(&*record)
    }

    /// Clears granted capabilities and forces state back to `installed`.
    pub fn revoke(&mut self, extension_id: &str) -> Result<&InstalledExtension, RegistryError> {
        let record = self.require_mut(extension_id)?;
        reject_error_state(record, "revoke")?;
        record.granted = CapabilitySet::new();
        record.state = ExtensionState::Installed;
        record.enabled_at_ms = None;
        info!(
            "event=extension_revoke module=registry status=ok extension_id={}",
            extension_id
        );
        Ok(&*record)
    }

    /// Removes the record entirely.
    pub fn uninstall(&mut self, extension_id: &str) -> Result<InstalledExtension, RegistryError> {
        let record = self
            .entries
            .remove(extension_id)
            .ok_or_else(|| RegistryError::NotFound(extension_id.to_string()))?;
        info!(
            "event=extension_uninstall module=registry status=ok extension_id={}",
            extension_id
        );
        Ok(record)
    }

    /// Re-applies persisted admin state to a discovered record.
    ///
    /// Granted capabilities are clamped to the current manifest. Returns
    /// `false` when no matching non-error record exists.
    pub fn restore(&mut self, persisted: &PersistedExtensionState) -> bool {
        let Some(record) = self.entries.get_mut(&persisted.extension_id) else {
            return false;
        };
        if record.state == ExtensionState::Error {
            return false;
        }

        record.granted = persisted.granted.intersection(record.requested());
        record.installed_at_ms = persisted.installed_at_ms;
        record.state = match persisted.state {
            ExtensionState::Enabled if record.granted.is_empty() => ExtensionState::Installed,
            ExtensionState::Error => ExtensionState::Installed,
            other => other,
        };
        record.enabled_at_ms = if record.state == ExtensionState::Enabled {
            Some(persisted.enabled_at_ms.unwrap_or_else(now_epoch_ms))
        } else {
            None
        };
        true
    }

    pub fn get(&self, extension_id: &str) -> Option<&InstalledExtension> {
        self.entries.get(extension_id)
    }

    /// Every record regardless of state, sorted by id.
    pub fn list(&self) -> impl Iterator<Item = &InstalledExtension> {
        self.entries.values()
    }

    pub fn get_enabled(&self) -> Vec<&InstalledExtension> {
        self.enabled().collect()
    }

    /// Commands of enabled extensions only.
    pub fn all_commands(&self) -> Vec<ContributedCommand> {
        self.enabled()
            .flat_map(|record| {
                record
                    .manifest
                    .contributes
                    .commands
                    .iter()
                    .map(|command| ContributedCommand {
                        extension_id: record.id().to_string(),
                        extension_version: record.version().to_string(),
                        command: command.clone(),
                    })
            })
            .collect()
    }

    /// Templates of enabled extensions only.
    pub fn all_templates(&self) -> Vec<ContributedTemplate> {
        self.enabled()
            .flat_map(|record| {
                record
                    .manifest
                    .contributes
                    .templates
                    .iter()
                    .map(|template| ContributedTemplate {
                        extension_id: record.id().to_string(),
                        extension_version: record.version().to_string(),
                        template: template.clone(),
                    })
            })
            .collect()
    }

    /// Resolves a command id among enabled extensions.
    pub fn find_command(
        &self,
        command_id: &str,
    ) -> Option<(&InstalledExtension, &CommandContribution)> {
        self.enabled().find_map(|record| {
            record
                .manifest
                .contributes
                .commands
                .iter()
                .find(|command| command.id == command_id)
                .map(|command| (record, command))
        })
    }

    /// Resolves a template id among enabled extensions.
    pub fn find_template(
        &self,
        template_id: &str,
    ) -> Option<(&InstalledExtension, &TemplateContribution)> {
        self.enabled().find_map(|record| {
            record
                .manifest
                .contributes
                .templates
                .iter()
                .find(|template| template.id == template_id)
                .map(|template| (record, template))
        })
    }

    pub fn all_exporters(&self) -> Vec<(&str, &PassiveContribution)> {
        self.passive(|manifest| &manifest.contributes.exporters)
    }

    pub fn all_integrations(&self) -> Vec<(&str, &PassiveContribution)> {
        self.passive(|manifest| &manifest.contributes.integrations)
    }

    pub fn all_views(&self) -> Vec<(&str, &PassiveContribution)> {
        self.passive(|manifest| &manifest.contributes.views)
    }

    fn passive<F>(&self, select: F) -> Vec<(&str, &PassiveContribution)>
    where
        F: Fn(&ExtensionManifest) -> &Vec<PassiveContribution>,
    {
        self.enabled()
            .flat_map(|record| {
                select(&record.manifest)
                    .iter()
                    .map(move |entry| (record.id(), entry))
            })
            .collect()
    }

    fn enabled(&self) -> impl Iterator<Item = &InstalledExtension> {
        self.entries.values().filter(|record| record.is_enabled())
    }

    fn require(&self, extension_id: &str) -> Result<&InstalledExtension, RegistryError> {
        self.entries
            .get(extension_id)
            .ok_or_else(|| RegistryError::NotFound(extension_id.to_string()))
    }

    fn require_mut(&mut self, extension_id: &str) -> Result<&mut InstalledExtension, RegistryError> {
        self.entries
            .get_mut(extension_id)
            .ok_or_else(|| RegistryError::NotFound(extension_id.to_string()))
    }
}

fn reject_error_state(
    record: &InstalledExtension,
    action: &'static str,
) -> Result<(), RegistryError> {
    if record.state == ExtensionState::Error {
        return Err(RegistryError::InvalidTransition {
            extension_id: record.id().to_string(),
            state: record.state,
            action,
        });
    }
    Ok(())
}

pub(crate) fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Registry lifecycle errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    NotFound(String),
    DuplicateExtensionId(String),
    InvalidManifest(ManifestError),
    InvalidTransition {
        extension_id: String,
        state: ExtensionState,
        action: &'static str,
    },
    NothingGranted(String),
    Discovery { path: String, message: String },
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(value) => write!(f, "extension not found: {value}"),
            Self::DuplicateExtensionId(value) => {
                write!(f, "extension id already registered: {value}")
            }
            Self::InvalidManifest(err) => write!(f, "invalid extension manifest: {err}"),
            Self::InvalidTransition {
                extension_id,
                state,
                action,
            } => write!(f, "cannot {action} extension `{extension_id}` in state {state}"),
            Self::NothingGranted(value) => write!(
                f,
                "extension `{value}` has no granted capabilities and cannot be enabled"
            ),
            Self::Discovery { path, message } => {
                write!(f, "failed to scan extension directory `{path}`: {message}")
            }
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidManifest(err) => Some(err),
            _ => None,
        }
    }
}
