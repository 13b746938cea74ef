//! Extension host: the single owner of registry, handlers and template cache.
//!
//! # Responsibility
//! - Serialize lifecycle transitions and persist them when a store is set.
//! - Expose enabled-only contribution queries to the UI.
//! - Provide the shared state `execute_command` and `render_template` gate on.
//!
//! # Invariants
//! - Locks are taken for short synchronous sections only; async paths clone
//!   what they need and release the guard before awaiting.
//! - A poisoned lock is recovered, never propagated as a panic.

use crate::audit::{AuditSink, LogAuditSink};
use crate::command::handler::{CommandHandler, CommandHandlerRegistry};
use crate::command::keybinding;
use crate::config::HostConfig;
use crate::db::{DbError, ExtensionStateStore, HostStore};
use crate::extension::access::{can_access, DefaultRolePolicy, Role, RolePolicy};
use crate::extension::capability::{ActionKind, CapabilitySet, ResourceKind};
use crate::extension::manifest::{CommandContext, ExtensionManifest, PassiveContribution};
use crate::extension::registry::{
    ContributedCommand, ContributedTemplate, DiscoveryReport, ExtensionRegistry,
    InstalledExtension, RegistryError,
};
use crate::license::{LicenseGate, StaticLicenseGate};
use crate::template::TemplateEngine;
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub struct ExtensionHost {
    pub(crate) registry: RwLock<ExtensionRegistry>,
    pub(crate) handlers: RwLock<CommandHandlerRegistry>,
    pub(crate) templates: TemplateEngine,
    pub(crate) license: Arc<dyn LicenseGate>,
    pub(crate) roles: Arc<dyn RolePolicy>,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) store: Option<Arc<dyn ExtensionStateStore>>,
}

/// Collaborators for an `ExtensionHost`.
pub struct ExtensionHostBuilder {
    license: Arc<dyn LicenseGate>,
    roles: Arc<dyn RolePolicy>,
    audit: Arc<dyn AuditSink>,
    store: Option<Arc<dyn ExtensionStateStore>>,
    template_fallbacks: bool,
}

impl ExtensionHostBuilder {
    pub fn role_policy(mut self, roles: Arc<dyn RolePolicy>) -> Self {
        self.roles = roles;
        self
    }

    pub fn audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn state_store(mut self, store: Arc<dyn ExtensionStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn template_fallbacks(mut self, enabled: bool) -> Self {
        self.template_fallbacks = enabled;
        self
    }

    pub fn build(self) -> ExtensionHost {
        ExtensionHost {
            registry: RwLock::new(ExtensionRegistry::new()),
            handlers: RwLock::new(CommandHandlerRegistry::new()),
            templates: TemplateEngine::new(self.template_fallbacks),
            license: self.license,
            roles: self.roles,
            audit: self.audit,
            store: self.store,
        }
    }
}

impl ExtensionHost {
    /// Starts a builder with the default role policy and a log-only audit sink.
    pub fn builder(license: Arc<dyn LicenseGate>) -> ExtensionHostBuilder {
        ExtensionHostBuilder {
            license,
            roles: Arc::new(DefaultRolePolicy),
            audit: Arc::new(LogAuditSink),
            store: None,
            template_fallbacks: false,
        }
    }

    /// Wires a host from startup config and scans the extensions directory.
    ///
    /// With a database path, the SQLite store persists lifecycle state and
    /// receives audit records; the license gate is a static one bound to the
    /// configured clinic.
    pub fn from_config(config: &HostConfig) -> Result<(Self, DiscoveryReport), HostError> {
        let license = Arc::new(StaticLicenseGate::new(
            config.clinic_id().map(str::to_string),
        ));
        let mut builder =
            Self::builder(license).template_fallbacks(config.template_fallbacks());
        if let Some(path) = config.db_path() {
            let store = Arc::new(HostStore::open(path)?);
            builder = builder
                .state_store(Arc::clone(&store) as Arc<dyn ExtensionStateStore>)
                .audit_sink(store);
        }
        let host = builder.build();
        let report = host.discover(config.extensions_dir())?;
        Ok((host, report))
    }

    pub(crate) fn registry(&self) -> RwLockReadGuard<'_, ExtensionRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, ExtensionRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn handlers(&self) -> RwLockReadGuard<'_, CommandHandlerRegistry> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }

    // Lifecycle ---------------------------------------------------------

    /// Scans `dir` and re-applies persisted admin state to what it finds.
    pub fn discover(&self, dir: &Path) -> Result<DiscoveryReport, HostError> {
        let persisted = match &self.store {
            Some(store) => store.load_all()?,
            None => Vec::new(),
        };

        let (report, snapshot) = {
            let mut registry = self.registry_mut();
            let report = registry.discover(dir)?;
            let mut restored = 0usize;
            for state in &persisted {
                if registry.restore(state) {
                    restored += 1;
                }
            }
            info!(
                "event=extension_restore module=host status=ok persisted={} restored={}",
                persisted.len(),
                restored
            );
            let snapshot: Vec<InstalledExtension> = registry.list().cloned().collect();
            (report, snapshot)
        };

        for record in snapshot.iter().filter(|record| record.error().is_none()) {
            self.persist(record)?;
        }
        Ok(report)
    }

    pub fn install(
        &self,
        manifest: ExtensionManifest,
        path: PathBuf,
    ) -> Result<InstalledExtension, HostError> {
        let record = self.registry_mut().install(manifest, path)?.clone();
        self.persist(&record)?;
        Ok(record)
    }

    pub fn grant(
        &self,
        extension_id: &str,
        offered: &CapabilitySet,
    ) -> Result<InstalledExtension, HostError> {
        let record = self.registry_mut().grant(extension_id, offered)?.clone();
        self.persist(&record)?;
        Ok(record)
    }

    pub fn grant_all(&self, extension_id: &str) -> Result<InstalledExtension, HostError> {
        let record = self.registry_mut().grant_all(extension_id)?.clone();
        self.persist(&record)?;
        Ok(record)
    }

    pub fn enable(&self, extension_id: &str) -> Result<InstalledExtension, HostError> {
        let record = self.registry_mut().enable(extension_id)?.clone();
        self.persist(&record)?;
        Ok(record)
    }

    pub fn disable(&self, extension_id: &str) -> Result<InstalledExtension, HostError> {
        let record = self.registry_mut().disable(extension_id)?.clone();
        self.persist(&record)?;
        Ok(record)
    }

    pub fn revoke(&self, extension_id: &str) -> Result<InstalledExtension, HostError> {
        let record = self.registry_mut().revoke(extension_id)?.clone();
        self.persist(&record)?;
        Ok(record)
    }

    pub fn uninstall(&self, extension_id: &str) -> Result<InstalledExtension, HostError> {
        let record = self.registry_mut().uninstall(extension_id)?;
        if let Some(store) = &self.store {
            store.remove(extension_id).map_err(|err| {
                error!(
                    "event=extension_persist module=host status=error extension_id={} error={}",
                    extension_id, err
                );
                HostError::Store(err)
            })?;
        }
        Ok(record)
    }

    fn persist(&self, record: &InstalledExtension) -> Result<(), HostError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store.save(&record.to_persisted()).map_err(|err| {
            error!(
                "event=extension_persist module=host status=error extension_id={} error={}",
                record.id(),
                err
            );
            HostError::Store(err)
        })
    }

    // Queries -----------------------------------------------------------

    pub fn get(&self, extension_id: &str) -> Option<InstalledExtension> {
        self.registry().get(extension_id).cloned()
    }

    /// Every record regardless of state, sorted by id.
    pub fn list(&self) -> Vec<InstalledExtension> {
        self.registry().list().cloned().collect()
    }

    pub fn get_enabled(&self) -> Vec<InstalledExtension> {
        self.registry().get_enabled().into_iter().cloned().collect()
    }

    pub fn all_commands(&self) -> Vec<ContributedCommand> {
        self.registry().all_commands()
    }

    pub fn all_templates(&self) -> Vec<ContributedTemplate> {
        self.registry().all_templates()
    }

    /// Enabled-only commands runnable in `context`.
    pub fn available_commands(&self, context: CommandContext) -> Vec<ContributedCommand> {
        self.all_commands()
            .into_iter()
            .filter(|entry| entry.command.runs_in(context))
            .collect()
    }

    /// Enabled-only templates, optionally limited to one target entity.
    pub fn available_templates(&self, target: Option<ResourceKind>) -> Vec<ContributedTemplate> {
        self.all_templates()
            .into_iter()
            .filter(|entry| target.map_or(true, |kind| entry.template.target_entity == kind))
            .collect()
    }

    pub fn find_command_by_keybinding(
        &self,
        binding: &str,
        context: CommandContext,
    ) -> Option<ContributedCommand> {
        let commands = self.available_commands(context);
        keybinding::find_command_by_keybinding(&commands, binding, context).cloned()
    }

    pub fn all_exporters(&self) -> Vec<(String, PassiveContribution)> {
        owned_passive(self.registry().all_exporters())
    }

    pub fn all_integrations(&self) -> Vec<(String, PassiveContribution)> {
        owned_passive(self.registry().all_integrations())
    }

    pub fn all_views(&self) -> Vec<(String, PassiveContribution)> {
        owned_passive(self.registry().all_views())
    }

    /// Granted-set and role check for one extension; unknown ids are denied.
    pub fn can_access(
        &self,
        extension_id: &str,
        resource: ResourceKind,
        action: ActionKind,
        role: Role,
    ) -> bool {
        self.registry()
            .get(extension_id)
            .is_some_and(|extension| {
                can_access(extension, resource, action, role, self.roles.as_ref())
            })
    }

    // Handlers and cache ------------------------------------------------

    /// Returns `true` when an existing handler was replaced.
    pub fn register_command_handler(
        &self,
        command_id: &str,
        handler: Arc<dyn CommandHandler>,
    ) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(command_id, handler)
    }

    pub fn unregister_command_handler(&self, command_id: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .unregister(command_id)
    }

    pub fn clear_template_cache(&self) {
        self.templates.clear_cache();
        info!("event=template_cache_clear module=host status=ok");
    }

    pub fn cached_template_count(&self) -> usize {
        self.templates.cached_len()
    }
}

fn owned_passive(entries: Vec<(&str, &PassiveContribution)>) -> Vec<(String, PassiveContribution)> {
    entries
        .into_iter()
        .map(|(extension_id, entry)| (extension_id.to_string(), entry.clone()))
        .collect()
}

/// Administrative host failures.
#[derive(Debug)]
pub enum HostError {
    Registry(RegistryError),
    Store(DbError),
}

impl Display for HostError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "extension state store failed: {err}"),
        }
    }
}

impl Error for HostError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Registry(err) => Some(err),
            Self::Store(err) => Some(err),
        }
    }
}

impl From<RegistryError> for HostError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

impl From<DbError> for HostError {
    fn from(value: DbError) -> Self {
        Self::Store(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{ExtensionHost, HostError};
    use crate::extension::manifest::{CommandContext, ExtensionManifest};
    use crate::extension::registry::{ExtensionState, RegistryError};
    use crate::license::StaticLicenseGate;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn host() -> ExtensionHost {
        ExtensionHost::builder(Arc::new(StaticLicenseGate::new(Some("c1".to_string())))).build()
    }

    fn manifest() -> ExtensionManifest {
        ExtensionManifest::from_json_str(
            r#"{
                "id": "acme.tools",
                "name": "Tools",
                "version": "1.0.0",
                "publisher": "Acme",
                "description": "",
                "capabilities": { "patient": ["read"] },
                "contributes": {
                    "commands": [
                        { "id": "acme.tools.a", "title": "A", "context": ["patientDetail"], "keybinding": "Ctrl+Alt+A" },
                        { "id": "acme.tools.b", "title": "B", "context": ["global"] }
                    ]
                }
            }"#,
        )
        .expect("manifest")
    }

    #[test]
    fn queries_see_only_enabled_extensions() {
        let host = host();
        host.install(manifest(), PathBuf::from("/ext/acme.tools"))
            .expect("install");
        assert!(host.available_commands(CommandContext::Global).is_empty());

        host.grant_all("acme.tools").expect("grant");
        let enabled = host.enable("acme.tools").expect("enable");
        assert_eq!(enabled.state(), ExtensionState::Enabled);

        let ids: Vec<String> = host
            .available_commands(CommandContext::PatientDetail)
            .into_iter()
            .map(|entry| entry.command.id)
            .collect();
        assert_eq!(ids, vec!["acme.tools.a", "acme.tools.b"]);
        assert_eq!(host.available_commands(CommandContext::Dashboard).len(), 1);

        let found = host
            .find_command_by_keybinding("alt+ctrl+a", CommandContext::PatientDetail)
            .expect("bound command");
        assert_eq!(found.command.id, "acme.tools.a");
        assert!(host
            .find_command_by_keybinding("alt+ctrl+a", CommandContext::Dashboard)
            .is_none());
    }

    #[test]
    fn admin_errors_surface_registry_errors() {
        let host = host();
        let err = host.enable("missing").expect_err("unknown id");
        assert!(matches!(
            err,
            HostError::Registry(RegistryError::NotFound(_))
        ));
    }
}
