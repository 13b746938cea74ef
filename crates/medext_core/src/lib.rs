//! Clinic-records extension host.
//!
//! Manages third-party extensions that contribute commands and print/export
//! templates, and gates every use of clinical data on granted capabilities,
//! the caller's role and the clinic license.

pub mod audit;
pub mod command;
pub mod config;
pub mod db;
pub mod extension;
pub mod gate;
pub mod host;
pub mod license;
pub mod logging;
pub mod template;

pub use audit::{AuditError, AuditRecord, AuditSink, LogAuditSink, MemoryAuditSink};
pub use command::handler::{
    handler_fn, CommandExecutionContext, CommandHandler, CommandOutput, HandlerError,
};
pub use command::keybinding::{keybindings_match, normalize_keybinding};
pub use command::router::{CommandFailure, CommandRequest, CommandResult};
pub use config::{ConfigError, HostConfig};
pub use db::{DbError, ExtensionStateStore, HostStore};
pub use extension::access::{can_access, DefaultRolePolicy, Role, RolePolicy};
pub use extension::capability::{ActionKind, CapabilityError, CapabilitySet, ResourceKind};
pub use extension::manifest::{
    CommandContext, CommandContribution, ExtensionManifest, ManifestError, TemplateContribution,
    TemplateKind,
};
pub use extension::registry::{
    ContributedCommand, ContributedTemplate, DiscoveryReport, ExtensionRegistry, ExtensionState,
    InstalledExtension, PersistedExtensionState, RegistryError,
};
pub use extension::risk::{assess_capabilities, RiskAssessment, RiskLevel};
pub use gate::FailureKind;
pub use host::{ExtensionHost, ExtensionHostBuilder, HostError};
pub use license::{ClinicId, LicenseCheck, LicenseError, LicenseGate, StaticLicenseGate};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use template::render::{RenderFailure, RenderRequest, RenderResult};
pub use template::TemplateError;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
