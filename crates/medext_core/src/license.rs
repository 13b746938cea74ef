//! License gate collaborator.
//!
//! # Responsibility
//! - Define the async contract the host uses to resolve the active clinic and
//!   check per-extension licenses.
//! - Provide a static implementation for development, CLI use and tests.
//!
//! # Invariants
//! - Callers fail closed: an unresolvable clinic, a denied license or a
//!   collaborator error all block execution/rendering.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Tenant identity used to scope license checks.
pub type ClinicId = String;

/// Result of one license check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LicenseCheck {
    pub allowed: bool,
}

impl LicenseCheck {
    pub fn allowed() -> Self {
        Self { allowed: true }
    }

    pub fn denied() -> Self {
        Self { allowed: false }
    }
}

/// External license collaborator.
#[async_trait]
pub trait LicenseGate: Send + Sync {
    /// Returns the active clinic, or `None` when no clinic context exists.
    async fn resolve_clinic_id(&self) -> Option<ClinicId>;

    async fn check_license_for_execution(
        &self,
        extension_id: &str,
        clinic_id: &str,
    ) -> Result<LicenseCheck, LicenseError>;

    async fn check_license_for_render(
        &self,
        extension_id: &str,
        clinic_id: &str,
    ) -> Result<LicenseCheck, LicenseError>;
}

/// Fixed-answer license gate.
///
/// Allows every extension except those on the deny list.
#[derive(Debug, Clone, Default)]
pub struct StaticLicenseGate {
    clinic_id: Option<ClinicId>,
    denied: BTreeSet<String>,
}

impl StaticLicenseGate {
    pub fn new(clinic_id: Option<ClinicId>) -> Self {
        Self {
            clinic_id,
            denied: BTreeSet::new(),
        }
    }

    pub fn deny(mut self, extension_id: impl Into<String>) -> Self {
        self.denied.insert(extension_id.into());
        self
    }

    fn check(&self, extension_id: &str) -> LicenseCheck {
        LicenseCheck {
            allowed: !self.denied.contains(extension_id),
        }
    }
}

#[async_trait]
impl LicenseGate for StaticLicenseGate {
    async fn resolve_clinic_id(&self) -> Option<ClinicId> {
        self.clinic_id
            .clone()
            .filter(|clinic_id| !clinic_id.trim().is_empty())
    }

    async fn check_license_for_execution(
        &self,
        extension_id: &str,
        _clinic_id: &str,
    ) -> Result<LicenseCheck, LicenseError> {
        Ok(self.check(extension_id))
    }

    async fn check_license_for_render(
        &self,
        extension_id: &str,
        _clinic_id: &str,
    ) -> Result<LicenseCheck, LicenseError> {
        Ok(self.check(extension_id))
    }
}

/// License collaborator failure (transport, backend, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseError(pub String);

impl Display for LicenseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "license check failed: {}", self.0)
    }
}

impl Error for LicenseError {}

#[cfg(test)]
mod tests {
    use super::{LicenseGate, StaticLicenseGate};

    #[tokio::test]
    async fn static_gate_allows_unless_denied() {
        let gate = StaticLicenseGate::new(Some("clinic-1".to_string())).deny("acme.blocked");
        assert_eq!(gate.resolve_clinic_id().await.as_deref(), Some("clinic-1"));
        assert!(
            gate.check_license_for_execution("acme.ok", "clinic-1")
                .await
                .expect("check")
                .allowed
        );
        assert!(
            !gate
                .check_license_for_render("acme.blocked", "clinic-1")
                .await
                .expect("check")
                .allowed
        );
    }

    #[tokio::test]
    async fn blank_clinic_resolves_to_none() {
        let gate = StaticLicenseGate::new(Some("  ".to_string()));
        assert!(gate.resolve_clinic_id().await.is_none());
    }
}
