//! Capability access checks.
//!
//! # Invariants
//! - Access requires BOTH a granted capability and a role permitted by the
//!   host's own policy. An extension can narrow what a role may do, never
//!   widen it.
//! - Checks are pure and side-effect free.

use crate::extension::capability::{ActionKind, ResourceKind};
use crate::extension::registry::InstalledExtension;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Staff role of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Doctor,
    Nurse,
    Receptionist,
    Viewer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Doctor => "doctor",
            Self::Nurse => "nurse",
            Self::Receptionist => "receptionist",
            Self::Viewer => "viewer",
        }
    }

    pub fn parse(value: &str) -> Option<Role> {
        match value.trim() {
            "admin" => Some(Self::Admin),
            "doctor" => Some(Self::Doctor),
            "nurse" => Some(Self::Nurse),
            "receptionist" => Some(Self::Receptionist),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host role hierarchy.
pub trait RolePolicy: Send + Sync {
    fn permits(&self, role: Role, resource: ResourceKind, action: ActionKind) -> bool;
}

/// Built-in role table.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRolePolicy;

impl RolePolicy for DefaultRolePolicy {
    fn permits(&self, role: Role, resource: ResourceKind, action: ActionKind) -> bool {
        use ActionKind::{Delete, Export, Print, Read, Write};
        use ResourceKind::{Appointment, Chart, Network, Patient, TreatmentRecord, Visit};

        if resource == Network {
            return false;
        }
        match role {
            Role::Admin => true,
            Role::Doctor => action != Delete || resource == Appointment,
            Role::Nurse => match action {
                Read | Print => true,
                Write => matches!(resource, Chart | Visit | Appointment),
                Delete | Export => false,
            },
            Role::Receptionist => match action {
                Read | Print => matches!(resource, Patient | Visit | Appointment),
                Write => matches!(resource, Patient | Appointment),
                Delete => resource == Appointment,
                Export => false,
            },
            Role::Viewer => action == Read && resource != TreatmentRecord,
        }
    }
}

/// Returns whether `extension` may perform `action` on `resource` for `role`.
pub fn can_access(
    extension: &InstalledExtension,
    resource: ResourceKind,
    action: ActionKind,
    role: Role,
    policy: &dyn RolePolicy,
) -> bool {
    extension.granted.contains(resource, action) && policy.permits(role, resource, action)
}
