//! Shared pieces of the command and render gate pipelines.

use crate::license::{ClinicId, LicenseGate};
use log::warn;
use serde::Serialize;
use std::fmt::{Display, Formatter};

/// Failure taxonomy carried by every structured failure result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Unknown command/template/extension id.
    NotFound,
    /// Disabled extension, context mismatch, missing capability or role.
    NotAuthorized,
    /// Unresolvable clinic or disallowed license.
    LicenseDenied,
    /// Handler or template failed during its own logic.
    ExecutionFailure,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::NotAuthorized => "not_authorized",
            Self::LicenseDenied => "license_denied",
            Self::ExecutionFailure => "execution_failure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicensePurpose {
    Execution,
    Render,
}

impl LicensePurpose {
    fn as_str(self) -> &'static str {
        match self {
            Self::Execution => "execution",
            Self::Render => "render",
        }
    }
}

/// Why the license gate refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LicenseDenial {
    NoClinicContext,
    Invalid,
}

impl Display for LicenseDenial {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoClinicContext => write!(f, "no clinic context; license cannot be verified"),
            Self::Invalid => write!(f, "extension license is invalid for this clinic"),
        }
    }
}

/// Resolves the clinic and checks the license, failing closed.
pub(crate) async fn require_license(
    gate: &dyn LicenseGate,
    extension_id: &str,
    purpose: LicensePurpose,
) -> Result<ClinicId, LicenseDenial> {
    let Some(clinic_id) = gate.resolve_clinic_id().await else {
        warn!(
            "event=license_check module=gate status=denied purpose={} extension_id={} reason=no_clinic",
            purpose.as_str(),
            extension_id
        );
        return Err(LicenseDenial::NoClinicContext);
    };

    let check = match purpose {
        LicensePurpose::Execution => {
            gate.check_license_for_execution(extension_id, &clinic_id)
                .await
        }
        LicensePurpose::Render => gate.check_license_for_render(extension_id, &clinic_id).await,
    };

    match check {
        Ok(check) if check.allowed => Ok(clinic_id),
        Ok(_) => {
            warn!(
                "event=license_check module=gate status=denied purpose={} extension_id={} clinic_id={} reason=disallowed",
                purpose.as_str(),
                extension_id,
                clinic_id
            );
            Err(LicenseDenial::Invalid)
        }
        Err(err) => {
            warn!(
                "event=license_check module=gate status=error purpose={} extension_id={} clinic_id={} error={}",
                purpose.as_str(),
                extension_id,
                clinic_id,
                err
            );
            Err(LicenseDenial::Invalid)
        }
    }
}
