//! Gated template rendering.
//!
//! Order: resolve (enabled only) → enabled → read permission on the target
//! entity → clinic id → render license → load/compile/cache → execute.

use crate::extension::access::{can_access, Role};
use crate::extension::capability::{ActionKind, ResourceKind};
use crate::extension::manifest::TemplateContribution;
use crate::extension::registry::InstalledExtension;
use crate::gate::{require_license, FailureKind, LicenseDenial, LicensePurpose};
use crate::host::ExtensionHost;
use crate::template::TemplateError;
use log::{info, warn};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub template_id: String,
    pub user_id: String,
    pub role: Role,
    pub data: Value,
}

impl RenderRequest {
    pub fn new(
        template_id: impl Into<String>,
        user_id: impl Into<String>,
        role: Role,
        data: Value,
    ) -> Self {
        Self {
            template_id: template_id.into(),
            user_id: user_id.into(),
            role,
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResult {
    pub success: bool,
    pub html: Option<String>,
    pub error: Option<String>,
    pub extension_id: Option<String>,
    pub template_id: String,
    pub failure: Option<FailureKind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderFailure {
    NotFound(String),
    NotEnabled(String),
    MissingPermission(ResourceKind),
    NoClinicContext,
    LicenseInvalid,
    Template(TemplateError),
}

impl RenderFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NotFound(_) => FailureKind::NotFound,
            Self::NotEnabled(_) | Self::MissingPermission(_) => FailureKind::NotAuthorized,
            Self::NoClinicContext | Self::LicenseInvalid => FailureKind::LicenseDenied,
            Self::Template(_) => FailureKind::ExecutionFailure,
        }
    }

    fn reason_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::NotEnabled(_) => "not_enabled",
            Self::MissingPermission(_) => "missing_permission",
            Self::NoClinicContext => "no_clinic",
            Self::LicenseInvalid => "license_invalid",
            Self::Template(TemplateError::OutsideRoot { .. }) => "outside_root",
            Self::Template(TemplateError::NotFound { .. }) => "template_missing",
            Self::Template(_) => "compile_error",
        }
    }
}

impl From<LicenseDenial> for RenderFailure {
    fn from(value: LicenseDenial) -> Self {
        match value {
            LicenseDenial::NoClinicContext => Self::NoClinicContext,
            LicenseDenial::Invalid => Self::LicenseInvalid,
        }
    }
}

impl Display for RenderFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "template not found: {id}"),
            Self::NotEnabled(id) => write!(f, "extension `{id}` is not enabled"),
            Self::MissingPermission(resource) => {
                write!(f, "missing permission: {resource}:{}", ActionKind::Read)
            }
            Self::NoClinicContext => write!(f, "no clinic context; license cannot be verified"),
            Self::LicenseInvalid => write!(f, "extension license is invalid for this clinic"),
            Self::Template(err) => write!(f, "template could not be rendered: {err}"),
        }
    }
}

impl ExtensionHost {
    /// Renders one contributed template against `request.data`.
    pub async fn render_template(&self, request: RenderRequest) -> RenderResult {
        let started_at = Instant::now();

        let Some((extension, template)) = self.resolve_template(&request.template_id) else {
            let failure = RenderFailure::NotFound(request.template_id.clone());
            return failed(&request, None, failure);
        };

        if !extension.is_enabled() {
            let failure = RenderFailure::NotEnabled(extension.id().to_string());
            return failed(&request, Some(extension.id()), failure);
        }

        if !can_access(
            &extension,
            template.target_entity,
            ActionKind::Read,
            request.role,
            self.roles.as_ref(),
        ) {
            let failure = RenderFailure::MissingPermission(template.target_entity);
            return failed(&request, Some(extension.id()), failure);
        }

        if let Err(denial) =
            require_license(self.license.as_ref(), extension.id(), LicensePurpose::Render).await
        {
            return failed(&request, Some(extension.id()), denial.into());
        }

        let compiled = match self.templates.load_and_compile(&extension, &template) {
            Ok(compiled) => compiled,
            Err(err) => {
                return failed(&request, Some(extension.id()), RenderFailure::Template(err));
            }
        };

        let html = compiled.render(&request.data);
        info!(
            "event=template_render module=template status=ok template_id={} extension_id={} user_id={} bytes={} duration_ms={}",
            request.template_id,
            extension.id(),
            request.user_id,
            html.len(),
            started_at.elapsed().as_millis()
        );
        RenderResult {
            success: true,
            html: Some(html),
            error: None,
            extension_id: Some(extension.id().to_string()),
            template_id: request.template_id,
            failure: None,
        }
    }

    fn resolve_template(
        &self,
        template_id: &str,
    ) -> Option<(InstalledExtension, TemplateContribution)> {
        let registry = self.registry();
        registry
            .find_template(template_id)
            .map(|(extension, template)| (extension.clone(), template.clone()))
    }
}

fn failed(
    request: &RenderRequest,
    extension_id: Option<&str>,
    failure: RenderFailure,
) -> RenderResult {
    warn!(
        "event=template_render module=template status=denied template_id={} extension_id={} user_id={} reason={}",
        request.template_id,
        extension_id.unwrap_or("-"),
        request.user_id,
        failure.reason_code()
    );
    RenderResult {
        success: false,
        html: None,
        error: Some(failure.to_string()),
        extension_id: extension_id.map(str::to_string),
        template_id: request.template_id.clone(),
        failure: Some(failure.kind()),
    }
}
