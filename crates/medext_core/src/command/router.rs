//! Gated command execution.
//!
//! # Responsibility
//! - Resolve a command id and run it through the context, capability and
//!   license gates before dispatching to its handler.
//!
//! # Invariants
//! - Every failure is returned as a `CommandResult`; nothing panics or
//!   propagates out of `execute_command`.
//! - The audit record is written after all gates pass and before the handler
//!   runs, whatever the handler later does.
//! - No registry or handler lock is held across an `.await`.

use crate::audit::AuditRecord;
use crate::command::handler::{CommandExecutionContext, CommandOutput};
use crate::extension::access::{can_access, Role};
use crate::extension::capability::{ActionKind, ResourceKind};
use crate::extension::manifest::{CommandContext, CommandContribution};
use crate::extension::registry::InstalledExtension;
use crate::gate::{require_license, FailureKind, LicenseDenial, LicensePurpose};
use crate::host::ExtensionHost;
use futures::FutureExt;
use log::{error, info, warn};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::panic::AssertUnwindSafe;
use std::time::Instant;

/// One command invocation issued by the UI or automation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command_id: String,
    pub user_id: String,
    pub role: Role,
    pub context: CommandContext,
    pub entity_id: Option<String>,
}

impl CommandRequest {
    pub fn new(
        command_id: impl Into<String>,
        user_id: impl Into<String>,
        role: Role,
        context: CommandContext,
    ) -> Self {
        Self {
            command_id: command_id.into(),
            user_id: user_id.into(),
            role,
            context,
            entity_id: None,
        }
    }

    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }
}

/// Structured outcome of `execute_command`.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub success: bool,
    pub message: Option<String>,
    pub data: Option<Value>,
    /// `None` only when the command id could not be resolved.
    pub extension_id: Option<String>,
    pub command_id: String,
    pub failure: Option<FailureKind>,
}

/// Reason a command did not run (or failed while running).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandFailure {
    NotFound(String),
    NotEnabled(String),
    ContextMismatch(CommandContext),
    MissingPermission {
        resource: ResourceKind,
        action: ActionKind,
    },
    NoClinicContext,
    LicenseInvalid,
    NoHandler(String),
    HandlerFailed(String),
    HandlerPanicked,
}

impl CommandFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NotFound(_) | Self::NoHandler(_) => FailureKind::NotFound,
            Self::NotEnabled(_) | Self::ContextMismatch(_) | Self::MissingPermission { .. } => {
                FailureKind::NotAuthorized
            }
            Self::NoClinicContext | Self::LicenseInvalid => FailureKind::LicenseDenied,
            Self::HandlerFailed(_) | Self::HandlerPanicked => FailureKind::ExecutionFailure,
        }
    }

    fn reason_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::NotEnabled(_) => "not_enabled",
            Self::ContextMismatch(_) => "context_mismatch",
            Self::MissingPermission { .. } => "missing_permission",
            Self::NoClinicContext => "no_clinic",
            Self::LicenseInvalid => "license_invalid",
            Self::NoHandler(_) => "no_handler",
            Self::HandlerFailed(_) => "handler_error",
            Self::HandlerPanicked => "handler_panic",
        }
    }
}

impl From<LicenseDenial> for CommandFailure {
    fn from(value: LicenseDenial) -> Self {
        match value {
            LicenseDenial::NoClinicContext => Self::NoClinicContext,
            LicenseDenial::Invalid => Self::LicenseInvalid,
        }
    }
}

impl Display for CommandFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "command not found: {id}"),
            Self::NotEnabled(id) => write!(f, "extension `{id}` is not enabled"),
            Self::ContextMismatch(context) => {
                write!(f, "this command cannot run in this screen ({context})")
            }
            Self::MissingPermission { resource, action } => {
                write!(f, "missing permission: {resource}:{action}")
            }
            Self::NoClinicContext => write!(f, "no clinic context; license cannot be verified"),
            Self::LicenseInvalid => write!(f, "extension license is invalid for this clinic"),
            Self::NoHandler(id) => write!(f, "no handler registered for command: {id}"),
            Self::HandlerFailed(message) => write!(f, "command failed: {message}"),
            Self::HandlerPanicked => write!(f, "command failed: handler panicked"),
        }
    }
}

impl ExtensionHost {
    /// Validates and dispatches one command invocation.
    pub async fn execute_command(&self, request: CommandRequest) -> CommandResult {
        let started_at = Instant::now();

        let Some((extension, command)) = self.resolve_command(&request.command_id) else {
            let failure = CommandFailure::NotFound(request.command_id.clone());
            return failed(&request, None, failure);
        };

        if let Err(failure) = self.check_command_gates(&extension, &command, &request) {
            return failed(&request, Some(extension.id()), failure);
        }

        if let Err(denial) = require_license(
            self.license.as_ref(),
            extension.id(),
            LicensePurpose::Execution,
        )
        .await
        {
            return failed(&request, Some(extension.id()), denial.into());
        }

        let handler = self.handlers().get(&request.command_id);
        let Some(handler) = handler else {
            let failure = CommandFailure::NoHandler(request.command_id.clone());
            return failed(&request, Some(extension.id()), failure);
        };

        let record = AuditRecord::new(
            extension.id(),
            extension.version(),
            request.user_id.as_str(),
            request.command_id.as_str(),
            request.context,
            request.entity_id.clone(),
        );
        if let Err(err) = self.audit.record(&record) {
            error!(
                "event=command_audit module=router status=error command_id={} error={}",
                request.command_id, err
            );
        }

        let ctx = CommandExecutionContext {
            extension_id: extension.id().to_string(),
            user_id: request.user_id.clone(),
            role: request.role,
            context: request.context,
            entity_id: request.entity_id.clone(),
            granted_capabilities: extension.granted().clone(),
        };

        let outcome = AssertUnwindSafe(handler.execute(ctx)).catch_unwind().await;
        match outcome {
            Ok(Ok(output)) => {
                info!(
                    "event=command_execute module=router status=ok command_id={} extension_id={} handler_success={} duration_ms={}",
                    request.command_id,
                    extension.id(),
                    output.success,
                    started_at.elapsed().as_millis()
                );
                stamped(&request, extension.id(), output)
            }
            Ok(Err(err)) => failed(
                &request,
                Some(extension.id()),
                CommandFailure::HandlerFailed(err.to_string()),
            ),
            Err(_) => failed(
                &request,
                Some(extension.id()),
                CommandFailure::HandlerPanicked,
            ),
        }
    }

    fn resolve_command(
        &self,
        command_id: &str,
    ) -> Option<(InstalledExtension, CommandContribution)> {
        let registry = self.registry();
        registry
            .find_command(command_id)
            .map(|(extension, command)| (extension.clone(), command.clone()))
    }

    fn check_command_gates(
        &self,
        extension: &InstalledExtension,
        command: &CommandContribution,
        request: &CommandRequest,
    ) -> Result<(), CommandFailure> {
        if !extension.is_enabled() {
            return Err(CommandFailure::NotEnabled(extension.id().to_string()));
        }

        if !command.runs_in(request.context) {
            return Err(CommandFailure::ContextMismatch(request.context));
        }

        if let Some(required) = &command.required_capabilities {
            for (resource, actions) in required.resources() {
                if resource == ResourceKind::Network {
                    continue;
                }
                for action in actions {
                    if !can_access(
                        extension,
                        resource,
                        *action,
                        request.role,
                        self.roles.as_ref(),
                    ) {
                        return Err(CommandFailure::MissingPermission {
                            resource,
                            action: *action,
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

fn stamped(request: &CommandRequest, extension_id: &str, output: CommandOutput) -> CommandResult {
    CommandResult {
        success: output.success,
        message: output.message,
        data: output.data,
        extension_id: Some(extension_id.to_string()),
        command_id: request.command_id.clone(),
        failure: (!output.success).then_some(FailureKind::ExecutionFailure),
    }
}

fn failed(
    request: &CommandRequest,
    extension_id: Option<&str>,
    failure: CommandFailure,
) -> CommandResult {
    warn!(
        "event=command_execute module=router status=denied command_id={} extension_id={} user_id={} context={} reason={}",
        request.command_id,
        extension_id.unwrap_or("-"),
        request.user_id,
        request.context,
        failure.reason_code()
    );
    CommandResult {
        success: false,
        message: Some(failure.to_string()),
        data: None,
        extension_id: extension_id.map(str::to_string),
        command_id: request.command_id.clone(),
        failure: Some(failure.kind()),
    }
}
