//! Command handler contract and process-wide handler table.
//!
//! Handlers are keyed by command id only, independent of which extension
//! contributes the command.

use crate::extension::access::Role;
use crate::extension::capability::CapabilitySet;
use crate::extension::manifest::CommandContext;
use async_trait::async_trait;
use log::{info, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Input handed to a command handler once every gate has passed.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandExecutionContext {
    pub extension_id: String,
    pub user_id: String,
    pub role: Role,
    pub context: CommandContext,
    pub entity_id: Option<String>,
    pub granted_capabilities: CapabilitySet,
}

/// What a handler returns. The router re-stamps extension/command ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    pub success: bool,
    pub message: Option<String>,
    pub data: Option<Value>,
}

impl CommandOutput {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Error raised from inside a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError(pub String);

impl Display for HandlerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for HandlerError {}

impl From<String> for HandlerError {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for HandlerError {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Command implementation registered by the host process.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(&self, ctx: CommandExecutionContext) -> Result<CommandOutput, HandlerError>;
}

/// Adapter turning a synchronous closure into a handler.
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> CommandHandler for FnHandler<F>
where
    F: Fn(CommandExecutionContext) -> Result<CommandOutput, HandlerError> + Send + Sync,
{
    async fn execute(&self, ctx: CommandExecutionContext) -> Result<CommandOutput, HandlerError> {
        (self.f)(ctx)
    }
}

/// Wraps a closure as a shareable handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn CommandHandler>
where
    F: Fn(CommandExecutionContext) -> Result<CommandOutput, HandlerError> + Send + Sync + 'static,
{
    Arc::new(FnHandler { f })
}

/// Handler table keyed by command id.
#[derive(Default)]
pub struct CommandHandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn CommandHandler>>,
}

impl CommandHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler; an existing handler for the id is replaced.
    ///
    /// Returns `true` when a previous handler was overwritten.
    pub fn register(&mut self, command_id: &str, handler: Arc<dyn CommandHandler>) -> bool {
        let command_id = command_id.trim().to_string();
        let replaced = self.handlers.insert(command_id.clone(), handler).is_some();
        if replaced {
            warn!(
                "event=handler_register module=router status=overwrite command_id={}",
                command_id
            );
        } else {
            info!(
                "event=handler_register module=router status=ok command_id={}",
                command_id
            );
        }
        replaced
    }

    /// Returns `true` when a handler was removed.
    pub fn unregister(&mut self, command_id: &str) -> bool {
        self.handlers.remove(command_id.trim()).is_some()
    }

    pub fn get(&self, command_id: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(command_id.trim()).cloned()
    }

    pub fn contains(&self, command_id: &str) -> bool {
        self.handlers.contains_key(command_id.trim())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Sorted command ids with a registered handler.
    pub fn command_ids(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}
