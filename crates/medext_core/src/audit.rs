//! Command audit records and sinks.
//!
//! # Responsibility
//! - Describe the intent record emitted once a command passes every gate.
//! - Provide sink implementations for logs, memory and SQLite (see `db`).
//!
//! # Invariants
//! - A record is emitted before the handler runs, regardless of its outcome.
//! - Records never carry clinical payloads; `entity_id` is an opaque id.

use crate::extension::manifest::CommandContext;
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// One audited command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub audit_id: Uuid,
    pub extension_id: String,
    pub extension_version: String,
    pub user_id: String,
    pub command_id: String,
    pub context: CommandContext,
    pub entity_id: Option<String>,
    pub recorded_at_ms: i64,
}

impl AuditRecord {
    pub fn new(
        extension_id: impl Into<String>,
        extension_version: impl Into<String>,
        user_id: impl Into<String>,
        command_id: impl Into<String>,
        context: CommandContext,
        entity_id: Option<String>,
    ) -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            extension_id: extension_id.into(),
            extension_version: extension_version.into(),
            user_id: user_id.into(),
            command_id: command_id.into(),
            context,
            entity_id,
            recorded_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Writes audit records to the structured log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        info!(
            "event=command_audit module=audit status=ok audit_id={} extension_id={} extension_version={} user_id={} command_id={} context={} entity_id={}",
            record.audit_id,
            record.extension_id,
            record.extension_version,
            record.user_id,
            record.command_id,
            record.context,
            record.entity_id.as_deref().unwrap_or("-")
        );
        Ok(())
    }
}

/// Keeps audit records in memory; used by tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}

/// Audit sink failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditError(pub String);

impl Display for AuditError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to record audit entry: {}", self.0)
    }
}

impl Error for AuditError {}
