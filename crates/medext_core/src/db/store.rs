//! Host state store and SQLite audit sink.
//!
//! # Responsibility
//! - Persist per-extension admin state so grants survive restarts.
//! - Append command audit records.
//!
//! # Invariants
//! - One row per extension id; `save` is an upsert.
//! - Audit rows are append-only.

use crate::audit::{AuditError, AuditRecord, AuditSink};
use crate::db::{open_db, open_db_in_memory, DbError, DbResult};
use crate::extension::capability::CapabilitySet;
use crate::extension::manifest::parse_command_context;
use crate::extension::registry::{now_epoch_ms, ExtensionState, PersistedExtensionState};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Durable storage for registry admin state.
pub trait ExtensionStateStore: Send + Sync {
    fn load_all(&self) -> DbResult<Vec<PersistedExtensionState>>;
    fn save(&self, state: &PersistedExtensionState) -> DbResult<()>;
    fn remove(&self, extension_id: &str) -> DbResult<()>;
}

/// SQLite-backed state store and audit sink.
#[derive(Debug)]
pub struct HostStore {
    conn: Mutex<Connection>,
}

impl HostStore {
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        Ok(Self::from_connection(open_db(path)?))
    }

    pub fn open_in_memory() -> DbResult<Self> {
        Ok(Self::from_connection(open_db_in_memory()?))
    }

    /// Wraps an already migrated connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Most recent audit records first, optionally for one extension.
    pub fn recent_audit(
        &self,
        extension_id: Option<&str>,
        limit: u32,
    ) -> DbResult<Vec<AuditRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT audit_id, extension_id, extension_version, user_id, command_id,
                    context, entity_id, recorded_at_ms
             FROM command_audit
             WHERE (?1 IS NULL OR extension_id = ?1)
             ORDER BY recorded_at_ms DESC, audit_id ASC
             LIMIT ?2;",
        )?;
        let mut rows = stmt.query(params![extension_id, i64::from(limit)])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_audit_row(row)?);
        }
        Ok(records)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ExtensionStateStore for HostStore {
    fn load_all(&self) -> DbResult<Vec<PersistedExtensionState>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT extension_id, version, state, granted_json, installed_at_ms, enabled_at_ms
             FROM extension_state
             ORDER BY extension_id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut states = Vec::new();
        while let Some(row) = rows.next()? {
            states.push(parse_state_row(row)?);
        }
        Ok(states)
    }

    fn save(&self, state: &PersistedExtensionState) -> DbResult<()> {
        let granted_json =
            serde_json::to_string(&state.granted).map_err(|err| DbError::CorruptRow {
                table: "extension_state",
                key: state.extension_id.clone(),
                message: err.to_string(),
            })?;
        self.lock().execute(
            "INSERT INTO extension_state (
                extension_id, version, state, granted_json,
                installed_at_ms, enabled_at_ms, updated_at_ms
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(extension_id) DO UPDATE SET
                version = excluded.version,
                state = excluded.state,
                granted_json = excluded.granted_json,
                installed_at_ms = excluded.installed_at_ms,
                enabled_at_ms = excluded.enabled_at_ms,
                updated_at_ms = excluded.updated_at_ms;",
            params![
                state.extension_id,
                state.version,
                state.state.as_str(),
                granted_json,
                state.installed_at_ms,
                state.enabled_at_ms,
                now_epoch_ms(),
            ],
        )?;
        Ok(())
    }

    fn remove(&self, extension_id: &str) -> DbResult<()> {
        self.lock().execute(
            "DELETE FROM extension_state WHERE extension_id = ?1;",
            params![extension_id],
        )?;
        Ok(())
    }
}

impl AuditSink for HostStore {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.lock()
            .execute(
                "INSERT INTO command_audit (
                    audit_id, extension_id, extension_version, user_id,
                    command_id, context, entity_id, recorded_at_ms
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
                params![
                    record.audit_id.to_string(),
                    record.extension_id,
                    record.extension_version,
                    record.user_id,
                    record.command_id,
                    record.context.as_str(),
                    record.entity_id,
                    record.recorded_at_ms,
                ],
            )
            .map(|_| ())
            .map_err(|err| AuditError(err.to_string()))
    }
}

fn parse_state_row(row: &Row<'_>) -> DbResult<PersistedExtensionState> {
    let extension_id: String = row.get(0)?;
    let raw_state: String = row.get(2)?;
    let granted_json: String = row.get(3)?;

    let corrupt = |message: String| DbError::CorruptRow {
        table: "extension_state",
        key: extension_id.clone(),
        message,
    };
    let state = ExtensionState::parse(&raw_state)
        .ok_or_else(|| corrupt(format!("unknown state `{raw_state}`")))?;
    let granted: CapabilitySet =
        serde_json::from_str(&granted_json).map_err(|err| corrupt(err.to_string()))?;

    Ok(PersistedExtensionState {
        version: row.get(1)?,
        state,
        granted,
        installed_at_ms: row.get(4)?,
        enabled_at_ms: row.get(5)?,
        extension_id,
    })
}

fn parse_audit_row(row: &Row<'_>) -> DbResult<AuditRecord> {
    let raw_id: String = row.get(0)?;
    let raw_context: String = row.get(5)?;

    let corrupt = |message: String| DbError::CorruptRow {
        table: "command_audit",
        key: raw_id.clone(),
        message,
    };
    let audit_id = Uuid::parse_str(&raw_id).map_err(|err| corrupt(err.to_string()))?;
    let context = parse_command_context(&raw_context)
        .ok_or_else(|| corrupt(format!("unknown context `{raw_context}`")))?;

    Ok(AuditRecord {
        audit_id,
        extension_id: row.get(1)?,
        extension_version: row.get(2)?,
        user_id: row.get(3)?,
        command_id: row.get(4)?,
        context,
        entity_id: row.get(6)?,
        recorded_at_ms: row.get(7)?,
    })
}
