//! Audit log
//!
//! Every tool invocation is recorded: timestamp, tool name, a serialized
//! snapshot of the arguments, and the governance approval flag. The table is
//! cleared exactly once at process start ([`AuditLog::init`] must complete
//! before any tool becomes callable) and grows append-only afterwards.
//!
//! Cross-cutting recording happens at the tool-registration boundary:
//! [`AuditedTool`] wraps any [`Tool`] and appends one entry per invocation,
//! successful or not. Persistence failures are logged and swallowed; the
//! wrapped call never fails because the audit write did.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::warn;

use crate::error::Result;
use crate::tool::{Tool, ToolResult};

/// Name of the audit table, excluded from schema introspection.
pub const AUDIT_TABLE: &str = "audit_log";

/// One recorded tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: String,
    pub tool_name: String,
    pub arguments: String,
    pub approved: bool,
}

/// Append-only, session-scoped audit store.
#[derive(Debug, Clone)]
pub struct AuditLog {
    pool: SqlitePool,
}

impl AuditLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the audit table if needed and clear previous entries so each
    /// session starts with a fresh log.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                arguments TEXT NOT NULL,
                approved BOOLEAN NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("DELETE FROM audit_log")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Append one entry. Best-effort: a persistence failure is logged, never
    /// propagated to the wrapped call.
    pub async fn record(&self, tool_name: &str, arguments: &Value, approved: bool) {
        let result = sqlx::query(
            "INSERT INTO audit_log (timestamp, tool_name, arguments, approved) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(tool_name)
        .bind(arguments.to_string())
        .bind(approved)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(tool = tool_name, error = %e, "failed to append audit entry");
        }
    }

    /// Most recent entries, newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT id, timestamp, tool_name, arguments, approved \
             FROM audit_log \
             ORDER BY timestamp DESC, id DESC \
             LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(AuditEntry {
                id: row.try_get("id")?,
                timestamp: row.try_get("timestamp")?,
                tool_name: row.try_get("tool_name")?,
                arguments: row.try_get("arguments")?,
                approved: row.try_get("approved")?,
            });
        }
        Ok(entries)
    }
}

/// A [`Tool`] wrapper that records every invocation in the audit log.
///
/// The approval flag captures the governance signal: `true` for tools that
/// need no gate, and for gated tools whatever approval the result carries.
pub struct AuditedTool {
    inner: Arc<dyn Tool>,
    audit: AuditLog,
}

impl AuditedTool {
    pub fn wrap(inner: Arc<dyn Tool>, audit: AuditLog) -> Arc<dyn Tool> {
        Arc::new(Self { inner, audit })
    }
}

#[async_trait]
impl Tool for AuditedTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn parameters_schema(&self) -> Value {
        self.inner.parameters_schema()
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult> {
        let result = self.inner.execute(arguments.clone()).await;
        let approved = match &result {
            Ok(r) => r.approved,
            // A hard tool failure is a technical fault, not a governance
            // denial; ungated tools stay approved.
            Err(_) => true,
        };
        self.audit
            .record(self.inner.name(), &arguments, approved)
            .await;
        result
    }
}
