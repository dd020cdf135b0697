//! Tool surface
//!
//! The three operations the model may call: schema introspection, protocol
//! retrieval, and policy-gated SQL execution. Tools are registered with the
//! orchestrator wrapped in the audit recorder (see [`crate::audit`]).

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::gate::PolicyGate;
use crate::protocol::ProtocolStore;
use crate::store::TrialStore;

/// Result from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// The output handed back to the model
    pub output: Value,
    /// Governance approval recorded in the audit log; `false` only when the
    /// policy gate denied the statement
    pub approved: bool,
    /// Soft failure message, surfaced to the model as an error reply
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: Value) -> Self {
        Self {
            output,
            approved: true,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            output: Value::Null,
            approved: true,
            error: Some(message.into()),
        }
    }

    /// Mark this result as denied by governance.
    pub fn unapproved(mut self) -> Self {
        self.approved = false;
        self
    }
}

/// Trait for all tools callable by the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name advertised to the model
    fn name(&self) -> &str;

    /// Description advertised to the model
    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments
    async fn execute(&self, arguments: Value) -> Result<ToolResult>;
}

/// Reports table and column names with their declared types, excluding the
/// audit table.
pub struct SchemaTool {
    store: TrialStore,
}

impl SchemaTool {
    pub fn new(store: TrialStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SchemaTool {
    fn name(&self) -> &str {
        "list_schema"
    }

    fn description(&self) -> &str {
        "Return a mapping of table names to column names and data types. \
         Call this first to learn which tables and columns exist before \
         writing any SQL."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, _arguments: Value) -> Result<ToolResult> {
        let schema = self.store.list_schema().await?;
        Ok(ToolResult::success(serde_json::to_value(schema)?))
    }
}

/// Returns the study protocol document describing the data-governance rules.
pub struct ProtocolTool {
    protocol: ProtocolStore,
}

impl ProtocolTool {
    pub fn new(protocol: ProtocolStore) -> Self {
        Self { protocol }
    }
}

#[async_trait]
impl Tool for ProtocolTool {
    fn name(&self) -> &str {
        "get_study_protocol"
    }

    fn description(&self) -> &str {
        "Return the study protocol document that defines the data-governance \
         rules all queries must comply with."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, _arguments: Value) -> Result<ToolResult> {
        let text = self.protocol.load().await?;
        Ok(ToolResult::success(Value::String(text)))
    }
}

/// Arguments accepted by [`RunSqlTool`].
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunSqlArgs {
    /// A read-only SELECT statement
    pub query: String,
    /// Optional positional parameters for a parameterised query
    #[serde(default)]
    pub params: Option<Vec<Value>>,
}

/// Executes a statement against the clinical dataset after the policy gate
/// has approved it.
pub struct RunSqlTool {
    gate: Arc<PolicyGate>,
    store: TrialStore,
}

impl RunSqlTool {
    pub fn new(gate: Arc<PolicyGate>, store: TrialStore) -> Self {
        Self { gate, store }
    }
}

#[async_trait]
impl Tool for RunSqlTool {
    fn name(&self) -> &str {
        "run_sql"
    }

    fn description(&self) -> &str {
        "Execute a SQL SELECT statement against the clinical database and \
         return the rows. Every statement is checked against the study \
         protocol before execution; non-compliant queries are refused with an \
         explanation. Always call list_schema first to verify table and \
         column names."
    }

    fn parameters_schema(&self) -> Value {
        let schema = schemars::schema_for!(RunSqlArgs);
        serde_json::to_value(schema.schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult> {
        let args: RunSqlArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => return Ok(ToolResult::error(format!("invalid arguments: {}", e))),
        };

        // No statement executes unchecked.
        let decision = self.gate.check(&args.query).await;
        if !decision.allowed {
            let payload = serde_json::json!({
                "error": format!(
                    "Protocol violation: {}. You can view the study protocol with the get_study_protocol tool.",
                    decision.reason
                ),
                "rows": [],
                "rowcount": 0,
            });
            return Ok(ToolResult::success(payload).unapproved());
        }

        let params = args.params.unwrap_or_default();
        let output = self.store.run(&args.query, &params).await;
        Ok(ToolResult::success(serde_json::to_value(output)?))
    }
}
