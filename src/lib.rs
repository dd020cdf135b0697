//! # Protocol-governed SQL analysis for clinical-trial data
//!
//! An analyst asks natural-language questions; a model translates them into
//! read-only SQL; a governance gate checks every candidate statement against
//! the written study protocol before it may touch the dataset; and every tool
//! invocation is recorded in an audit log.
//!
//! ## Core Concepts
//!
//! - **[`PolicyGate`]**: asks a policy oracle (a second model call) whether a
//!   statement violates the protocol, and fails closed: any error in the
//!   check is a denial, never an allow.
//! - **Tools**: [`SchemaTool`], [`ProtocolTool`], and [`RunSqlTool`] are the
//!   fixed vocabulary the model can call; each is wrapped by [`AuditedTool`]
//!   so every invocation lands in the audit log.
//! - **[`Orchestrator`]**: runs the model-driven dispatch loop over an
//!   explicit [`ChatSession`], feeding tool outputs back to the model until
//!   it produces a final answer.
//!
//! ## Getting Started
//!
//! Set your API key in the `OPENAI_API_KEY` environment variable.
//!
//! ```rust,no_run
//! use clinical_gate::{
//!     AnalystConfig, AuditLog, AuditedTool, ChatSession, ModelProvider, OpenAIProvider,
//!     Orchestrator, PolicyGate, ProtocolStore, ProtocolTool, RunSqlTool, SchemaTool, TrialStore,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> clinical_gate::Result<()> {
//! let config = AnalystConfig::load();
//! let store = TrialStore::new(&config.db_path).await?;
//! store.ensure_demo_dataset(2000).await?;
//!
//! // The audit table is cleared before any tool becomes callable.
//! let audit = AuditLog::new(store.pool().clone());
//! audit.init().await?;
//!
//! let protocol = ProtocolStore::new(&config.protocol_path);
//! let provider: Arc<dyn ModelProvider> = Arc::new(OpenAIProvider::from_config(&config));
//! let gate = Arc::new(
//!     PolicyGate::new(provider.clone(), protocol.clone()).with_timeout(config.api_timeout()),
//! );
//!
//! let orchestrator = Orchestrator::new(provider).with_tools(vec![
//!     AuditedTool::wrap(Arc::new(SchemaTool::new(store.clone())), audit.clone()),
//!     AuditedTool::wrap(Arc::new(ProtocolTool::new(protocol)), audit.clone()),
//!     AuditedTool::wrap(Arc::new(RunSqlTool::new(gate, store)), audit.clone()),
//! ]);
//!
//! let mut session = ChatSession::new();
//! let answer = orchestrator
//!     .ask(&mut session, "What is the average age by site?")
//!     .await?;
//! println!("{}", answer);
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod gate;
pub mod items;
pub mod model;
pub mod orchestrator;
pub mod protocol;
pub mod store;
pub mod tool;

pub use audit::{AuditEntry, AuditLog, AuditedTool, AUDIT_TABLE};
pub use config::{AnalystConfig, DEFAULT_SERVER_URL};
pub use error::{AnalystError, Result};
pub use gate::{PolicyDecision, PolicyGate};
pub use items::{Message, ModelResponse, Role, ToolCall};
pub use model::{ModelProvider, OpenAIProvider, ScriptedProvider};
pub use orchestrator::{
    ChatSession, ConversationTurn, Orchestrator, SessionState, ANALYST_INSTRUCTIONS,
};
pub use protocol::ProtocolStore;
pub use store::{QueryOutput, TrialStore, CLINICAL_TABLE};
pub use tool::{ProtocolTool, RunSqlArgs, RunSqlTool, SchemaTool, Tool, ToolResult};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_imports() {
        // Verify that the error type is wired through the public surface
        let _ = std::mem::size_of::<AnalystError>();
    }
}
