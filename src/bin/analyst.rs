//! Interactive analyst shell.
//!
//! Wires configuration, dataset, audit log, policy gate, and orchestrator
//! together and drives a line-based chat loop. Commands: `:clear` resets the
//! session, `:audit` prints the most recent audit entries, `:quit` exits.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use clinical_gate::{
    AnalystConfig, AuditLog, AuditedTool, ChatSession, ModelProvider, OpenAIProvider, Orchestrator,
    PolicyGate, ProtocolStore, ProtocolTool, RunSqlTool, SchemaTool, TrialStore,
};

const DEMO_SUBJECTS: usize = 2000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AnalystConfig::load();

    let default_filter = if config.debug_mode {
        "clinical_gate=debug,analyst=debug"
    } else {
        "clinical_gate=info,analyst=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let store = TrialStore::new(&config.db_path).await?;
    if store.ensure_demo_dataset(DEMO_SUBJECTS).await? {
        info!(path = %config.db_path.display(), "created demo dataset");
    }

    // The audit table must be reset before any tool becomes callable.
    let audit = AuditLog::new(store.pool().clone());
    audit.init().await?;

    let protocol = ProtocolStore::new(&config.protocol_path);
    if protocol.ensure_demo().await? {
        info!(path = %protocol.path().display(), "wrote demo study protocol");
    }

    let provider: Arc<dyn ModelProvider> = Arc::new(OpenAIProvider::from_config(&config));
    let gate = Arc::new(
        PolicyGate::new(provider.clone(), protocol.clone()).with_timeout(config.api_timeout()),
    );

    let orchestrator = Orchestrator::new(provider)
        .with_tools(vec![
            AuditedTool::wrap(Arc::new(SchemaTool::new(store.clone())), audit.clone()),
            AuditedTool::wrap(Arc::new(ProtocolTool::new(protocol)), audit.clone()),
            AuditedTool::wrap(Arc::new(RunSqlTool::new(gate, store)), audit.clone()),
        ])
        .with_max_turns(config.max_turns)
        .with_timeout(config.api_timeout());

    let mut session = ChatSession::new();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    stdout
        .write_all(
            b"Clinical analyst shell. Ask a question, or use :clear, :audit, :quit.\n> ",
        )
        .await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        match input {
            "" => {}
            ":quit" | ":q" => break,
            ":clear" => {
                orchestrator.clear(&mut session);
                stdout.write_all(b"Session cleared.\n").await?;
            }
            ":audit" => {
                let entries = audit.recent(config.audit_limit).await?;
                if entries.is_empty() {
                    stdout.write_all(b"No audit entries yet.\n").await?;
                }
                for entry in entries {
                    let row = format!(
                        "#{} {} {} approved={} args={}\n",
                        entry.id, entry.timestamp, entry.tool_name, entry.approved, entry.arguments
                    );
                    stdout.write_all(row.as_bytes()).await?;
                }
            }
            question => match orchestrator.ask(&mut session, question).await {
                Ok(answer) => {
                    stdout.write_all(answer.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                }
                Err(e) => {
                    let msg = format!("error: {} (the conversation can be resumed)\n", e);
                    stdout.write_all(msg.as_bytes()).await?;
                }
            },
        }
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
    }

    Ok(())
}
