//! The gate's fail-closed law: an error anywhere in the policy check is a
//! denial, never an allow and never a pass-through execution.

use async_trait::async_trait;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use clinical_gate::{
    AnalystError, Message, ModelProvider, ModelResponse, PolicyGate, ProtocolStore, Result,
    RunSqlTool, ScriptedProvider, Tool, TrialStore,
};

struct ErringProvider;

#[async_trait]
impl ModelProvider for ErringProvider {
    async fn complete(
        &self,
        _messages: Vec<Message>,
        _tools: Vec<Arc<dyn Tool>>,
        _temperature: Option<f32>,
        _max_tokens: Option<u32>,
    ) -> Result<ModelResponse> {
        Err(AnalystError::ModelBehaviorError {
            message: "oracle unreachable".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "erring"
    }
}

struct StalledProvider;

#[async_trait]
impl ModelProvider for StalledProvider {
    async fn complete(
        &self,
        _messages: Vec<Message>,
        _tools: Vec<Arc<dyn Tool>>,
        _temperature: Option<f32>,
        _max_tokens: Option<u32>,
    ) -> Result<ModelResponse> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ModelResponse::new_message("{\"allowed\": true}"))
    }

    fn model_name(&self) -> &str {
        "stalled"
    }
}

async fn protocol_in(dir: &tempfile::TempDir) -> ProtocolStore {
    let path = dir.path().join("protocol.md");
    tokio::fs::write(&path, "Subject identifiers must never be returned.")
        .await
        .unwrap();
    ProtocolStore::new(path)
}

#[tokio::test]
async fn oracle_error_is_a_denial() {
    let dir = tempfile::tempdir().unwrap();
    let gate = PolicyGate::new(Arc::new(ErringProvider), protocol_in(&dir).await);

    let decision = gate.check("SELECT COUNT(*) FROM clinical").await;
    assert!(!decision.allowed);
    assert!(decision.reason.contains("LLM policy check failed"));
}

#[tokio::test]
async fn unparseable_reply_is_a_denial() {
    let dir = tempfile::tempdir().unwrap();
    let provider =
        Arc::new(ScriptedProvider::new("oracle").with_message("sure, that query seems fine"));
    let gate = PolicyGate::new(provider, protocol_in(&dir).await);

    let decision = gate.check("SELECT COUNT(*) FROM clinical").await;
    assert!(!decision.allowed);
}

#[tokio::test]
async fn oracle_timeout_is_a_denial() {
    let dir = tempfile::tempdir().unwrap();
    let gate = PolicyGate::new(Arc::new(StalledProvider), protocol_in(&dir).await)
        .with_timeout(Duration::from_millis(20));

    let decision = gate.check("SELECT COUNT(*) FROM clinical").await;
    assert!(!decision.allowed);
    assert!(decision.reason.contains("timed out"));
}

// Scenario: the oracle times out while the model has already asked to run a
// statement. The statement must come back denied, not silently executed.
#[tokio::test]
async fn oracle_timeout_never_passes_execution_through() {
    let dir = tempfile::tempdir().unwrap();
    let store = TrialStore::new_in_memory().await.unwrap();
    store.ensure_demo_dataset(20).await.unwrap();

    let gate = Arc::new(
        PolicyGate::new(Arc::new(StalledProvider), protocol_in(&dir).await)
            .with_timeout(Duration::from_millis(20)),
    );
    let tool = RunSqlTool::new(gate, store);

    let result = tool
        .execute(serde_json::json!({"query": "SELECT USUBJID FROM clinical LIMIT 10"}))
        .await
        .unwrap();

    assert!(!result.approved);
    let error = result.output["error"].as_str().unwrap();
    assert!(error.starts_with("Protocol violation:"));
    assert_eq!(result.output["rows"], serde_json::json!([]));
    assert_eq!(result.output["rowcount"], serde_json::json!(0));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    // For all SQL inputs: if the oracle call errors, the verdict is a denial.
    #[test]
    fn denies_every_statement_when_the_oracle_errs(sql in "\\PC{0,200}") {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let decision = rt.block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let gate = PolicyGate::new(Arc::new(ErringProvider), protocol_in(&dir).await);
            gate.check(&sql).await
        });
        prop_assert!(!decision.allowed);
    }
}
