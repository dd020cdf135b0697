//! End-to-end behavior of the tool surface: governance scenarios, executor
//! outcome exclusivity, schema exclusion, and audit coverage.

use std::sync::Arc;

use clinical_gate::{
    AuditLog, AuditedTool, PolicyGate, ProtocolStore, ProtocolTool, RunSqlTool, SchemaTool,
    ScriptedProvider, Tool, TrialStore,
};

async fn seeded_store(n: usize) -> TrialStore {
    let store = TrialStore::new_in_memory().await.unwrap();
    store.ensure_demo_dataset(n).await.unwrap();
    store
}

async fn protocol_forbidding_identifiers(dir: &tempfile::TempDir) -> ProtocolStore {
    let path = dir.path().join("protocol.md");
    tokio::fs::write(
        &path,
        "Subject identifiers (USUBJID) must never be returned to an analyst.",
    )
    .await
    .unwrap();
    ProtocolStore::new(path)
}

fn gate_scripted(reply: &str, protocol: ProtocolStore) -> Arc<PolicyGate> {
    let provider = Arc::new(ScriptedProvider::new("oracle").with_message(reply));
    Arc::new(PolicyGate::new(provider, protocol))
}

// Scenario: the protocol forbids returning subject identifiers and the
// oracle enforces it; a query selecting USUBJID is denied with a reason that
// references identifier exposure.
#[tokio::test]
async fn identifier_query_is_denied() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(20).await;
    let gate = gate_scripted(
        "{\"allowed\": false, \"reason\": \"Returning USUBJID would expose subject identifiers\"}",
        protocol_forbidding_identifiers(&dir).await,
    );
    let tool = RunSqlTool::new(gate, store);

    let result = tool
        .execute(serde_json::json!({"query": "SELECT USUBJID FROM clinical LIMIT 10"}))
        .await
        .unwrap();

    assert!(!result.approved);
    let error = result.output["error"].as_str().unwrap();
    assert!(error.contains("Protocol violation"));
    assert!(error.contains("identifiers"));
    assert_eq!(result.output["rowcount"], serde_json::json!(0));
}

// Scenario: an aggregate query under a protocol with no aggregate
// restriction is allowed and returns one row per distinct site.
#[tokio::test]
async fn aggregate_query_is_allowed_and_grouped_by_site() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(50).await;

    let distinct_sites = store
        .run("SELECT COUNT(DISTINCT SITEID) AS n FROM clinical", &[])
        .await;
    let expected = distinct_sites.rows[0]["n"].as_i64().unwrap() as usize;

    let gate = gate_scripted(
        "{\"allowed\": true, \"reason\": \"Aggregate only\"}",
        protocol_forbidding_identifiers(&dir).await,
    );
    let tool = RunSqlTool::new(gate, store);

    let result = tool
        .execute(serde_json::json!({"query": "SELECT AVG(AGE) FROM clinical GROUP BY SITEID"}))
        .await
        .unwrap();

    assert!(result.approved);
    assert!(result.output.get("error").is_none());
    assert_eq!(
        result.output["rowcount"].as_u64().unwrap() as usize,
        expected
    );
    assert_eq!(
        result.output["rows"].as_array().unwrap().len(),
        expected
    );
}

// The two executor outcome forms are mutually exclusive.
#[tokio::test]
async fn executor_outcomes_are_exclusive() {
    let store = seeded_store(10).await;

    let ok = store.run("SELECT AGE FROM clinical LIMIT 3", &[]).await;
    assert!(ok.error.is_none());
    assert_eq!(ok.rowcount, ok.rows.len());

    let bad = store.run("SELECT MISSING FROM clinical", &[]).await;
    assert!(bad.error.is_some());
    assert!(bad.rows.is_empty());
    assert_eq!(bad.rowcount, 0);
}

// A gate-approved statement that fails at execution stays approved in the
// audit log; the failure is visible in the result payload instead.
#[tokio::test]
async fn approved_but_failing_execution_keeps_governance_approval() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(10).await;
    let audit = AuditLog::new(store.pool().clone());
    audit.init().await.unwrap();

    let gate = gate_scripted(
        "{\"allowed\": true}",
        protocol_forbidding_identifiers(&dir).await,
    );
    let tool = AuditedTool::wrap(Arc::new(RunSqlTool::new(gate, store)), audit.clone());

    let result = tool
        .execute(serde_json::json!({"query": "SELECT NO_SUCH_COLUMN FROM clinical"}))
        .await
        .unwrap();

    assert!(result.output["error"]
        .as_str()
        .unwrap()
        .contains("SQL error"));

    let entries = audit.recent(1).await.unwrap();
    assert_eq!(entries[0].tool_name, "run_sql");
    assert!(entries[0].approved);
}

#[tokio::test]
async fn schema_tool_never_reports_the_audit_table() {
    let store = seeded_store(10).await;
    let audit = AuditLog::new(store.pool().clone());
    audit.init().await.unwrap();

    let tool = SchemaTool::new(store);
    let result = tool.execute(serde_json::json!({})).await.unwrap();

    let tables = result.output.as_object().unwrap();
    assert!(tables.contains_key("clinical"));
    assert!(!tables.contains_key("audit_log"));
}

// Every tool invocation, successful or not, produces exactly one new entry.
#[tokio::test]
async fn every_invocation_appends_one_audit_entry() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(10).await;
    let audit = AuditLog::new(store.pool().clone());
    audit.init().await.unwrap();

    let protocol = protocol_forbidding_identifiers(&dir).await;
    let gate = gate_scripted("{\"allowed\": false}", protocol.clone());

    let schema_tool = AuditedTool::wrap(Arc::new(SchemaTool::new(store.clone())), audit.clone());
    let protocol_tool = AuditedTool::wrap(Arc::new(ProtocolTool::new(protocol)), audit.clone());
    let sql_tool = AuditedTool::wrap(Arc::new(RunSqlTool::new(gate, store)), audit.clone());

    schema_tool.execute(serde_json::json!({})).await.unwrap();
    protocol_tool.execute(serde_json::json!({})).await.unwrap();
    sql_tool
        .execute(serde_json::json!({"query": "SELECT USUBJID FROM clinical"}))
        .await
        .unwrap();
    // Malformed arguments still count as an invocation
    sql_tool
        .execute(serde_json::json!({"not_query": 1}))
        .await
        .unwrap();

    let entries = audit.recent(100).await.unwrap();
    assert_eq!(entries.len(), 4);

    // Newest first: the malformed call, then the denied statement
    assert_eq!(entries[0].tool_name, "run_sql");
    assert!(entries[0].approved);
    assert_eq!(entries[1].tool_name, "run_sql");
    assert!(!entries[1].approved);
    assert_eq!(entries[2].tool_name, "get_study_protocol");
    assert!(entries[2].approved);
    assert_eq!(entries[3].tool_name, "list_schema");
    assert!(entries[3].approved);
}

// A protocol edit takes effect on the next check; nothing caches the text.
#[tokio::test]
async fn protocol_tool_sees_edits_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("protocol.md");
    tokio::fs::write(&path, "Version one.").await.unwrap();
    let tool = ProtocolTool::new(ProtocolStore::new(&path));

    let first = tool.execute(serde_json::json!({})).await.unwrap();
    assert_eq!(first.output.as_str().unwrap(), "Version one.");

    tokio::fs::write(&path, "Version two.").await.unwrap();
    let second = tool.execute(serde_json::json!({})).await.unwrap();
    assert_eq!(second.output.as_str().unwrap(), "Version two.");
}
