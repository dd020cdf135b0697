//! Policy gate
//!
//! Every candidate SQL statement is checked against the study protocol by a
//! second model call before it may execute. The gate is fail-closed: if the
//! oracle is unreachable, times out, or replies with something unparseable,
//! the statement is denied. An error in the check is never an allow.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AnalystError, Result};
use crate::items::Message;
use crate::model::ModelProvider;
use crate::protocol::ProtocolStore;

/// Fixed gatekeeper instruction; the oracle must answer with a structured
/// verdict so the reply can be parsed mechanically.
const GATEKEEPER_INSTRUCTIONS: &str = "You are a data-governance gatekeeper. \
Given a study protocol and a SQL query, respond with JSON: \
{\"allowed\": true/false, \"reason\": \"...\"}. \
If any rule is violated, set allowed to false and provide the specific reason \
based on the protocol. \
Unless a rule is explicitly and clearly violated, set allowed to true.";

const DEFAULT_ALLOW_REASON: &str = "Query complies with all study protocol requirements.";
const DEFAULT_DENY_REASON: &str = "Query potentially violates the study protocol. Please review \
and ensure it does not expose subject identifiers.";

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: String,
}

/// Structured verdict expected from the oracle. A missing `allowed` field
/// reads as a denial.
#[derive(Debug, Deserialize)]
struct OracleVerdict {
    #[serde(default)]
    allowed: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Governance gate over candidate SQL statements.
pub struct PolicyGate {
    provider: Arc<dyn ModelProvider>,
    protocol: ProtocolStore,
    timeout: Duration,
}

impl PolicyGate {
    pub fn new(provider: Arc<dyn ModelProvider>, protocol: ProtocolStore) -> Self {
        Self {
            provider,
            protocol,
            timeout: Duration::from_secs(30),
        }
    }

    /// Bound on the oracle call; expiry counts as a gate failure.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check a candidate statement against the protocol.
    ///
    /// Never fails: every error on the way to a verdict (protocol read,
    /// oracle transport, timeout, parse) comes back as a denial carrying a
    /// description of the failure.
    pub async fn check(&self, sql: &str) -> PolicyDecision {
        match self.evaluate(sql).await {
            Ok(decision) => {
                debug!(allowed = decision.allowed, "policy check verdict");
                decision
            }
            Err(e) => {
                warn!(error = %e, "policy check failed, denying statement");
                PolicyDecision {
                    allowed: false,
                    reason: format!("LLM policy check failed: {}", e),
                }
            }
        }
    }

    async fn evaluate(&self, sql: &str) -> Result<PolicyDecision> {
        // Re-read per check so a protocol edit applies to the next query.
        let protocol_text = self.protocol.load().await?;

        let messages = vec![
            Message::system(GATEKEEPER_INSTRUCTIONS),
            Message::system(protocol_text),
            Message::user(format!(
                "SQL query to evaluate:\n{}\nDoes it violate the study protocol?",
                sql
            )),
        ];

        let response = tokio::time::timeout(
            self.timeout,
            self.provider.complete(messages, vec![], Some(0.0), None),
        )
        .await
        .map_err(|_| AnalystError::ModelTimeout {
            seconds: self.timeout.as_secs(),
        })??;

        let reply = response
            .content
            .ok_or_else(|| AnalystError::PolicyCheckFailed {
                message: "oracle returned no content".to_string(),
            })?;

        let stripped = strip_code_fence(reply.trim());
        let verdict: OracleVerdict =
            serde_json::from_str(stripped).map_err(|e| AnalystError::PolicyCheckFailed {
                message: format!(
                    "failed to parse oracle reply as JSON: {}. Reply was: {}",
                    e, reply
                ),
            })?;

        let reason = match verdict
            .reason
            .filter(|r| !r.is_empty() && r != "No reason returned.")
        {
            Some(reason) => reason,
            None if verdict.allowed => DEFAULT_ALLOW_REASON.to_string(),
            None => DEFAULT_DENY_REASON.to_string(),
        };

        Ok(PolicyDecision {
            allowed: verdict.allowed,
            reason,
        })
    }
}

/// Strip a markdown code fence the oracle may have wrapped its reply in.
fn strip_code_fence(reply: &str) -> &str {
    if let Some(inner) = reply
        .strip_prefix("```json")
        .and_then(|r| r.strip_suffix("```"))
    {
        return inner.trim();
    }
    if let Some(inner) = reply.strip_prefix("```").and_then(|r| r.strip_suffix("```")) {
        return inner.trim();
    }
    reply
}
