//! Conversation orchestrator
//!
//! Maintains the chat session and runs the model-driven dispatch loop: the
//! model decides which tools to call and when; control re-enters the
//! orchestrator only at tool-call and final-answer boundaries. The session is
//! an explicit object passed to the entry points, created on first
//! interaction and reset on explicit clear.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{AnalystError, Result};
use crate::items::{Message, ToolCall};
use crate::model::ModelProvider;
use crate::tool::Tool;

/// Default instructions for the analyst model.
pub const ANALYST_INSTRUCTIONS: &str = "\
You are a data-analysis assistant for clinical-trial team members. You have \
access to a SQLite database of enrolled subjects.

For every user question, follow these steps:
  1. Call get_study_protocol to review the data-governance rules and think \
about which data requests they prohibit.
  2. Call list_schema to inspect the current schema before calling run_sql.
  3. Decide which table(s) and column(s) are required.
  4. Write ONE read-only, parameterised SELECT statement that only references \
tables and columns present in the schema.
  5. Call run_sql with that statement (and parameters, if any).

Never reference a table or column that does not exist. If the user asks for \
something unavailable or prohibited, apologise and explain what is available.";

/// A completed (user, assistant) exchange.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub user: String,
    pub assistant: String,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingModel,
}

/// Per-conversation state owned by the caller and threaded through
/// [`Orchestrator::ask`].
#[derive(Debug)]
pub struct ChatSession {
    turns: Vec<ConversationTurn>,
    continuation: Option<String>,
    transcript: Vec<Message>,
    state: SessionState,
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            turns: Vec::new(),
            continuation: None,
            transcript: Vec::new(),
            state: SessionState::Idle,
        }
    }

    /// Completed turns, oldest first.
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Opaque token identifying the most recent model exchange.
    pub fn continuation(&self) -> Option<&str> {
        self.continuation.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == SessionState::Idle
    }

    /// Discard all session state: turns, continuation token, transcript.
    pub fn reset(&mut self) {
        self.turns.clear();
        self.continuation = None;
        self.transcript.clear();
        self.state = SessionState::Idle;
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives conversations between the user, the model, and the tool surface.
pub struct Orchestrator {
    provider: Arc<dyn ModelProvider>,
    tools: Vec<Arc<dyn Tool>>,
    instructions: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    max_turns: usize,
    api_timeout: Duration,
    parallel_tools: bool,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            provider,
            tools: Vec::new(),
            instructions: ANALYST_INSTRUCTIONS.to_string(),
            temperature: None,
            max_tokens: None,
            max_turns: 10,
            api_timeout: Duration::from_secs(30),
            parallel_tools: false,
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.api_timeout = timeout;
        self
    }

    /// Execute multiple tool calls from one model turn concurrently.
    pub fn with_parallel_tools(mut self, enabled: bool) -> Self {
        self.parallel_tools = enabled;
        self
    }

    /// Submit a user question and drive the dispatch loop to a final answer.
    ///
    /// On success the turn is recorded and the continuation token updated to
    /// the final exchange's response id. On any failure the transcript rolls
    /// back to its pre-submission snapshot and the session returns to idle,
    /// so the conversation stays resumable.
    pub async fn ask(&self, session: &mut ChatSession, input: impl Into<String>) -> Result<String> {
        let input = input.into();
        if !session.is_idle() {
            return Err(AnalystError::SessionError(
                "a question is already awaiting a response".to_string(),
            ));
        }
        session.state = SessionState::AwaitingModel;

        if session.transcript.is_empty() {
            session.transcript.push(self.build_system_message());
        }
        let checkpoint = session.transcript.len();
        let prior_continuation = session.continuation.clone();
        session.transcript.push(Message::user(&input));

        info!(question = %input, "starting analyst exchange");
        match self.drive(session).await {
            Ok(answer) => {
                session.turns.push(ConversationTurn {
                    user: input,
                    assistant: answer.clone(),
                });
                session.state = SessionState::Idle;
                Ok(answer)
            }
            Err(e) => {
                session.transcript.truncate(checkpoint);
                session.continuation = prior_continuation;
                session.state = SessionState::Idle;
                Err(e)
            }
        }
    }

    /// Reset the session back to idle with empty history.
    pub fn clear(&self, session: &mut ChatSession) {
        info!("clearing chat session");
        session.reset();
    }

    /// The dispatch loop: call the model, execute requested tools, feed their
    /// outputs back, until the model answers in plain text.
    async fn drive(&self, session: &mut ChatSession) -> Result<String> {
        for turn in 1..=self.max_turns {
            debug!(turn, "requesting model completion");
            let response = tokio::time::timeout(
                self.api_timeout,
                self.provider.complete(
                    session.transcript.clone(),
                    self.tools.clone(),
                    self.temperature,
                    self.max_tokens,
                ),
            )
            .await
            .map_err(|_| AnalystError::ModelTimeout {
                seconds: self.api_timeout.as_secs(),
            })??;

            session.continuation = Some(response.id.clone());

            if response.tool_calls.is_empty() {
                let content = response.content.unwrap_or_default();
                if content.is_empty() {
                    return Err(AnalystError::ModelBehaviorError {
                        message: "model returned neither content nor tool calls".to_string(),
                    });
                }
                session.transcript.push(Message::assistant(&content));
                return Ok(content);
            }

            session.transcript.push(Message::assistant_with_tool_calls(
                response.content.clone().unwrap_or_default(),
                response.tool_calls.clone(),
            ));

            if self.parallel_tools && response.tool_calls.len() > 1 {
                let futures: Vec<_> = response
                    .tool_calls
                    .iter()
                    .map(|tc| self.invoke_tool(tc))
                    .collect();
                // join_all preserves invocation order in its output
                for message in join_all(futures).await {
                    session.transcript.push(message);
                }
            } else {
                for tc in &response.tool_calls {
                    let message = self.invoke_tool(tc).await;
                    session.transcript.push(message);
                }
            }
        }

        Err(AnalystError::MaxTurnsExceeded {
            max_turns: self.max_turns,
        })
    }

    /// Run one tool call, folding every failure into a tool message so the
    /// model can correct itself.
    async fn invoke_tool(&self, call: &ToolCall) -> Message {
        debug!(tool = %call.name, "executing tool call");
        let Some(tool) = self.tools.iter().find(|t| t.name() == call.name) else {
            warn!(tool = %call.name, "model requested unknown tool");
            return Message::tool(format!("Error: unknown tool '{}'", call.name), &call.id);
        };

        match tool.execute(call.arguments.clone()).await {
            Ok(result) => match result.error {
                Some(err) => Message::tool(format!("Error: {}", err), &call.id),
                None => Message::tool(result.output.to_string(), &call.id),
            },
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool execution failed");
                Message::tool(format!("Error: {}", e), &call.id)
            }
        }
    }

    /// System message combining the instructions with the tool inventory.
    fn build_system_message(&self) -> Message {
        let mut content = self.instructions.clone();

        if !self.tools.is_empty() {
            content.push_str("\n\nYou have access to the following tools:\n");
            for tool in &self.tools {
                content.push_str(&format!("- {}: {}\n", tool.name(), tool.description()));
            }
        }

        Message::system(content)
    }
}
