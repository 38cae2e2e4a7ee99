//! Agent Controller - the per-turn reasoning loop
//!
//! The AgentController owns the model, the tool catalog and the memory
//! store. Each call to [`AgentController::run`] handles one user turn on one
//! thread, persisting every step of the exchange into that thread's history.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::llm::{ChatModel, ModelError, ModelReply, DEFAULT_SYSTEM_PROMPT};
use crate::memory::{MemoryStore, Turn};
use crate::metrics::{AGENT_ROUNDS, AGENT_TURNS, LLM_CALL_DURATION};
use crate::tools::{ToolCatalog, ToolSpec};

/// Stands in for a final answer with no text
pub const NO_CONTENT: &str = "No content";

/// Configuration for the agent controller
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model rounds allowed per user turn
    pub max_tool_rounds: usize,
    /// Custom system prompt (uses default if None)
    pub system_prompt: Option<String>,
    /// Pause before the single retry of a transient model failure
    pub retry_backoff: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 10,
            system_prompt: None,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Result of one agent turn
#[derive(Debug, Clone)]
pub struct AgentReply {
    /// Final response from the model
    pub content: String,
    /// Number of model rounds used
    pub rounds: usize,
    /// Number of tool calls dispatched
    pub tool_calls: usize,
    /// Unique trace ID for this turn
    pub trace_id: String,
}

/// Error type for agent operations
#[derive(Debug)]
pub enum AgentError {
    /// Blank prompt, rejected before any work
    EmptyPrompt,
    /// The model kept requesting tools past the round limit
    ToolLoopExceeded { rounds: usize },
    /// The model call failed (after the retry, for transient failures)
    Model(ModelError),
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::EmptyPrompt => write!(f, "Prompt is required"),
            AgentError::ToolLoopExceeded { rounds } => {
                write!(f, "Tool loop exceeded after {} rounds", rounds)
            }
            AgentError::Model(e) => write!(f, "Model error: {}", e),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<ModelError> for AgentError {
    fn from(e: ModelError) -> Self {
        AgentError::Model(e)
    }
}

/// Agent Controller orchestrating the model, tools and memory
pub struct AgentController {
    model: Arc<dyn ChatModel>,
    tools: ToolCatalog,
    memory: Arc<MemoryStore>,
    config: AgentConfig,
}

impl AgentController {
    pub fn new(
        model: Arc<dyn ChatModel>,
        tools: ToolCatalog,
        memory: Arc<MemoryStore>,
        config: AgentConfig,
    ) -> Self {
        Self {
            model,
            tools,
            memory,
            config,
        }
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn tools(&self) -> &ToolCatalog {
        &self.tools
    }

    /// Handle one user turn on `thread_id`
    ///
    /// Holds the thread's lock throughout, so turns on the same thread run
    /// one after another while other threads proceed concurrently.
    pub async fn run(&self, thread_id: &str, prompt: &str) -> Result<AgentReply, AgentError> {
        if prompt.trim().is_empty() {
            return Err(AgentError::EmptyPrompt);
        }

        let trace_id = Uuid::now_v7().to_string();
        let root_span = info_span!(
            "agent_turn",
            trace_id = %trace_id,
            thread_id = %thread_id,
            model = %self.model.name(),
            otel.name = "agent_turn"
        );

        async {
            let _guard = self.memory.lock(thread_id).await;
            info!(prompt_len = prompt.len(), "Starting agent turn");

            let result = self.run_locked(thread_id, prompt, &trace_id).await;

            let status = match &result {
                Ok(_) => "success",
                Err(AgentError::ToolLoopExceeded { .. }) => "tool_loop_exceeded",
                Err(AgentError::Model(_)) => "model_error",
                Err(AgentError::EmptyPrompt) => "empty_prompt",
            };
            AGENT_TURNS.with_label_values(&[status]).inc();

            match &result {
                Ok(reply) => {
                    AGENT_ROUNDS.observe(reply.rounds as f64);
                    info!(rounds = reply.rounds, tool_calls = reply.tool_calls, "Agent turn completed");
                }
                Err(e) => warn!(error = %e, "Agent turn failed"),
            }
            result
        }
        .instrument(root_span)
        .await
    }

    async fn run_locked(
        &self,
        thread_id: &str,
        prompt: &str,
        trace_id: &str,
    ) -> Result<AgentReply, AgentError> {
        self.memory.append(thread_id, Turn::user(prompt));

        let system_prompt = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let specs = self.tools.specs();

        let mut rounds = 0;
        let mut tool_calls = 0;

        loop {
            if rounds >= self.config.max_tool_rounds {
                AGENT_ROUNDS.observe(rounds as f64);
                return Err(AgentError::ToolLoopExceeded { rounds });
            }
            rounds += 1;

            let history = self.memory.load(thread_id);
            let reply = self
                .complete_with_retry(system_prompt, &history, &specs, rounds)
                .await?;

            if !reply.wants_tools() {
                let content = if reply.text.trim().is_empty() {
                    NO_CONTENT.to_string()
                } else {
                    reply.text
                };
                self.memory.append(thread_id, Turn::assistant(content.clone()));
                return Ok(AgentReply {
                    content,
                    rounds,
                    tool_calls,
                    trace_id: trace_id.to_string(),
                });
            }

            if !reply.text.trim().is_empty() {
                self.memory.append(thread_id, Turn::assistant(reply.text.clone()));
            }

            for call in reply.tool_calls {
                tool_calls += 1;
                info!(tool = %call.name, call_id = %call.id, round = rounds, "Dispatching tool call");

                let result = match self.tools.invoke(&call.name, call.arguments.clone()).await {
                    Ok(output) => Turn::tool_result(&call.id, &call.name, output.content, !output.success),
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "Tool call failed");
                        Turn::tool_result(&call.id, &call.name, format!("Error: {}", e), true)
                    }
                };

                // Call and result land together, never a dangling call
                self.memory.append_all(
                    thread_id,
                    vec![Turn::tool_call(call.id, call.name, call.arguments), result],
                );
            }
        }
    }

    /// One model round, retrying a transient failure once
    async fn complete_with_retry(
        &self,
        system: &str,
        history: &[Turn],
        tools: &[ToolSpec],
        round: usize,
    ) -> Result<ModelReply, ModelError> {
        match self.complete(system, history, tools, round).await {
            Err(e) if e.is_transient() => {
                warn!(error = %e, backoff_ms = self.config.retry_backoff.as_millis() as u64, "Transient model failure, retrying");
                tokio::time::sleep(self.config.retry_backoff).await;
                self.complete(system, history, tools, round).await
            }
            other => other,
        }
    }

    async fn complete(
        &self,
        system: &str,
        history: &[Turn],
        tools: &[ToolSpec],
        round: usize,
    ) -> Result<ModelReply, ModelError> {
        let model = self.model.name().to_string();
        let llm_span = info_span!(
            "llm_call",
            round,
            model = %model,
            history = history.len(),
            otel.name = "llm_call"
        );

        let start = Instant::now();
        let result = self
            .model
            .complete(system, history, tools)
            .instrument(llm_span)
            .await;
        let elapsed = start.elapsed();

        LLM_CALL_DURATION
            .with_label_values(&[&model])
            .observe(elapsed.as_secs_f64());
        if let Ok(reply) = &result {
            debug!(
                round,
                duration_ms = elapsed.as_millis() as u64,
                tool_calls = reply.tool_calls.len(),
                "LLM call completed"
            );
        }
        result
    }
}
