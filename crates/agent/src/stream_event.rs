//! Agent-level streaming events.
//!
//! `AgentStreamEvent` is what a subscriber sees while an agent run is in
//! progress. Events are strictly ordered per run: arrival order is causal
//! order. The gateway forwards them over SSE, one frame per event, named by
//! [`AgentStreamEvent::event_type`].

use serde::{Deserialize, Serialize};

/// Events emitted by the agent during a streamed run.
///
/// Wire names (the `type` tag):
/// - `step-start`: a step is about to execute
/// - `thinking`: the model's free-text reasoning for this step
/// - `tool-call`: the model requested a tool
/// - `tool-result`: a requested tool finished (successfully or not)
/// - `step-result`: summary of the finished step
/// - `finished`: the run was finished by the engine (max steps)
/// - `error`: admission or loop-fatal failure; always the last event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AgentStreamEvent {
    StepStart { step: u32, max_steps: u32 },

    Thinking { content: String },

    /// `args` is the JSON text of the arguments, as produced by the model.
    ToolCall { tool: String, args: String },

    ToolResult { tool: String, result: String },

    StepResult { step: u32, content: String },

    Finished { content: String },

    Error { content: String },
}

impl AgentStreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StepStart { .. } => "step-start",
            Self::Thinking { .. } => "thinking",
            Self::ToolCall { .. } => "tool-call",
            Self::ToolResult { .. } => "tool-result",
            Self::StepResult { .. } => "step-result",
            Self::Finished { .. } => "finished",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this event ends the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Error { .. })
    }

    /// JSON payload for the wire.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","content":"Failed to serialize event: {e}"}}"#)
        })
    }
}
