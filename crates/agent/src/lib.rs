//! The agent execution engine: the heart of Stepwise.
//!
//! An agent alternates between **thinking** (asking the model what to do
//! next) and **acting** (running the tools it asked for):
//!
//! 1. **Admit** the user message (state must be `Idle` or `Finished`)
//! 2. **Think**: send the transcript, system prompt and tool definitions
//! 3. **Act**: if the model requested tools, execute them in order and
//!    append their results
//! 4. Repeat until the model answers without tools, the terminate tool is
//!    called, or `max_steps` is reached
//!
//! Streamed runs report every step as an ordered [`AgentStreamEvent`]
//! sequence. [`AgentService`] and [`ChatService`] tie the engine to
//! per-conversation state.

pub mod chat;
pub mod machine;
pub mod patterns;
pub mod registry;
pub mod service;
pub mod sink;
pub mod stream_event;

pub use chat::{ChatService, ChatStream};
pub use machine::{Agent, AgentRun, DEFAULT_MAX_STEPS, EXECUTION_ERROR, NO_ACTION, ReActStrategy};
pub use patterns::ToolCallStrategy;
pub use registry::AgentRegistry;
pub use service::{AGENT_NAME, AgentService, AgentSettings, ConversationAgent};
pub use sink::EventSink;
pub use stream_event::AgentStreamEvent;
