//! # Stepwise Core
//!
//! Domain types, traits, and error definitions for the Stepwise agent engine.
//! Nothing in here knows about HTTP, model vendors, or storage layouts; the
//! other crates implement the traits defined here.
//!
//! The seams are:
//! - [`Provider`]: a language model that can complete or stream a chat
//! - [`ToolExecutor`]: looks up and invokes a named tool
//! - [`ChatMemory`]: per-conversation message history
//! - [`Retriever`]: produces a context block for the system prompt

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;
pub mod memory;
pub mod retriever;
pub mod agent;
pub mod telemetry;

// Re-export key types at crate root for ergonomics
pub use error::{AgentError, Error, MemoryError, ProviderError, Result, ToolError};
pub use message::{ConversationId, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition};
pub use tool::{Tool, ToolCall, ToolExecutor, ToolRegistry, ToolResult};
pub use memory::ChatMemory;
pub use retriever::{NoopRetriever, Retriever, StaticRetriever};
pub use agent::AgentState;
