//! ChatMemory trait: per-conversation message history.
//!
//! The chat service reads a conversation's history before each model call
//! and appends the new user/assistant pair afterwards. Implementations decide
//! how much history to keep.

use async_trait::async_trait;
use crate::error::MemoryError;
use crate::message::Message;

/// Conversation history keyed by conversation id.
///
/// Implementations: bounded in-memory window, JSON file per conversation,
/// no-op.
#[async_trait]
pub trait ChatMemory: Send + Sync {
    /// The backend name (e.g., "in_memory", "file", "none").
    fn name(&self) -> &str;

    /// Append messages to a conversation, in order.
    async fn add(&self, conversation_id: &str, messages: Vec<Message>) -> std::result::Result<(), MemoryError>;

    /// Read a conversation's history. Unknown ids yield an empty list.
    async fn get(&self, conversation_id: &str) -> std::result::Result<Vec<Message>, MemoryError>;

    /// Forget a conversation.
    async fn clear(&self, conversation_id: &str) -> std::result::Result<(), MemoryError>;
}
