//! In-memory chat history with a bounded window per conversation.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use stepwise_core::error::MemoryError;
use stepwise_core::memory::ChatMemory;
use stepwise_core::message::Message;
use tokio::sync::RwLock;

/// Default number of messages kept per conversation.
pub const DEFAULT_MAX_MESSAGES: usize = 10;

/// Keeps the most recent `max_messages` messages of each conversation.
///
/// Older messages are dropped from the front as new ones arrive.
pub struct InMemoryChatMemory {
    chats: Arc<RwLock<HashMap<String, VecDeque<Message>>>>,
    max_messages: usize,
}

impl InMemoryChatMemory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            chats: Arc::new(RwLock::new(HashMap::new())),
            max_messages: max_messages.max(1),
        }
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Number of conversations currently held.
    pub async fn conversation_count(&self) -> usize {
        self.chats.read().await.len()
    }
}

impl Default for InMemoryChatMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

#[async_trait]
impl ChatMemory for InMemoryChatMemory {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn add(&self, conversation_id: &str, messages: Vec<Message>) -> Result<(), MemoryError> {
        let mut chats = self.chats.write().await;
        let history = chats.entry(conversation_id.to_string()).or_default();
        history.extend(messages);
        let overflow = history.len().saturating_sub(self.max_messages);
        history.drain(..overflow);
        Ok(())
    }

    async fn get(&self, conversation_id: &str) -> Result<Vec<Message>, MemoryError> {
        let chats = self.chats.read().await;
        Ok(chats
            .get(conversation_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear(&self, conversation_id: &str) -> Result<(), MemoryError> {
        self.chats.write().await.remove(conversation_id);
        Ok(())
    }
}
