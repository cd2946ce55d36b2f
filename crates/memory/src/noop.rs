//! No-op chat memory: every conversation starts fresh.

use async_trait::async_trait;
use stepwise_core::error::MemoryError;
use stepwise_core::memory::ChatMemory;
use stepwise_core::message::Message;

/// A chat memory that stores nothing.
pub struct NoopMemory;

#[async_trait]
impl ChatMemory for NoopMemory {
    fn name(&self) -> &str { "none" }

    async fn add(&self, _conversation_id: &str, _messages: Vec<Message>) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn get(&self, _conversation_id: &str) -> Result<Vec<Message>, MemoryError> {
        Ok(Vec::new())
    }

    async fn clear(&self, _conversation_id: &str) -> Result<(), MemoryError> {
        Ok(())
    }
}
