//! Chat service: plain conversation without tools.
//!
//! History comes from [`ChatMemory`]; each exchange appends the user message
//! and the assistant reply once the reply is complete.

use std::sync::Arc;

use stepwise_config::AppConfig;
use stepwise_core::error::{ProviderError, Result};
use stepwise_core::memory::ChatMemory;
use stepwise_core::message::Message;
use stepwise_core::provider::{Provider, ProviderRequest};
use stepwise_core::retriever::Retriever;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Receiving half of a streamed chat reply.
pub type ChatStream = mpsc::Receiver<std::result::Result<String, ProviderError>>;

#[derive(Clone)]
pub struct ChatService {
    provider: Arc<dyn Provider>,
    memory: Arc<dyn ChatMemory>,
    retriever: Arc<dyn Retriever>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    system_prompt: String,
}

impl ChatService {
    pub fn new(
        provider: Arc<dyn Provider>,
        memory: Arc<dyn ChatMemory>,
        retriever: Arc<dyn Retriever>,
        config: &AppConfig,
    ) -> Self {
        Self {
            provider,
            memory,
            retriever,
            model: config.default_model.clone(),
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
            system_prompt: config.agent.chat_system_prompt.clone(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    fn request(&self, messages: Vec<Message>, system_prompt: &str) -> ProviderRequest {
        ProviderRequest::new(self.model.clone(), messages)
            .with_system_prompt(system_prompt)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }

    async fn exchange(&self, message: &str, conversation_id: &str, system_prompt: &str) -> Result<String> {
        let mut messages = self.memory.get(conversation_id).await?;
        let user = Message::user(message);
        messages.push(user.clone());

        let response = self
            .provider
            .complete(self.request(messages, system_prompt))
            .await?;
        let reply = response.message.content;

        self.memory
            .add(conversation_id, vec![user, Message::assistant(reply.clone())])
            .await?;
        debug!(conversation_id = %conversation_id, reply = %reply, "Chat reply");
        Ok(reply)
    }

    /// One chat turn.
    pub async fn chat(&self, message: &str, conversation_id: &str) -> Result<String> {
        info!(conversation_id = %conversation_id, "Chat");
        self.exchange(message, conversation_id, &self.system_prompt).await
    }

    /// One chat turn with retrieved context appended to the system prompt.
    pub async fn chat_with_context(&self, message: &str, conversation_id: &str) -> Result<String> {
        let context = self.retriever.retrieve(message).await;
        let system_prompt = if context.trim().is_empty() {
            self.system_prompt.clone()
        } else {
            format!("{}\n\n{}", self.system_prompt, context)
        };
        info!(conversation_id = %conversation_id, with_context = !context.is_empty(), "Chat");
        self.exchange(message, conversation_id, &system_prompt).await
    }

    /// One chat turn, streamed as text pieces.
    ///
    /// The reply is saved to memory only if the stream completes without
    /// error. Providers without native streaming yield the whole reply as
    /// a single piece.
    pub async fn chat_stream(&self, message: &str, conversation_id: &str) -> Result<ChatStream> {
        let mut messages = self.memory.get(conversation_id).await?;
        let user = Message::user(message);
        messages.push(user.clone());
        let mut request = self.request(messages, &self.system_prompt);

        let (tx, rx) = mpsc::channel(64);
        let memory = self.memory.clone();
        let conversation_id = conversation_id.to_string();

        if !self.provider.supports_streaming() {
            info!(conversation_id = %conversation_id, "Downgraded to non-streaming response");
            let reply = self.provider.complete(request).await?.message.content;
            memory
                .add(&conversation_id, vec![user, Message::assistant(reply.clone())])
                .await?;
            let _ = tx.send(Ok(reply)).await;
            return Ok(rx);
        }

        request.stream = true;
        let mut chunks = self.provider.stream(request).await?;
        tokio::spawn(async move {
            let mut full = String::new();
            while let Some(chunk) = chunks.recv().await {
                match chunk {
                    Ok(chunk) => {
                        if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                            full.push_str(&text);
                            if tx.send(Ok(text)).await.is_err() {
                                debug!(conversation_id = %conversation_id, "Chat subscriber left");
                                return;
                            }
                        }
                        if chunk.done {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(conversation_id = %conversation_id, error = %e, "Chat stream failed");
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }

            if let Err(e) = memory
                .add(&conversation_id, vec![user, Message::assistant(full)])
                .await
            {
                warn!(conversation_id = %conversation_id, error = %e, "Failed to save chat reply");
            }
        });

        Ok(rx)
    }

    /// Clear the conversation's history.
    pub async fn forget(&self, conversation_id: &str) -> Result<()> {
        self.memory.clear(conversation_id).await?;
        Ok(())
    }
}
