//! Agent service: one tool-using agent per conversation.
//!
//! Every request looks up the conversation's agent in the [`AgentRegistry`]
//! and runs it. A new agent is created with context retrieved for the
//! conversation's first message. An agent
//! can only serve one run at a time; a second request for the same
//! conversation while the first is in flight is rejected with
//! [`AgentError::Busy`].

use std::sync::Arc;

use stepwise_config::AppConfig;
use stepwise_core::agent::AgentState;
use stepwise_core::error::AgentError;
use stepwise_core::provider::Provider;
use stepwise_core::retriever::Retriever;
use stepwise_core::tool::ToolExecutor;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::machine::Agent;
use crate::patterns::ToolCallStrategy;
use crate::registry::AgentRegistry;
use crate::stream_event::AgentStreamEvent;

pub const AGENT_NAME: &str = "StepwiseAgent";

/// Capacity of a streamed run's event channel.
pub const EVENT_BUFFER: usize = 64;

pub type ConversationAgent = Agent<ToolCallStrategy>;

/// Everything needed to build a fresh agent.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub name: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub max_steps: u32,
    pub system_prompt: String,
    pub next_step_prompt: String,
    pub terminate_tool: String,
}

impl AgentSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            name: AGENT_NAME.into(),
            model: config.default_model.clone(),
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
            max_steps: config.agent.max_steps,
            system_prompt: config.agent.system_prompt.clone(),
            next_step_prompt: config.agent.next_step_prompt.clone(),
            terminate_tool: config.agent.terminate_tool.clone(),
        }
    }

    /// The system prompt with retrieved context appended.
    fn system_prompt_with(&self, context: &str) -> String {
        if context.trim().is_empty() {
            self.system_prompt.clone()
        } else {
            format!("{}\n\n{}", self.system_prompt, context)
        }
    }
}

#[derive(Clone)]
pub struct AgentService {
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolExecutor>,
    retriever: Arc<dyn Retriever>,
    registry: Arc<AgentRegistry<ConversationAgent>>,
    settings: Arc<AgentSettings>,
}

impl AgentService {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolExecutor>,
        retriever: Arc<dyn Retriever>,
        registry: Arc<AgentRegistry<ConversationAgent>>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            provider,
            tools,
            retriever,
            registry,
            settings: Arc::new(settings),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry<ConversationAgent>> {
        &self.registry
    }

    fn create_agent(&self, context: &str) -> ConversationAgent {
        let strategy = ToolCallStrategy::new(
            self.provider.clone(),
            self.tools.clone(),
            self.settings.model.clone(),
        )
        .with_temperature(self.settings.temperature)
        .with_max_tokens(self.settings.max_tokens)
        .with_terminate_tool(self.settings.terminate_tool.clone());

        Agent::new(self.settings.name.clone(), strategy)
            .with_system_prompt(self.settings.system_prompt_with(context))
            .with_next_step_prompt(self.settings.next_step_prompt.clone())
            .with_max_steps(self.settings.max_steps)
    }

    /// Check out the conversation's agent for one run.
    async fn checkout(
        &self,
        message: &str,
        conversation_id: &str,
    ) -> Result<tokio::sync::OwnedMutexGuard<ConversationAgent>, AgentError> {
        // Retrieved context only shapes a new agent's system prompt.
        let handle = match self.registry.touch(conversation_id).await {
            Some(handle) => handle,
            None => {
                let context = self.retriever.retrieve(message).await;
                self.registry
                    .get_or_create(conversation_id, || self.create_agent(&context))
                    .await
            }
        };

        let mut agent = handle
            .try_lock_owned()
            .map_err(|_| AgentError::Busy(conversation_id.to_string()))?;
        if agent.state() == AgentState::Error {
            warn!(conversation_id = %conversation_id, "Agent errored on its last run, resetting");
            agent.reset();
        }
        Ok(agent)
    }

    /// Run the conversation's agent and return its step summary.
    ///
    /// The run itself is spawned so that dropping this future (for example
    /// when an HTTP client disconnects) never leaves an agent stuck mid-run.
    pub async fn run_agent(&self, message: &str, conversation_id: &str) -> Result<String, AgentError> {
        info!(conversation_id = %conversation_id, "Running agent");
        let mut agent = self.checkout(message, conversation_id).await?;
        let message = message.to_string();
        tokio::spawn(async move { agent.run(&message).await })
            .await
            .map_err(|e| AgentError::Internal(e.to_string()))?
    }

    /// Run the conversation's agent, streaming its events.
    ///
    /// The receiver yields events in order and closes when the run ends.
    pub fn run_agent_stream(&self, message: &str, conversation_id: &str) -> mpsc::Receiver<AgentStreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let service = self.clone();
        let message = message.to_string();
        let conversation_id = conversation_id.to_string();

        tokio::spawn(async move {
            info!(conversation_id = %conversation_id, "Running agent (stream)");
            match service.checkout(&message, &conversation_id).await {
                Ok(mut agent) => agent.run_stream(&message, tx).await,
                Err(e) => {
                    warn!(conversation_id = %conversation_id, error = %e, "Rejected agent run");
                    let _ = tx.send(AgentStreamEvent::Error { content: e.to_string() }).await;
                }
            }
        });

        rx
    }

    /// Drop the conversation's agent and its transcript.
    pub async fn forget(&self, conversation_id: &str) -> bool {
        self.registry.remove(conversation_id).await
    }
}
