//! Tool-calling ReAct strategy.
//!
//! `think` asks the model what to do next, offering every tool the executor
//! knows. A reply without tool calls is the final answer. A reply with tool
//! calls is kept pending; `act` records it in the transcript and executes the
//! calls one by one, in the order the model returned them.

use std::sync::Arc;

use async_trait::async_trait;
use stepwise_core::error::AgentError;
use stepwise_core::message::{Message, MessageToolCall};
use stepwise_core::provider::{Provider, ProviderRequest, ProviderResponse};
use stepwise_core::tool::{ToolCall, ToolExecutor};
use tracing::{debug, error, info, warn};

use crate::machine::{AgentRun, ReActStrategy};
use crate::sink::EventSink;
use crate::stream_event::AgentStreamEvent;

pub const NO_TOOLS_NEEDED: &str = "No tools need to be called";

pub struct ToolCallStrategy {
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolExecutor>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    terminate_tool: String,
    pending: Option<ProviderResponse>,
}

impl ToolCallStrategy {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolExecutor>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            tools,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            terminate_tool: "terminate".into(),
            pending: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Name of the tool whose execution finishes the run.
    pub fn with_terminate_tool(mut self, name: impl Into<String>) -> Self {
        self.terminate_tool = name.into();
        self
    }

    /// Whether a model response is waiting for `act`.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Execute one call and produce the text that goes into the transcript.
    ///
    /// Returns `(content, summary)`. Failures never escape: they come back as
    /// error text.
    async fn execute_call(&self, call: &MessageToolCall) -> (String, String) {
        let arguments = if call.arguments.trim().is_empty() {
            Ok(serde_json::Value::Object(Default::default()))
        } else {
            serde_json::from_str(&call.arguments)
        };

        let outcome = match arguments {
            Ok(arguments) => {
                let request = ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments,
                };
                self.tools.execute(&request).await.map_err(|e| e.to_string())
            }
            Err(e) => Err(format!("Invalid tool arguments: {e}")),
        };

        match outcome {
            Ok(result) => {
                if !result.success {
                    warn!(tool = %call.name, "Tool reported failure");
                }
                let summary = format!("Tool {} returned content: {}", call.name, result.output);
                (result.output, summary)
            }
            Err(reason) => {
                error!(tool = %call.name, error = %reason, "Executing tool error");
                let content = format!("Error executing tool {}: {reason}", call.name);
                (content.clone(), content)
            }
        }
    }
}

#[async_trait]
impl ReActStrategy for ToolCallStrategy {
    async fn think(&mut self, run: &mut AgentRun, sink: &mut EventSink) -> Result<bool, AgentError> {
        self.pending = None;

        let next_step = run.next_step_prompt().trim().to_string();
        if !next_step.is_empty() {
            run.push(Message::user(next_step));
        }

        let request = ProviderRequest::new(self.model.clone(), run.messages().to_vec())
            .with_system_prompt(run.system_prompt())
            .with_tools(self.tools.definitions())
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

        let response = match self.provider.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(agent = %run.name(), error = %e, "Model call failed");
                run.push(Message::assistant(format!("{} process error", run.name())));
                return Ok(false);
            }
        };

        let content = response.message.content.clone();
        let tool_calls = &response.message.tool_calls;
        debug!(agent = %run.name(), thinking = %content, "Model replied");
        info!(agent = %run.name(), tools = tool_calls.len(), "Selected tools");

        if !content.trim().is_empty() {
            sink.emit(AgentStreamEvent::Thinking { content: content.clone() }).await;
        }

        if tool_calls.is_empty() {
            run.push(Message::assistant(content));
            run.finish();
            return Ok(false);
        }

        for call in tool_calls {
            debug!(tool = %call.name, arguments = %call.arguments, "Tool call requested");
            sink.emit(AgentStreamEvent::ToolCall {
                tool: call.name.clone(),
                args: call.arguments.clone(),
            })
            .await;
        }

        self.pending = Some(response);
        Ok(true)
    }

    async fn act(&mut self, run: &mut AgentRun, sink: &mut EventSink) -> Result<String, AgentError> {
        let Some(response) = self.pending.take() else {
            return Ok(NO_TOOLS_NEEDED.to_string());
        };
        let mut calls = response.message.tool_calls;
        if calls.is_empty() {
            return Ok(NO_TOOLS_NEEDED.to_string());
        }

        // The Tool messages below must correlate to these ids.
        for call in &mut calls {
            if call.id.trim().is_empty() {
                call.id = uuid::Uuid::new_v4().to_string();
            }
        }
        run.push(Message::assistant_with_tool_calls(
            response.message.content,
            calls.clone(),
        ));

        let mut results = Vec::with_capacity(calls.len());
        for call in &calls {
            let (content, summary) = self.execute_call(call).await;
            run.push(Message::tool_result(&call.id, &call.name, &content));
            sink.emit(AgentStreamEvent::ToolResult {
                tool: call.name.clone(),
                result: content,
            })
            .await;
            results.push(summary);

            if call.name == self.terminate_tool {
                info!(agent = %run.name(), "Terminate tool called, finishing after this batch");
                run.finish();
            }
        }

        let summary = results.join("\n");
        debug!(agent = %run.name(), result = %summary, "Act finished");
        Ok(summary)
    }

    fn cleanup(&mut self, _run: &mut AgentRun) {
        self.pending = None;
    }
}
