//! Advisors: ordered interceptors around a single model call.
//!
//! An advisor may rewrite the outgoing request, the complete response, or
//! (for streaming advisors) each text chunk of a streamed response. The
//! [`AdvisorChain`] runs them in ascending `order`; advisors with equal order
//! keep their registration order.

use std::sync::Arc;

use stepwise_core::message::Role;
use stepwise_core::provider::{ProviderRequest, ProviderResponse};
use tracing::{debug, info};

/// A pre/post interceptor around one model call.
pub trait Advisor: Send + Sync {
    fn name(&self) -> &str;

    /// Lower runs first.
    fn order(&self) -> i32 {
        0
    }

    fn before(&self, request: ProviderRequest) -> ProviderRequest {
        request
    }

    fn after(&self, response: ProviderResponse) -> ProviderResponse {
        response
    }
}

/// An advisor that also sees streamed text chunks.
pub trait StreamAdvisor: Advisor {
    fn after_stream_chunk(&self, chunk: String) -> String {
        chunk
    }
}

/// Advisors sorted by order, with streaming advisors tracked separately.
#[derive(Clone, Default)]
pub struct AdvisorChain {
    advisors: Vec<Arc<dyn Advisor>>,
    stream_advisors: Vec<Arc<dyn StreamAdvisor>>,
}

impl AdvisorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// The logger and re-reading advisors.
    pub fn with_defaults() -> Self {
        let mut chain = Self::new();
        chain.register_streaming(Arc::new(LoggerAdvisor));
        chain.register(Arc::new(ReReadingAdvisor));
        chain
    }

    /// The default advisors, with re-reading only when the config enables it.
    pub fn from_config(config: &stepwise_config::AgentConfig) -> Self {
        let mut chain = Self::new();
        chain.register_streaming(Arc::new(LoggerAdvisor));
        if config.re_reading {
            chain.register(Arc::new(ReReadingAdvisor));
        }
        chain
    }

    /// Register a request/response advisor.
    pub fn register(&mut self, advisor: Arc<dyn Advisor>) {
        self.advisors.push(advisor);
        self.advisors.sort_by_key(|a| a.order());
    }

    /// Register an advisor that also intercepts streamed chunks.
    pub fn register_streaming<A: StreamAdvisor + 'static>(&mut self, advisor: Arc<A>) {
        self.advisors.push(advisor.clone());
        self.advisors.sort_by_key(|a| a.order());
        self.stream_advisors.push(advisor);
        self.stream_advisors.sort_by_key(|a| a.order());
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with(mut self, advisor: Arc<dyn Advisor>) -> Self {
        self.register(advisor);
        self
    }

    pub fn len(&self) -> usize {
        self.advisors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.advisors.is_empty()
    }

    /// Advisor names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.advisors.iter().map(|a| a.name()).collect()
    }

    pub fn apply_before(&self, request: ProviderRequest) -> ProviderRequest {
        self.advisors.iter().fold(request, |req, a| a.before(req))
    }

    pub fn apply_after(&self, response: ProviderResponse) -> ProviderResponse {
        self.advisors.iter().fold(response, |resp, a| a.after(resp))
    }

    pub fn apply_after_stream(&self, chunk: String) -> String {
        self.stream_advisors
            .iter()
            .fold(chunk, |c, a| a.after_stream_chunk(c))
    }
}

/// Logs the first user message of each request and the response text.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggerAdvisor;

impl Advisor for LoggerAdvisor {
    fn name(&self) -> &str {
        "LoggerAdvisor"
    }

    fn order(&self) -> i32 {
        0
    }

    fn before(&self, request: ProviderRequest) -> ProviderRequest {
        if let Some(user) = request
            .messages
            .iter()
            .find(|m| m.role == Role::User && !m.content.is_empty())
        {
            info!(model = %request.model, "AI request: {}", user.content);
        }
        request
    }

    fn after(&self, response: ProviderResponse) -> ProviderResponse {
        if !response.message.content.is_empty() {
            info!(model = %response.model, "AI response: {}", response.message.content);
        }
        if !response.message.tool_calls.is_empty() {
            let names: Vec<&str> = response
                .message
                .tool_calls
                .iter()
                .map(|tc| tc.name.as_str())
                .collect();
            info!("Tool calls: {}", names.join(","));
        }
        response
    }
}

impl StreamAdvisor for LoggerAdvisor {}

/// Re-reading ("RE2") prompt augmentation: repeats the first user message
/// after a marker so the model reads the question twice.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReReadingAdvisor;

impl ReReadingAdvisor {
    pub const MARKER: &'static str = "\nRead the question again: ";
}

impl Advisor for ReReadingAdvisor {
    fn name(&self) -> &str {
        "ReReadingAdvisor"
    }

    fn order(&self) -> i32 {
        1
    }

    fn before(&self, mut request: ProviderRequest) -> ProviderRequest {
        let Some(user) = request.messages.iter_mut().find(|m| m.role == Role::User) else {
            return request;
        };
        // Agent loops resend the same transcript every step
        if user.content.contains(Self::MARKER.trim()) {
            return request;
        }
        user.content = format!("{}{}{}", user.content, Self::MARKER, user.content);
        debug!("Re2 enhanced prompt: {}", user.content);
        request
    }
}
