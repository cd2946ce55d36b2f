//! v1 API: chat and agent endpoints.
//!
//! Every request names a conversation; omitting `conversation_id` starts a
//! new one, and the id is echoed back (in the body, or in the
//! `x-conversation-id` header for streams).
//!
//! Streamed endpoints answer with server-sent events. Chat streams send
//! `message` frames with text pieces; agent streams send one frame per
//! agent event, named by its type, with the event JSON as data. Both end
//! with `event: complete` / `data: [DONE]` unless the stream errored or
//! timed out first.

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, post},
};
use serde::{Deserialize, Serialize};
use stepwise_core::error::{AgentError, Error};
use stepwise_core::message::ConversationId;
use tracing::{info, warn};

use crate::SharedState;
use crate::sse::{SseEmitter, SseFrame, sse_body};

/// Response header carrying the conversation id of a streamed reply.
pub const CONVERSATION_HEADER: &str = "x-conversation-id";

/// Tells reverse proxies not to buffer the event stream.
const NO_BUFFERING_HEADER: &str = "x-accel-buffering";

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/agent", post(agent_handler))
        .route("/agent/stream", post(agent_stream_handler))
        .route("/conversations/{id}", delete(forget_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    /// Existing conversation ID (omit to start a new one).
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub message: String,
    /// Chat only: append retrieved context to the system prompt.
    #[serde(default)]
    pub with_context: bool,
}

impl MessageRequest {
    /// The conversation id to use, generating one when absent or blank.
    fn conversation_id(&self) -> String {
        self.conversation_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| ConversationId::new().to_string())
    }

    fn require_message(&self) -> Result<(), ApiError> {
        if self.message.trim().is_empty() {
            return Err(ApiError::bad_request("message must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub conversation_id: String,
    pub reply: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AgentResponse {
    pub conversation_id: String,
    pub result: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// An error rendered as `{"error": "..."}` with a matching status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        let status = match e {
            AgentError::EmptyInput => StatusCode::BAD_REQUEST,
            AgentError::InvalidState { .. } | AgentError::Busy(_) => StatusCode::CONFLICT,
            AgentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::Agent(agent) => return agent.clone().into(),
            Error::Provider(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, error = %self.message, "Request failed");
        }
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

fn stream_headers(conversation_id: String) -> [(HeaderName, String); 2] {
    [
        (HeaderName::from_static(CONVERSATION_HEADER), conversation_id),
        (HeaderName::from_static(NO_BUFFERING_HEADER), "no".to_string()),
    ]
}

/// A fresh emitter whose timeout is logged against the conversation.
fn emitter_for(
    state: &SharedState,
    conversation_id: &str,
) -> (SseEmitter, tokio::sync::mpsc::Receiver<SseFrame>) {
    let (emitter, frames) = SseEmitter::new(state.sse_timeout);
    let id = conversation_id.to_string();
    emitter.set_timeout_observer(move || warn!(conversation_id = %id, "SSE stream timed out"));
    (emitter, frames)
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<MessageRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    payload.require_message()?;
    let conversation_id = payload.conversation_id();

    let reply = if payload.with_context {
        state.chat.chat_with_context(&payload.message, &conversation_id).await?
    } else {
        state.chat.chat(&payload.message, &conversation_id).await?
    };

    Ok(Json(ChatResponse {
        conversation_id,
        reply,
    }))
}

async fn chat_stream_handler(
    State(state): State<SharedState>,
    Json(payload): Json<MessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    payload.require_message()?;
    let conversation_id = payload.conversation_id();
    info!(conversation_id = %conversation_id, "v1/chat/stream request");

    let mut pieces = state.chat.chat_stream(&payload.message, &conversation_id).await?;
    let (emitter, frames) = emitter_for(&state, &conversation_id);

    tokio::spawn(async move {
        while let Some(piece) = pieces.recv().await {
            match piece {
                Ok(text) => {
                    if !emitter.send(SseFrame::new("message", text)).await {
                        return;
                    }
                }
                Err(e) => {
                    emitter.on_error(e.to_string()).await;
                    return;
                }
            }
        }
        emitter.complete().await;
    });

    Ok((stream_headers(conversation_id), sse_body(frames)))
}

async fn agent_handler(
    State(state): State<SharedState>,
    Json(payload): Json<MessageRequest>,
) -> Result<Json<AgentResponse>, ApiError> {
    let conversation_id = payload.conversation_id();
    let result = state.agent.run_agent(&payload.message, &conversation_id).await?;
    Ok(Json(AgentResponse {
        conversation_id,
        result,
    }))
}

/// Admission failures (empty message, busy conversation) arrive as a
/// single `error` event inside the stream rather than an HTTP error.
async fn agent_stream_handler(
    State(state): State<SharedState>,
    Json(payload): Json<MessageRequest>,
) -> impl IntoResponse {
    let conversation_id = payload.conversation_id();
    let mut events = state.agent.run_agent_stream(&payload.message, &conversation_id);
    let (emitter, frames) = emitter_for(&state, &conversation_id);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let frame = SseFrame::new(event.event_type(), event.to_json());
            if !emitter.send(frame).await {
                // Dropping `events` tells the agent nobody is listening
                return;
            }
        }
        emitter.complete().await;
    });

    (stream_headers(conversation_id), sse_body(frames))
}

async fn forget_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.chat.forget(&id).await?;
    let had_agent = state.agent.forget(&id).await;
    info!(conversation_id = %id, had_agent, "Conversation forgotten");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AppState, build_router};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    use stepwise_agent::{AgentRegistry, AgentService, AgentSettings, ChatService};
    use stepwise_config::AppConfig;
    use stepwise_core::error::ProviderError;
    use stepwise_core::memory::ChatMemory;
    use stepwise_core::provider::{Provider, ProviderRequest, ProviderResponse};
    use stepwise_core::retriever::NoopRetriever;
    use stepwise_core::tool::ToolRegistry;
    use stepwise_memory::InMemoryChatMemory;
    use stepwise_tools::TerminateTool;

    /// Lightweight mock provider for gateway tests.
    struct MockProvider {
        response: Result<String, ProviderError>,
    }

    impl MockProvider {
        fn new(text: &str) -> Self {
            Self {
                response: Ok(text.to_string()),
            }
        }

        fn failing() -> Self {
            Self {
                response: Err(ProviderError::Network("connection refused".into())),
            }
        }
    }

    #[async_trait::async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "gateway_mock"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            self.response
                .clone()
                .map(|text| ProviderResponse::text("mock-model", text))
        }
    }

    struct Harness {
        state: SharedState,
        memory: Arc<InMemoryChatMemory>,
    }

    fn harness(provider: MockProvider) -> Harness {
        let config = AppConfig::default();
        let provider: Arc<dyn Provider> = Arc::new(provider);
        let memory = Arc::new(InMemoryChatMemory::new(10));
        let chat = ChatService::new(provider.clone(), memory.clone(), Arc::new(NoopRetriever), &config);
        let agent = AgentService::new(
            provider,
            Arc::new(ToolRegistry::new().with_tool(Box::new(TerminateTool::new()))),
            Arc::new(NoopRetriever),
            Arc::new(AgentRegistry::new(10, Duration::from_secs(60))),
            AgentSettings::from_config(&config),
        );
        Harness {
            state: Arc::new(AppState::new(chat, agent)),
            memory,
        }
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Split an SSE body into (event, data) pairs.
    fn parse_frames(body: &str) -> Vec<(String, String)> {
        body.split("\n\n")
            .filter(|block| !block.trim().is_empty())
            .map(|block| {
                let mut event = String::from("message");
                let mut data = Vec::new();
                for line in block.lines() {
                    if let Some(name) = line.strip_prefix("event:") {
                        event = name.trim().to_string();
                    } else if let Some(d) = line.strip_prefix("data:") {
                        data.push(d.trim_start().to_string());
                    }
                }
                (event, data.join("\n"))
            })
            .collect()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(harness(MockProvider::new("ok")).state);
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn chat_returns_reply_and_saves_history() {
        let h = harness(MockProvider::new("Hello there"));
        let app = build_router(h.state.clone());

        let response = app
            .oneshot(post_json("/v1/chat", serde_json::json!({"message": "hi", "conversation_id": "c1"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let reply: ChatResponse = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(reply.conversation_id, "c1");
        assert_eq!(reply.reply, "Hello there");
        assert_eq!(h.memory.get("c1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn chat_generates_conversation_id() {
        let app = build_router(harness(MockProvider::new("x")).state);
        let response = app
            .oneshot(post_json("/v1/chat", serde_json::json!({"message": "hi"})))
            .await
            .unwrap();
        let reply: ChatResponse = serde_json::from_str(&body_text(response).await).unwrap();
        assert!(!reply.conversation_id.is_empty());
    }

    #[tokio::test]
    async fn empty_message_is_bad_request() {
        let h = harness(MockProvider::new("x"));
        for uri in ["/v1/chat", "/v1/chat/stream", "/v1/agent"] {
            let response = build_router(h.state.clone())
                .oneshot(post_json(uri, serde_json::json!({"message": "   "})))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        }
    }

    #[tokio::test]
    async fn provider_failure_is_bad_gateway() {
        let app = build_router(harness(MockProvider::failing()).state);
        let response = app
            .oneshot(post_json("/v1/chat", serde_json::json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let err: ErrorResponse = serde_json::from_str(&body_text(response).await).unwrap();
        assert!(err.error.contains("connection refused"));
    }

    #[tokio::test]
    async fn chat_stream_sends_message_then_complete() {
        let app = build_router(harness(MockProvider::new("streamed reply")).state);
        let response = app
            .oneshot(post_json("/v1/chat/stream", serde_json::json!({"message": "hi", "conversation_id": "s1"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONVERSATION_HEADER], "s1");
        assert!(
            response.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );

        let frames = parse_frames(&body_text(response).await);
        assert_eq!(
            frames,
            vec![
                ("message".to_string(), "streamed reply".to_string()),
                ("complete".to_string(), "[DONE]".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn agent_returns_step_summary() {
        let app = build_router(harness(MockProvider::new("done")).state);
        let response = app
            .oneshot(post_json("/v1/agent", serde_json::json!({"message": "hi", "conversation_id": "a1"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: AgentResponse = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body.conversation_id, "a1");
        assert_eq!(body.result, "Step 1: Thinking complete, no action required");
    }

    #[tokio::test]
    async fn agent_stream_frames_follow_events() {
        let app = build_router(harness(MockProvider::new("done")).state);
        let response = app
            .oneshot(post_json("/v1/agent/stream", serde_json::json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let frames = parse_frames(&body_text(response).await);
        let names: Vec<&str> = frames.iter().map(|(e, _)| e.as_str()).collect();
        assert_eq!(names, vec!["step-start", "thinking", "step-result", "complete"]);

        let start: serde_json::Value = serde_json::from_str(&frames[0].1).unwrap();
        assert_eq!(start["type"], "step-start");
        assert_eq!(start["step"], 1);
        let thinking: serde_json::Value = serde_json::from_str(&frames[1].1).unwrap();
        assert_eq!(thinking["content"], "done");
        assert_eq!(frames[3].1, "[DONE]");
    }

    #[tokio::test]
    async fn agent_stream_reports_admission_error_in_band() {
        let app = build_router(harness(MockProvider::new("x")).state);
        let response = app
            .oneshot(post_json("/v1/agent/stream", serde_json::json!({"message": ""})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let frames = parse_frames(&body_text(response).await);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0, "error");
        let error: serde_json::Value = serde_json::from_str(&frames[0].1).unwrap();
        assert_eq!(error["content"], "Cannot run agent with empty user prompt");
        assert_eq!(frames[1], ("complete".to_string(), "[DONE]".to_string()));
    }

    #[tokio::test]
    async fn delete_forgets_conversation() {
        let h = harness(MockProvider::new("ok"));
        build_router(h.state.clone())
            .oneshot(post_json("/v1/chat", serde_json::json!({"message": "hi", "conversation_id": "d1"})))
            .await
            .unwrap();
        build_router(h.state.clone())
            .oneshot(post_json("/v1/agent", serde_json::json!({"message": "hi", "conversation_id": "d1"})))
            .await
            .unwrap();
        assert_eq!(h.state.agent.registry().len().await, 1);

        let req = Request::builder()
            .method("DELETE")
            .uri("/v1/conversations/d1")
            .body(Body::empty())
            .unwrap();
        let response = build_router(h.state.clone()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        assert!(h.memory.get("d1").await.unwrap().is_empty());
        assert!(h.state.agent.registry().is_empty().await);
    }
}
