//! HTTP API gateway for Stepwise.
//!
//! Exposes the chat and agent services over JSON and server-sent events:
//!
//! - `GET  /health`, `GET /metrics`
//! - `POST /v1/chat`, `POST /v1/chat/stream`
//! - `POST /v1/agent`, `POST /v1/agent/stream`
//! - `DELETE /v1/conversations/{id}`
//!
//! Built on Axum; streamed responses go through [`sse::SseEmitter`].

pub mod api_v1;
pub mod exporter;
pub mod sse;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::{Router, response::Json, routing::get};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use stepwise_agent::{AgentRegistry, AgentService, AgentSettings, ChatService};
use stepwise_config::AppConfig;
use stepwise_core::error::Error;
use stepwise_core::provider::Provider;
use stepwise_providers::{AdvisedProvider, AdvisorChain};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use crate::sse::DEFAULT_SSE_TIMEOUT;

/// Longest pause between idle-agent sweeps.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared application state for the gateway.
pub struct AppState {
    pub chat: ChatService,
    pub agent: AgentService,
    /// Inactivity timeout for streamed responses.
    pub sse_timeout: Duration,
    /// Renders `/metrics`; unset until a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(chat: ChatService, agent: AgentService) -> Self {
        Self {
            chat,
            agent,
            sse_timeout: DEFAULT_SSE_TIMEOUT,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn with_sse_timeout(mut self, timeout: Duration) -> Self {
        self.sse_timeout = timeout;
        self
    }

    /// Build the services from configuration.
    ///
    /// The provider, tools and retriever are built once and shared by the
    /// chat and agent services.
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let router = stepwise_providers::build_from_config(config);
        let inner = router.default_provider().ok_or_else(|| Error::Config {
            message: format!("provider '{}' is not configured", config.default_provider),
        })?;
        let chain = AdvisorChain::from_config(&config.agent);
        info!(provider = %inner.name(), advisors = ?chain.names(), "Model provider ready");
        let provider: Arc<dyn Provider> = Arc::new(AdvisedProvider::new(inner, chain));

        let tools = Arc::new(stepwise_tools::default_registry(
            config.workspace_dir(),
            &config.tools,
            &config.agent,
        ));
        let memory = stepwise_memory::from_config(&config.memory, config.memory_dir());
        let retriever = stepwise_memory::retriever_from_config(&config.retriever);

        let chat = ChatService::new(provider.clone(), memory, retriever.clone(), config);
        let agent = AgentService::new(
            provider,
            tools,
            retriever,
            Arc::new(AgentRegistry::from_config(&config.registry)),
            AgentSettings::from_config(config),
        );

        Ok(Self::new(chat, agent)
            .with_sse_timeout(Duration::from_secs(config.gateway.sse_timeout_secs)))
    }
}

/// Build the Axum router with all gateway routes.
///
/// Layers: permissive CORS, a 1 MB body limit and HTTP trace logging.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE])
        .expose_headers([axum::http::HeaderName::from_static(
            api_v1::CONVERSATION_HEADER,
        )])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(exporter::metrics_handler))
        .with_state(state.clone())
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(AppState::from_config(&config)?.with_metrics(exporter::install_recorder()?));

    let sweep = Duration::from_secs(config.registry.idle_ttl_secs)
        .clamp(Duration::from_secs(1), MAX_SWEEP_INTERVAL);
    let registry = state.agent.registry().clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep);
        loop {
            ticker.tick().await;
            let evicted = registry.evict_idle().await;
            if evicted > 0 {
                debug!(evicted, "Evicted idle agents");
            }
        }
    });

    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
