//! A provider wrapper that runs every call through an [`AdvisorChain`].

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use stepwise_core::error::ProviderError;
use stepwise_core::provider::*;
use stepwise_core::telemetry::{
    LLM_REQUEST_DURATION_SECONDS, LLM_REQUESTS_TOTAL, LLM_TOKENS_TOTAL, STATUS_ERROR, STATUS_SUCCESS,
};
use tracing::info;

use crate::advisor::AdvisorChain;

/// Wraps a provider so requests and responses pass through advisors.
///
/// `complete` runs `before`, the inner call, then `after`. `stream` runs
/// `before`, forwards each text chunk through the streaming advisors, and
/// once the inner stream ends runs `after` on the accumulated text for its
/// side effects only. Inner providers without native streaming are
/// downgraded to a single `complete` call.
///
/// Every inner call is counted and timed, and reported token usage is
/// added to the token counters.
pub struct AdvisedProvider {
    inner: Arc<dyn Provider>,
    chain: Arc<AdvisorChain>,
}

impl AdvisedProvider {
    pub fn new(inner: Arc<dyn Provider>, chain: AdvisorChain) -> Self {
        Self {
            inner,
            chain: Arc::new(chain),
        }
    }

    pub fn inner(&self) -> &Arc<dyn Provider> {
        &self.inner
    }

    pub fn chain(&self) -> &AdvisorChain {
        &self.chain
    }
}

impl AdvisedProvider {
    async fn timed_complete(
        &self,
        request: ProviderRequest,
        model: &str,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let started = Instant::now();
        let result = self.inner.complete(request).await;
        record_request(self.inner.name(), model, result.is_ok(), started);
        if let Ok(response) = &result {
            if let Some(usage) = &response.usage {
                record_tokens(self.inner.name(), model, usage);
            }
        }
        result
    }
}

fn record_request(provider: &str, model: &str, ok: bool, started: Instant) {
    let status = if ok { STATUS_SUCCESS } else { STATUS_ERROR };
    counter!(
        LLM_REQUESTS_TOTAL,
        "model" => model.to_string(),
        "provider" => provider.to_string(),
        "status" => status
    )
    .increment(1);
    histogram!(
        LLM_REQUEST_DURATION_SECONDS,
        "model" => model.to_string(),
        "provider" => provider.to_string()
    )
    .record(started.elapsed().as_secs_f64());
}

fn record_tokens(provider: &str, model: &str, usage: &Usage) {
    for (kind, tokens) in [("input", usage.prompt_tokens), ("output", usage.completion_tokens)] {
        counter!(
            LLM_TOKENS_TOTAL,
            "model" => model.to_string(),
            "provider" => provider.to_string(),
            "type" => kind
        )
        .increment(u64::from(tokens));
    }
}

#[async_trait]
impl Provider for AdvisedProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    // The wrapper always streams; unsupported inners go through the downgrade path
    fn supports_streaming(&self) -> bool {
        true
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let request = self.chain.apply_before(request);
        let model = request.model.clone();
        let response = self.timed_complete(request, &model).await?;
        Ok(self.chain.apply_after(response))
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let request = self.chain.apply_before(request);
        let model = request.model.clone();

        if !self.inner.supports_streaming() {
            info!(provider = %self.inner.name(), "Downgraded to non-streaming response");
            let response = self.chain.apply_after(self.timed_complete(request, &model).await?);
            let (tx, rx) = tokio::sync::mpsc::channel(1);
            let _ = tx
                .send(Ok(StreamChunk {
                    content: Some(response.message.content),
                    tool_calls: response.message.tool_calls,
                    done: true,
                    usage: response.usage,
                }))
                .await;
            return Ok(rx);
        }

        let started = Instant::now();
        let opened = self.inner.stream(request).await;
        record_request(self.inner.name(), &model, opened.is_ok(), started);
        let mut inner_rx = opened?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let chain = self.chain.clone();
        let provider = self.inner.name().to_string();

        tokio::spawn(async move {
            let mut full = String::new();
            let mut tool_calls = Vec::new();

            while let Some(item) = inner_rx.recv().await {
                let mut chunk = match item {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };

                if let Some(content) = chunk.content.take() {
                    let advised = chain.apply_after_stream(content);
                    full.push_str(&advised);
                    chunk.content = Some(advised);
                }
                tool_calls.extend(chunk.tool_calls.iter().cloned());
                if let Some(usage) = &chunk.usage {
                    record_tokens(&provider, &model, usage);
                }

                let done = chunk.done;
                if tx.send(Ok(chunk)).await.is_err() {
                    return; // receiver dropped
                }
                if done {
                    break;
                }
            }

            let mut response = ProviderResponse::text(model, full);
            response.message.tool_calls = tool_calls;
            chain.apply_after(response);
        });

        Ok(rx)
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        self.inner.list_models().await
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}
