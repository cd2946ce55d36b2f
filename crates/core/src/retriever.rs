//! Retriever trait: supplies a context block for the system prompt.

use async_trait::async_trait;

/// Produces a block of reference text relevant to a query.
///
/// An empty string means "no context". Retrieval is best-effort: failures are
/// the implementation's to log, and callers proceed without context.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> String;
}

/// A retriever that never returns context.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRetriever;

#[async_trait]
impl Retriever for NoopRetriever {
    async fn retrieve(&self, _query: &str) -> String {
        String::new()
    }
}

/// A retriever that returns the same text for every query.
///
/// Handy for loading a fixed knowledge file into every prompt.
#[derive(Debug, Clone)]
pub struct StaticRetriever {
    context: String,
}

impl StaticRetriever {
    pub fn new(context: impl Into<String>) -> Self {
        Self { context: context.into() }
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, _query: &str) -> String {
        self.context.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_returns_empty() {
        assert!(NoopRetriever.retrieve("anything").await.is_empty());
    }

    #[tokio::test]
    async fn static_returns_fixed_text() {
        let r = StaticRetriever::new("facts");
        assert_eq!(r.retrieve("q1").await, "facts");
        assert_eq!(r.retrieve("q2").await, "facts");
    }
}
