//! Chat memory implementations for Stepwise, plus the reference document
//! retriever.

pub mod noop;
pub mod in_memory;
pub mod file_backend;
pub mod documents;

use std::sync::Arc;

use stepwise_config::{MemoryConfig, RetrieverConfig};
use stepwise_core::memory::ChatMemory;
use stepwise_core::retriever::{NoopRetriever, Retriever};

pub use noop::NoopMemory;
pub use in_memory::{DEFAULT_MAX_MESSAGES, InMemoryChatMemory};
pub use file_backend::{FileChatMemory, ensure_private_dir};
pub use documents::DocumentRetriever;

/// Build the configured chat memory backend.
///
/// `dir` is used by the file backend only.
pub fn from_config(config: &MemoryConfig, dir: std::path::PathBuf) -> Arc<dyn ChatMemory> {
    match config.backend.as_str() {
        "file" => Arc::new(FileChatMemory::new(dir)),
        "none" => Arc::new(NoopMemory),
        _ => Arc::new(InMemoryChatMemory::new(config.max_messages)),
    }
}

/// Build the configured retriever: reference documents when `docs_dir` is
/// set, otherwise none.
pub fn retriever_from_config(config: &RetrieverConfig) -> Arc<dyn Retriever> {
    match &config.docs_dir {
        Some(dir) => Arc::new(DocumentRetriever::from_config(dir.clone(), config)),
        None => Arc::new(NoopRetriever),
    }
}
