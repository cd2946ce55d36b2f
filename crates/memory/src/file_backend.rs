//! File-based chat memory: one JSON array per conversation.
//!
//! Storage layout: `<dir>/<conversation_id>.json`. The directory gets a
//! `.gitignore` containing `*` so transcripts never end up in a repository.
//! The files are plain JSON and can be inspected or edited by hand.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use stepwise_core::error::MemoryError;
use stepwise_core::memory::ChatMemory;
use stepwise_core::message::Message;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Create `dir` (and parents) and drop a catch-all `.gitignore` into it.
pub async fn ensure_private_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let gitignore = dir.join(".gitignore");
    if tokio::fs::metadata(&gitignore).await.is_err() {
        tokio::fs::write(&gitignore, "*").await?;
    }
    Ok(())
}

/// Chat memory persisted as JSON files.
///
/// Keeps the full history; unreadable or corrupt files read as an empty
/// history so a damaged file never blocks a conversation.
pub struct FileChatMemory {
    dir: PathBuf,
    // Serializes read-modify-write in `add`
    write_lock: Mutex<()>,
}

impl FileChatMemory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for a conversation. Characters outside `[A-Za-z0-9_.-]` are
    /// replaced so an id can never escape the directory.
    fn path_for(&self, conversation_id: &str) -> PathBuf {
        let safe: String = conversation_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let safe = safe.trim_start_matches('.');
        let safe = if safe.is_empty() { "_" } else { safe };
        self.dir.join(format!("{safe}.json"))
    }

    async fn read(&self, path: &Path) -> Vec<Message> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No readable chat history");
                return Vec::new();
            }
        };
        match serde_json::from_str(&content) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupted chat history");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl ChatMemory for FileChatMemory {
    fn name(&self) -> &str {
        "file"
    }

    async fn add(&self, conversation_id: &str, messages: Vec<Message>) -> Result<(), MemoryError> {
        let _guard = self.write_lock.lock().await;
        ensure_private_dir(&self.dir).await.map_err(|e| {
            MemoryError::Storage(format!("Failed to create memory directory: {e}"))
        })?;

        let path = self.path_for(conversation_id);
        let mut history = self.read(&path).await;
        history.extend(messages);

        let json = serde_json::to_string(&history)
            .map_err(|e| MemoryError::Serialization(e.to_string()))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to write {}: {e}", path.display())))?;
        Ok(())
    }

    async fn get(&self, conversation_id: &str) -> Result<Vec<Message>, MemoryError> {
        Ok(self.read(&self.path_for(conversation_id)).await)
    }

    async fn clear(&self, conversation_id: &str) -> Result<(), MemoryError> {
        let path = self.path_for(conversation_id);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!(path = %path.display(), error = %e, "Nothing to clear");
        }
        Ok(())
    }
}
