//! Reference documents as a keyword-scored [`Retriever`].
//!
//! Every `.md`, `.txt` and `.json` file directly inside the docs directory
//! is split into chunks on paragraph boundaries. Each chunk starts with its
//! file name so the model can cite it. The directory is read once, on the
//! first query.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use stepwise_config::RetrieverConfig;
use stepwise_core::retriever::Retriever;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const DOC_EXTENSIONS: &[&str] = &["md", "txt", "json"];

/// Heading placed above the selected chunks.
pub const CONTEXT_HEADER: &str = "The following are relevant reference documents:";

pub struct DocumentRetriever {
    dir: PathBuf,
    max_results: usize,
    chunk_size: usize,
    chunk_overlap: usize,
    chunks: OnceCell<Vec<String>>,
}

impl DocumentRetriever {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::from_config(dir, &RetrieverConfig::default())
    }

    pub fn from_config(dir: impl Into<PathBuf>, config: &RetrieverConfig) -> Self {
        let chunk_size = config.chunk_size.max(1);
        Self {
            dir: dir.into(),
            max_results: config.max_results,
            chunk_size,
            chunk_overlap: config.chunk_overlap.min(chunk_size - 1),
            chunks: OnceCell::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn chunks(&self) -> &[String] {
        self.chunks
            .get_or_init(|| load_chunks(&self.dir, self.chunk_size, self.chunk_overlap))
            .await
    }
}

#[async_trait]
impl Retriever for DocumentRetriever {
    async fn retrieve(&self, query: &str) -> String {
        let terms = query_terms(query);
        if terms.is_empty() || self.max_results == 0 {
            return String::new();
        }

        let mut scored: Vec<(f32, &String)> = self
            .chunks()
            .await
            .iter()
            .map(|chunk| (score(chunk, &terms), chunk))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.max_results);

        debug!(query = %query, hits = scored.len(), "Retrieved reference chunks");
        if scored.is_empty() {
            return String::new();
        }

        let body: Vec<&str> = scored.iter().map(|(_, chunk)| chunk.as_str()).collect();
        format!("{CONTEXT_HEADER}\n{}", body.join("\n\n"))
    }
}

/// Lowercased query words of three or more characters, deduplicated.
fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

/// Keyword occurrences per hundred characters, so long chunks do not win on
/// length alone.
fn score(chunk: &str, terms: &[String]) -> f32 {
    let lower = chunk.to_lowercase();
    let occurrences: usize = terms.iter().map(|t| lower.matches(t.as_str()).count()).sum();
    occurrences as f32 / (chunk.len() as f32 / 100.0).max(1.0)
}

async fn load_chunks(dir: &Path, chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Documents path not readable, retrieval disabled");
            return Vec::new();
        }
    };

    let mut paths = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let wanted = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| DOC_EXTENSIONS.contains(&e));
        if wanted {
            paths.push(path);
        }
    }
    paths.sort();

    let mut chunks = Vec::new();
    for path in &paths {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                for piece in split_chunks(&content, chunk_size, overlap) {
                    chunks.push(format!("{file_name}\n{piece}"));
                }
            }
            Err(e) => warn!(file = %path.display(), error = %e, "Failed to load document"),
        }
    }

    info!(dir = %dir.display(), documents = paths.len(), chunks = chunks.len(), "Loaded reference documents");
    chunks
}

/// Pack paragraphs into chunks of at most `size` characters. A paragraph
/// longer than `size` is cut into windows that share `overlap` characters.
pub fn split_chunks(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let len = paragraph.chars().count();
        if len > size {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = paragraph.chars().collect();
            let step = size - overlap;
            let mut start = 0;
            loop {
                let end = (start + size).min(chars.len());
                chunks.push(chars[start..end].iter().collect());
                if end == chars.len() {
                    break;
                }
                start += step;
            }
            continue;
        }

        let joined = if current.is_empty() { len } else { current.chars().count() + 2 + len };
        if joined > size {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
