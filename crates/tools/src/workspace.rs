//! Workspace sandbox: confines file tools to one directory.
//!
//! Paths from the model are always interpreted relative to the workspace
//! root. Absolute paths and `..` components are rejected outright instead of
//! being normalized, so the check never depends on what exists on disk.

use std::path::{Component, Path, PathBuf};

use stepwise_core::error::ToolError;

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a model-supplied relative path inside the workspace.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, ToolError> {
        let trimmed = relative.trim();
        if trimmed.is_empty() {
            return Err(ToolError::InvalidArguments("Path must not be empty".into()));
        }

        let normalized = trimmed.replace('\\', "/");
        let path = Path::new(&normalized);
        for component in path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => {
                    return Err(ToolError::SandboxViolation(format!(
                        "Path traversal detected in '{relative}'"
                    )));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(ToolError::SandboxViolation(format!(
                        "Absolute path '{relative}' is outside the workspace"
                    )));
                }
            }
        }

        Ok(self.root.join(path))
    }

    /// Create a subdirectory of the workspace, with a catch-all `.gitignore`.
    pub async fn ensure_dir(&self, sub: &str) -> Result<PathBuf, ToolError> {
        let dir = if sub.is_empty() { self.root.clone() } else { self.resolve(sub)? };
        stepwise_memory::ensure_private_dir(&dir)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "workspace".into(),
                reason: format!("Failed to create {}: {e}", dir.display()),
            })?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_paths() {
        let ws = Workspace::new("/work");
        assert_eq!(ws.resolve("notes.txt").unwrap(), PathBuf::from("/work/notes.txt"));
        assert_eq!(ws.resolve("a/./b.md").unwrap(), PathBuf::from("/work/a/b.md"));
    }

    #[test]
    fn rejects_traversal_and_absolute() {
        let ws = Workspace::new("/work");
        assert!(matches!(ws.resolve("../etc/passwd"), Err(ToolError::SandboxViolation(_))));
        assert!(matches!(ws.resolve("a/../../b"), Err(ToolError::SandboxViolation(_))));
        assert!(matches!(ws.resolve("/etc/passwd"), Err(ToolError::SandboxViolation(_))));
        assert!(matches!(ws.resolve("..\\secret"), Err(ToolError::SandboxViolation(_))));
        assert!(matches!(ws.resolve("  "), Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn ensure_dir_creates_gitignore() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path());
        let dir = ws.ensure_dir("downloads").await.unwrap();
        assert!(dir.ends_with("downloads"));
        assert!(dir.join(".gitignore").exists());
    }
}
