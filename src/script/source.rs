use crate::core::{DbError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// Where script text comes from, addressed by script id.
#[async_trait]
pub trait ScriptSource: Send + Sync {
    /// Returns the script's source text, or `ScriptNotFound`.
    async fn read(&self, script_id: &str) -> Result<String>;
}

/// Scripts stored as files below a root directory; the id is the relative path.
#[derive(Debug, Clone)]
pub struct DirectoryScripts {
    root: PathBuf,
}

impl DirectoryScripts {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, script_id: &str) -> Option<PathBuf> {
        let relative = Path::new(script_id);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if script_id.is_empty() || escapes {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl ScriptSource for DirectoryScripts {
    async fn read(&self, script_id: &str) -> Result<String> {
        let path = self
            .resolve(script_id)
            .ok_or_else(|| DbError::ScriptNotFound(script_id.to_string()))?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(DbError::ScriptNotFound(script_id.to_string()))
            }
            Err(e) => Err(DbError::Io(format!(
                "Failed to read script {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Scripts held in memory, mostly for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticScripts {
    scripts: HashMap<String, String>,
}

impl StaticScripts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, script_id: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(script_id, source);
        self
    }

    pub fn insert(&mut self, script_id: impl Into<String>, source: impl Into<String>) {
        self.scripts.insert(script_id.into(), source.into());
    }
}

#[async_trait]
impl ScriptSource for StaticScripts {
    async fn read(&self, script_id: &str) -> Result<String> {
        self.scripts
            .get(script_id)
            .cloned()
            .ok_or_else(|| DbError::ScriptNotFound(script_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_directory_scripts() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("caves")).unwrap();
        std::fs::write(dir.path().join("caves/read.ops"), "operation f() {\n}\n").unwrap();

        let scripts = DirectoryScripts::new(dir.path());
        assert!(scripts.read("caves/read.ops").await.unwrap().starts_with("operation"));
        assert!(matches!(
            scripts.read("caves/missing.ops").await,
            Err(DbError::ScriptNotFound(_))
        ));
        assert!(matches!(
            scripts.read("../outside.ops").await,
            Err(DbError::ScriptNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_static_scripts() {
        let scripts = StaticScripts::new().with("a.ops", "operation a() {\n}\n");
        assert!(scripts.read("a.ops").await.is_ok());
        assert!(matches!(
            scripts.read("b.ops").await,
            Err(DbError::ScriptNotFound(_))
        ));
    }
}
