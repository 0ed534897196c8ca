use super::lock::{LockStats, StoreLock, lock_for};
use crate::core::{DbError, Result};
use crate::document::Document;
use crate::schema::Schema;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{Level, event};

// ============================================================================
// Durability Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurabilityMode {
    /// fsync the temporary file and its directory before and after the rename.
    #[default]
    Sync,
    /// Rename without fsync; the OS flushes eventually.
    Async,
}

// ============================================================================
// Document Store
// ============================================================================

/// Loads and saves the canonical document file.
///
/// Loads take a shared section on the path's lock; saves take an exclusive
/// one. The returned [`Document`] is a private copy and is not covered by
/// the lock.
pub struct DocumentStore {
    path: PathBuf,
    schema: Arc<Schema>,
    lock: Arc<StoreLock>,
    durability: DurabilityMode,
}

impl DocumentStore {
    pub fn open(
        path: impl AsRef<Path>,
        schema: Arc<Schema>,
        durability: DurabilityMode,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock = lock_for(&path)?;
        Ok(Self {
            path,
            schema,
            lock,
            durability,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn lock_stats(&self) -> LockStats {
        self.lock.stats()
    }

    pub async fn exists(&self) -> Result<bool> {
        tokio::fs::try_exists(&self.path).await.map_err(|e| {
            DbError::Io(format!("Failed to stat {}: {}", self.path.display(), e))
        })
    }

    /// True when the canonical file is missing or has no content.
    pub async fn is_empty(&self) -> Result<bool> {
        let _section = self.lock.read().await;
        file_is_empty(&self.path).await
    }

    pub async fn load(&self) -> Result<Document> {
        let bytes = {
            let _section = self.lock.read().await;
            match tokio::fs::read(&self.path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(DbError::NotFound(format!(
                        "Document file {} does not exist",
                        self.path.display()
                    )));
                }
                Err(e) => {
                    return Err(DbError::Io(format!(
                        "Failed to read {}: {}",
                        self.path.display(),
                        e
                    )));
                }
            }
        };

        let document = Document::decode(Arc::clone(&self.schema), &bytes)?;
        event!(
            Level::DEBUG,
            path = %self.path.display(),
            nodes = document.len(),
            "document loaded"
        );
        Ok(document)
    }

    /// Replaces the canonical file with `document`. On failure the previous
    /// content is left in place.
    ///
    /// The write runs on its own task holding the exclusive section, so
    /// dropping the returned future does not release the lock before the
    /// file is replaced.
    pub async fn save(&self, document: &Document) -> Result<()> {
        self.replace(document, false).await.map(|_| ())
    }

    /// Saves `document` only if the canonical file is still missing or
    /// empty when the exclusive section is held. Returns whether it wrote.
    pub async fn save_if_empty(&self, document: &Document) -> Result<bool> {
        self.replace(document, true).await
    }

    async fn replace(&self, document: &Document, only_if_empty: bool) -> Result<bool> {
        if document.schema().namespace() != self.schema.namespace() {
            return Err(DbError::SchemaMismatch(format!(
                "Document uses schema '{}', store expects '{}'",
                document.schema().namespace(),
                self.schema.namespace()
            )));
        }

        let bytes = document.encode()?;
        let size = bytes.len();
        let task = tokio::spawn(write_exclusive(
            Arc::clone(&self.lock),
            self.path.clone(),
            bytes,
            self.durability,
            only_if_empty,
        ));
        let written = task
            .await
            .map_err(|e| DbError::Persist(format!("Save task failed: {}", e)))?;

        match written {
            Ok(true) => {
                event!(
                    Level::DEBUG,
                    path = %self.path.display(),
                    bytes = size,
                    "document saved"
                );
                Ok(true)
            }
            Ok(false) => {
                event!(Level::DEBUG, path = %self.path.display(), "file has content, save skipped");
                Ok(false)
            }
            Err(err) => {
                event!(Level::ERROR, error = %err, path = %self.path.display(), "document save failed");
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("path", &self.path)
            .field("schema", &self.schema.namespace())
            .field("durability", &self.durability)
            .finish()
    }
}

async fn file_is_empty(path: &Path) -> Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len() == 0),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
        Err(e) => Err(DbError::Io(format!(
            "Failed to stat {}: {}",
            path.display(),
            e
        ))),
    }
}

async fn write_exclusive(
    lock: Arc<StoreLock>,
    path: PathBuf,
    bytes: Vec<u8>,
    durability: DurabilityMode,
    only_if_empty: bool,
) -> Result<bool> {
    let _section = lock.write().await;
    if only_if_empty && !file_is_empty(&path).await? {
        return Ok(false);
    }
    tokio::task::spawn_blocking(move || write_atomically(&path, &bytes, durability))
        .await
        .map_err(|e| DbError::Persist(format!("Write task failed: {}", e)))??;
    Ok(true)
}

fn write_atomically(path: &Path, bytes: &[u8], durability: DurabilityMode) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .map_err(|e| DbError::Persist(format!("Failed to create directory: {}", e)))?;

    let mut temp = NamedTempFile::new_in(parent)
        .map_err(|e| DbError::Persist(format!("Failed to create temp file: {}", e)))?;
    temp.write_all(bytes)
        .map_err(|e| DbError::Persist(format!("Failed to write document: {}", e)))?;
    temp.flush()
        .map_err(|e| DbError::Persist(format!("Failed to flush document: {}", e)))?;
    if durability == DurabilityMode::Sync {
        temp.as_file()
            .sync_all()
            .map_err(|e| DbError::Persist(format!("Failed to sync document: {}", e)))?;
    }

    temp.persist(path)
        .map_err(|e| DbError::Persist(format!("Failed to replace document: {}", e.error)))?;

    if durability == DurabilityMode::Sync {
        // Directory fsync is not supported everywhere; the rename already happened.
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}
