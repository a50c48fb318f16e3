//! Snapshot persistence — `save(blob)` / `load() -> blob`.
//!
//! Memory and task state are written as full JSON snapshots after every
//! meaningful mutation. There is no incremental format.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

/// Whole-state blob storage.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Replace the stored snapshot.
    async fn save(&self, blob: &str) -> Result<()>;

    /// Read the stored snapshot; `None` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<String>>;

    /// Human-readable location for logs and status output.
    fn describe(&self) -> String;
}

// ─────────────────────────────────────────────
// JSON file store
// ─────────────────────────────────────────────

/// Snapshot stored in a single file on disk.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, blob: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        tokio::fs::write(&self.path, blob)
            .await
            .with_context(|| format!("writing {}", self.path.display()))?;
        debug!(path = %self.path.display(), bytes = blob.len(), "Snapshot saved");
        Ok(())
    }

    async fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No snapshot found, starting empty");
            return Ok(None);
        }
        let blob = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        Ok(Some(blob))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ─────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────

/// Snapshot kept in process memory. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    blob: Mutex<Option<String>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an existing snapshot.
    pub fn with_blob(blob: impl Into<String>) -> Self {
        Self {
            blob: Mutex::new(Some(blob.into())),
        }
    }

    /// Current snapshot contents.
    pub fn contents(&self) -> Option<String> {
        self.blob.lock().map(|b| b.clone()).unwrap_or(None)
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, blob: &str) -> Result<()> {
        let mut slot = self
            .blob
            .lock()
            .map_err(|_| anyhow::anyhow!("snapshot lock poisoned"))?;
        *slot = Some(blob.to_string());
        Ok(())
    }

    async fn load(&self) -> Result<Option<String>> {
        Ok(self.contents())
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}
