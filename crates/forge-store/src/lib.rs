//! Typed durable storage under a base path (default `runtime/`): whole-document
//! JSON read/write (atomic: write to a sibling temp file, then rename) and
//! append-only line logs, keyed by an arbitrary `(kind, key)` pair so the same
//! store backs workflows, tickets, approvals, quality reports and the
//! knowledge base.

use forge_types::{OrchestratorError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Document-level lock table: concurrent writers to the same `(kind, key)`
/// serialize; writers to different keys proceed independently. Locks are
/// created lazily and never removed, which is fine at this scale (keys are
/// workflow/run/ticket ids, bounded by how many runs exist on disk).
#[derive(Default)]
struct LockTable {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockTable {
    async fn get(&self, key: &str) -> Arc<Mutex<()>> {
        let mut guard = self.locks.lock().await;
        guard
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Typed durable store rooted at a base directory (`runtime/` by default).
pub struct PersistentStore {
    base_dir: PathBuf,
    locks: LockTable,
}

impl PersistentStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            locks: LockTable::default(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn doc_path(&self, kind: &str, key: &str) -> PathBuf {
        self.base_dir.join(kind).join(format!("{key}.json"))
    }

    fn log_path(&self, kind: &str, key: &str) -> PathBuf {
        self.base_dir.join(kind).join(format!("{key}.log"))
    }

    fn lock_key(kind: &str, key: &str) -> String {
        format!("{kind}/{key}")
    }

    /// Loads a document, returning `None` rather than erroring when absent —
    /// a missing document is a normal, typed outcome, not a failure.
    pub async fn load<T: DeserializeOwned>(&self, kind: &str, key: &str) -> Result<Option<T>> {
        let lock = self.locks.get(&Self::lock_key(kind, key)).await;
        let _guard = lock.lock().await;
        let path = self.doc_path(kind, key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes)?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(OrchestratorError::Storage(format!(
                "failed to read {kind}/{key}: {e}"
            ))),
        }
    }

    /// Writes a document atomically: serialize, write to a sibling `.tmp`
    /// file, `fsync`, then rename over the final path. The rename is the
    /// commit point; readers never observe a torn write.
    pub async fn save<T: Serialize + Sync>(&self, kind: &str, key: &str, value: &T) -> Result<()> {
        let lock = self.locks.get(&Self::lock_key(kind, key)).await;
        let _guard = lock.lock().await;
        let path = self.doc_path(kind, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_vec_pretty(value)?;
        atomic_write(&path, &content).await
    }

    /// Appends one line to `kind/key.log`. Crash-safe up to the last
    /// completed write; never rewrites existing content.
    pub async fn append_log(&self, kind: &str, key: &str, line: &str) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        let lock = self.locks.get(&Self::lock_key(kind, key)).await;
        let _guard = lock.lock().await;
        let path = self.log_path(kind, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| OrchestratorError::Storage(format!("failed to open {kind}/{key}.log: {e}")))?;
        file.write_all(line.as_bytes()).await?;
        if !line.ends_with('\n') {
            file.write_all(b"\n").await?;
        }
        file.flush().await?;
        Ok(())
    }

    pub async fn read_log(&self, kind: &str, key: &str) -> Result<String> {
        let path = self.log_path(kind, key);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(OrchestratorError::Storage(format!(
                "failed to read {kind}/{key}.log: {e}"
            ))),
        }
    }

    /// Lists document keys (without the `.json` suffix) under `kind` whose
    /// name starts with `prefix`.
    pub async fn list(&self, kind: &str, prefix: &str) -> Result<Vec<String>> {
        let dir = self.base_dir.join(kind);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(OrchestratorError::Storage(format!("failed to list {kind}: {e}"))),
        };
        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| OrchestratorError::Storage(e.to_string()))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".json") else { continue };
            if stem.starts_with(prefix) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    pub async fn exists(&self, kind: &str, key: &str) -> bool {
        tokio::fs::try_exists(self.doc_path(kind, key))
            .await
            .unwrap_or(false)
    }

    pub async fn remove(&self, kind: &str, key: &str) -> Result<()> {
        let lock = self.locks.get(&Self::lock_key(kind, key)).await;
        let _guard = lock.lock().await;
        let path = self.doc_path(kind, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OrchestratorError::Storage(format!(
                "failed to remove {kind}/{key}: {e}"
            ))),
        }
    }

    /// Writes raw text atomically to `kind/key`, with `key` carrying its own
    /// extension (e.g. `"<id>/failure-report.md"`) rather than having `.json`
    /// appended — for documents that are not JSON, such as the Markdown
    /// failure report (§6/§7).
    pub async fn write_text(&self, kind: &str, key: &str, content: &str) -> Result<()> {
        let lock = self.locks.get(&Self::lock_key(kind, key)).await;
        let _guard = lock.lock().await;
        let path = self.base_dir.join(kind).join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        atomic_write(&path, content.as_bytes()).await
    }
}

async fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    use tokio::io::AsyncWriteExt;
    let temp_path = path.with_extension("tmp");
    {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(content).await?;
        file.sync_all().await?;
    }
    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}
