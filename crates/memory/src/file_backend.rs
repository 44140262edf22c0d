//! File-based audit sink: append-only JSON-lines storage.
//!
//! Each line is one JSON-encoded `ExternalMemoryEntry`. The file is only ever
//! opened in append mode; nothing rewrites or truncates it.
//!
//! Storage location: `~/.mindloop/audit.jsonl` unless configured.

use async_trait::async_trait;
use mindloop_core::audit::{AuditFilter, AuditSink, ExternalMemoryEntry};
use mindloop_core::error::MemoryError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A JSONL audit sink. Appends from one process are serialized by a mutex
/// so lines never interleave.
pub struct JsonlAuditSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditSink {
    /// Create a sink at `path`. The file is created on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        debug!(path = %path.display(), "JSONL audit sink opened");
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(&self) -> Result<Vec<ExternalMemoryEntry>, MemoryError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(MemoryError::QueryFailed(format!(
                    "Failed to read audit file {}: {e}",
                    self.path.display()
                )));
            }
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<ExternalMemoryEntry>(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable audit line");
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn append(&self, entry: &ExternalMemoryEntry) -> Result<(), MemoryError> {
        let mut line = serde_json::to_string(entry)
            .map_err(|e| MemoryError::AppendFailed(format!("Failed to serialize entry: {e}")))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                MemoryError::AppendFailed(format!("Failed to create audit directory: {e}"))
            })?;
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| MemoryError::AppendFailed(format!("Failed to open audit file: {e}")))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| MemoryError::AppendFailed(format!("Failed to write audit file: {e}")))?;

        Ok(())
    }

    async fn read(&self, filter: &AuditFilter) -> Result<Vec<ExternalMemoryEntry>, MemoryError> {
        let entries = self.load_from_disk()?;
        Ok(filter.apply(entries))
    }
}
