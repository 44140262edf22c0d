//! In-memory audit sink: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use mindloop_core::audit::{AuditFilter, AuditSink, ExternalMemoryEntry};
use mindloop_core::error::MemoryError;
use std::sync::Arc;
use tokio::sync::RwLock;

/// An audit sink that keeps entries in a Vec.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    entries: Arc<RwLock<Vec<ExternalMemoryEntry>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, entry: &ExternalMemoryEntry) -> Result<(), MemoryError> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn read(&self, filter: &AuditFilter) -> Result<Vec<ExternalMemoryEntry>, MemoryError> {
        let entries = self.entries.read().await;
        Ok(filter.apply(entries.iter().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindloop_core::audit::{AuditAction, AuditData};

    fn entry(run: &str) -> ExternalMemoryEntry {
        ExternalMemoryEntry::new(
            "a",
            AuditAction::Decision,
            AuditData::Opaque {
                value: serde_json::json!(null),
            },
        )
        .for_run(run)
    }

    #[tokio::test]
    async fn concurrent_appends_are_not_lost() {
        let sink = InMemoryAuditSink::new();
        let mut handles = Vec::new();
        for i in 0..50 {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                sink.append(&entry(&format!("r{i}"))).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(sink.len().await, 50);
    }

    #[tokio::test]
    async fn read_filters_by_run() {
        let sink = InMemoryAuditSink::new();
        sink.append(&entry("r1")).await.unwrap();
        sink.append(&entry("r2")).await.unwrap();
        sink.append(&entry("r1")).await.unwrap();
        let got = sink.read(&AuditFilter::run("r1")).await.unwrap();
        assert_eq!(got.len(), 2);
    }
}
