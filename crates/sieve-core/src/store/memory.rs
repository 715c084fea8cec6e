//! In-process result store

use super::{AnalysisRecord, RecordUpdate, ResultStore};
use crate::{ContentHash, CoreResult};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Result store backed by a map. Contents live as long as the process.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    records: RwLock<HashMap<ContentHash, AnalysisRecord>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn lookup(&self, hash: &ContentHash) -> CoreResult<Option<AnalysisRecord>> {
        Ok(self.records.read().await.get(hash).cloned())
    }

    async fn upsert(&self, hash: &ContentHash, update: RecordUpdate) -> CoreResult<()> {
        let mut records = self.records.write().await;
        let existing = records.remove(hash);
        let record = update.apply(hash, existing, chrono::Utc::now());
        records.insert(hash.clone(), record);
        Ok(())
    }
}
