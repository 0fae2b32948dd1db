use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{Result, anyhow};

use crate::models::logs::LogRecord;
use crate::storage::LogStore;

/// Destination store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<String, LogRecord>,
    upsert_calls: usize,
    deleted_blocks: Vec<u64>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = LogRecord>) -> Self {
        let store = Self::default();
        if let Ok(mut inner) = store.inner.lock() {
            inner
                .records
                .extend(records.into_iter().map(|r| (r.id.clone(), r)));
        }
        store
    }

    /// Records ordered by (block, tx, log).
    pub fn records(&self) -> Vec<LogRecord> {
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        let mut records: Vec<LogRecord> = inner.records.values().cloned().collect();
        records.sort_by_key(|r| (r.block_number, r.tx_index, r.index));
        records
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.records.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of batch writes that reached the store.
    pub fn upsert_calls(&self) -> usize {
        self.inner.lock().map(|i| i.upsert_calls).unwrap_or_default()
    }

    pub fn deleted_blocks(&self) -> Vec<u64> {
        self.inner
            .lock()
            .map(|i| i.deleted_blocks.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

impl LogStore for MemoryLogStore {
    async fn max_block_number(&self) -> Result<Option<u64>> {
        Ok(self.lock()?.records.values().map(|r| r.block_number).max())
    }

    async fn delete_block(&self, block_number: u64) -> Result<()> {
        let mut inner = self.lock()?;
        inner.records.retain(|_, r| r.block_number != block_number);
        inner.deleted_blocks.push(block_number);
        Ok(())
    }

    async fn upsert_batch(&self, records: &[LogRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut inner = self.lock()?;
        inner.upsert_calls += 1;
        for record in records {
            inner.records.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }
}
