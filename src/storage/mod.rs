pub mod bigquery;
pub mod memory;

use anyhow::Result;

use crate::models::logs::LogRecord;

/// Destination of the backfill.
///
/// Implementations only move encoded records around; they never look inside
/// `args`.
#[allow(async_fn_in_trait)]
pub trait LogStore {
    /// Highest `block_number` present, `None` when the store is empty.
    async fn max_block_number(&self) -> Result<Option<u64>>;

    /// Delete every record at exactly `block_number`.
    async fn delete_block(&self, block_number: u64) -> Result<()>;

    /// Insert or fully replace each record by `id`. An empty slice is a no-op.
    async fn upsert_batch(&self, records: &[LogRecord]) -> Result<()>;
}

/// Authority on how far the backfill should go.
#[allow(async_fn_in_trait)]
pub trait HeightSource {
    /// Highest known block number, 0 when nothing is known.
    async fn target_height(&self) -> Result<u64>;
}

/// A target height fixed by configuration.
#[derive(Debug, Clone, Copy)]
pub struct FixedHeight(pub u64);

impl HeightSource for FixedHeight {
    async fn target_height(&self) -> Result<u64> {
        Ok(self.0)
    }
}
