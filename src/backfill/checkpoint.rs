use tracing::{info, warn};

use crate::models::errors::BackfillError;
use crate::storage::{HeightSource, LogStore};

/// Where a run starts and how far it goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub resume_from: u64,
    pub target: u64,
    /// Block whose records were deleted so it is fetched again.
    pub evicted: Option<u64>,
}

/// Resolve the starting block, evicting the last recorded block so a partially
/// written window is re-fetched in full.
///
/// When the destination already reaches the target nothing is evicted, since
/// no window would bring that block back.
pub async fn resolve<D, H>(store: &D, height: &H) -> Result<Checkpoint, BackfillError>
where
    D: LogStore,
    H: HeightSource,
{
    let target = height
        .target_height()
        .await
        .map_err(|e| BackfillError::connectivity("querying target height", e))?;

    let resume_from = store
        .max_block_number()
        .await
        .map_err(|e| BackfillError::connectivity("querying destination checkpoint", e))?
        .unwrap_or(0);

    if resume_from > target {
        warn!(
            "Destination is ahead of the target height: checkpoint {} > target {}",
            resume_from, target
        );
    }

    let evicted = if resume_from != 0 && resume_from < target {
        store
            .delete_block(resume_from)
            .await
            .map_err(|e| BackfillError::connectivity("evicting last checkpoint block", e))?;
        info!("Evicted records of block {} for re-fetch", resume_from);
        Some(resume_from)
    } else {
        None
    };

    Ok(Checkpoint {
        resume_from,
        target,
        evicted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backfill::encoder::LogEncoder;
    use crate::models::logs::{LogRecord, RawEventLog};
    use crate::storage::FixedHeight;
    use crate::storage::memory::MemoryLogStore;
    use alloy_primitives::{Address, B256, Bytes};
    use anyhow::anyhow;

    fn record(block_number: u64, log_index: u64) -> LogRecord {
        RawEventLog {
            block_number,
            tx_index: 0,
            log_index,
            removed: false,
            address: Address::ZERO,
            topics: vec![B256::ZERO],
            data: Bytes::new(),
        }
        .encode()
        .unwrap()
    }

    #[tokio::test]
    async fn test_empty_destination_starts_at_zero() {
        let store = MemoryLogStore::new();
        let checkpoint = resolve(&store, &FixedHeight(249)).await.unwrap();
        assert_eq!(
            checkpoint,
            Checkpoint {
                resume_from: 0,
                target: 249,
                evicted: None
            }
        );
        assert!(store.deleted_blocks().is_empty());
    }

    #[tokio::test]
    async fn test_last_block_is_evicted() {
        let store =
            MemoryLogStore::with_records([record(249, 0), record(250, 0), record(250, 1)]);
        let checkpoint = resolve(&store, &FixedHeight(300)).await.unwrap();

        assert_eq!(checkpoint.resume_from, 250);
        assert_eq!(checkpoint.evicted, Some(250));
        assert_eq!(store.deleted_blocks(), vec![250]);
        let remaining = store.records();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].block_number, 249);
    }

    #[tokio::test]
    async fn test_caught_up_destination_keeps_records() {
        let store = MemoryLogStore::with_records([record(300, 0)]);
        let checkpoint = resolve(&store, &FixedHeight(300)).await.unwrap();
        assert_eq!(checkpoint.evicted, None);
        assert_eq!(store.len(), 1);

        let checkpoint = resolve(&store, &FixedHeight(120)).await.unwrap();
        assert_eq!(checkpoint.resume_from, 300);
        assert_eq!(checkpoint.evicted, None);
    }

    struct Unreachable;

    impl LogStore for Unreachable {
        async fn max_block_number(&self) -> anyhow::Result<Option<u64>> {
            Err(anyhow!("connection refused"))
        }
        async fn delete_block(&self, _: u64) -> anyhow::Result<()> {
            Err(anyhow!("connection refused"))
        }
        async fn upsert_batch(&self, _: &[LogRecord]) -> anyhow::Result<()> {
            Err(anyhow!("connection refused"))
        }
    }

    #[tokio::test]
    async fn test_unreachable_destination_is_fatal() {
        let err = resolve(&Unreachable, &FixedHeight(10)).await.unwrap_err();
        assert!(matches!(err, BackfillError::Connectivity { .. }));
    }
}
