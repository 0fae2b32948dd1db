pub mod checkpoint;
pub mod encoder;
pub mod rpc;
pub mod scanner;

use futures::TryStreamExt;
use opentelemetry::KeyValue;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::backfill::checkpoint::Checkpoint;
use crate::backfill::encoder::encode_logs;
use crate::backfill::scanner::{BlockWindow, LogSource, Windows, scan};
use crate::metrics::Metrics;
use crate::models::common::ScanSettings;
use crate::models::errors::{BackfillError, WindowError};
use crate::models::logs::LogRecord;
use crate::storage::{HeightSource, LogStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub checkpoint: Checkpoint,
    pub windows: u64,
    pub records: u64,
    /// Highest block written during this run.
    pub last_block: Option<u64>,
}

impl RunSummary {
    /// Highest block in the destination once the run is over.
    pub fn checkpoint_block(&self) -> u64 {
        self.last_block
            .unwrap_or(self.checkpoint.resume_from)
            .max(self.checkpoint.resume_from)
    }
}

/// Resolve the checkpoint, then scan, encode and upsert window by window.
///
/// A window is persisted before the next one is fetched. Any failure ends the
/// run; re-running resumes from the destination's checkpoint.
pub async fn run<S, D, H>(
    source: &S,
    store: &D,
    height: &H,
    settings: &ScanSettings,
    metrics: Option<&Metrics>,
) -> Result<RunSummary, BackfillError>
where
    S: LogSource,
    D: LogStore,
    H: HeightSource,
{
    let checkpoint = checkpoint::resolve(store, height).await?;
    info!(
        "Resuming from block {} towards target height {} in windows of {} blocks",
        checkpoint.resume_from, checkpoint.target, settings.window_size
    );
    if let Some(metrics) = metrics {
        metrics.target_height.record(
            checkpoint.target,
            &[KeyValue::new("dataset", metrics.dataset.clone())],
        );
    }

    let windows = Windows::new(
        checkpoint.resume_from,
        checkpoint.target,
        settings.window_size,
    );
    let batches = scan(source, windows, settings.window_timeout, metrics);
    let mut batches = std::pin::pin!(batches);

    let mut summary = RunSummary {
        checkpoint,
        windows: 0,
        records: 0,
        last_block: None,
    };

    let mut window_start = Instant::now();
    while let Some((window, logs)) = batches.try_next().await? {
        let fetched = logs.len();
        let records = encode_logs(logs)
            .map_err(|(block_number, source)| BackfillError::Data { block_number, source })?;
        persist_window(store, window, &records).await?;

        let elapsed = window_start.elapsed().as_secs_f64();
        info!(
            "Upserted {} of {} logs in range {} to {} took: {:.3}s",
            records.len(),
            fetched,
            window.from,
            window.to,
            elapsed
        );

        summary.windows += 1;
        summary.records += records.len() as u64;
        if let Some(max) = records.iter().map(|r| r.block_number).max() {
            summary.last_block = summary.last_block.max(Some(max));
        }

        if let Some(metrics) = metrics {
            let labels = [KeyValue::new("dataset", metrics.dataset.clone())];
            metrics.windows_processed.add(1, &labels);
            metrics.logs_upserted.add(records.len() as u64, &labels);
            metrics.latest_persisted_block.record(window.to, &labels);
            metrics.window_processing_time.record(elapsed, &labels);
        }
        window_start = Instant::now();
    }

    Ok(summary)
}

async fn persist_window<D: LogStore>(
    store: &D,
    window: BlockWindow,
    records: &[LogRecord],
) -> Result<(), BackfillError> {
    if records.is_empty() {
        debug!("No logs in range {} to {}", window.from, window.to);
        return Ok(());
    }
    store
        .upsert_batch(records)
        .await
        .map_err(|e| BackfillError::Window {
            from: window.from,
            to: window.to,
            source: WindowError::Write(e),
        })
}
