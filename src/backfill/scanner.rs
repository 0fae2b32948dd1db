use std::time::{Duration, Instant};

use futures::{Stream, StreamExt, stream};
use opentelemetry::KeyValue;

use crate::metrics::Metrics;
use crate::models::errors::{BackfillError, WindowError};
use crate::models::logs::RawEventLog;

/// Inclusive block range fetched with one source query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockWindow {
    pub from: u64,
    pub to: u64,
}

/// Windows of `size` blocks covering `[start, target]`, the last one clamped
/// to `target`. Empty when `start >= target`.
#[derive(Debug, Clone)]
pub struct Windows {
    next: Option<u64>,
    target: u64,
    size: u64,
}

impl Windows {
    pub fn new(start: u64, target: u64, size: u64) -> Self {
        Self {
            next: (start < target).then_some(start),
            target,
            size: size.max(1),
        }
    }
}

impl Iterator for Windows {
    type Item = BlockWindow;

    fn next(&mut self) -> Option<BlockWindow> {
        let from = self.next?;
        let to = from.saturating_add(self.size - 1).min(self.target);
        self.next = (to < self.target).then(|| to + 1);
        Some(BlockWindow { from, to })
    }
}

/// Source ledger range query.
#[allow(async_fn_in_trait)]
pub trait LogSource {
    /// Logs of `[window.from, window.to]`, in chain order.
    async fn get_logs(&self, window: BlockWindow) -> Result<Vec<RawEventLog>, BackfillError>;
}

/// Lazily fetch each window; the next query is only issued once the consumer
/// asks for the next item.
pub fn scan<'a, S: LogSource>(
    source: &'a S,
    windows: Windows,
    timeout: Duration,
    metrics: Option<&'a Metrics>,
) -> impl Stream<Item = Result<(BlockWindow, Vec<RawEventLog>), BackfillError>> {
    stream::iter(windows).then(move |window| async move {
        let logs = fetch_window(source, window, timeout, metrics).await?;
        Ok((window, logs))
    })
}

async fn fetch_window<S: LogSource>(
    source: &S,
    window: BlockWindow,
    timeout: Duration,
    metrics: Option<&Metrics>,
) -> Result<Vec<RawEventLog>, BackfillError> {
    let start = Instant::now();
    let result = match tokio::time::timeout(timeout, source.get_logs(window)).await {
        Ok(result) => result,
        Err(_) => Err(BackfillError::Window {
            from: window.from,
            to: window.to,
            source: WindowError::Timeout(timeout),
        }),
    };

    if let Some(metrics) = metrics {
        let labels = [
            KeyValue::new("dataset", metrics.dataset.clone()),
            KeyValue::new("method", "eth_getLogs"),
        ];
        metrics.rpc_requests.add(1, &labels);
        metrics
            .rpc_latency
            .record(start.elapsed().as_secs_f64(), &labels);
        if result.is_err() {
            metrics.rpc_errors.add(1, &labels);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::sync::Mutex;

    fn windows(start: u64, target: u64, size: u64) -> Vec<(u64, u64)> {
        Windows::new(start, target, size)
            .map(|w| (w.from, w.to))
            .collect()
    }

    #[test]
    fn test_windows_clamp_to_target() {
        assert_eq!(windows(0, 249, 100), vec![(0, 99), (100, 199), (200, 249)]);
        assert_eq!(windows(250, 300, 100), vec![(250, 300)]);
        assert_eq!(windows(0, 200, 100), vec![(0, 99), (100, 199), (200, 200)]);
        assert_eq!(windows(0, 10, 1000), vec![(0, 10)]);
    }

    #[test]
    fn test_no_windows_when_caught_up() {
        assert!(windows(0, 0, 100).is_empty());
        assert!(windows(300, 300, 100).is_empty());
        assert!(windows(400, 300, 100).is_empty());
    }

    #[test]
    fn test_windows_near_u64_max() {
        let all = windows(u64::MAX - 5, u64::MAX, 4);
        assert_eq!(all, vec![(u64::MAX - 5, u64::MAX - 2), (u64::MAX - 1, u64::MAX)]);
    }

    struct RecordingSource {
        calls: Mutex<Vec<BlockWindow>>,
        delay: Duration,
    }

    impl LogSource for RecordingSource {
        async fn get_logs(&self, window: BlockWindow) -> Result<Vec<RawEventLog>, BackfillError> {
            self.calls.lock().unwrap().push(window);
            tokio::time::sleep(self.delay).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_scan_is_lazy() {
        let source = RecordingSource {
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        };
        let batches = scan(&source, Windows::new(0, 300, 100), Duration::from_secs(5), None);
        let mut batches = std::pin::pin!(batches);

        let (first, _) = batches.try_next().await.unwrap().unwrap();
        assert_eq!(first, BlockWindow { from: 0, to: 99 });
        assert_eq!(source.calls.lock().unwrap().len(), 1);

        let (second, _) = batches.try_next().await.unwrap().unwrap();
        assert_eq!(second, BlockWindow { from: 100, to: 199 });
        assert_eq!(source.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_scan_times_out_window() {
        let source = RecordingSource {
            calls: Mutex::new(Vec::new()),
            delay: Duration::from_secs(10),
        };
        let batches = scan(&source, Windows::new(0, 300, 100), Duration::from_millis(20), None);
        let mut batches = std::pin::pin!(batches);

        let err = batches.try_next().await.unwrap_err();
        assert!(matches!(
            err,
            BackfillError::Window {
                from: 0,
                to: 99,
                source: WindowError::Timeout(_)
            }
        ));
        assert!(err.is_retryable_by_rerun());
    }
}
