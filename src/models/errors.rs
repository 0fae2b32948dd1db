use std::time::Duration;

use thiserror::Error;

/// Fatal outcome of a backfill run.
///
/// Every variant aborts the run. Connectivity and window failures are fixed by
/// re-running (the checkpoint resolver makes that safe); configuration and data
/// failures need an operator.
#[derive(Error, Debug)]
pub enum BackfillError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Connectivity failure ({context}): {source}")]
    Connectivity {
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Window [{from}, {to}] failed: {source}")]
    Window {
        from: u64,
        to: u64,
        #[source]
        source: WindowError,
    },

    #[error("Malformed log in block {block_number}: {source}")]
    Data {
        block_number: u64,
        #[source]
        source: DataError,
    },
}

impl BackfillError {
    pub fn connectivity(context: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Connectivity {
            context,
            source: source.into(),
        }
    }

    /// True when re-invoking the run can succeed without changing anything.
    pub fn is_retryable_by_rerun(&self) -> bool {
        matches!(self, Self::Connectivity { .. } | Self::Window { .. })
    }
}

#[derive(Error, Debug)]
pub enum WindowError {
    #[error("Source query timed out after {0:?}")]
    Timeout(Duration),
    #[error("Source query failed: {0}")]
    Source(anyhow::Error),
    #[error("Destination write failed: {0}")]
    Write(anyhow::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    #[error("Payload of {hex_len} hex characters is not a multiple of 64")]
    PayloadNotAligned { hex_len: usize },
    #[error("Missing required field in log: {field}")]
    MissingField { field: &'static str },
    #[error("Invalid encoded argument: {reason}")]
    InvalidEncoding { reason: String },
}
