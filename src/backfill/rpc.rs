use alloy_provider::Provider;
use alloy_rpc_types_eth::Filter;
use anyhow::{Result, anyhow};
use tracing::warn;

use crate::backfill::scanner::{BlockWindow, LogSource};
use crate::models::errors::{BackfillError, WindowError};
use crate::models::logs::RawEventLog;
use crate::storage::HeightSource;
use crate::utils::strip_html;

/// Source ledger backed by a JSON-RPC node.
pub struct RpcLogSource<P> {
    provider: P,
}

impl<P: Provider> RpcLogSource<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Fails fast when the node cannot be reached.
    pub async fn probe(&self) -> Result<u64, BackfillError> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| BackfillError::connectivity("querying chain id", rpc_error(e)))
    }
}

impl<P: Provider> LogSource for RpcLogSource<P> {
    async fn get_logs(&self, window: BlockWindow) -> Result<Vec<RawEventLog>, BackfillError> {
        let filter = Filter::new().from_block(window.from).to_block(window.to);
        let logs = self.provider.get_logs(&filter).await.map_err(|e| {
            warn!(
                "eth_getLogs failed for blocks {} to {}: {}",
                window.from, window.to, e
            );
            BackfillError::Window {
                from: window.from,
                to: window.to,
                source: WindowError::Source(rpc_error(e)),
            }
        })?;

        logs.into_iter()
            .map(|log| {
                let block_number = log.block_number.unwrap_or(window.from);
                RawEventLog::try_from(log)
                    .map_err(|source| BackfillError::Data { block_number, source })
            })
            .collect()
    }
}

/// Target height taken from the node's latest block.
pub struct ChainHead<'a, P> {
    provider: &'a P,
}

impl<'a, P: Provider> ChainHead<'a, P> {
    pub fn new(provider: &'a P) -> Self {
        Self { provider }
    }
}

impl<P: Provider> HeightSource for ChainHead<'_, P> {
    async fn target_height(&self) -> Result<u64> {
        self.provider.get_block_number().await.map_err(rpc_error)
    }
}

fn rpc_error(e: impl std::fmt::Display) -> anyhow::Error {
    anyhow!("RPC error: {}", strip_html(&e.to_string()))
}
