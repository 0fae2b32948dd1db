use std::process::ExitCode;

use alloy_provider::{Provider, ProviderBuilder};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use log_backfill::backfill::{self, RunSummary, rpc::ChainHead, rpc::RpcLogSource};
use log_backfill::metrics::Metrics;
use log_backfill::models::errors::BackfillError;
use log_backfill::storage::bigquery::{BigQueryConnection, BigQueryHeightTable, BigQueryLogStore};
use log_backfill::storage::{FixedHeight, HeightSource};
use log_backfill::utils::load_config;

/// Where the target height comes from, by priority.
enum TargetHeight<'a, P> {
    Fixed(FixedHeight),
    Table(BigQueryHeightTable),
    ChainHead(ChainHead<'a, P>),
}

impl<P: Provider> HeightSource for TargetHeight<'_, P> {
    async fn target_height(&self) -> anyhow::Result<u64> {
        match self {
            TargetHeight::Fixed(height) => height.target_height().await,
            TargetHeight::Table(height) => height.target_height().await,
            TargetHeight::ChainHead(height) => height.target_height().await,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    println!();
    info!("=========================== INITIALIZING ===========================");

    match run().await {
        Ok(summary) => {
            info!(
                "Processed {} windows, upserted {} records, checkpoint: {}",
                summary.windows,
                summary.records,
                summary.checkpoint_block()
            );
            info!("backfill completed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            if e.is_retryable_by_rerun() {
                error!("Re-run to resume from the last persisted block");
            }
            match e {
                BackfillError::Config(_) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn run() -> Result<RunSummary, BackfillError> {
    let config = load_config().map_err(|e| BackfillError::Config(format!("{e:#}")))?;
    config.validate()?;
    info!("Config loaded successfully");

    let metrics = if config.metrics.enabled {
        Some(
            Metrics::new(config.dataset.clone())
                .map_err(|e| BackfillError::Config(format!("failed to set up metrics: {e}")))?,
        )
    } else {
        info!("Metrics are disabled");
        None
    };
    if let Some(metrics) = &metrics {
        metrics
            .start_metrics_server(&config.metrics.address, config.metrics.port)
            .await
            .map_err(|e| BackfillError::Config(format!("{e:#}")))?;
    }

    let endpoint = config.rpc_endpoint()?;
    info!("RPC endpoint: {}", endpoint);
    let provider = ProviderBuilder::new()
        .connect(&endpoint.to_string())
        .await
        .map_err(|e| BackfillError::connectivity("connecting to the source node", e))?;
    let source = RpcLogSource::new(provider);
    let chain_id = source.probe().await?;
    info!("Chain ID: {}", chain_id);

    let connection = BigQueryConnection::connect(config.project_id.as_deref())
        .await
        .map_err(|e| BackfillError::connectivity("connecting to BigQuery", e))?;
    connection
        .create_dataset(&config.dataset, &config.dataset_location)
        .await
        .map_err(|e| BackfillError::connectivity("creating dataset", e))?;
    connection
        .create_log_table(&config.dataset, &config.table)
        .await
        .map_err(|e| BackfillError::connectivity("creating log table", e))?;
    let store = BigQueryLogStore::new(connection.clone(), &config.dataset, &config.table);

    let height = match (config.end_block, &config.height_table) {
        (Some(end_block), _) => {
            info!("Target height fixed at {}", end_block);
            TargetHeight::Fixed(FixedHeight(end_block))
        }
        (None, Some(table)) => {
            info!("Target height tracked by {}.{}", connection.project_id(), table);
            TargetHeight::Table(BigQueryHeightTable::new(connection, table))
        }
        (None, None) => {
            info!("Target height follows the chain head");
            TargetHeight::ChainHead(ChainHead::new(source.provider()))
        }
    };

    println!();
    info!("========================= STARTING BACKFILL ========================");

    backfill::run(
        &source,
        &store,
        &height,
        &config.scan_settings(),
        metrics.as_ref(),
    )
    .await
}
