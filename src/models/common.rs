use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::{ParseError, Url};

use crate::models::errors::BackfillError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_address")]
    pub address: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
            port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// `http(s)://` or `ws(s)://` URL, or the path of a node's IPC socket.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Falls back to the project of the ambient Google credentials.
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_dataset")]
    pub dataset: String,
    #[serde(default = "default_dataset_location")]
    pub dataset_location: String,
    #[serde(default = "default_table")]
    pub table: String,
    /// `dataset.table` whose highest `block_number` is the backfill target.
    #[serde(default)]
    pub height_table: Option<String>,
    /// Explicit target height, takes priority over `height_table`.
    #[serde(default)]
    pub end_block: Option<u64>,
    #[serde(default = "default_window_size")]
    pub window_size: u64,
    #[serde(default = "default_window_timeout_secs")]
    pub window_timeout_secs: u64,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), BackfillError> {
        if self.window_size == 0 {
            return Err(BackfillError::Config("window_size must be positive".into()));
        }
        if self.window_timeout_secs == 0 {
            return Err(BackfillError::Config(
                "window_timeout_secs must be positive".into(),
            ));
        }
        self.rpc_endpoint()?;
        if let Some(height_table) = &self.height_table {
            if height_table.split('.').count() != 2 {
                return Err(BackfillError::Config(format!(
                    "height_table must be `dataset.table`, got '{height_table}'"
                )));
            }
        }
        Ok(())
    }

    pub fn rpc_endpoint(&self) -> Result<RpcEndpoint, BackfillError> {
        let invalid = |reason: String| {
            BackfillError::Config(format!("invalid rpc_url '{}': {reason}", self.rpc_url))
        };
        match Url::parse(&self.rpc_url) {
            Ok(url) => match url.scheme() {
                "http" | "https" | "ws" | "wss" => Ok(RpcEndpoint::Url(url)),
                "ipc" | "file" => Ok(RpcEndpoint::Ipc(PathBuf::from(url.path()))),
                scheme => Err(invalid(format!("unsupported scheme `{scheme}`"))),
            },
            Err(ParseError::RelativeUrlWithoutBase) => {
                let path = PathBuf::from(&self.rpc_url);
                if path.is_absolute() || path.extension().is_some_and(|ext| ext == "ipc") {
                    Ok(RpcEndpoint::Ipc(path))
                } else {
                    Err(invalid("neither a URL nor an IPC socket path".to_string()))
                }
            }
            Err(e) => Err(invalid(e.to_string())),
        }
    }

    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            window_size: self.window_size,
            window_timeout: Duration::from_secs(self.window_timeout_secs),
        }
    }
}

/// Transport to the source node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcEndpoint {
    Url(Url),
    Ipc(PathBuf),
}

impl fmt::Display for RpcEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcEndpoint::Url(url) => write!(f, "{url}"),
            RpcEndpoint::Ipc(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Knobs of the range scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    pub window_size: u64,
    pub window_timeout: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            window_timeout: Duration::from_secs(default_window_timeout_secs()),
        }
    }
}

fn default_rpc_url() -> String {
    "http://localhost:8545".to_string()
}

fn default_dataset() -> String {
    "eth".to_string()
}

fn default_dataset_location() -> String {
    "US".to_string()
}

fn default_table() -> String {
    "logs".to_string()
}

fn default_window_size() -> u64 {
    100
}

fn default_window_timeout_secs() -> u64 {
    120
}

fn default_metrics_address() -> String {
    "0.0.0.0".to_string()
}

fn default_metrics_port() -> u16 {
    9100
}
