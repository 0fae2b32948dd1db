pub mod codec;
pub mod retry;

use std::path::Path;

use anyhow::{Context, Result};
use config::{Environment, File, Map};
use tracing::info;

use crate::models::common::Config;

pub const CONFIG_PATH_VAR: &str = "BACKFILL_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "config.yml";
const ENV_PREFIX: &str = "BACKFILL";

/// Load the config file (if present) overlaid with `BACKFILL_*` environment variables.
pub fn load_config() -> Result<Config> {
    let config_path =
        std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    load_config_from(config_path, None)
}

/// `env` replaces the process environment when given.
pub fn load_config_from<P: AsRef<Path>>(
    config_path: P,
    env: Option<Map<String, String>>,
) -> Result<Config> {
    let config_path = config_path.as_ref();
    info!("Config path: {}", config_path.to_string_lossy());

    let settings = config::Config::builder()
        .add_source(File::from(config_path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        )
        .build()
        .context("failed to read config")?;

    settings
        .try_deserialize()
        .context("failed to parse config")
}

pub(crate) fn strip_html(error: &str) -> String {
    // If the error contains HTML tags, extract just the text content
    if error.contains("<!doctype html>") || error.contains("<html>") {
        error
            .lines()
            .map(|line| line.trim())
            .find(|line| {
                !line.starts_with('<')
                    && !line.ends_with('>')
                    && !line.is_empty()
                    && *line != "html"
                    && *line != "body"
            })
            .unwrap_or(error)
            .to_string()
    } else {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::RpcEndpoint;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Option<Map<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults_without_file() {
        let config = load_config_from("does-not-exist.yml", env(&[])).unwrap();
        assert_eq!(config.rpc_url, "http://localhost:8545");
        assert_eq!(config.dataset, "eth");
        assert_eq!(config.table, "logs");
        assert_eq!(config.window_size, 100);
        assert_eq!(config.window_timeout_secs, 120);
        assert!(config.end_block.is_none());
        assert!(!config.metrics.enabled);
        assert_eq!(config.metrics.port, 9100);
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides_file() {
        let path = std::env::temp_dir().join(format!("backfill-{}.yml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "rpc_url: http://node:8545\nwindow_size: 1000\nmetrics:\n  enabled: true").unwrap();

        let config = load_config_from(
            &path,
            env(&[
                ("BACKFILL_WINDOW_SIZE", "250"),
                ("BACKFILL_END_BLOCK", "300"),
                ("BACKFILL_METRICS__PORT", "9200"),
            ]),
        )
        .unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.rpc_url, "http://node:8545");
        assert_eq!(config.window_size, 250);
        assert_eq!(config.end_block, Some(300));
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9200);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = load_config_from("does-not-exist.yml", env(&[])).unwrap();

        let mut config = base.clone();
        config.window_size = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.window_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.rpc_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.rpc_url = "ftp://node:21".to_string();
        assert!(config.validate().is_err());

        let mut config = base;
        config.height_table = Some("no_dataset".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_strip_html() {
        let page = "<!doctype html>\n<html>\n<body>\nBad Gateway\n</body>\n</html>";
        assert_eq!(strip_html(page), "Bad Gateway");
        assert_eq!(strip_html("connection refused"), "connection refused");
    }

    #[test]
    fn test_rpc_endpoint_accepts_ipc_and_ws() {
        let mut config = load_config_from("does-not-exist.yml", env(&[])).unwrap();

        config.rpc_url = "/tmp/development/geth.ipc".to_string();
        config.validate().unwrap();
        assert_eq!(
            config.rpc_endpoint().unwrap(),
            RpcEndpoint::Ipc("/tmp/development/geth.ipc".into())
        );

        config.rpc_url = "geth.ipc".to_string();
        assert!(matches!(config.rpc_endpoint().unwrap(), RpcEndpoint::Ipc(_)));

        config.rpc_url = "wss://node.example:8546".to_string();
        assert!(matches!(config.rpc_endpoint().unwrap(), RpcEndpoint::Url(_)));
        assert_eq!(config.rpc_endpoint().unwrap().to_string(), "wss://node.example:8546/");
    }
}
