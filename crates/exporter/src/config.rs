//! Exporter configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Exporter configuration, read from `EXPORTER_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    /// Node name from the Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for metrics and health endpoints
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Host root filesystem mount
    #[serde(default = "default_rootfs_path")]
    pub rootfs_path: PathBuf,

    /// Pod snapshot refresh interval in seconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_default()
}

fn default_api_port() -> u16 {
    9100
}

fn default_rootfs_path() -> PathBuf {
    PathBuf::from("/rootfs")
}

fn default_refresh_interval() -> u64 {
    5
}

impl ExporterConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        Self::from_env(config::Environment::with_prefix("EXPORTER"))
    }

    fn from_env(env: config::Environment) -> Result<Self> {
        let config: ExporterConfig = config::Config::builder()
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()
            .context("Invalid exporter configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_name.trim().is_empty() {
            anyhow::bail!("Node name not found, set EXPORTER_NODE_NAME or NODE_NAME");
        }
        if self.refresh_interval_secs == 0 {
            anyhow::bail!("Refresh interval must be at least one second");
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}
