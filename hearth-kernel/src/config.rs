use crate::models::Thresholds;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct KernelConfig {
    pub bind_addr: String,
    /// Adresse sous laquelle les nœuds joignent le coordinateur (res_data, res_prediction)
    pub advertised_address: String,
    pub data_dir: String,
    pub reset_store_on_start: bool,
    pub furnace_log_interval_secs: u64,
    pub nodes: NodesConf,
    pub starvation: Thresholds,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct NodesConf {
    pub http_port: u16,
    pub broker_port: u16,
    pub topic_prefix: String, // ex: "hearth" -> "hearth/res_furnace"
    pub command_timeout_secs: u64,
    pub keep_alive_secs: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            bind_addr: "[::]:8080".into(),
            advertised_address: "fd00::1".into(),
            data_dir: "./data".into(),
            reset_store_on_start: false,
            furnace_log_interval_secs: 15,
            nodes: NodesConf::default(),
            starvation: Thresholds::default(),
        }
    }
}

impl Default for NodesConf {
    fn default() -> Self {
        Self {
            http_port: 80,
            broker_port: 1883,
            topic_prefix: "hearth".into(),
            command_timeout_secs: 5,
            keep_alive_secs: 15,
        }
    }
}

impl KernelConfig {
    pub fn furnace_log_interval(&self) -> Duration {
        Duration::from_secs(self.furnace_log_interval_secs.max(1))
    }
}

impl NodesConf {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

fn parse_config(txt: &str) -> KernelConfig {
    if txt.trim().is_empty() {
        return KernelConfig::default();
    }
    serde_yaml::from_str(txt).unwrap_or_else(|e| {
        warn!("[kernel] invalid config, using defaults: {e}");
        KernelConfig::default()
    })
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("HEARTH_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        info!("[kernel] config loaded from {path}");
        parse_config(&txt)
    } else {
        info!("[kernel] no {path}, using default config");
        KernelConfig::default()
    }
}
