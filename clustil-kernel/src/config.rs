use crate::scheduler::Cadence;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid bind address {0:?}")]
    InvalidBind(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct KernelConfig {
    /// ex: "0.0.0.0:3001"
    pub bind: String,
    pub tick_interval_ms: u64,
    pub full_resync_secs: u64,
    pub provider: ProviderKind,
    /// JSON file backing the memo store; volatile store when absent.
    pub annotations_path: Option<PathBuf>,
    /// Fixed RNG seed for the mock provider.
    pub seed: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Mock,
    Local,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3001".into(),
            tick_interval_ms: 2_000,
            full_resync_secs: 60,
            provider: ProviderKind::Mock,
            annotations_path: None,
            seed: None,
        }
    }
}

impl KernelConfig {
    pub fn cadence(&self) -> Cadence {
        let defaults = Cadence::default();
        let tick_interval = if self.tick_interval_ms == 0 {
            warn!("tick_interval_ms = 0 ignored, using {:?}", defaults.tick_interval);
            defaults.tick_interval
        } else {
            Duration::from_millis(self.tick_interval_ms)
        };
        Cadence {
            tick_interval,
            full_resync_interval: Duration::from_secs(self.full_resync_secs),
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|_| ConfigError::InvalidBind(self.bind.clone()))
    }
}

pub fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt)
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("CLUSTIL_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    if !Path::new(&path).exists() {
        info!("no {path}, using default config");
        return KernelConfig::default();
    }
    let txt = fs::read_to_string(&path).await.unwrap_or_default();
    parse_config(&txt).unwrap_or_else(|e| {
        warn!("invalid config {path}: {e}");
        KernelConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_means_defaults() {
        assert_eq!(parse_config("  \n").unwrap(), KernelConfig::default());
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let cfg = parse_config("provider: local\nfull_resync_secs: 30\nannotations_path: ./data/memos.json\n").unwrap();
        assert_eq!(cfg.provider, ProviderKind::Local);
        assert_eq!(cfg.cadence().full_resync_interval, Duration::from_secs(30));
        assert_eq!(cfg.cadence().tick_interval, Duration::from_secs(2));
        assert_eq!(cfg.annotations_path, Some(PathBuf::from("./data/memos.json")));
        assert_eq!(cfg.bind_addr().unwrap().port(), 3001);
    }

    #[test]
    fn zero_tick_interval_falls_back() {
        let cfg = KernelConfig {
            tick_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(cfg.cadence().tick_interval, Duration::from_secs(2));
    }

    #[test]
    fn bad_bind_is_reported() {
        let cfg = KernelConfig {
            bind: "localhost".into(),
            ..Default::default()
        };
        assert!(matches!(cfg.bind_addr(), Err(ConfigError::InvalidBind(_))));
    }

    #[test]
    fn unknown_provider_is_an_error() {
        assert!(parse_config("provider: saige\n").is_err());
    }
}
