// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use crate::{RouterError, Result};

/// Control-plane wide tunables. Everything here is either a constant
/// spec.md names literally (pool cache size, burst size) or a cap spec.md
/// leaves for the implementer to pick (the RX queue-per-port cap).
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub max_ethports: u16,
    pub max_rxq_per_port: u16,
    pub default_rxq_size: u16,
    pub default_txq_size: u16,
    pub pool_cache_size: u32,
    pub burst_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_ethports: 32,
            max_rxq_per_port: 64,
            default_rxq_size: 1024,
            default_txq_size: 1024,
            pool_cache_size: 256,
            burst_size: 32,
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RouterError::bug(format!("Failed to read config {path}: {e}"))
        })?;
        serde_yaml::from_str(&content).map_err(|e| {
            RouterError::invalid_argument(format!(
                "Failed to parse config {path}: {e}"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.pool_cache_size, 256);
        assert_eq!(cfg.max_rxq_per_port, 64);
    }
}
