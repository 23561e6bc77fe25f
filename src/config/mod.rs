use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub network: NetworkConfig,
    pub mining: MiningConfig,
    pub dev_fee: DevFeeConfig,
    pub state: StateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub base_url: String,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningConfig {
    /// Number of parallel workers per cohort, 1-32.
    pub worker_threads: u32,
    /// Nonces hashed per batch, 50-1000.
    pub batch_size: u32,
    /// Consecutive submission failures tolerated before the coordinator
    /// gives up on an address for the current rotation.
    pub max_submission_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevFeeConfig {
    pub enabled: bool,
    /// Ratio R: one dev-fee solution is owed per R user solutions. Kept
    /// as a single configured value rather than a hard-coded constant;
    /// sources disagreed on whether this was 17 or 24.
    pub ratio: u32,
    /// Path to a JSON array of dev-fee pool addresses (round-robin
    /// source). Address derivation is out of scope for this crate; this
    /// file is produced by whatever wallet tooling maintains the pool.
    pub addresses_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Append-only JSON-lines receipt/error log, replayed at startup.
    pub receipt_log_path: String,
    /// Path to a JSON array of signing-capable `Address` records. Wallet
    /// derivation and registration signing happen upstream of this
    /// crate; it only consumes the result.
    pub addresses_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig {
                base_url: "https://challenge.example.invalid".to_string(),
                poll_interval_ms: 2000,
            },
            mining: MiningConfig {
                worker_threads: 11,
                batch_size: 300,
                max_submission_failures: 6,
            },
            dev_fee: DevFeeConfig {
                enabled: true,
                ratio: 17,
                addresses_file: "dev_fee_addresses.json".to_string(),
            },
            state: StateConfig {
                receipt_log_path: "receipts.jsonl".to_string(),
                addresses_file: "addresses.json".to_string(),
            },
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            (1..=32).contains(&self.mining.worker_threads),
            "worker_threads must be in 1..=32, got {}",
            self.mining.worker_threads
        );
        anyhow::ensure!(
            (50..=1000).contains(&self.mining.batch_size),
            "batch_size must be in 50..=1000, got {}",
            self.mining.batch_size
        );
        anyhow::ensure!(self.dev_fee.ratio > 0, "dev_fee.ratio must be positive");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = Config::default();
        cfg.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.mining.worker_threads, cfg.mining.worker_threads);
        assert_eq!(loaded.dev_fee.ratio, cfg.dev_fee.ratio);
    }

    #[test]
    fn rejects_out_of_range_worker_threads() {
        let mut cfg = Config::default();
        cfg.mining.worker_threads = 0;
        assert!(cfg.validate().is_err());
    }
}
