//! Configuration for the ledger engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::blockchain::block::{MiningRules, DEFAULT_BLOCK_REWARD, MAX_BLOCK_SIZE};

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Chain-wide settings; every field falls back to its default when omitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Initial mining difficulty (leading zero characters)
    pub difficulty: usize,

    /// Reward fixed on blocks built through the chain
    pub mining_reward: f64,

    /// Name of the account credited with mining rewards
    pub miner_name: String,

    pub miner_balance: f64,

    /// Serialized payload cap, in bytes
    pub max_block_size: u64,

    /// Upper bound on the wall-clock mining budget, in milliseconds
    pub mining_time_cap_ms: u64,

    /// Keep submitted transactions in mined blocks instead of clearing them
    pub keep_mined_transactions: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            difficulty: 4,
            mining_reward: DEFAULT_BLOCK_REWARD,
            miner_name: "Miner Wallet".to_string(),
            miner_balance: 1_000_000.0,
            max_block_size: MAX_BLOCK_SIZE,
            mining_time_cap_ms: 30_000,
            keep_mined_transactions: false,
        }
    }
}

impl ChainConfig {
    /// Loads configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn mining_time_cap(&self) -> Duration {
        Duration::from_millis(self.mining_time_cap_ms)
    }

    /// Mining rules at `difficulty` under this configuration
    pub fn mining_rules(&self, difficulty: usize) -> MiningRules {
        MiningRules {
            difficulty,
            max_block_size: self.max_block_size,
            time_cap: Some(self.mining_time_cap()),
            keep_transactions: self.keep_mined_transactions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ChainConfig::default();

        assert_eq!(config.difficulty, 4);
        assert_eq!(config.mining_reward, 50.0);
        assert_eq!(config.max_block_size, 1000);
        assert!(!config.keep_mined_transactions);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ChainConfig::from_toml("difficulty = 2\nminer_name = \"Rig\"\n").unwrap();

        assert_eq!(config.difficulty, 2);
        assert_eq!(config.miner_name, "Rig");
        assert_eq!(config.mining_reward, 50.0);
        assert_eq!(config.mining_time_cap(), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_toml() {
        let result = ChainConfig::from_toml("difficulty = \"hard\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "keep_mined_transactions = true").unwrap();
        writeln!(file, "mining_time_cap_ms = 250").unwrap();

        let config = ChainConfig::from_file(file.path()).unwrap();
        let rules = config.mining_rules(3);

        assert!(rules.keep_transactions);
        assert_eq!(rules.difficulty, 3);
        assert_eq!(rules.time_cap, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_missing_file() {
        let result = ChainConfig::from_file("/nonexistent/ledger.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
