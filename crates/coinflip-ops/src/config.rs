//! Client configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use coinflip_events::WatchConfig;
use coinflip_tx::SubmitterConfig;
use coinflip_types::{Address, CoinflipError, Result};
use coinflip_units::parse_address;

pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;
pub const DEFAULT_CONTRACT: &str = "0x14220f1812eB4f224F5758B0EdFeF8F612A5EDCC";
pub const DEFAULT_EXPLORER: &str = "https://sepolia.etherscan.io";
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// Everything needed to reach the wallet node and the deployed contract.
///
/// Missing fields in a config file fall back to the Sepolia deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub contract_address: String,
    pub explorer_url: String,
    pub request_timeout_ms: u64,
    pub confirmation_poll_ms: u64,
    pub confirmation_max_attempts: u32,
    pub outcome_poll_ms: u64,
    /// How long to keep listening for the outcome once the wager is confirmed.
    pub outcome_grace_ms: u64,
    pub max_block_range: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.into(),
            chain_id: SEPOLIA_CHAIN_ID,
            contract_address: DEFAULT_CONTRACT.into(),
            explorer_url: DEFAULT_EXPLORER.into(),
            request_timeout_ms: 30_000,
            confirmation_poll_ms: 2_000,
            confirmation_max_attempts: 90,
            outcome_poll_ms: 2_000,
            outcome_grace_ms: 60_000,
            max_block_range: 1_000,
        }
    }
}

impl ClientConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CoinflipError::Config(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoinflipError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.trim().is_empty() {
            return Err(CoinflipError::Config("rpc_url is empty".into()));
        }
        self.contract()?;
        if self.confirmation_poll_ms == 0 || self.outcome_poll_ms == 0 {
            return Err(CoinflipError::Config("poll intervals must be non-zero".into()));
        }
        if self.confirmation_max_attempts == 0 {
            return Err(CoinflipError::Config(
                "confirmation_max_attempts must be non-zero".into(),
            ));
        }
        if self.max_block_range == 0 {
            return Err(CoinflipError::Config("max_block_range must be non-zero".into()));
        }
        Ok(())
    }

    pub fn contract(&self) -> Result<Address> {
        parse_address(&self.contract_address).map_err(|e| {
            CoinflipError::Config(format!("contract_address {:?}: {}", self.contract_address, e))
        })
    }

    pub fn submitter_config(&self) -> SubmitterConfig {
        SubmitterConfig {
            poll_ms: self.confirmation_poll_ms,
            max_attempts: self.confirmation_max_attempts,
        }
    }

    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig {
            poll_ms: self.outcome_poll_ms,
            max_block_range: self.max_block_range,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        config.validate().unwrap();
        assert_eq!(config.chain_id, SEPOLIA_CHAIN_ID);
        assert_eq!(
            config.contract().unwrap(),
            parse_address("0x14220f1812eb4f224f5758b0edfef8f612a5edcc").unwrap()
        );
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ClientConfig::from_json_str(
            r#"{ "rpc_url": "http://node:8545", "outcome_grace_ms": 5000 }"#,
        )
        .unwrap();
        assert_eq!(config.rpc_url, "http://node:8545");
        assert_eq!(config.outcome_grace_ms, 5_000);
        assert_eq!(config.explorer_url, DEFAULT_EXPLORER);
        assert_eq!(config.submitter_config().max_attempts, 90);
        assert_eq!(config.watch_config().max_block_range, 1_000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_contract = ClientConfig {
            contract_address: "0x1234".into(),
            ..Default::default()
        };
        assert!(matches!(bad_contract.validate(), Err(CoinflipError::Config(_))));

        let zero_poll = ClientConfig {
            confirmation_poll_ms: 0,
            ..Default::default()
        };
        assert!(matches!(zero_poll.validate(), Err(CoinflipError::Config(_))));

        let zero_range = ClientConfig {
            max_block_range: 0,
            ..Default::default()
        };
        assert!(zero_range.validate().is_err());
    }

    #[test]
    fn test_bad_json_is_config_error() {
        assert!(matches!(
            ClientConfig::from_json_str("{ not json"),
            Err(CoinflipError::Config(_))
        ));
        assert!(matches!(
            ClientConfig::from_json_file("/nonexistent/coinflip.json"),
            Err(CoinflipError::Config(_))
        ));
    }
}
