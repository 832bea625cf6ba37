//! Chain access for the coin-flip client.
//!
//! Defines the `ChainRpc` trait covering the JSON-RPC surface the client
//! needs (the methods an injected browser wallet forwards). Provides
//! `HttpRpc` for real nodes and `MemoryChain` for testing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use coinflip_types::{Address, Bytes, Result, TxHash, B256, U256};

pub mod abi;
pub mod memory;
pub mod rpc_client;

/// Transaction fields sent to `eth_sendTransaction` / `eth_call`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
}

/// Inclusion record of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_hash: TxHash,
    pub block_number: u64,
    /// `true` when execution succeeded, `false` when it reverted.
    pub status: bool,
    pub gas_used: u64,
    pub from: Address,
    pub to: Option<Address>,
}

/// A contract log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<TxHash>,
    pub log_index: Option<u64>,
    pub removed: bool,
}

/// Query for `eth_getLogs`. Only the first topic (event signature) is
/// filtered on the node side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topic0: Option<B256>,
    pub from_block: u64,
    pub to_block: u64,
}

/// The chain access trait.
///
/// All methods are async so that both HTTP and in-memory backends fit.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    // --- Accounts ---
    /// Ask the wallet for account access (`eth_requestAccounts`).
    async fn request_accounts(&self) -> Result<Vec<Address>>;
    async fn get_balance(&self, address: Address) -> Result<U256>;

    // --- Chain state ---
    async fn chain_id(&self) -> Result<u64>;
    async fn block_number(&self) -> Result<u64>;

    // --- Transactions ---
    /// Hand a transaction to the wallet for signing and broadcast.
    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<TxHash>;
    async fn get_transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>>;
    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes>;

    // --- Logs ---
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>>;
}

/// Block-explorer link for a transaction.
pub fn explorer_tx_url(explorer_base: &str, tx_hash: &TxHash) -> String {
    format!("{}/tx/{}", explorer_base.trim_end_matches('/'), tx_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explorer_url() {
        let hash = B256::repeat_byte(0x11);
        let url = explorer_tx_url("https://sepolia.etherscan.io/", &hash);
        assert_eq!(url, format!("https://sepolia.etherscan.io/tx/0x{}", "11".repeat(32)));
    }

    #[test]
    fn test_transaction_request_wire_format() {
        let tx = TransactionRequest {
            from: Some(Address::repeat_byte(0xaa)),
            to: None,
            value: Some(U256::from(255u64)),
            data: None,
        };
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["value"], "0xff");
        assert!(json.get("to").is_none());
        assert!(json.get("data").is_none());
    }
}
