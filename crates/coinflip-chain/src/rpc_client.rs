//! HTTP JSON-RPC client.
//!
//! Methods:
//! - eth_requestAccounts, eth_getBalance
//! - eth_chainId, eth_blockNumber
//! - eth_sendTransaction, eth_getTransactionReceipt, eth_call
//! - eth_getLogs

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::U64;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use coinflip_types::{Address, Bytes, CoinflipError, Result, TxHash, B256, U256};

use crate::{ChainRpc, Log, LogFilter, TransactionReceipt, TransactionRequest};

/// JSON-RPC request envelope.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// JSON-RPC response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: B256,
    block_number: U64,
    status: Option<U64>,
    gas_used: U64,
    from: Address,
    to: Option<Address>,
}

impl From<RawReceipt> for TransactionReceipt {
    fn from(raw: RawReceipt) -> Self {
        Self {
            transaction_hash: raw.transaction_hash,
            block_number: raw.block_number.to::<u64>(),
            // pre-Byzantium receipts carry no status; treat as success
            status: raw.status.map_or(true, |s| s == U64::from(1u64)),
            gas_used: raw.gas_used.to::<u64>(),
            from: raw.from,
            to: raw.to,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
    block_number: Option<U64>,
    transaction_hash: Option<B256>,
    log_index: Option<U64>,
    #[serde(default)]
    removed: bool,
}

impl From<RawLog> for Log {
    fn from(raw: RawLog) -> Self {
        Self {
            address: raw.address,
            topics: raw.topics,
            data: raw.data,
            block_number: raw.block_number.map(|n| n.to::<u64>()),
            transaction_hash: raw.transaction_hash,
            log_index: raw.log_index.map(|n| n.to::<u64>()),
            removed: raw.removed,
        }
    }
}

fn quantity(n: u64) -> String {
    format!("0x{:x}", n)
}

/// JSON-RPC client for a node or wallet endpoint.
pub struct HttpRpc {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
    next_id: AtomicU64,
}

impl HttpRpc {
    pub fn new(url: &str, timeout_ms: Option<u64>) -> Self {
        let timeout_ms = timeout_ms.unwrap_or(30_000);
        Self {
            url: url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .unwrap_or_default(),
            timeout: Duration::from_millis(timeout_ms),
            next_id: AtomicU64::new(1),
        }
    }

    /// Issue one JSON-RPC call and deserialize its `result`.
    pub async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = RpcRequest { jsonrpc: "2.0", id, method, params };
        tracing::debug!(method, id, "rpc request");

        let resp = self.client
            .post(&self.url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CoinflipError::Transport(format!("{} request failed: {}", method, e)))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| CoinflipError::Transport(format!("{} response body: {}", method, e)))?;
        decode_response(method, status, &text)
    }
}

/// Map an HTTP status and body to the call's `result`.
///
/// Non-2xx statuses and unparseable bodies are `Transport` errors; a
/// JSON-RPC error object is `Rpc`. A missing `result` decodes as `null`.
fn decode_response<T: DeserializeOwned>(method: &str, status: StatusCode, body: &str) -> Result<T> {
    if !status.is_success() {
        return Err(CoinflipError::Transport(format!(
            "{} returned status {}: {}",
            method, status, body
        )));
    }

    let envelope: RpcResponse = serde_json::from_str(body)
        .map_err(|e| CoinflipError::Transport(format!("failed to parse {} response: {}", method, e)))?;

    if let Some(err) = envelope.error {
        return Err(CoinflipError::Rpc { code: err.code, message: err.message });
    }

    serde_json::from_value(envelope.result.unwrap_or(Value::Null))
        .map_err(|e| CoinflipError::Transport(format!("unexpected {} result: {}", method, e)))
}

#[async_trait]
impl ChainRpc for HttpRpc {
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        self.request("eth_requestAccounts", json!([])).await
    }

    async fn get_balance(&self, address: Address) -> Result<U256> {
        self.request("eth_getBalance", json!([address, "latest"])).await
    }

    async fn chain_id(&self) -> Result<u64> {
        let id: U64 = self.request("eth_chainId", json!([])).await?;
        Ok(id.to::<u64>())
    }

    async fn block_number(&self) -> Result<u64> {
        let n: U64 = self.request("eth_blockNumber", json!([])).await?;
        Ok(n.to::<u64>())
    }

    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<TxHash> {
        self.request("eth_sendTransaction", json!([tx])).await
    }

    async fn get_transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>> {
        let raw: Option<RawReceipt> = self.request("eth_getTransactionReceipt", json!([hash])).await?;
        Ok(raw.map(TransactionReceipt::from))
    }

    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes> {
        self.request("eth_call", json!([tx, "latest"])).await
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>> {
        let mut query = json!({
            "address": filter.address,
            "fromBlock": quantity(filter.from_block),
            "toBlock": quantity(filter.to_block),
        });
        if let Some(topic0) = filter.topic0 {
            query["topics"] = json!([topic0]);
        }
        let raw: Vec<RawLog> = self.request("eth_getLogs", json!([query])).await?;
        Ok(raw.into_iter().map(Log::from).collect())
    }
}
