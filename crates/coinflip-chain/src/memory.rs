//! In-memory chain backend (for testing and offline demos).
//!
//! Simulates a wallet-backed node hosting the CoinFlip contract: account
//! authorization, balances, `flip` execution with scripted outcomes, logs,
//! receipts, and failure injection (rejected sends, reverts, dropped
//! transactions, delayed receipts and logs, failing log queries).

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use alloy_primitives::keccak256;
use async_trait::async_trait;
use coinflip_types::{Address, Bytes, CoinflipError, OutcomeEvent, Result, TxHash, U256};

use crate::abi;
use crate::{ChainRpc, Log, LogFilter, TransactionReceipt, TransactionRequest};

/// Gas reported for every simulated transaction.
const SIMULATED_GAS_USED: u64 = 45_000;

#[derive(Debug, Clone)]
enum SendFailure {
    Reject { code: i64, message: String },
    Revert,
    Drop,
}

#[derive(Debug, Clone)]
struct QueuedTx {
    hash: TxHash,
    request: TransactionRequest,
    force_revert: bool,
}

#[derive(Debug, Clone)]
struct StoredLog {
    log: Log,
    hidden_for: u32,
}

struct ChainState {
    chain_id: u64,
    block_number: u64,
    contract: Address,
    owner: Address,
    contract_balance: U256,
    accounts: Vec<Address>,
    authorized: bool,
    balances: HashMap<Address, U256>,
    outcomes: VecDeque<bool>,
    next_failure: Option<SendFailure>,
    mempool: Vec<QueuedTx>,
    auto_mine: bool,
    receipts: HashMap<TxHash, TransactionReceipt>,
    receipt_delays: HashMap<TxHash, u32>,
    receipt_delay: u32,
    logs: Vec<StoredLog>,
    log_delay: u32,
    failing_log_queries: u32,
    nonce: u64,
    sent: u64,
    account_requests: u64,
}

impl ChainState {
    fn credit(&mut self, to: Address, amount: U256) {
        let balance = self.balances.entry(to).or_insert(U256::ZERO);
        *balance = balance.saturating_add(amount);
    }

    fn debit(&mut self, from: Address, amount: U256) -> bool {
        match self.balances.get_mut(&from) {
            Some(balance) if *balance >= amount => {
                *balance -= amount;
                true
            }
            _ => amount.is_zero(),
        }
    }

    fn push_log(&mut self, event: &OutcomeEvent, tx_hash: Option<TxHash>) {
        let (topics, data) = abi::encode_outcome(event);
        let log_index = self.logs.len() as u64;
        self.logs.push(StoredLog {
            log: Log {
                address: self.contract,
                topics,
                data,
                block_number: Some(self.block_number),
                transaction_hash: tx_hash,
                log_index: Some(log_index),
                removed: false,
            },
            hidden_for: self.log_delay,
        });
    }

    /// Execute a transaction against the contract. Returns the status.
    fn execute(&mut self, tx: &QueuedTx) -> bool {
        if tx.force_revert {
            return false;
        }
        let from = tx.request.from.unwrap_or_default();
        let value = tx.request.value.unwrap_or_default();
        let data = tx.request.data.clone().unwrap_or_default();

        if tx.request.to != Some(self.contract) {
            if !self.debit(from, value) {
                return false;
            }
            if let Some(to) = tx.request.to {
                self.credit(to, value);
            }
            return true;
        }

        if abi::is_flip_call(&data) {
            if abi::decode_flip(&data).is_err() || value.is_zero() || !self.debit(from, value) {
                return false;
            }
            self.contract_balance = self.contract_balance.saturating_add(value);
            let won = self.outcomes.pop_front().unwrap_or(false);
            if won {
                let payout = value.saturating_mul(U256::from(2u64)).min(self.contract_balance);
                self.contract_balance -= payout;
                self.credit(from, payout);
            }
            let event = OutcomeEvent {
                player: from,
                amount: value,
                won,
                block_number: Some(self.block_number),
                tx_hash: Some(tx.hash),
            };
            self.push_log(&event, Some(tx.hash));
            true
        } else if abi::is_withdraw_call(&data) {
            if from != self.owner {
                return false;
            }
            let amount = self.contract_balance;
            self.contract_balance = U256::ZERO;
            self.credit(from, amount);
            true
        } else if data.is_empty() {
            if !self.debit(from, value) {
                return false;
            }
            self.contract_balance = self.contract_balance.saturating_add(value);
            true
        } else {
            false
        }
    }

    fn mine(&mut self) -> usize {
        let queued = std::mem::take(&mut self.mempool);
        for tx in &queued {
            self.block_number += 1;
            let status = self.execute(tx);
            let receipt = TransactionReceipt {
                transaction_hash: tx.hash,
                block_number: self.block_number,
                status,
                gas_used: SIMULATED_GAS_USED,
                from: tx.request.from.unwrap_or_default(),
                to: tx.request.to,
            };
            if self.receipt_delay > 0 {
                self.receipt_delays.insert(tx.hash, self.receipt_delay);
            }
            self.receipts.insert(tx.hash, receipt);
        }
        queued.len()
    }
}

/// In-memory chain (for testing and ephemeral use).
pub struct MemoryChain {
    state: Mutex<ChainState>,
}

impl MemoryChain {
    pub fn new(chain_id: u64, contract: Address, owner: Address) -> Self {
        Self {
            state: Mutex::new(ChainState {
                chain_id,
                block_number: 1,
                contract,
                owner,
                contract_balance: U256::ZERO,
                accounts: Vec::new(),
                authorized: true,
                balances: HashMap::new(),
                outcomes: VecDeque::new(),
                next_failure: None,
                mempool: Vec::new(),
                auto_mine: true,
                receipts: HashMap::new(),
                receipt_delays: HashMap::new(),
                receipt_delay: 0,
                logs: Vec::new(),
                log_delay: 0,
                failing_log_queries: 0,
                nonce: 0,
                sent: 0,
                account_requests: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a wallet account. The first account is the selected one.
    pub fn add_account(&self, address: Address, balance: U256) {
        let mut state = self.state();
        if !state.accounts.contains(&address) {
            state.accounts.push(address);
        }
        state.balances.insert(address, balance);
    }

    /// Make `address` the account the wallet reports first.
    pub fn select_account(&self, address: Address) {
        let mut state = self.state();
        state.accounts.retain(|a| *a != address);
        state.accounts.insert(0, address);
    }

    /// Simulate the user rejecting (or granting) the access prompt.
    pub fn set_authorization(&self, granted: bool) {
        self.state().authorized = granted;
    }

    pub fn fund_contract(&self, amount: U256) {
        let mut state = self.state();
        state.contract_balance = state.contract_balance.saturating_add(amount);
    }

    /// Queue the result of the next `flip`. Without a queued result the
    /// player loses.
    pub fn push_outcome(&self, won: bool) {
        self.state().outcomes.push_back(won);
    }

    /// Fail the next `eth_sendTransaction` with a JSON-RPC error.
    pub fn reject_next_send(&self, code: i64, message: &str) {
        self.state().next_failure = Some(SendFailure::Reject {
            code,
            message: message.to_string(),
        });
    }

    /// Accept the next transaction but revert it when mined.
    pub fn revert_next(&self) {
        self.state().next_failure = Some(SendFailure::Revert);
    }

    /// Accept the next transaction but never mine it.
    pub fn drop_next(&self) {
        self.state().next_failure = Some(SendFailure::Drop);
    }

    /// Hide new receipts for the given number of receipt queries.
    pub fn set_receipt_delay(&self, polls: u32) {
        self.state().receipt_delay = polls;
    }

    /// Hold back the head block for the given number of `eth_blockNumber`
    /// queries after a log is emitted, like a node that lags the chain.
    pub fn set_log_delay(&self, polls: u32) {
        self.state().log_delay = polls;
    }

    /// Fail the next `count` `eth_getLogs` queries with a transport error.
    pub fn fail_next_log_queries(&self, count: u32) {
        self.state().failing_log_queries = count;
    }

    pub fn set_auto_mine(&self, enabled: bool) {
        self.state().auto_mine = enabled;
    }

    /// Mine every queued transaction, one block each.
    pub fn mine(&self) -> usize {
        self.state().mine()
    }

    /// Emit a `CoinFlipped` event in a fresh block, as if another player's
    /// wager had settled.
    pub fn emit_outcome(&self, player: Address, amount: U256, won: bool) {
        let mut state = self.state();
        state.block_number += 1;
        let event = OutcomeEvent {
            player,
            amount,
            won,
            block_number: Some(state.block_number),
            tx_hash: None,
        };
        state.push_log(&event, None);
    }

    /// Number of transactions handed to `eth_sendTransaction`.
    pub fn sent_transactions(&self) -> u64 {
        self.state().sent
    }

    /// Number of `eth_requestAccounts` prompts shown so far.
    pub fn account_requests(&self) -> u64 {
        self.state().account_requests
    }

    pub fn balance_of(&self, address: Address) -> U256 {
        self.state().balances.get(&address).copied().unwrap_or_default()
    }

    pub fn contract_balance(&self) -> U256 {
        self.state().contract_balance
    }
}

#[async_trait]
impl ChainRpc for MemoryChain {
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        let mut state = self.state();
        state.account_requests += 1;
        if !state.authorized {
            return Err(CoinflipError::Rpc {
                code: 4001,
                message: "User rejected the request.".into(),
            });
        }
        Ok(state.accounts.clone())
    }

    async fn get_balance(&self, address: Address) -> Result<U256> {
        Ok(self.balance_of(address))
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.state().chain_id)
    }

    async fn block_number(&self) -> Result<u64> {
        let mut state = self.state();
        let mut head = state.block_number;
        for stored in state.logs.iter_mut().filter(|l| l.hidden_for > 0) {
            stored.hidden_for -= 1;
            let block = stored.log.block_number.unwrap_or_default();
            head = head.min(block.saturating_sub(1));
        }
        Ok(head)
    }

    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<TxHash> {
        let mut state = self.state();
        let from = tx
            .from
            .ok_or_else(|| CoinflipError::Rpc { code: -32602, message: "missing from".into() })?;
        if !state.authorized || !state.accounts.contains(&from) {
            return Err(CoinflipError::Rpc {
                code: 4100,
                message: "The requested account has not been authorized by the user.".into(),
            });
        }

        let failure = state.next_failure.take();
        if let Some(SendFailure::Reject { code, message }) = &failure {
            return Err(CoinflipError::Rpc { code: *code, message: message.clone() });
        }
        let value = tx.value.unwrap_or_default();
        let balance = state.balances.get(&from).copied().unwrap_or_default();
        if value > balance {
            return Err(CoinflipError::Rpc {
                code: -32000,
                message: "insufficient funds for gas * price + value".into(),
            });
        }

        let mut preimage = from.to_vec();
        preimage.extend_from_slice(&state.nonce.to_be_bytes());
        let hash = keccak256(&preimage);
        state.nonce += 1;
        state.sent += 1;

        match failure {
            Some(SendFailure::Drop) => return Ok(hash),
            force => state.mempool.push(QueuedTx {
                hash,
                request: tx.clone(),
                force_revert: matches!(force, Some(SendFailure::Revert)),
            }),
        }
        if state.auto_mine {
            state.mine();
        }
        Ok(hash)
    }

    async fn get_transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>> {
        let mut state = self.state();
        if let Some(remaining) = state.receipt_delays.get_mut(&hash) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(None);
            }
        }
        Ok(state.receipts.get(&hash).cloned())
    }

    async fn call(&self, tx: &TransactionRequest) -> Result<Bytes> {
        let state = self.state();
        let data = tx.data.clone().unwrap_or_default();
        if tx.to == Some(state.contract) && abi::is_owner_call(&data) {
            return Ok(abi::encode_owner_return(state.owner));
        }
        Ok(Bytes::new())
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>> {
        let mut state = self.state();
        if state.failing_log_queries > 0 {
            state.failing_log_queries -= 1;
            return Err(CoinflipError::Transport("eth_getLogs timed out".into()));
        }
        let mut out = Vec::new();
        for stored in state.logs.iter().filter(|l| l.hidden_for == 0) {
            let log = &stored.log;
            let block = log.block_number.unwrap_or_default();
            if log.address != filter.address || block < filter.from_block || block > filter.to_block {
                continue;
            }
            if let Some(topic0) = filter.topic0 {
                if log.topics.first() != Some(&topic0) {
                    continue;
                }
            }
            out.push(log.clone());
        }
        Ok(out)
    }
}
