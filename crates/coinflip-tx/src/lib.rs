//! Wager submission and confirmation tracking.
//!
//! - Validate the wager against the active session
//! - Send `flip(side)` with the scaled amount attached
//! - Poll for the receipt until inclusion, revert, or give-up

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use coinflip_chain::ChainRpc;
use coinflip_session::Session;
use coinflip_types::{CoinflipError, ErrorKind, PendingTransaction, Result, Side, TxHash};
use coinflip_units::Amount;
use tracing::{debug, info};

/// A user's chosen side and raw amount input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wager {
    pub side: Side,
    /// Decimal amount in ether, exactly as typed.
    pub amount: String,
}

impl Wager {
    pub fn new(side: Side, amount: impl Into<String>) -> Self {
        Self { side, amount: amount.into() }
    }
}

/// A wager that passed validation and is ready to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedWager {
    pub side: Side,
    pub value: Amount,
}

/// Receipt polling configuration.
#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    pub poll_ms: u64,
    pub max_attempts: u32,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            poll_ms: 2_000,
            max_attempts: 90,
        }
    }
}

/// Inclusion of a transaction that executed successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub gas_used: u64,
}

/// Validate a wager without touching the network.
pub fn prepare(session: Option<&Session>, wager: &Wager) -> Result<PreparedWager> {
    if session.is_none() {
        return Err(CoinflipError::Precondition(
            "connect a wallet before placing a bet".into(),
        ));
    }
    if wager.amount.trim().is_empty() {
        return Err(CoinflipError::Precondition("enter a bet amount".into()));
    }
    let value = Amount::parse_input(&wager.amount)?;
    if value.is_zero() {
        return Err(CoinflipError::Precondition("bet amount must be greater than zero".into()));
    }
    Ok(PreparedWager { side: wager.side, value })
}

/// Sends wagers and tracks them to inclusion.
pub struct Submitter {
    rpc: Arc<dyn ChainRpc>,
    config: SubmitterConfig,
}

impl Submitter {
    pub fn new(rpc: Arc<dyn ChainRpc>, config: SubmitterConfig) -> Self {
        Self { rpc, config }
    }

    /// Send the wager through the session's signer.
    ///
    /// Returns as soon as the wallet reports a transaction hash; inclusion is
    /// tracked separately by `await_confirmation`.
    pub async fn submit_wager(
        &self,
        session: Option<&Session>,
        wager: &Wager,
    ) -> Result<PendingTransaction> {
        let prepared = prepare(session, wager)?;
        let session = session
            .ok_or_else(|| CoinflipError::Precondition("connect a wallet before placing a bet".into()))?;

        let tx_hash = session
            .contract()
            .flip(prepared.side, prepared.value.wei())
            .await
            .map_err(|e| e.in_stage(ErrorKind::Submission))?;

        info!(
            tx_hash = %tx_hash,
            account = %session.account(),
            side = %prepared.side,
            amount = %prepared.value,
            "wager submitted"
        );

        Ok(PendingTransaction {
            tx_hash,
            from: session.account(),
            value: prepared.value.wei(),
            side: prepared.side,
        })
    }

    /// Wait until the wager is included. A reverted or never-mined
    /// transaction fails with `Confirmation`.
    pub async fn await_confirmation(&self, pending: &PendingTransaction) -> Result<Confirmation> {
        self.wait_for_receipt(pending.tx_hash).await
    }

    /// Check once for a receipt.
    pub async fn get_confirmation(&self, tx_hash: TxHash) -> Result<Option<Confirmation>> {
        let receipt = self
            .rpc
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| e.in_stage(ErrorKind::Confirmation))?;

        match receipt {
            None => Ok(None),
            Some(r) if !r.status => Err(CoinflipError::Confirmation(format!(
                "transaction {} reverted in block {}",
                tx_hash, r.block_number
            ))),
            Some(r) => Ok(Some(Confirmation {
                tx_hash,
                block_number: r.block_number,
                gas_used: r.gas_used,
            })),
        }
    }

    /// Poll for the receipt with retries, waiting between attempts.
    pub async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<Confirmation> {
        for attempt in 0..self.config.max_attempts {
            if let Some(confirmation) = self.get_confirmation(tx_hash).await? {
                info!(
                    tx_hash = %tx_hash,
                    block = confirmation.block_number,
                    "transaction confirmed"
                );
                return Ok(confirmation);
            }
            debug!(tx_hash = %tx_hash, attempt, "receipt not available yet");
            if attempt + 1 < self.config.max_attempts {
                tokio::time::sleep(Duration::from_millis(self.config.poll_ms)).await;
            }
        }
        Err(CoinflipError::Confirmation(format!(
            "transaction {} was dropped: no receipt after {} attempts",
            tx_hash, self.config.max_attempts
        )))
    }
}
