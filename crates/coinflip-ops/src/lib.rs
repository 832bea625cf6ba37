//! End-to-end flip orchestration.
//!
//! Coordinates the session manager, the submitter, and the outcome watcher:
//! validate, subscribe, send, then report confirmation and outcome as each
//! arrives.

pub mod config;
pub mod display;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use coinflip_chain::{abi, explorer_tx_url, ChainRpc, TransactionRequest};
use coinflip_events::{describe, Outcome, OutcomeWatcher};
use coinflip_session::{Session, SessionManager, WalletProvider};
use coinflip_tx::{Confirmation, Submitter, Wager};
use coinflip_types::{
    Address, CoinflipError, ErrorKind, OutcomeEvent, PendingTransaction, Result, TxHash,
};
use coinflip_units::Amount;
use tracing::{info, warn};

pub use config::ClientConfig;
pub use display::DisplayState;

/// Progress notifications, in the order they happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlipEvent {
    Connected { account: Address, balance: Amount },
    Disconnected,
    Submitted { tx_hash: TxHash, explorer_url: String },
    Confirmed { tx_hash: TxHash, block_number: u64 },
    Outcome { won: bool, message: String, amount: String },
    BalanceRefreshed { balance: Amount },
    Failed { stage: ErrorKind, message: String },
}

/// Callback type for flip events.
pub type FlipEventHandler = Box<dyn Fn(FlipEvent) + Send + Sync>;

/// Everything observed for one wager.
#[derive(Debug, Clone)]
pub struct FlipReport {
    pub pending: PendingTransaction,
    pub confirmation: Confirmation,
    /// `None` when no matching event arrived within the grace period.
    pub outcome: Option<Outcome>,
}

/// The flip engine owns the session and drives wagers through it.
pub struct FlipEngine {
    config: ClientConfig,
    rpc: Arc<dyn ChainRpc>,
    contract: Address,
    sessions: SessionManager,
    submitter: Submitter,
    watcher: OutcomeWatcher,
    on_event: Option<FlipEventHandler>,
}

impl FlipEngine {
    pub fn new(
        config: ClientConfig,
        rpc: Arc<dyn ChainRpc>,
        provider: Option<Arc<dyn WalletProvider>>,
        on_event: Option<FlipEventHandler>,
    ) -> Result<Self> {
        config.validate()?;
        let contract = config.contract()?;

        let sessions = match provider {
            Some(provider) => SessionManager::new(provider, rpc.clone(), contract),
            None => SessionManager::without_provider(rpc.clone(), contract),
        }
        .expect_chain_id(config.chain_id);
        let submitter = Submitter::new(rpc.clone(), config.submitter_config());
        let watcher = OutcomeWatcher::new(rpc.clone(), contract, config.watch_config());

        Ok(Self {
            config,
            rpc,
            contract,
            sessions,
            submitter,
            watcher,
            on_event,
        })
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        self.sessions.active()
    }

    fn emit(&self, event: FlipEvent) {
        if let Some(ref handler) = self.on_event {
            handler(event);
        }
    }

    fn fail<T>(&self, err: CoinflipError) -> Result<T> {
        self.emit(FlipEvent::Failed {
            stage: err.kind(),
            message: err.to_string(),
        });
        Err(err)
    }

    /// Connect (or reconnect) the wallet. Any wager still waiting for its
    /// outcome under the previous session stops listening.
    pub async fn connect(&mut self) -> Result<Arc<Session>> {
        match self.sessions.connect().await {
            Ok(session) => {
                self.emit(FlipEvent::Connected {
                    account: session.account(),
                    balance: session.balance(),
                });
                Ok(session)
            }
            Err(e) => self.fail(e),
        }
    }

    pub fn disconnect(&mut self) {
        if self.sessions.disconnect().is_some() {
            self.emit(FlipEvent::Disconnected);
        }
    }

    /// Place a wager and follow it to confirmation and outcome.
    ///
    /// The outcome subscription is installed before the transaction is sent.
    /// Confirmation and outcome are reported as they arrive, in either order.
    /// Fails if the wager is rejected before sending, rejected by the network,
    /// or reverted; a missing outcome after confirmation is only a warning.
    pub async fn flip(&self, wager: &Wager) -> Result<FlipReport> {
        let session = self.sessions.active().cloned();
        if let Err(e) = coinflip_tx::prepare(session.as_deref(), wager) {
            return self.fail(e);
        }
        let session = match session {
            Some(session) => session,
            None => return self.fail(CoinflipError::Precondition("connect a wallet first".into())),
        };

        let subscription = match self
            .watcher
            .subscribe(&session, self.sessions.watch_generation())
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => return self.fail(e.in_stage(ErrorKind::Submission)),
        };

        let pending = match self.submitter.submit_wager(Some(&session), wager).await {
            Ok(pending) => pending,
            Err(e) => return self.fail(e),
        };
        self.emit(FlipEvent::Submitted {
            tx_hash: pending.tx_hash,
            explorer_url: explorer_tx_url(&self.config.explorer_url, &pending.tx_hash),
        });

        let (confirmation, outcome) = {
            let confirm = self.submitter.await_confirmation(&pending);
            let next_outcome = subscription.next_outcome();
            tokio::pin!(confirm);
            tokio::pin!(next_outcome);

            let mut outcome = None;
            let mut listening = true;
            let confirmation = loop {
                tokio::select! {
                    res = &mut confirm => match res {
                        Ok(c) => break c,
                        Err(e) => return self.fail(e),
                    },
                    res = &mut next_outcome, if listening => {
                        listening = false;
                        outcome = self.report_outcome(res);
                    }
                }
            };
            self.emit(FlipEvent::Confirmed {
                tx_hash: confirmation.tx_hash,
                block_number: confirmation.block_number,
            });

            if listening {
                let grace = Duration::from_millis(self.config.outcome_grace_ms);
                match tokio::time::timeout(grace, &mut next_outcome).await {
                    Ok(res) => outcome = self.report_outcome(res),
                    Err(_) => warn!(
                        tx_hash = %pending.tx_hash,
                        grace_ms = self.config.outcome_grace_ms,
                        "no outcome event within grace period"
                    ),
                }
            }
            (confirmation, outcome)
        };

        match self.sessions.current_balance().await {
            Ok(balance) => self.emit(FlipEvent::BalanceRefreshed { balance }),
            Err(e) => warn!(error = %e, "could not refresh balance"),
        }

        Ok(FlipReport { pending, confirmation, outcome })
    }

    fn report_outcome(&self, res: Result<OutcomeEvent>) -> Option<Outcome> {
        match res {
            Ok(event) => {
                let outcome = describe(&event);
                info!(won = event.won, amount = %outcome.amount_display, "{}", outcome.message);
                self.emit(FlipEvent::Outcome {
                    won: event.won,
                    message: outcome.message.clone(),
                    amount: outcome.amount_display.clone(),
                });
                Some(outcome)
            }
            Err(e) => {
                warn!(error = %e, "stopped listening for outcome");
                None
            }
        }
    }

    /// Re-query the connected account's balance.
    pub async fn current_balance(&self) -> Result<Amount> {
        self.sessions.current_balance().await
    }

    /// Read the contract owner. Works without a session.
    pub async fn contract_owner(&self) -> Result<Address> {
        if let Some(session) = self.sessions.active() {
            return session.contract().owner().await;
        }
        let out = self
            .rpc
            .call(&TransactionRequest {
                to: Some(self.contract),
                data: Some(abi::encode_owner()),
                ..Default::default()
            })
            .await?;
        abi::decode_owner_return(&out)
    }

    /// Send `withdraw()` as the connected account and wait for inclusion.
    /// Only the owner's withdrawal succeeds; anyone else's reverts.
    pub async fn withdraw(&self) -> Result<Confirmation> {
        let session = match self.sessions.require_active() {
            Ok(session) => session,
            Err(e) => return self.fail(e),
        };
        let tx_hash = match session.contract().withdraw().await {
            Ok(hash) => hash,
            Err(e) => return self.fail(e.in_stage(ErrorKind::Submission)),
        };
        self.emit(FlipEvent::Submitted {
            tx_hash,
            explorer_url: explorer_tx_url(&self.config.explorer_url, &tx_hash),
        });
        match self.submitter.wait_for_receipt(tx_hash).await {
            Ok(c) => {
                self.emit(FlipEvent::Confirmed {
                    tx_hash: c.tx_hash,
                    block_number: c.block_number,
                });
                Ok(c)
            }
            Err(e) => self.fail(e),
        }
    }
}
