//! Outcome reconciliation for submitted wagers.
//!
//! The contract's `CoinFlipped` event is global: every player's wager emits
//! one. A subscription is installed before the wager is sent, scans new
//! blocks from that point on, drops events for other accounts, and delivers
//! the first match exactly once.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use coinflip_chain::{abi, ChainRpc, LogFilter};
use coinflip_session::Session;
use coinflip_types::{Address, CoinflipError, OutcomeEvent, Result};
use coinflip_units::format_ether;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

pub const WIN_MESSAGE: &str = "Congratulations, you won the bet!";
pub const LOSS_MESSAGE: &str = "Sorry, you lost the bet.";

/// Event watcher configuration.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub poll_ms: u64,
    /// Largest block span requested per `eth_getLogs` call.
    pub max_block_range: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_ms: 2_000,
            max_block_range: 1_000,
        }
    }
}

/// A matched outcome mapped for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub event: OutcomeEvent,
    pub message: String,
    /// Wagered amount in ether, e.g. `"0.5"`.
    pub amount_display: String,
}

/// Map an outcome event to its user-facing message and amount.
pub fn describe(event: &OutcomeEvent) -> Outcome {
    let message = if event.won { WIN_MESSAGE } else { LOSS_MESSAGE };
    Outcome {
        event: event.clone(),
        message: message.to_string(),
        amount_display: format_ether(event.amount),
    }
}

/// Installs outcome subscriptions for one contract.
pub struct OutcomeWatcher {
    rpc: Arc<dyn ChainRpc>,
    contract: Address,
    config: WatchConfig,
}

impl OutcomeWatcher {
    pub fn new(rpc: Arc<dyn ChainRpc>, contract: Address, config: WatchConfig) -> Self {
        Self { rpc, contract, config }
    }

    /// Install a subscription for the session's account. Only blocks mined
    /// after this call are scanned, so call it before sending the wager.
    ///
    /// `generation` is the session manager's generation channel; the
    /// subscription closes as soon as the session is replaced or dropped.
    pub async fn subscribe(
        &self,
        session: &Session,
        generation: watch::Receiver<u64>,
    ) -> Result<OutcomeSubscription> {
        let head = self.rpc.block_number().await?;
        debug!(account = %session.account(), from_block = head + 1, "outcome subscription installed");
        Ok(OutcomeSubscription {
            rpc: self.rpc.clone(),
            contract: self.contract,
            account: session.account(),
            session_generation: session.generation(),
            generation,
            next_block: head + 1,
            config: self.config.clone(),
        })
    }
}

/// One-shot subscription to the outcome of a single wager.
pub struct OutcomeSubscription {
    rpc: Arc<dyn ChainRpc>,
    contract: Address,
    account: Address,
    session_generation: u64,
    generation: watch::Receiver<u64>,
    next_block: u64,
    config: WatchConfig,
}

impl std::fmt::Debug for OutcomeSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeSubscription")
            .field("contract", &self.contract)
            .field("account", &self.account)
            .field("next_block", &self.next_block)
            .finish()
    }
}

impl OutcomeSubscription {
    pub fn account(&self) -> Address {
        self.account
    }

    /// First block not yet scanned.
    pub fn next_block(&self) -> u64 {
        self.next_block
    }

    fn is_stale(&self) -> bool {
        *self.generation.borrow() != self.session_generation
    }

    /// Scan the blocks mined since the last poll, page by page.
    ///
    /// Returns the first event for this account, if any. Events for other
    /// accounts are skipped and the cursor moves past them. A failed query
    /// leaves the cursor on the page that failed.
    pub async fn poll_once(&mut self) -> Result<Option<OutcomeEvent>> {
        if self.is_stale() {
            return Err(CoinflipError::SubscriptionClosed("session replaced".into()));
        }

        let head = self.rpc.block_number().await?;
        let range = self.config.max_block_range.max(1);

        while self.next_block <= head {
            let to_block = head.min(self.next_block.saturating_add(range - 1));
            let filter = LogFilter {
                address: self.contract,
                topic0: Some(abi::outcome_topic()),
                from_block: self.next_block,
                to_block,
            };
            let mut logs = self.rpc.get_logs(&filter).await?;
            logs.retain(|log| !log.removed);
            logs.sort_by_key(|log| (log.block_number, log.log_index));

            for log in &logs {
                let event = match abi::decode_outcome(log) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "skipping undecodable outcome log");
                        continue;
                    }
                };
                if !event.is_for(&self.account) {
                    trace!(player = %event.player, "ignoring outcome for another account");
                    continue;
                }
                self.next_block = event.block_number.map_or(to_block, |b| b.max(self.next_block)) + 1;
                return Ok(Some(event));
            }

            debug!(from = filter.from_block, to = to_block, logs = logs.len(), "scanned outcome logs");
            self.next_block = to_block + 1;
        }
        Ok(None)
    }

    /// Wait for the first outcome for this account.
    ///
    /// Consumes the subscription: later events for the same account are never
    /// observed through it. Failed node queries are retried on the next poll;
    /// the only error is `SubscriptionClosed`, once the session is replaced.
    pub async fn next_outcome(mut self) -> Result<OutcomeEvent> {
        let poll = Duration::from_millis(self.config.poll_ms);
        loop {
            match self.poll_once().await {
                Ok(Some(event)) => {
                    info!(account = %self.account, won = event.won, amount = %format_ether(event.amount), "outcome received");
                    return Ok(event);
                }
                Ok(None) => {}
                Err(e @ CoinflipError::SubscriptionClosed(_)) => return Err(e),
                Err(e) => {
                    warn!(account = %self.account, next_block = self.next_block, error = %e, "outcome poll failed, retrying");
                }
            }

            tokio::select! {
                changed = self.generation.changed() => {
                    if changed.is_err() || self.is_stale() {
                        debug!(account = %self.account, "outcome subscription closed");
                        return Err(CoinflipError::SubscriptionClosed("session replaced".into()));
                    }
                }
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinflip_chain::memory::MemoryChain;
    use coinflip_session::{InjectedWallet, SessionManager};
    use coinflip_types::{Side, U256};

    fn contract() -> Address {
        Address::repeat_byte(0xcc)
    }

    fn player() -> Address {
        "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA01".parse().unwrap()
    }

    fn fast() -> WatchConfig {
        WatchConfig { poll_ms: 1, max_block_range: 2 }
    }

    fn half_ether() -> U256 {
        U256::from(500_000_000_000_000_000u64)
    }

    async fn connected() -> (Arc<MemoryChain>, SessionManager, OutcomeWatcher) {
        let chain = Arc::new(MemoryChain::new(1, contract(), Address::ZERO));
        chain.add_account(player(), U256::from(10u64).pow(U256::from(18u64)));
        chain.fund_contract(U256::from(10u64).pow(U256::from(19u64)));
        let wallet = Arc::new(InjectedWallet::new(chain.clone()));
        let mut manager = SessionManager::new(wallet, chain.clone(), contract());
        manager.connect().await.unwrap();
        let watcher = OutcomeWatcher::new(chain.clone(), contract(), fast());
        (chain, manager, watcher)
    }

    #[test]
    fn test_describe() {
        let won = describe(&OutcomeEvent {
            player: player(),
            amount: half_ether(),
            won: true,
            block_number: None,
            tx_hash: None,
        });
        assert_eq!(won.message, WIN_MESSAGE);
        assert_eq!(won.amount_display, "0.5");

        let lost = describe(&OutcomeEvent { won: false, ..won.event.clone() });
        assert_eq!(lost.message, LOSS_MESSAGE);
    }

    #[tokio::test]
    async fn test_winning_heads_wager_is_reported() {
        let (chain, manager, watcher) = connected().await;
        let session = manager.active().unwrap().clone();
        let sub = watcher.subscribe(&session, manager.watch_generation()).await.unwrap();

        chain.push_outcome(true);
        session.contract().flip(Side::Heads, half_ether()).await.unwrap();

        let event = sub.next_outcome().await.unwrap();
        assert_eq!(event.player, player());
        assert!(event.won);
        let outcome = describe(&event);
        assert_eq!(outcome.message, WIN_MESSAGE);
        assert_eq!(outcome.amount_display, "0.5");
    }

    #[tokio::test]
    async fn test_other_accounts_are_ignored() {
        let (chain, manager, watcher) = connected().await;
        let session = manager.active().unwrap().clone();
        let mut sub = watcher.subscribe(&session, manager.watch_generation()).await.unwrap();

        chain.emit_outcome(Address::repeat_byte(0xbb), half_ether(), true);
        chain.emit_outcome(Address::repeat_byte(0xdd), half_ether(), false);
        assert!(sub.poll_once().await.unwrap().is_none());

        // Lower-case rendering of the same account still matches.
        let lower: Address = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa01".parse().unwrap();
        chain.emit_outcome(lower, U256::from(7u64), false);
        let event = sub.poll_once().await.unwrap().unwrap();
        assert_eq!(event.amount, U256::from(7u64));
        assert!(!event.won);
    }

    #[tokio::test]
    async fn test_events_before_subscription_are_not_seen() {
        let (chain, manager, watcher) = connected().await;
        chain.emit_outcome(player(), half_ether(), true);

        let session = manager.active().unwrap().clone();
        let mut sub = watcher.subscribe(&session, manager.watch_generation()).await.unwrap();
        assert!(sub.poll_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_only_first_match_is_delivered() {
        let (chain, manager, watcher) = connected().await;
        let session = manager.active().unwrap().clone();
        let sub = watcher.subscribe(&session, manager.watch_generation()).await.unwrap();

        chain.emit_outcome(player(), U256::from(1u64), true);
        chain.emit_outcome(player(), U256::from(2u64), false);
        chain.emit_outcome(player(), U256::from(3u64), false);

        let event = sub.next_outcome().await.unwrap();
        assert_eq!(event.amount, U256::from(1u64));
        assert!(event.won);
    }

    #[tokio::test]
    async fn test_scan_pages_through_block_range() {
        let (chain, manager, watcher) = connected().await;
        let session = manager.active().unwrap().clone();
        let mut sub = watcher.subscribe(&session, manager.watch_generation()).await.unwrap();
        let start = sub.next_block();

        for _ in 0..5 {
            chain.emit_outcome(Address::repeat_byte(0xbb), U256::from(1u64), true);
        }
        chain.emit_outcome(player(), U256::from(9u64), false);

        let event = sub.poll_once().await.unwrap().unwrap();
        assert_eq!(event.amount, U256::from(9u64));
        assert_eq!(sub.next_block(), start + 6);
    }

    #[tokio::test]
    async fn test_outcome_after_delayed_head() {
        let (chain, manager, watcher) = connected().await;
        let session = manager.active().unwrap().clone();
        let mut sub = watcher.subscribe(&session, manager.watch_generation()).await.unwrap();

        chain.set_log_delay(2);
        chain.emit_outcome(player(), half_ether(), true);
        assert!(sub.poll_once().await.unwrap().is_none());
        assert!(sub.poll_once().await.unwrap().is_none());
        assert!(sub.poll_once().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_log_query_keeps_cursor() {
        let (chain, manager, watcher) = connected().await;
        let session = manager.active().unwrap().clone();
        let mut sub = watcher.subscribe(&session, manager.watch_generation()).await.unwrap();
        let start = sub.next_block();

        chain.emit_outcome(player(), half_ether(), true);
        chain.fail_next_log_queries(1);
        assert!(matches!(sub.poll_once().await, Err(CoinflipError::Transport(_))));
        assert_eq!(sub.next_block(), start);
        assert!(sub.poll_once().await.unwrap().unwrap().won);
    }

    #[tokio::test]
    async fn test_next_outcome_survives_failed_log_queries() {
        let (chain, manager, watcher) = connected().await;
        let session = manager.active().unwrap().clone();
        let sub = watcher.subscribe(&session, manager.watch_generation()).await.unwrap();

        chain.fail_next_log_queries(3);
        chain.push_outcome(false);
        session.contract().flip(Side::Tails, half_ether()).await.unwrap();

        let event = sub.next_outcome().await.unwrap();
        assert_eq!(event.player, player());
        assert!(!event.won);
    }

    #[tokio::test]
    async fn test_reconnect_closes_subscription() {
        let (chain, mut manager, watcher) = connected().await;
        let session = manager.active().unwrap().clone();
        let sub = watcher.subscribe(&session, manager.watch_generation()).await.unwrap();

        let waiting = tokio::spawn(sub.next_outcome());
        tokio::task::yield_now().await;
        manager.connect().await.unwrap();
        chain.emit_outcome(player(), half_ether(), true);

        let result = waiting.await.unwrap();
        assert!(matches!(result, Err(CoinflipError::SubscriptionClosed(_))));
    }

    #[tokio::test]
    async fn test_stale_subscription_refuses_to_poll() {
        let (_chain, mut manager, watcher) = connected().await;
        let session = manager.active().unwrap().clone();
        let mut sub = watcher.subscribe(&session, manager.watch_generation()).await.unwrap();

        manager.disconnect();
        assert!(matches!(sub.poll_once().await, Err(CoinflipError::SubscriptionClosed(_))));
    }
}
