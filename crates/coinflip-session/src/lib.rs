//! Wallet session management.
//!
//! A `SessionManager` owns at most one `Session`. Only `connect` and
//! `disconnect` mutate it; every replacement bumps a generation counter that
//! outstanding subscriptions watch in order to tear themselves down.

pub mod contract;
pub mod wallet;

use std::sync::Arc;

use coinflip_chain::ChainRpc;
use coinflip_types::{Address, CoinflipError, ErrorKind, Result};
use coinflip_units::Amount;
use tokio::sync::watch;
use tracing::{info, warn};

pub use contract::CoinFlipContract;
pub use wallet::{InjectedWallet, RpcSigner, TxSigner, WalletProvider};

/// An authorized account bound to a signing contract handle.
#[derive(Debug, Clone)]
pub struct Session {
    account: Address,
    balance: Amount,
    chain_id: Option<u64>,
    contract: CoinFlipContract,
    generation: u64,
}

impl Session {
    pub fn account(&self) -> Address {
        self.account
    }

    /// Balance observed at connection time.
    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.chain_id
    }

    pub fn contract(&self) -> &CoinFlipContract {
        &self.contract
    }

    /// Generation number assigned when this session was established.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Owner of the single active session.
pub struct SessionManager {
    provider: Option<Arc<dyn WalletProvider>>,
    rpc: Arc<dyn ChainRpc>,
    contract_address: Address,
    expected_chain_id: Option<u64>,
    current: Option<Arc<Session>>,
    generation: watch::Sender<u64>,
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn WalletProvider>,
        rpc: Arc<dyn ChainRpc>,
        contract_address: Address,
    ) -> Self {
        Self::with_provider(Some(provider), rpc, contract_address)
    }

    /// Manager for an environment where no wallet could be detected.
    pub fn without_provider(rpc: Arc<dyn ChainRpc>, contract_address: Address) -> Self {
        Self::with_provider(None, rpc, contract_address)
    }

    fn with_provider(
        provider: Option<Arc<dyn WalletProvider>>,
        rpc: Arc<dyn ChainRpc>,
        contract_address: Address,
    ) -> Self {
        let (generation, _) = watch::channel(0u64);
        Self {
            provider,
            rpc,
            contract_address,
            expected_chain_id: None,
            current: None,
            generation,
        }
    }

    /// Warn on connect when the wallet reports a different chain.
    pub fn expect_chain_id(mut self, chain_id: u64) -> Self {
        self.expected_chain_id = Some(chain_id);
        self
    }

    pub fn contract_address(&self) -> Address {
        self.contract_address
    }

    /// Request wallet authorization and replace the active session.
    ///
    /// On failure the previous session, if any, stays active.
    pub async fn connect(&mut self) -> Result<Arc<Session>> {
        let next_generation = *self.generation.borrow() + 1;
        let session = self
            .authorize(next_generation)
            .await
            .map_err(|e| e.in_stage(ErrorKind::Authorization))?;

        let session = Arc::new(session);
        self.current = Some(session.clone());
        self.generation.send_replace(next_generation);
        info!(
            account = %session.account,
            balance = %session.balance,
            generation = next_generation,
            "wallet connected"
        );
        Ok(session)
    }

    async fn authorize(&self, generation: u64) -> Result<Session> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| CoinflipError::Authorization("no wallet provider available".into()))?;

        let accounts = provider.request_accounts().await?;
        let account = *accounts
            .first()
            .ok_or_else(|| CoinflipError::Authorization("wallet returned no accounts".into()))?;

        let balance = Amount::from_wei(provider.get_balance(account).await?);
        let signer = provider.get_signer(account).await?;

        let chain_id = match self.rpc.chain_id().await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "could not read chain id");
                None
            }
        };
        if let (Some(expected), Some(actual)) = (self.expected_chain_id, chain_id) {
            if expected != actual {
                warn!(expected, actual, "wallet is connected to an unexpected chain");
            }
        }

        Ok(Session {
            account,
            balance,
            chain_id,
            contract: CoinFlipContract::new(self.contract_address, signer, self.rpc.clone()),
            generation,
        })
    }

    /// Drop the active session. Outstanding subscriptions are invalidated.
    pub fn disconnect(&mut self) -> Option<Arc<Session>> {
        let previous = self.current.take();
        if let Some(ref session) = previous {
            let next_generation = *self.generation.borrow() + 1;
            self.generation.send_replace(next_generation);
            info!(account = %session.account, "wallet disconnected");
        }
        previous
    }

    pub fn active(&self) -> Option<&Arc<Session>> {
        self.current.as_ref()
    }

    pub fn require_active(&self) -> Result<&Arc<Session>> {
        self.current
            .as_ref()
            .ok_or_else(|| CoinflipError::Precondition("connect a wallet first".into()))
    }

    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Receiver that changes whenever the session is replaced or dropped.
    pub fn watch_generation(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Re-query the active account's balance without replacing the session.
    pub async fn current_balance(&self) -> Result<Amount> {
        let session = self.require_active()?;
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| CoinflipError::Authorization("no wallet provider available".into()))?;
        let wei = provider
            .get_balance(session.account)
            .await
            .map_err(|e| e.in_stage(ErrorKind::Authorization))?;
        Ok(Amount::from_wei(wei))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinflip_chain::memory::MemoryChain;
    use coinflip_types::U256;

    fn contract() -> Address {
        Address::repeat_byte(0xcc)
    }

    fn setup() -> (Arc<MemoryChain>, SessionManager) {
        let chain = Arc::new(MemoryChain::new(11155111, contract(), Address::repeat_byte(0x01)));
        let wallet = Arc::new(InjectedWallet::new(chain.clone()));
        let manager = SessionManager::new(wallet, chain.clone(), contract()).expect_chain_id(11155111);
        (chain, manager)
    }

    fn half_ether() -> U256 {
        U256::from(500_000_000_000_000_000u64)
    }

    #[tokio::test]
    async fn test_connect_resolves_account_and_balance() {
        let (chain, mut manager) = setup();
        let player = Address::repeat_byte(0xaa);
        chain.add_account(player, half_ether());

        let session = manager.connect().await.unwrap();
        assert_eq!(session.account(), player);
        assert_eq!(session.balance().to_string(), "0.5");
        assert_eq!(session.chain_id(), Some(11155111));
        assert_eq!(session.contract().signer_address(), player);
        assert_eq!(session.contract().address(), contract());
        assert_eq!(manager.generation(), 1);
        assert_eq!(chain.account_requests(), 1);
    }

    #[tokio::test]
    async fn test_denied_authorization_keeps_previous_session() {
        let (chain, mut manager) = setup();
        let player = Address::repeat_byte(0xaa);
        chain.add_account(player, half_ether());
        manager.connect().await.unwrap();

        chain.set_authorization(false);
        let err = manager.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let still = manager.active().unwrap();
        assert_eq!(still.account(), player);
        assert_eq!(manager.generation(), 1);
    }

    #[tokio::test]
    async fn test_denied_authorization_creates_no_session() {
        let (chain, mut manager) = setup();
        chain.set_authorization(false);
        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, CoinflipError::Authorization(_)));
        assert!(manager.active().is_none());
        assert_eq!(manager.require_active().unwrap_err().kind(), ErrorKind::Precondition);
    }

    #[tokio::test]
    async fn test_missing_provider_and_empty_accounts() {
        let chain = Arc::new(MemoryChain::new(1, contract(), Address::ZERO));
        let mut detached = SessionManager::without_provider(chain.clone(), contract());
        assert!(matches!(detached.connect().await, Err(CoinflipError::Authorization(_))));

        let mut manager = SessionManager::new(Arc::new(InjectedWallet::new(chain.clone())), chain, contract());
        assert!(matches!(manager.connect().await, Err(CoinflipError::Authorization(_))));
    }

    #[tokio::test]
    async fn test_reconnect_replaces_session_and_notifies() {
        let (chain, mut manager) = setup();
        let first = Address::repeat_byte(0xaa);
        let second = Address::repeat_byte(0xbb);
        chain.add_account(first, half_ether());
        chain.add_account(second, U256::ZERO);

        manager.connect().await.unwrap();
        let mut changes = manager.watch_generation();

        chain.select_account(second);
        let session = manager.connect().await.unwrap();
        assert_eq!(session.account(), second);
        assert_eq!(session.generation(), 2);
        assert!(changes.has_changed().unwrap());
        assert_eq!(*changes.borrow_and_update(), 2);

        let dropped = manager.disconnect().unwrap();
        assert_eq!(dropped.account(), second);
        assert!(manager.active().is_none());
        assert_eq!(*changes.borrow_and_update(), 3);
        assert!(manager.disconnect().is_none());
    }

    #[tokio::test]
    async fn test_current_balance_requery() {
        let (chain, mut manager) = setup();
        let player = Address::repeat_byte(0xaa);
        chain.add_account(player, half_ether());
        manager.connect().await.unwrap();

        chain.add_account(player, U256::from(1u64));
        assert_eq!(manager.current_balance().await.unwrap().wei(), U256::from(1u64));
        assert_eq!(manager.active().unwrap().balance().wei(), half_ether());
    }
}
