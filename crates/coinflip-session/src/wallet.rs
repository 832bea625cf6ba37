//! Wallet capability traits and the injected-wallet implementation.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use coinflip_chain::{ChainRpc, TransactionRequest};
use coinflip_types::{Address, CoinflipError, Result, TxHash, U256};

/// What the client needs from a wallet: account access, balances, and a
/// signing authority for an authorized account.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Prompt for account access. An empty list means nothing was authorized.
    async fn request_accounts(&self) -> Result<Vec<Address>>;

    async fn get_balance(&self, address: Address) -> Result<U256>;

    /// Signer for an account granted by the last `request_accounts`.
    async fn get_signer(&self, address: Address) -> Result<Arc<dyn TxSigner>>;
}

/// Signs and broadcasts transactions as one fixed account.
#[async_trait]
pub trait TxSigner: Send + Sync {
    fn address(&self) -> Address;

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash>;
}

/// A wallet reached through JSON-RPC, the way a browser extension exposes
/// itself: the wallet holds the keys and signs `eth_sendTransaction` calls.
pub struct InjectedWallet {
    rpc: Arc<dyn ChainRpc>,
    authorized: Mutex<Vec<Address>>,
}

impl InjectedWallet {
    pub fn new(rpc: Arc<dyn ChainRpc>) -> Self {
        Self {
            rpc,
            authorized: Mutex::new(Vec::new()),
        }
    }

    fn authorized(&self) -> MutexGuard<'_, Vec<Address>> {
        self.authorized.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl WalletProvider for InjectedWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        match self.rpc.request_accounts().await {
            Ok(accounts) => {
                *self.authorized() = accounts.clone();
                Ok(accounts)
            }
            Err(e) => {
                self.authorized().clear();
                Err(e)
            }
        }
    }

    async fn get_balance(&self, address: Address) -> Result<U256> {
        self.rpc.get_balance(address).await
    }

    async fn get_signer(&self, address: Address) -> Result<Arc<dyn TxSigner>> {
        if !self.authorized().contains(&address) {
            return Err(CoinflipError::Authorization(format!(
                "account {} is not authorized by the wallet",
                address
            )));
        }
        Ok(Arc::new(RpcSigner { address, rpc: self.rpc.clone() }))
    }
}

/// Signer that delegates to the wallet behind a `ChainRpc`.
pub struct RpcSigner {
    address: Address,
    rpc: Arc<dyn ChainRpc>,
}

#[async_trait]
impl TxSigner for RpcSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn send_transaction(&self, mut tx: TransactionRequest) -> Result<TxHash> {
        tx.from = Some(self.address);
        self.rpc.send_transaction(&tx).await
    }
}
