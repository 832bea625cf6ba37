//! Contract handle bound to a signing account.

use std::fmt;
use std::sync::Arc;

use coinflip_chain::{abi, ChainRpc, TransactionRequest};
use coinflip_types::{Address, Result, Side, TxHash, U256};

use crate::wallet::TxSigner;

/// The CoinFlip contract as seen by one account. Every transaction goes
/// through the bound signer; view calls go straight to the chain.
#[derive(Clone)]
pub struct CoinFlipContract {
    address: Address,
    signer: Arc<dyn TxSigner>,
    rpc: Arc<dyn ChainRpc>,
}

impl CoinFlipContract {
    pub fn new(address: Address, signer: Arc<dyn TxSigner>, rpc: Arc<dyn ChainRpc>) -> Self {
        Self { address, signer, rpc }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    pub fn flip_request(&self, side: Side, value: U256) -> TransactionRequest {
        TransactionRequest {
            from: Some(self.signer.address()),
            to: Some(self.address),
            value: Some(value),
            data: Some(abi::encode_flip(side)),
        }
    }

    /// Send `flip(side)` with `value` attached. Returns once the wallet has
    /// handed the transaction to the network.
    pub async fn flip(&self, side: Side, value: U256) -> Result<TxHash> {
        self.signer.send_transaction(self.flip_request(side, value)).await
    }

    pub async fn owner(&self) -> Result<Address> {
        let out = self
            .rpc
            .call(&TransactionRequest {
                to: Some(self.address),
                data: Some(abi::encode_owner()),
                ..Default::default()
            })
            .await?;
        abi::decode_owner_return(&out)
    }

    pub async fn withdraw(&self) -> Result<TxHash> {
        let tx = TransactionRequest {
            from: Some(self.signer.address()),
            to: Some(self.address),
            value: None,
            data: Some(abi::encode_withdraw()),
        };
        self.signer.send_transaction(tx).await
    }
}

impl fmt::Debug for CoinFlipContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoinFlipContract")
            .field("address", &self.address)
            .field("signer", &self.signer.address())
            .finish()
    }
}
