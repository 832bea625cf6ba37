use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use alloy_primitives::{Address, Bytes, B256, U256};

/// Transaction hash as returned by `eth_sendTransaction`.
pub type TxHash = B256;

/// 0x-prefixed hex string (e.g. "0x1234...").
pub type Hex = String;

/// Coin-flip client error types.
#[derive(Debug, Error)]
pub enum CoinflipError {
    #[error("wallet authorization failed: {0}")]
    Authorization(String),

    #[error("{0}")]
    Precondition(String),

    #[error("invalid amount {input:?}: {reason}")]
    AmountFormat { input: String, reason: String },

    #[error("transaction submission failed: {0}")]
    Submission(String),

    #[error("transaction confirmation failed: {0}")]
    Confirmation(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("abi error: {0}")]
    Abi(String),

    #[error("subscription closed: {0}")]
    SubscriptionClosed(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CoinflipError>;

/// Coarse classification used when reporting a failed action to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authorization,
    Precondition,
    AmountFormat,
    Submission,
    Confirmation,
    Internal,
}

impl CoinflipError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoinflipError::Authorization(_) => ErrorKind::Authorization,
            CoinflipError::Precondition(_) => ErrorKind::Precondition,
            CoinflipError::AmountFormat { .. } => ErrorKind::AmountFormat,
            CoinflipError::Submission(_) => ErrorKind::Submission,
            CoinflipError::Confirmation(_) => ErrorKind::Confirmation,
            _ => ErrorKind::Internal,
        }
    }

    /// Re-label a plumbing error as belonging to the given stage. Errors that
    /// already carry a taxonomy kind are returned unchanged.
    pub fn in_stage(self, stage: ErrorKind) -> Self {
        if self.kind() != ErrorKind::Internal {
            return self;
        }
        let message = self.to_string();
        match stage {
            ErrorKind::Authorization => CoinflipError::Authorization(message),
            ErrorKind::Precondition => CoinflipError::Precondition(message),
            ErrorKind::Submission => CoinflipError::Submission(message),
            ErrorKind::Confirmation => CoinflipError::Confirmation(message),
            ErrorKind::AmountFormat | ErrorKind::Internal => self,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Authorization => "authorization",
            ErrorKind::Precondition => "precondition",
            ErrorKind::AmountFormat => "amount",
            ErrorKind::Submission => "submission",
            ErrorKind::Confirmation => "confirmation",
            ErrorKind::Internal => "internal",
        };
        f.write_str(label)
    }
}

/// The side a wager is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Heads,
    Tails,
}

impl Side {
    /// Value of the contract's `_heads` argument.
    pub fn is_heads(self) -> bool {
        matches!(self, Side::Heads)
    }

    pub fn from_heads_flag(heads: bool) -> Self {
        if heads { Side::Heads } else { Side::Tails }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Heads => f.write_str("heads"),
            Side::Tails => f.write_str("tails"),
        }
    }
}

impl FromStr for Side {
    type Err = CoinflipError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heads" | "h" => Ok(Side::Heads),
            "tails" | "t" => Ok(Side::Tails),
            other => Err(CoinflipError::Other(format!("unknown side: {}", other))),
        }
    }
}

/// A wager accepted by the network but not yet known to be included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub tx_hash: TxHash,
    pub from: Address,
    /// Attached value in minor units (wei).
    pub value: U256,
    pub side: Side,
}

/// Decoded `CoinFlipped` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeEvent {
    pub player: Address,
    /// Wagered amount in minor units (wei).
    pub amount: U256,
    pub won: bool,
    pub block_number: Option<u64>,
    pub tx_hash: Option<TxHash>,
}

impl OutcomeEvent {
    /// Address comparison is on raw bytes, so hex casing never matters.
    pub fn is_for(&self, account: &Address) -> bool {
        self.player == *account
    }
}

/// Convert bytes to a 0x-prefixed hex string.
pub fn bytes_to_hex(bytes: &[u8]) -> Hex {
    format!("0x{}", hex::encode(bytes))
}
