//! Fixed ABI of the deployed CoinFlip contract.
//!
//! - `flip(bool _heads) payable`
//! - `event CoinFlipped(address indexed player, uint256 amount, bool won)`
//! - `owner() view returns (address)`, `withdraw()`

use alloy_sol_types::{sol, SolCall, SolEvent, SolValue};
use coinflip_types::{Address, Bytes, CoinflipError, OutcomeEvent, Result, Side, B256};

use crate::Log;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    contract CoinFlip {
        event CoinFlipped(address indexed player, uint256 amount, bool won);

        function flip(bool _heads) external payable;
        function owner() external view returns (address);
        function withdraw() external;

        receive() external payable;
    }
}

/// Topic 0 of `CoinFlipped`.
pub fn outcome_topic() -> B256 {
    CoinFlip::CoinFlipped::SIGNATURE_HASH
}

pub fn encode_flip(side: Side) -> Bytes {
    CoinFlip::flipCall { _heads: side.is_heads() }.abi_encode().into()
}

/// Decode `flip` calldata back into the chosen side.
pub fn decode_flip(data: &[u8]) -> Result<Side> {
    let call = CoinFlip::flipCall::abi_decode(data)
        .map_err(|e| CoinflipError::Abi(format!("flip calldata: {}", e)))?;
    Ok(Side::from_heads_flag(call._heads))
}

pub fn is_flip_call(data: &[u8]) -> bool {
    data.starts_with(&CoinFlip::flipCall::SELECTOR)
}

pub fn is_withdraw_call(data: &[u8]) -> bool {
    data.starts_with(&CoinFlip::withdrawCall::SELECTOR)
}

pub fn is_owner_call(data: &[u8]) -> bool {
    data.starts_with(&CoinFlip::ownerCall::SELECTOR)
}

pub fn encode_owner() -> Bytes {
    CoinFlip::ownerCall {}.abi_encode().into()
}

pub fn encode_owner_return(owner: Address) -> Bytes {
    owner.abi_encode().into()
}

pub fn decode_owner_return(data: &[u8]) -> Result<Address> {
    Address::abi_decode(data).map_err(|e| CoinflipError::Abi(format!("owner() return: {}", e)))
}

pub fn encode_withdraw() -> Bytes {
    CoinFlip::withdrawCall {}.abi_encode().into()
}

/// Build the raw topics and data of a `CoinFlipped` log.
pub fn encode_outcome(event: &OutcomeEvent) -> (Vec<B256>, Bytes) {
    let log = CoinFlip::CoinFlipped {
        player: event.player,
        amount: event.amount,
        won: event.won,
    }
    .encode_log_data();
    (log.topics().to_vec(), log.data)
}

/// Decode a `CoinFlipped` log. Logs of other events fail with `Abi`.
pub fn decode_outcome(log: &Log) -> Result<OutcomeEvent> {
    if log.topics.first() != Some(&outcome_topic()) {
        return Err(CoinflipError::Abi("log is not a CoinFlipped event".into()));
    }
    let decoded = CoinFlip::CoinFlipped::decode_raw_log(log.topics.iter().copied(), &log.data)
        .map_err(|e| CoinflipError::Abi(format!("CoinFlipped log: {}", e)))?;
    Ok(OutcomeEvent {
        player: decoded.player,
        amount: decoded.amount,
        won: decoded.won,
        block_number: log.block_number,
        tx_hash: log.transaction_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinflip_types::U256;

    #[test]
    fn test_flip_calldata_layout() {
        let heads = encode_flip(Side::Heads);
        assert_eq!(heads.len(), 4 + 32);
        assert!(is_flip_call(&heads));
        assert_eq!(heads[35], 1);
        assert_eq!(decode_flip(&heads).unwrap(), Side::Heads);

        let tails = encode_flip(Side::Tails);
        assert_eq!(tails[35], 0);
        assert_eq!(decode_flip(&tails).unwrap(), Side::Tails);
        assert!(!is_withdraw_call(&tails));
    }

    #[test]
    fn test_outcome_log_decoding() {
        let event = OutcomeEvent {
            player: Address::repeat_byte(0xaa),
            amount: U256::from(500_000_000_000_000_000u64),
            won: true,
            block_number: Some(7),
            tx_hash: None,
        };
        let (topics, data) = encode_outcome(&event);
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0], outcome_topic());
        assert_eq!(topics[1], event.player.into_word());

        let log = Log {
            address: Address::ZERO,
            topics,
            data,
            block_number: Some(7),
            transaction_hash: None,
            log_index: Some(0),
            removed: false,
        };
        assert_eq!(decode_outcome(&log).unwrap(), event);
    }

    #[test]
    fn test_foreign_log_rejected() {
        let log = Log {
            address: Address::ZERO,
            topics: vec![B256::repeat_byte(1)],
            data: Bytes::new(),
            block_number: None,
            transaction_hash: None,
            log_index: None,
            removed: false,
        };
        assert!(matches!(decode_outcome(&log), Err(CoinflipError::Abi(_))));
    }

    #[test]
    fn test_owner_return_decoding() {
        let owner = Address::repeat_byte(0x42);
        let encoded = encode_owner_return(owner);
        assert_eq!(decode_owner_return(&encoded).unwrap(), owner);
        assert!(is_owner_call(&encode_owner()));
    }
}
