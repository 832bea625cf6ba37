//! Address and amount codec.
//!
//! Amounts are held as scaled integers (`U256` minor units). Parsing never
//! rounds: input that cannot be represented exactly is rejected.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use coinflip_types::{CoinflipError, Result};

/// Decimals of the native currency (1 ether = 10^18 wei).
pub const ETHER_DECIMALS: u8 = 18;

/// Largest scale whose power of ten still fits in 256 bits.
pub const MAX_DECIMALS: u8 = 77;

/// Reasons a decimal amount string is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,

    #[error("amount must not be negative")]
    Negative,

    #[error("unexpected character {0:?}")]
    InvalidCharacter(char),

    #[error("more than one decimal point")]
    MisplacedDecimalPoint,

    #[error("no digits")]
    NoDigits,

    #[error("more than {decimals} fractional digits")]
    TooManyDecimals { decimals: u8 },

    #[error("amount does not fit in 256 bits")]
    Overflow,

    #[error("unsupported scale {0}")]
    UnsupportedDecimals(u8),
}

fn ten_pow(decimals: u8) -> U256 {
    U256::from(10u64).pow(U256::from(decimals))
}

/// Parse a decimal string into minor units at the given scale.
///
/// Surrounding whitespace is ignored. Fractional digits beyond `decimals` are
/// accepted only when they are all zero.
pub fn parse_units(input: &str, decimals: u8) -> std::result::Result<U256, AmountError> {
    if decimals > MAX_DECIMALS {
        return Err(AmountError::UnsupportedDecimals(decimals));
    }
    let s = input.trim();
    if s.is_empty() {
        return Err(AmountError::Empty);
    }
    if s.starts_with('-') {
        return Err(AmountError::Negative);
    }

    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => {
            if f.contains('.') {
                return Err(AmountError::MisplacedDecimalPoint);
            }
            (i, f)
        }
        None => (s, ""),
    };
    if let Some(c) = int_part.chars().chain(frac_part.chars()).find(|c| !c.is_ascii_digit()) {
        return Err(AmountError::InvalidCharacter(c));
    }
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(AmountError::NoDigits);
    }

    let frac_part = if frac_part.len() > decimals as usize {
        let (kept, dropped) = frac_part.split_at(decimals as usize);
        if dropped.bytes().any(|b| b != b'0') {
            return Err(AmountError::TooManyDecimals { decimals });
        }
        kept
    } else {
        frac_part
    };

    let ten = U256::from(10u64);
    let mut value = U256::ZERO;
    let padding = decimals as usize - frac_part.len();
    let digits = int_part
        .bytes()
        .chain(frac_part.bytes())
        .chain(std::iter::repeat(b'0').take(padding));
    for digit in digits {
        value = value
            .checked_mul(ten)
            .and_then(|v| v.checked_add(U256::from(digit - b'0')))
            .ok_or(AmountError::Overflow)?;
    }
    Ok(value)
}

/// Format minor units as a decimal string. The fractional part keeps at least
/// one digit ("1.0", "0.5").
pub fn format_units(value: U256, decimals: u8) -> String {
    if decimals == 0 || decimals > MAX_DECIMALS {
        return value.to_string();
    }
    let scale = ten_pow(decimals);
    let int_part = value / scale;
    let frac_part = value % scale;

    let frac = format!("{:0>width$}", frac_part.to_string(), width = decimals as usize);
    let frac = frac.trim_end_matches('0');
    let frac = if frac.is_empty() { "0" } else { frac };
    format!("{}.{}", int_part, frac)
}

pub fn parse_ether(input: &str) -> std::result::Result<U256, AmountError> {
    parse_units(input, ETHER_DECIMALS)
}

pub fn format_ether(value: U256) -> String {
    format_units(value, ETHER_DECIMALS)
}

/// A native-currency amount with 18-decimal fixed-point scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(U256);

impl Amount {
    pub const ZERO: Amount = Amount(U256::ZERO);

    pub fn from_wei(wei: U256) -> Self {
        Amount(wei)
    }

    pub fn wei(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Parse user input, reporting failures as `AmountFormat`.
    pub fn parse_input(input: &str) -> Result<Self> {
        parse_ether(input)
            .map(Amount)
            .map_err(|e| amount_error(input, e))
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> std::result::Result<Self, AmountError> {
        parse_ether(s).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_ether(self.0))
    }
}

impl From<U256> for Amount {
    fn from(wei: U256) -> Self {
        Amount(wei)
    }
}

/// Wrap a codec failure together with the offending input.
pub fn amount_error(input: &str, err: AmountError) -> CoinflipError {
    CoinflipError::AmountFormat {
        input: input.to_string(),
        reason: err.to_string(),
    }
}

/// Parse a 0x-prefixed, 20-byte hex address in any letter case. The EIP-55
/// checksum is not enforced.
pub fn parse_address(input: &str) -> Result<Address> {
    let s = input.trim();
    if !s.starts_with("0x") {
        return Err(CoinflipError::InvalidAddress(format!("missing 0x prefix: {}", s)));
    }
    Address::from_str(s).map_err(|e| CoinflipError::InvalidAddress(format!("{}: {}", s, e)))
}

/// Shortened form for display ("0x1422…EDCC").
pub fn short_address(address: &Address) -> String {
    let full = address.to_checksum(None);
    format!("{}…{}", &full[..6], &full[full.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn wei(s: &str) -> U256 {
        U256::from_str_radix(s, 10).unwrap()
    }

    #[test]
    fn test_parse_ether_values() {
        assert_eq!(parse_ether("0.5").unwrap(), wei("500000000000000000"));
        assert_eq!(parse_ether("1").unwrap(), wei("1000000000000000000"));
        assert_eq!(parse_ether("1.").unwrap(), wei("1000000000000000000"));
        assert_eq!(parse_ether(".25").unwrap(), wei("250000000000000000"));
        assert_eq!(parse_ether(" 0.000000000000000001 ").unwrap(), U256::from(1u64));
        assert_eq!(parse_ether("0").unwrap(), U256::ZERO);
        assert_eq!(parse_ether("007.10").unwrap(), wei("7100000000000000000"));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(parse_ether("abc"), Err(AmountError::InvalidCharacter('a')));
        assert_eq!(parse_ether(""), Err(AmountError::Empty));
        assert_eq!(parse_ether("   "), Err(AmountError::Empty));
        assert_eq!(parse_ether("-1"), Err(AmountError::Negative));
        assert_eq!(parse_ether("+1"), Err(AmountError::InvalidCharacter('+')));
        assert_eq!(parse_ether("1.2.3"), Err(AmountError::MisplacedDecimalPoint));
        assert_eq!(parse_ether("."), Err(AmountError::NoDigits));
        assert_eq!(parse_ether("1e18"), Err(AmountError::InvalidCharacter('e')));
        assert_eq!(parse_ether("1 000"), Err(AmountError::InvalidCharacter(' ')));
    }

    #[test]
    fn test_precision_is_never_truncated() {
        assert_eq!(
            parse_ether("0.0000000000000000001"),
            Err(AmountError::TooManyDecimals { decimals: 18 })
        );
        // trailing zeros lose nothing
        assert_eq!(parse_ether("1.0000000000000000000000").unwrap(), wei("1000000000000000000"));
    }

    #[test]
    fn test_overflow() {
        let huge = "1".repeat(80);
        assert_eq!(parse_ether(&huge), Err(AmountError::Overflow));
        assert_eq!(parse_units("1", 78), Err(AmountError::UnsupportedDecimals(78)));
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_ether(wei("500000000000000000")), "0.5");
        assert_eq!(format_ether(wei("1000000000000000000")), "1.0");
        assert_eq!(format_ether(U256::ZERO), "0.0");
        assert_eq!(format_ether(U256::from(1u64)), "0.000000000000000001");
        assert_eq!(format_units(U256::from(1234u64), 2), "12.34");
        assert_eq!(format_units(U256::from(1234u64), 0), "1234");
    }

    #[test]
    fn test_amount_input_errors_map_to_amount_format() {
        let err = Amount::parse_input("abc").unwrap_err();
        assert_eq!(err.kind(), coinflip_types::ErrorKind::AmountFormat);
        assert_eq!(Amount::parse_input("0.5").unwrap().to_string(), "0.5");
    }

    #[test]
    fn test_parse_address_any_case() {
        let lower = parse_address("0x14220f1812eb4f224f5758b0edfef8f612a5edcc").unwrap();
        let mixed = parse_address("0x14220f1812eB4f224F5758B0EdFeF8F612A5EDCC").unwrap();
        let upper = parse_address("0x14220F1812EB4F224F5758B0EDFEF8F612A5EDCC").unwrap();
        assert_eq!(lower, mixed);
        assert_eq!(lower, upper);
        assert!(parse_address("14220f1812eb4f224f5758b0edfef8f612a5edcc").is_err());
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("0xzz220f1812eb4f224f5758b0edfef8f612a5edcc").is_err());
        assert_eq!(short_address(&mixed), "0x1422…EDCC");
    }

    proptest! {
        #[test]
        fn prop_format_then_parse_recovers_value(raw in any::<u128>()) {
            let value = U256::from(raw);
            prop_assert_eq!(parse_ether(&format_ether(value)).unwrap(), value);
        }

        #[test]
        fn prop_parse_then_format_is_normalized(int in 0u64..1_000_000_000, frac in "[0-9]{0,18}") {
            let input = if frac.is_empty() { int.to_string() } else { format!("{}.{}", int, frac) };
            let formatted = format_ether(parse_ether(&input).unwrap());
            let trimmed = frac.trim_end_matches('0');
            let expected = format!("{}.{}", int, if trimmed.is_empty() { "0" } else { trimmed });
            prop_assert_eq!(formatted, expected);
        }
    }
}
