//! Exact ledger amounts.
//!
//! Amounts are whole wei held in a `u128`. They never pass through floating
//! point; decimal ether strings are parsed digit by digit.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Number of wei in one ether.
pub const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;

const ETHER_DECIMALS: usize = 18;

/// Errors produced while parsing or combining amounts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("invalid amount: {0:?}")]
    Invalid(String),

    #[error("amount overflow")]
    Overflow,

    #[error("amount underflow")]
    Underflow,
}

/// An amount of the ledger's native currency in its smallest unit.
///
/// Serialized as a decimal string so that JSON consumers never lose
/// precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Wei(u128);

impl Wei {
    pub const ZERO: Wei = Wei(0);

    pub const fn new(value: u128) -> Self {
        Self(value)
    }

    /// Whole ether.
    pub const fn ether(value: u128) -> Self {
        Self(value * WEI_PER_ETHER)
    }

    pub const fn as_u128(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Wei) -> Result<Wei, AmountError> {
        self.0.checked_add(other.0).map(Wei).ok_or(AmountError::Overflow)
    }

    pub fn checked_sub(self, other: Wei) -> Result<Wei, AmountError> {
        self.0.checked_sub(other.0).map(Wei).ok_or(AmountError::Underflow)
    }

    pub fn saturating_sub(self, other: Wei) -> Wei {
        Wei(self.0.saturating_sub(other.0))
    }

    /// Parses a decimal ether string such as `"1.05"` into wei.
    pub fn parse_ether(input: &str) -> Result<Wei, AmountError> {
        let input = input.trim();
        let invalid = || AmountError::Invalid(input.to_string());

        let (whole, fraction) = match input.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (input, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        if fraction.len() > ETHER_DECIMALS {
            return Err(invalid());
        }
        if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let padded = format!("{fraction:0<width$}", width = ETHER_DECIMALS);
        let fraction: u128 = padded.parse().map_err(|_| invalid())?;

        whole
            .checked_mul(WEI_PER_ETHER)
            .and_then(|w| w.checked_add(fraction))
            .map(Wei)
            .ok_or(AmountError::Overflow)
    }

    /// Renders the amount as a decimal ether string without trailing zeros.
    pub fn to_ether_string(&self) -> String {
        let whole = self.0 / WEI_PER_ETHER;
        let fraction = self.0 % WEI_PER_ETHER;
        if fraction == 0 {
            return whole.to_string();
        }
        let fraction = format!("{fraction:0>width$}", width = ETHER_DECIMALS);
        format!("{whole}.{}", fraction.trim_end_matches('0'))
    }
}

impl std::fmt::Display for Wei {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Wei {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u128>()
            .map(Wei)
            .map_err(|_| AmountError::Invalid(s.to_string()))
    }
}

impl From<u128> for Wei {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

impl Serialize for Wei {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Wei {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Platform fee applied on top of the rental amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub percentage: u8,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self { percentage: 5 }
    }
}

impl FeeSchedule {
    pub fn new(percentage: u8) -> Self {
        Self { percentage }
    }

    /// `rental * percentage / 100`, truncated to whole wei.
    pub fn fee_for(&self, rental: Wei) -> Result<Wei, AmountError> {
        rental
            .0
            .checked_mul(u128::from(self.percentage))
            .map(|v| Wei(v / 100))
            .ok_or(AmountError::Overflow)
    }

    /// Rental plus fee; this is what the tenant pays into escrow.
    pub fn total_for(&self, rental: Wei) -> Result<Wei, AmountError> {
        rental.checked_add(self.fee_for(rental)?)
    }

    /// Splits a rental into `(fee, total)`.
    pub fn quote(&self, rental: Wei) -> Result<(Wei, Wei), AmountError> {
        let fee = self.fee_for(rental)?;
        Ok((fee, rental.checked_add(fee)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ether_is_exact() {
        assert_eq!(Wei::parse_ether("1").unwrap(), Wei::ether(1));
        assert_eq!(
            Wei::parse_ether("1.05").unwrap(),
            Wei::new(1_050_000_000_000_000_000)
        );
        assert_eq!(Wei::parse_ether("0.000000000000000001").unwrap(), Wei::new(1));
        assert_eq!(Wei::parse_ether(".5").unwrap(), Wei::new(500_000_000_000_000_000));
    }

    #[test]
    fn parse_ether_rejects_garbage() {
        assert!(Wei::parse_ether("").is_err());
        assert!(Wei::parse_ether("1.0000000000000000001").is_err());
        assert!(Wei::parse_ether("-1").is_err());
        assert!(Wei::parse_ether("1e18").is_err());
    }

    #[test]
    fn ether_string_round_trip() {
        let amount = Wei::new(1_050_000_000_000_000_000);
        assert_eq!(amount.to_ether_string(), "1.05");
        assert_eq!(Wei::ether(3).to_ether_string(), "3");
    }

    #[test]
    fn fee_is_five_percent_of_rental() {
        let schedule = FeeSchedule::default();
        let (fee, total) = schedule.quote(Wei::ether(1)).unwrap();
        assert_eq!(fee, Wei::new(50_000_000_000_000_000));
        assert_eq!(total, Wei::new(1_050_000_000_000_000_000));
    }

    #[test]
    fn fee_truncates_to_whole_wei() {
        let schedule = FeeSchedule::new(5);
        assert_eq!(schedule.fee_for(Wei::new(19)).unwrap(), Wei::ZERO);
        assert_eq!(schedule.fee_for(Wei::new(20)).unwrap(), Wei::new(1));
    }

    #[test]
    fn checked_arithmetic_reports_overflow() {
        assert_eq!(
            Wei::new(u128::MAX).checked_add(Wei::new(1)),
            Err(AmountError::Overflow)
        );
        assert_eq!(Wei::ZERO.checked_sub(Wei::new(1)), Err(AmountError::Underflow));
    }

    #[test]
    fn serializes_as_decimal_string() {
        let json = serde_json::to_string(&Wei::new(42)).unwrap();
        assert_eq!(json, "\"42\"");
        let back: Wei = serde_json::from_str("\"1050000000000000000\"").unwrap();
        assert_eq!(back, Wei::new(1_050_000_000_000_000_000));
    }
}
