use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a reservation.
///
/// Wraps a UUID to provide type safety and prevent mixing up
/// reservation IDs with ledger transaction IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(Uuid);

impl ReservationId {
    /// Creates a new random reservation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a reservation ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReservationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ReservationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<ReservationId> for Uuid {
    fn from(id: ReservationId) -> Self {
        id.0
    }
}

/// Identifier of a single row in the transaction ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The escrow contract's own booking counter.
///
/// Never derived from a reservation ID; the link between the two is recorded
/// when the payment is submitted and looked up afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingId(u64);

impl BookingId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for BookingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash of a transaction accepted by the ledger network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TxHash {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Error returned when a wallet address is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid wallet address: {0:?}")]
pub struct InvalidAddress(pub String);

/// A ledger account address (`0x` followed by 40 hex digits).
///
/// Construction does not validate; the ledger gateway checks the format
/// before any network call so that a malformed address surfaces as a
/// request failure rather than a parse error deep in a handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into().trim().to_ascii_lowercase())
    }

    /// Parses and validates an address.
    pub fn parse(address: &str) -> Result<Self, InvalidAddress> {
        let address = Self::new(address);
        address.validate()?;
        Ok(address)
    }

    /// Checks the `0x` + 40 hex digit format.
    pub fn validate(&self) -> Result<(), InvalidAddress> {
        let valid = self
            .0
            .strip_prefix("0x")
            .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()));
        if valid {
            Ok(())
        } else {
            Err(InvalidAddress(self.0.clone()))
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WalletAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Why a ledger transaction is attempted.
///
/// Together with the reservation ID this forms the idempotency key of the
/// transaction ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Purpose {
    Payment,
    EscrowRelease,
    Refund,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Payment => "PAYMENT",
            Purpose::EscrowRelease => "ESCROW_RELEASE",
            Purpose::Refund => "REFUND",
        }
    }
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Purpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PAYMENT" => Ok(Purpose::Payment),
            "ESCROW_RELEASE" => Ok(Purpose::EscrowRelease),
            "REFUND" => Ok(Purpose::Refund),
            other => Err(format!("unknown purpose: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_id_new_creates_unique_ids() {
        let id1 = ReservationId::new();
        let id2 = ReservationId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn reservation_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = ReservationId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn wallet_address_validation() {
        assert!(WalletAddress::parse("0x52908400098527886E0F7030069857D2E4169EE7").is_ok());
        assert!(WalletAddress::parse("52908400098527886E0F7030069857D2E4169EE7").is_err());
        assert!(WalletAddress::parse("0x1234").is_err());
        assert!(WalletAddress::parse("0xZZ908400098527886E0F7030069857D2E4169EE7").is_err());
    }

    #[test]
    fn wallet_address_is_normalised_to_lowercase() {
        let address = WalletAddress::new(" 0xABCDEF0000000000000000000000000000000001 ");
        assert_eq!(address.as_str(), "0xabcdef0000000000000000000000000000000001");
    }

    #[test]
    fn purpose_wire_format() {
        let json = serde_json::to_string(&Purpose::EscrowRelease).unwrap();
        assert_eq!(json, "\"ESCROW_RELEASE\"");
        assert_eq!("REFUND".parse::<Purpose>().unwrap(), Purpose::Refund);
        assert!("SOMETHING".parse::<Purpose>().is_err());
    }
}
