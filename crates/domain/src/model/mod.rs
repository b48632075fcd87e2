//! Transfer model shared by the scanner, the reconciliation engine and the
//! storage adapters.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Length of the canonical textual identifier: `0x` + 64 hex digits.
pub const TRANSFER_ID_LENGTH: usize = 66;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferIdError {
    #[error("transfer id must be exactly {TRANSFER_ID_LENGTH} characters")]
    WrongLength,
    #[error("transfer id must start with 0x")]
    MissingPrefix,
    #[error("transfer id contains non-hex characters")]
    NonHex,
}

/// Validates the `0x` + 64 hex-character contract.
pub fn validate_transfer_id(id: &str) -> Result<(), TransferIdError> {
    if id.len() != TRANSFER_ID_LENGTH {
        return Err(TransferIdError::WrongLength);
    }
    let Some(digits) = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) else {
        return Err(TransferIdError::MissingPrefix);
    };
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(TransferIdError::NonHex);
    }
    Ok(())
}

/// Content-derived transfer identifier, kept in lowercase `0x…` form so both
/// chains produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(String);

impl TransferId {
    pub fn parse(id: &str) -> Result<Self, TransferIdError> {
        validate_transfer_id(id)?;
        let mut owned = id.to_owned();
        owned.make_ascii_lowercase();
        Ok(Self(owned))
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TransferId {
    type Error = TransferIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum LegAction {
    Burn,
    Mint,
}

/// One decoded side of a transfer, as produced by a chain scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLeg {
    pub transfer_id: TransferId,
    pub chain: String,
    pub action: LegAction,
    /// Amount at canonical precision.
    pub amount: u64,
    /// Unix seconds taken from the identifier, not from wall-clock time.
    pub created_time: u64,
    pub tx_hash: String,
}

impl TransferLeg {
    pub fn detail(&self) -> LegDetail {
        LegDetail {
            chain: self.chain.clone(),
            action: self.action,
            amount: self.amount,
            tx_hash: self.tx_hash.clone(),
        }
    }
}

/// The per-chain half of a [`TransferRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegDetail {
    pub chain: String,
    pub action: LegAction,
    pub amount: u64,
    pub tx_hash: String,
}

impl LegDetail {
    fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.action
            .cmp(&other.action)
            .then_with(|| self.chain.cmp(&other.chain))
            .then_with(|| self.tx_hash.cmp(&other.tx_hash))
            .then_with(|| self.amount.cmp(&other.amount))
    }
}

/// Durable merge state for one transfer identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub transfer_id: TransferId,
    /// Creation time of the transfer in unix seconds.
    pub timestamp: u64,
    pub leg_a: LegDetail,
    pub leg_b: Option<LegDetail>,
    pub is_matched: bool,
}

impl TransferRecord {
    /// Starts a record from the first observed leg.
    pub fn from_first_leg(leg: &TransferLeg) -> Self {
        Self {
            transfer_id: leg.transfer_id.clone(),
            timestamp: leg.created_time,
            leg_a: leg.detail(),
            leg_b: None,
            is_matched: false,
        }
    }

    /// Returns the completed record for `second`.
    ///
    /// Legs are stored in a canonical order (burn before mint, then by chain
    /// and transaction hash) so the final record does not depend on which
    /// chain reported first.
    pub fn with_second_leg(&self, second: LegDetail) -> Self {
        let first = self.leg_a.clone();
        let (leg_a, leg_b) = match first.canonical_cmp(&second) {
            Ordering::Greater => (second, first),
            _ => (first, second),
        };
        let is_matched = leg_a.amount == leg_b.amount;

        Self {
            transfer_id: self.transfer_id.clone(),
            timestamp: self.timestamp,
            leg_a,
            leg_b: Some(leg_b),
            is_matched,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.leg_b.is_some()
    }

    /// `true` when the record holds exactly one burn and one mint.
    pub fn is_valid_pair(&self) -> bool {
        match &self.leg_b {
            Some(leg_b) => self.leg_a.action != leg_b.action,
            None => false,
        }
    }

    /// `true` when `leg` is already stored in either slot.
    pub fn contains_leg(&self, leg: &LegDetail) -> bool {
        &self.leg_a == leg || self.leg_b.as_ref() == Some(leg)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.timestamp)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}
