//! Transfer ledger domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::result::{Error, Result};

/// Ledger row state. A row starts `Blocked` and moves to `Confirmed`
/// exactly once, when the receiver is credited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Blocked,
    Confirmed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Blocked => "BLOCKED",
            TransactionStatus::Confirmed => "CONFIRMED",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "BLOCKED" => Some(TransactionStatus::Blocked),
            "CONFIRMED" => Some(TransactionStatus::Confirmed),
            _ => None,
        }
    }
}

/// A ledger row: one transfer and its settlement state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub amount_cents: i64,
    pub description: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// True once the holding period has elapsed and the row is still unsettled
    pub fn is_due(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == TransactionStatus::Blocked && self.created_at <= cutoff
    }

    pub fn to_pending(&self) -> PendingTransfer {
        PendingTransfer {
            id: self.id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            amount_cents: self.amount_cents,
        }
    }
}

/// A transfer request before it reaches the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer {
    pub sender_id: i64,
    pub receiver_id: i64,
    pub amount_cents: i64,
    pub description: String,
}

impl NewTransfer {
    pub fn new(
        sender_id: i64,
        receiver_id: i64,
        amount_cents: i64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            sender_id,
            receiver_id,
            amount_cents,
            description: description.into(),
        }
    }

    /// Reject requests that could never form a valid ledger row
    pub fn validate(&self) -> Result<()> {
        if self.amount_cents <= 0 {
            return Err(Error::validation(format!(
                "transfer amount must be positive, got {}",
                self.amount_cents
            )));
        }
        if self.sender_id <= 0 || self.receiver_id <= 0 {
            return Err(Error::validation("account ids must be positive"));
        }
        if self.sender_id == self.receiver_id {
            return Err(Error::validation(format!(
                "sender and receiver must differ (both are {})",
                self.sender_id
            )));
        }
        Ok(())
    }
}

/// The slice of a ledger row the settlement pass needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransfer {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub amount_cents: i64,
}

/// One page of an account's ledger rows plus the unpaged total
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountHistory {
    pub transactions: Vec<Transaction>,
    pub total: i64,
}

/// Book-wide counters.
///
/// `total_balance_cents + in_flight_cents` stays constant across transfers
/// and settlements; only cash operations move it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub accounts: i64,
    pub transactions: i64,
    pub blocked: i64,
    pub confirmed: i64,
    pub in_flight_cents: i64,
    pub total_balance_cents: i64,
}
