//! ATM domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An ATM together with its linked bank account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtmData {
    pub id: i64,
    /// Stored credential hash. Verification happens outside this crate.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Physical cash held by the machine
    pub cash_cents: i64,
    pub account_id: i64,
}

/// Audit row for a cash movement at an ATM.
///
/// Positive amounts are cash taken in, negative amounts cash dispensed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashOperation {
    pub id: i64,
    pub atm_account_id: i64,
    pub user_account_id: Option<i64>,
    pub amount_cents: i64,
    pub created_at: DateTime<Utc>,
}
