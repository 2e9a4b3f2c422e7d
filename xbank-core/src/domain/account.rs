//! Account domain model

use serde::{Deserialize, Serialize};

/// Lifecycle state of an account. Blocking is one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountStatus {
    Active,
    Blocked,
}

impl AccountStatus {
    /// Value stored in the `status` column
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Blocked => "BLOCKED",
        }
    }

    /// Parse the stored column value
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(AccountStatus::Active),
            "BLOCKED" => Some(AccountStatus::Blocked),
            _ => None,
        }
    }
}

/// A money account. Balances are integer minor units (cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    /// Owning `AccountOwner`, absent while an account is unowned
    pub owner_id: Option<i64>,
    /// User behind the owner; absent for ATM-only accounts
    pub user_id: Option<i64>,
    pub balance_cents: i64,
    pub status: AccountStatus,
}

impl Account {
    pub fn is_blocked(&self) -> bool {
        self.status == AccountStatus::Blocked
    }

    /// Owning user id, 0 when the account has no linked user
    pub fn user_id_or_zero(&self) -> i64 {
        self.user_id.unwrap_or(0)
    }
}

/// Holder of one or more accounts: either a user or an ATM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOwner {
    pub id: i64,
    pub user_id: Option<i64>,
    pub atm_id: Option<i64>,
}
