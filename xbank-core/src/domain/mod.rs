//! Core domain entities
//!
//! Plain data structures with validation logic. No I/O and no storage
//! engine types live here.

mod account;
mod atm;
pub mod money;
pub mod result;
mod transaction;

pub use account::{Account, AccountOwner, AccountStatus};
pub use atm::{AtmData, CashOperation};
pub use transaction::{
    AccountHistory, LedgerSummary, NewTransfer, PendingTransfer, Transaction, TransactionStatus,
};
