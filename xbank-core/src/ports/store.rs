//! Store port - the injected storage dependency
//!
//! Reads and single-statement collaborator writes live on the store traits.
//! Balance arithmetic is only reachable through an [`AtomicUnit`], so a
//! balance can never change without the ledger write it belongs to.

use chrono::{DateTime, Utc};

use crate::context::OpContext;
use crate::domain::result::Result;
use crate::domain::{
    Account, AccountHistory, AtmData, LedgerSummary, NewTransfer, PendingTransfer, Transaction,
};

/// Accounts and their owners
pub trait AccountStore: Send + Sync {
    /// Accounts of a user, in insertion order
    fn accounts_for_user(&self, ctx: &OpContext, user_id: i64) -> Result<Vec<Account>>;

    /// Owner row id for a user, if one was created
    fn find_owner_by_user(&self, ctx: &OpContext, user_id: i64) -> Result<Option<i64>>;

    fn create_owner(&self, ctx: &OpContext, user_id: i64) -> Result<i64>;

    /// Insert an ACTIVE zero-balance account for an owner
    fn insert_account(&self, ctx: &OpContext, owner_id: i64) -> Result<i64>;

    /// Set status to BLOCKED. Blocking a blocked account is not an error.
    fn block_account(&self, ctx: &OpContext, account_id: i64) -> Result<()>;

    /// Account with its owning user resolved
    fn account_by_id(&self, ctx: &OpContext, account_id: i64) -> Result<Option<Account>>;
}

/// Read side of the transfer ledger
pub trait TransactionLedger: Send + Sync {
    /// BLOCKED rows created at or before `cutoff`, ordered by id.
    ///
    /// A snapshot read; no rows are locked.
    fn due_transfers(&self, ctx: &OpContext, cutoff: DateTime<Utc>)
        -> Result<Vec<PendingTransfer>>;

    fn transaction_by_id(&self, ctx: &OpContext, id: i64) -> Result<Option<Transaction>>;

    /// Rows where the account is sender or receiver, newest first
    fn account_history(
        &self,
        ctx: &OpContext,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<AccountHistory>;

    fn ledger_summary(&self, ctx: &OpContext) -> Result<LedgerSummary>;
}

/// ATM reserves and cash audit log.
///
/// Each call is a single independent statement.
pub trait AtmStore: Send + Sync {
    /// Create an ATM with its owner row and linked account
    fn register_atm(&self, ctx: &OpContext, login: &str, password_hash: &str) -> Result<AtmData>;

    fn atm_by_login(&self, ctx: &OpContext, login: &str) -> Result<Option<AtmData>>;

    fn update_atm_cash(&self, ctx: &OpContext, amount_cents: i64, atm_id: i64) -> Result<()>;

    fn update_atm_account(&self, ctx: &OpContext, amount_cents: i64, account_id: i64)
        -> Result<()>;

    fn log_cash_operation(
        &self,
        ctx: &OpContext,
        atm_account_id: i64,
        amount_cents: i64,
        user_account_id: Option<i64>,
    ) -> Result<()>;
}

/// Opens atomic units
pub trait UnitOfWork: Send + Sync {
    fn begin<'a>(&'a self, ctx: &'a OpContext) -> Result<Box<dyn AtomicUnit + 'a>>;
}

/// A group of writes applied entirely or not at all.
///
/// Statements run strictly one after another. Dropping a unit without
/// calling [`commit`](AtomicUnit::commit) rolls it back.
pub trait AtomicUnit {
    /// Append a BLOCKED ledger row stamped `created_at`
    fn insert_transaction(&mut self, transfer: &NewTransfer, created_at: DateTime<Utc>)
        -> Result<i64>;

    /// Whether an account row with this id exists, as seen by this unit
    fn account_exists(&mut self, account_id: i64) -> Result<bool>;

    /// `balance = balance + delta` on the store side. `NotFound` if no account matched.
    fn adjust_balance(&mut self, account_id: i64, delta_cents: i64) -> Result<()>;

    /// Flip a BLOCKED row to CONFIRMED.
    ///
    /// Returns `false` when the row was not BLOCKED (already confirmed or
    /// missing); nothing is written in that case.
    fn confirm_transaction(&mut self, transaction_id: i64) -> Result<bool>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}

/// Everything the services need from storage
pub trait Store: AccountStore + TransactionLedger + AtmStore + UnitOfWork {}

impl<T> Store for T where T: AccountStore + TransactionLedger + AtmStore + UnitOfWork {}
