//! In-memory store
//!
//! Mirrors the DuckDB store's semantics over plain maps. An atomic unit
//! works on a copy of the state and swaps it in on commit. Individual
//! write steps can be armed to fail, for exercising rollback paths.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::context::OpContext;
use crate::domain::result::{Error, Result};
use crate::domain::{
    Account, AccountHistory, AccountOwner, AccountStatus, AtmData, CashOperation, LedgerSummary,
    NewTransfer, PendingTransfer, Transaction, TransactionStatus,
};
use crate::ports::{AccountStore, AtmStore, AtomicUnit, TransactionLedger, UnitOfWork};

/// A write step that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertTransaction,
    AdjustBalance,
    ConfirmTransaction,
    Commit,
}

#[derive(Debug, Clone)]
struct StoredAccount {
    owner_id: Option<i64>,
    balance_cents: i64,
    status: AccountStatus,
}

#[derive(Debug, Clone)]
struct StoredAtm {
    login: String,
    password_hash: String,
    cash_cents: i64,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    owners: BTreeMap<i64, AccountOwner>,
    accounts: BTreeMap<i64, StoredAccount>,
    transactions: BTreeMap<i64, Transaction>,
    atms: BTreeMap<i64, StoredAtm>,
    cash_operations: Vec<CashOperation>,
    last_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn account(&self, id: i64) -> Option<Account> {
        self.accounts.get(&id).map(|stored| Account {
            id,
            owner_id: stored.owner_id,
            user_id: stored
                .owner_id
                .and_then(|owner| self.owners.get(&owner))
                .and_then(|owner| owner.user_id),
            balance_cents: stored.balance_cents,
            status: stored.status,
        })
    }

    fn insert_account(&mut self, owner_id: i64) -> i64 {
        let id = self.next_id();
        self.accounts.insert(
            id,
            StoredAccount {
                owner_id: Some(owner_id),
                balance_cents: 0,
                status: AccountStatus::Active,
            },
        );
        id
    }

    fn adjust_balance(&mut self, account_id: i64, delta_cents: i64) -> Result<()> {
        let account = self
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| Error::not_found(format!("account {}", account_id)))?;
        account.balance_cents = account
            .balance_cents
            .checked_add(delta_cents)
            .ok_or_else(|| Error::query("balance out of range"))?;
        Ok(())
    }
}

/// Store over in-process maps
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
    armed: Mutex<HashSet<FailPoint>>,
    units_begun: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next invocation of `point` fail with a query error
    pub fn fail_next(&self, point: FailPoint) {
        self.armed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(point);
    }

    /// Number of atomic units opened so far
    pub fn units_begun(&self) -> usize {
        self.units_begun.load(Ordering::SeqCst)
    }

    /// All cash audit rows, oldest first
    pub fn cash_operations(&self) -> Vec<CashOperation> {
        self.lock().cash_operations.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn trip(&self, point: FailPoint) -> Result<()> {
        let fired = self
            .armed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&point);
        if fired {
            return Err(Error::query(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }
}

impl AccountStore for InMemoryStore {
    fn accounts_for_user(&self, ctx: &OpContext, user_id: i64) -> Result<Vec<Account>> {
        ctx.check()?;
        let state = self.lock();
        Ok(state
            .accounts
            .keys()
            .filter_map(|id| state.account(*id))
            .filter(|account| account.user_id == Some(user_id))
            .collect())
    }

    fn find_owner_by_user(&self, ctx: &OpContext, user_id: i64) -> Result<Option<i64>> {
        ctx.check()?;
        Ok(self
            .lock()
            .owners
            .values()
            .find(|owner| owner.user_id == Some(user_id))
            .map(|owner| owner.id))
    }

    fn create_owner(&self, ctx: &OpContext, user_id: i64) -> Result<i64> {
        ctx.check()?;
        let mut state = self.lock();
        if state.owners.values().any(|o| o.user_id == Some(user_id)) {
            return Err(Error::query(format!(
                "Constraint Error: duplicate owner for user {}",
                user_id
            )));
        }
        let id = state.next_id();
        state.owners.insert(
            id,
            AccountOwner {
                id,
                user_id: Some(user_id),
                atm_id: None,
            },
        );
        Ok(id)
    }

    fn insert_account(&self, ctx: &OpContext, owner_id: i64) -> Result<i64> {
        ctx.check()?;
        Ok(self.lock().insert_account(owner_id))
    }

    fn block_account(&self, ctx: &OpContext, account_id: i64) -> Result<()> {
        ctx.check()?;
        if let Some(account) = self.lock().accounts.get_mut(&account_id) {
            account.status = AccountStatus::Blocked;
        }
        Ok(())
    }

    fn account_by_id(&self, ctx: &OpContext, account_id: i64) -> Result<Option<Account>> {
        ctx.check()?;
        Ok(self.lock().account(account_id))
    }
}

impl TransactionLedger for InMemoryStore {
    fn due_transfers(
        &self,
        ctx: &OpContext,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PendingTransfer>> {
        ctx.check()?;
        Ok(self
            .lock()
            .transactions
            .values()
            .filter(|tx| tx.is_due(cutoff))
            .map(Transaction::to_pending)
            .collect())
    }

    fn transaction_by_id(&self, ctx: &OpContext, id: i64) -> Result<Option<Transaction>> {
        ctx.check()?;
        Ok(self.lock().transactions.get(&id).cloned())
    }

    fn account_history(
        &self,
        ctx: &OpContext,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<AccountHistory> {
        ctx.check()?;
        let state = self.lock();
        let mut matching: Vec<&Transaction> = state
            .transactions
            .values()
            .filter(|tx| tx.sender_id == account_id || tx.receiver_id == account_id)
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(AccountHistory {
            total: matching.len() as i64,
            transactions: matching
                .into_iter()
                .skip(offset.max(0) as usize)
                .take(limit.max(0) as usize)
                .cloned()
                .collect(),
        })
    }

    fn ledger_summary(&self, ctx: &OpContext) -> Result<LedgerSummary> {
        ctx.check()?;
        let state = self.lock();
        let blocked: Vec<&Transaction> = state
            .transactions
            .values()
            .filter(|tx| tx.status == TransactionStatus::Blocked)
            .collect();

        Ok(LedgerSummary {
            accounts: state.accounts.len() as i64,
            transactions: state.transactions.len() as i64,
            blocked: blocked.len() as i64,
            confirmed: (state.transactions.len() - blocked.len()) as i64,
            in_flight_cents: blocked.iter().map(|tx| tx.amount_cents).sum(),
            total_balance_cents: state.accounts.values().map(|a| a.balance_cents).sum(),
        })
    }
}

impl AtmStore for InMemoryStore {
    fn register_atm(&self, ctx: &OpContext, login: &str, password_hash: &str) -> Result<AtmData> {
        ctx.check()?;
        let mut state = self.lock();
        if state.atms.values().any(|atm| atm.login == login) {
            return Err(Error::query(format!("Constraint Error: duplicate atm login {:?}", login)));
        }
        let atm_id = state.next_id();
        state.atms.insert(
            atm_id,
            StoredAtm {
                login: login.to_string(),
                password_hash: password_hash.to_string(),
                cash_cents: 0,
            },
        );
        let owner_id = state.next_id();
        state.owners.insert(
            owner_id,
            AccountOwner {
                id: owner_id,
                user_id: None,
                atm_id: Some(atm_id),
            },
        );
        let account_id = state.insert_account(owner_id);

        Ok(AtmData {
            id: atm_id,
            password_hash: password_hash.to_string(),
            cash_cents: 0,
            account_id,
        })
    }

    fn atm_by_login(&self, ctx: &OpContext, login: &str) -> Result<Option<AtmData>> {
        ctx.check()?;
        let state = self.lock();
        let Some((&atm_id, atm)) = state.atms.iter().find(|(_, atm)| atm.login == login) else {
            return Ok(None);
        };
        let account_id = state
            .owners
            .values()
            .filter(|owner| owner.atm_id == Some(atm_id))
            .flat_map(|owner| {
                state
                    .accounts
                    .iter()
                    .filter(move |(_, a)| a.owner_id == Some(owner.id))
                    .map(|(id, _)| *id)
            })
            .min();

        Ok(account_id.map(|account_id| AtmData {
            id: atm_id,
            password_hash: atm.password_hash.clone(),
            cash_cents: atm.cash_cents,
            account_id,
        }))
    }

    fn update_atm_cash(&self, ctx: &OpContext, amount_cents: i64, atm_id: i64) -> Result<()> {
        ctx.check()?;
        let mut state = self.lock();
        let atm = state
            .atms
            .get_mut(&atm_id)
            .ok_or_else(|| Error::not_found(format!("atm {}", atm_id)))?;
        atm.cash_cents = atm
            .cash_cents
            .checked_add(amount_cents)
            .ok_or_else(|| Error::query("atm cash out of range"))?;
        Ok(())
    }

    fn update_atm_account(
        &self,
        ctx: &OpContext,
        amount_cents: i64,
        account_id: i64,
    ) -> Result<()> {
        ctx.check()?;
        self.lock().adjust_balance(account_id, amount_cents)
    }

    fn log_cash_operation(
        &self,
        ctx: &OpContext,
        atm_account_id: i64,
        amount_cents: i64,
        user_account_id: Option<i64>,
    ) -> Result<()> {
        ctx.check()?;
        let mut state = self.lock();
        let id = state.next_id();
        state.cash_operations.push(CashOperation {
            id,
            atm_account_id,
            user_account_id,
            amount_cents,
            created_at: Utc::now(),
        });
        Ok(())
    }
}

impl UnitOfWork for InMemoryStore {
    fn begin<'a>(&'a self, ctx: &'a OpContext) -> Result<Box<dyn AtomicUnit + 'a>> {
        ctx.check()?;
        let guard = self.lock();
        let working = guard.clone();
        self.units_begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryUnit {
            store: self,
            ctx,
            guard,
            working,
        }))
    }
}

/// Copy-on-begin unit. Dropping it discards `working`.
struct MemoryUnit<'a> {
    store: &'a InMemoryStore,
    ctx: &'a OpContext,
    guard: MutexGuard<'a, MemoryState>,
    working: MemoryState,
}

impl MemoryUnit<'_> {
    fn step(&self, point: FailPoint) -> Result<()> {
        self.ctx.check()?;
        self.store.trip(point)
    }
}

impl AtomicUnit for MemoryUnit<'_> {
    fn insert_transaction(
        &mut self,
        transfer: &NewTransfer,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        self.step(FailPoint::InsertTransaction)?;
        let id = self.working.next_id();
        self.working.transactions.insert(
            id,
            Transaction {
                id,
                sender_id: transfer.sender_id,
                receiver_id: transfer.receiver_id,
                amount_cents: transfer.amount_cents,
                description: transfer.description.clone(),
                status: TransactionStatus::Blocked,
                created_at,
            },
        );
        Ok(id)
    }

    fn account_exists(&mut self, account_id: i64) -> Result<bool> {
        self.ctx.check()?;
        Ok(self.working.accounts.contains_key(&account_id))
    }

    fn adjust_balance(&mut self, account_id: i64, delta_cents: i64) -> Result<()> {
        self.step(FailPoint::AdjustBalance)?;
        self.working.adjust_balance(account_id, delta_cents)
    }

    fn confirm_transaction(&mut self, transaction_id: i64) -> Result<bool> {
        self.step(FailPoint::ConfirmTransaction)?;
        match self.working.transactions.get_mut(&transaction_id) {
            Some(tx) if tx.status == TransactionStatus::Blocked => {
                tx.status = TransactionStatus::Confirmed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.step(FailPoint::Commit)?;
        let MemoryUnit {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
