//! Account service - opening, blocking and looking up accounts

use std::sync::Arc;

use tracing::{debug, info};

use crate::context::OpContext;
use crate::domain::result::{Error, Result};
use crate::domain::{Account, AccountStatus};
use crate::ports::Store;

pub struct AccountService {
    store: Arc<dyn Store>,
}

impl AccountService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// All accounts of a user, oldest first
    pub fn accounts_for_user(&self, ctx: &OpContext, user_id: i64) -> Result<Vec<Account>> {
        self.store.accounts_for_user(ctx, user_id)
    }

    /// Open a new account for a user, creating the owner row on first use
    pub fn open_account(&self, ctx: &OpContext, user_id: i64) -> Result<Account> {
        if user_id <= 0 {
            return Err(Error::validation("user id must be positive"));
        }

        let owner_id = self.owner_for_user(ctx, user_id)?;
        let account_id = self.store.insert_account(ctx, owner_id)?;
        info!(user_id, account_id, "account opened");

        Ok(Account {
            id: account_id,
            owner_id: Some(owner_id),
            user_id: Some(user_id),
            balance_cents: 0,
            status: AccountStatus::Active,
        })
    }

    fn owner_for_user(&self, ctx: &OpContext, user_id: i64) -> Result<i64> {
        if let Some(owner_id) = self.store.find_owner_by_user(ctx, user_id)? {
            return Ok(owner_id);
        }

        debug!(user_id, "no account owner yet, creating one");
        match self.store.create_owner(ctx, user_id) {
            Ok(owner_id) => Ok(owner_id),
            // Lost a race with a concurrent first open for the same user
            Err(create_err) => self
                .store
                .find_owner_by_user(ctx, user_id)?
                .ok_or(create_err),
        }
    }

    /// Block an account. Irreversible, and a no-op when already blocked.
    pub fn block_account(&self, ctx: &OpContext, account_id: i64) -> Result<()> {
        self.store.block_account(ctx, account_id)?;
        info!(account_id, "account blocked");
        Ok(())
    }

    /// Account with its owning user resolved
    pub fn account_by_id(&self, ctx: &OpContext, account_id: i64) -> Result<Account> {
        self.store
            .account_by_id(ctx, account_id)?
            .ok_or_else(|| Error::not_found(format!("account {}", account_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryStore;

    fn service() -> AccountService {
        AccountService::new(Arc::new(InMemoryStore::new()))
    }

    #[test]
    fn test_first_open_creates_owner_once() {
        let accounts = service();
        let ctx = OpContext::background();

        let first = accounts.open_account(&ctx, 11).unwrap();
        let second = accounts.open_account(&ctx, 11).unwrap();

        assert_eq!(first.owner_id, second.owner_id);
        assert_ne!(first.id, second.id);

        let listed = accounts.accounts_for_user(&ctx, 11).unwrap();
        assert_eq!(
            listed.iter().map(|a| a.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );
    }

    #[test]
    fn test_block_twice_is_not_an_error() {
        let accounts = service();
        let ctx = OpContext::background();
        let account = accounts.open_account(&ctx, 5).unwrap();

        accounts.block_account(&ctx, account.id).unwrap();
        accounts.block_account(&ctx, account.id).unwrap();

        assert!(accounts.account_by_id(&ctx, account.id).unwrap().is_blocked());
    }

    #[test]
    fn test_missing_account_is_not_found() {
        let accounts = service();
        let err = accounts
            .account_by_id(&OpContext::background(), 404)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_rejects_non_positive_user() {
        let accounts = service();
        assert!(matches!(
            accounts.open_account(&OpContext::background(), 0),
            Err(Error::Validation(_))
        ));
    }
}
