//! ATM service - cash reserves and the cash audit log
//!
//! The three collaborator writes are independent single statements. A
//! recorded deposit or withdrawal issues them in sequence and does not
//! roll back earlier steps when a later one fails.

use std::sync::Arc;

use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::Argon2;
use rand::RngCore;
use tracing::info;

use crate::context::OpContext;
use crate::domain::result::{Error, Result};
use crate::domain::AtmData;
use crate::ports::Store;

pub struct AtmService {
    store: Arc<dyn Store>,
}

impl AtmService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create an ATM and its linked account. The password is stored as an
    /// Argon2id PHC string.
    pub fn register_atm(&self, ctx: &OpContext, login: &str, password: &str) -> Result<AtmData> {
        if login.trim().is_empty() {
            return Err(Error::validation("atm login must not be empty"));
        }
        let password_hash = hash_password(password)?;
        let atm = self.store.register_atm(ctx, login, &password_hash)?;
        info!(atm_id = atm.id, account_id = atm.account_id, "atm registered");
        Ok(atm)
    }

    pub fn atm_by_login(&self, ctx: &OpContext, login: &str) -> Result<AtmData> {
        self.store
            .atm_by_login(ctx, login)?
            .ok_or_else(|| Error::not_found(format!("atm {:?}", login)))
    }

    /// Apply a signed delta to the machine's physical cash
    pub fn update_atm_cash(&self, ctx: &OpContext, amount_cents: i64, atm_id: i64) -> Result<()> {
        self.store.update_atm_cash(ctx, amount_cents, atm_id)
    }

    /// Apply a signed delta to an account balance outside any transfer
    pub fn update_atm_account(
        &self,
        ctx: &OpContext,
        amount_cents: i64,
        account_id: i64,
    ) -> Result<()> {
        self.store.update_atm_account(ctx, amount_cents, account_id)
    }

    pub fn log_cash_operation(
        &self,
        ctx: &OpContext,
        atm_account_id: i64,
        amount_cents: i64,
        user_account_id: Option<i64>,
    ) -> Result<()> {
        self.store
            .log_cash_operation(ctx, atm_account_id, amount_cents, user_account_id)
    }

    /// Cash taken in by the machine and credited to `user_account_id`, or
    /// to the ATM's own account when no user account is given
    pub fn record_deposit(
        &self,
        ctx: &OpContext,
        login: &str,
        user_account_id: Option<i64>,
        amount_cents: i64,
    ) -> Result<AtmData> {
        positive(amount_cents)?;
        let atm = self.atm_by_login(ctx, login)?;
        self.apply_cash(ctx, &atm, user_account_id, amount_cents)?;
        info!(atm_id = atm.id, amount_cents, "cash deposit recorded");
        self.atm_by_login(ctx, login)
    }

    /// Cash dispensed by the machine and debited from the account.
    ///
    /// Refused when the machine holds less cash than requested.
    pub fn record_withdrawal(
        &self,
        ctx: &OpContext,
        login: &str,
        user_account_id: Option<i64>,
        amount_cents: i64,
    ) -> Result<AtmData> {
        positive(amount_cents)?;
        let atm = self.atm_by_login(ctx, login)?;
        if atm.cash_cents < amount_cents {
            return Err(Error::validation(format!(
                "atm {} holds {} cents, cannot dispense {}",
                atm.id, atm.cash_cents, amount_cents
            )));
        }
        self.apply_cash(ctx, &atm, user_account_id, -amount_cents)?;
        info!(atm_id = atm.id, amount_cents, "cash withdrawal recorded");
        self.atm_by_login(ctx, login)
    }

    fn apply_cash(
        &self,
        ctx: &OpContext,
        atm: &AtmData,
        user_account_id: Option<i64>,
        delta_cents: i64,
    ) -> Result<()> {
        self.update_atm_cash(ctx, delta_cents, atm.id)?;
        self.update_atm_account(ctx, delta_cents, user_account_id.unwrap_or(atm.account_id))?;
        self.log_cash_operation(ctx, atm.account_id, delta_cents, user_account_id)
    }
}

fn positive(amount_cents: i64) -> Result<()> {
    if amount_cents <= 0 {
        return Err(Error::validation(format!(
            "cash amount must be positive, got {}",
            amount_cents
        )));
    }
    Ok(())
}

fn hash_password(password: &str) -> Result<String> {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = SaltString::encode_b64(&salt)
        .map_err(|e| Error::Other(format!("Failed to encode salt: {}", e)))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| Error::Other(format!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}
