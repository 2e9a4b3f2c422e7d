//! DuckDB store implementation

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::{Connection, Row};
use tracing::{debug, warn};

use super::params::{bind, NamedParams};
use crate::context::OpContext;
use crate::domain::result::{is_transient_message, Error, Result};
use crate::domain::{
    Account, AccountHistory, AccountStatus, AtmData, LedgerSummary, NewTransfer,
    PendingTransfer, Transaction, TransactionStatus,
};
use crate::ports::{AccountStore, AtmStore, AtomicUnit, TransactionLedger, UnitOfWork};
use crate::services::{MigrationResult, MigrationService};

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// How often a caller waiting for the connection re-checks its context
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(1);

// === Statements ===

const SELECT_USER_ACCOUNTS: &str = r#"
    SELECT accounts.id, accounts."ownerId", "accountOwners"."userId", accounts."balanceCents", accounts.status
    FROM accounts
    JOIN "accountOwners" ON accounts."ownerId" = "accountOwners".id
    WHERE "accountOwners"."userId" = @userId
    ORDER BY accounts.id"#;

const SELECT_OWNER_BY_USER: &str = r#"SELECT id FROM "accountOwners" WHERE "userId" = @userId"#;

const INSERT_OWNER: &str = r#"INSERT INTO "accountOwners" ("userId") VALUES (@userId) RETURNING id"#;

const INSERT_ACCOUNT: &str = r#"INSERT INTO accounts ("ownerId") VALUES (@ownerId) RETURNING id"#;

const BLOCK_ACCOUNT: &str = r#"UPDATE accounts SET status = 'BLOCKED' WHERE id = @accountId"#;

const SELECT_ACCOUNT_BY_ID: &str = r#"
    SELECT accounts.id, accounts."ownerId", "accountOwners"."userId", accounts."balanceCents", accounts.status
    FROM accounts
    LEFT JOIN "accountOwners" ON accounts."ownerId" = "accountOwners".id
    WHERE accounts.id = @accountId"#;

const INSERT_TRANSACTION: &str = r#"
    INSERT INTO transactions ("senderId", "receiverId", "amountCents", description, status, "createdAt")
    VALUES (@senderId, @receiverId, @amountCents, @description, 'BLOCKED', CAST(@createdAt AS TIMESTAMP))
    RETURNING id"#;

const ADJUST_BALANCE: &str =
    r#"UPDATE accounts SET "balanceCents" = "balanceCents" + @deltaCents WHERE id = @accountId"#;

const ACCOUNT_EXISTS: &str = r#"SELECT COUNT(*) FROM accounts WHERE id = @accountId"#;

const CONFIRM_TRANSACTION: &str =
    r#"UPDATE transactions SET status = 'CONFIRMED' WHERE id = @transactionId AND status = 'BLOCKED'"#;

const SELECT_DUE_TRANSFERS: &str = r#"
    SELECT id, "senderId", "receiverId", "amountCents"
    FROM transactions
    WHERE status = 'BLOCKED' AND "createdAt" <= CAST(@cutoff AS TIMESTAMP)
    ORDER BY id"#;

const TRANSACTION_COLUMNS: &str = r#"id, "senderId", "receiverId", "amountCents", description, status, "createdAt"::VARCHAR"#;

const SELECT_ACCOUNT_HISTORY_TOTAL: &str = r#"
    SELECT COUNT(*) FROM transactions
    WHERE "senderId" = @accountId OR "receiverId" = @accountId"#;

const SELECT_LEDGER_COUNTS: &str = r#"
    SELECT COUNT(*),
           COUNT(*) FILTER (WHERE status = 'BLOCKED'),
           COUNT(*) FILTER (WHERE status = 'CONFIRMED'),
           CAST(COALESCE(SUM("amountCents") FILTER (WHERE status = 'BLOCKED'), 0) AS BIGINT)
    FROM transactions"#;

const SELECT_BALANCE_TOTALS: &str =
    r#"SELECT COUNT(*), CAST(COALESCE(SUM("balanceCents"), 0) AS BIGINT) FROM accounts"#;

const INSERT_ATM: &str =
    r#"INSERT INTO atms (login, password) VALUES (@login, @password) RETURNING id, "cashCents""#;

const INSERT_ATM_OWNER: &str = r#"INSERT INTO "accountOwners" ("atmId") VALUES (@atmId) RETURNING id"#;

const SELECT_ATM_BY_LOGIN: &str = r#"
    SELECT atms.id, atms.password, atms."cashCents", accounts.id
    FROM atms
    JOIN "accountOwners" ON atms.id = "accountOwners"."atmId"
    JOIN accounts ON "accountOwners".id = accounts."ownerId"
    WHERE atms.login = @login
    ORDER BY accounts.id
    LIMIT 1"#;

const UPDATE_ATM_CASH: &str =
    r#"UPDATE atms SET "cashCents" = "cashCents" + @amountCents WHERE id = @atmId"#;

const INSERT_CASH_OPERATION: &str = r#"
    INSERT INTO "cashOperations" ("atmAccountId", "amountCents") VALUES (@atmId, @amountCents)"#;

const INSERT_USER_CASH_OPERATION: &str = r#"
    INSERT INTO "cashOperations" ("atmAccountId", "userAccountId", "amountCents")
    VALUES (@atmId, @userAccountId, @amountCents)"#;

/// DuckDB-backed store.
///
/// A single connection sits behind a mutex. An atomic unit holds the guard
/// for its whole lifetime, which keeps its statements sequential and makes
/// units mutually exclusive.
pub struct DuckDbStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl DuckDbStore {
    /// Open (or create) a database file.
    ///
    /// Retries with exponential backoff on file locking errors, which occur
    /// when another process holds the file briefly.
    pub fn open(db_path: &Path) -> Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(Some(db_path)) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: Some(db_path.to_path_buf()),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_transient_message(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        warn!(
                            delay_ms = delay.as_millis() as u64,
                            attempt = attempt + 1,
                            max_attempts = MAX_RETRIES,
                            error = %err_msg,
                            "database busy, retrying"
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(Error::query(e));
                }
            }
        }

        Err(last_error.map(Error::query).unwrap_or_else(|| {
            Error::query(format!("failed to open database after {} retries", MAX_RETRIES))
        }))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Self::try_open_connection(None).map_err(Error::query)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    fn try_open_connection(db_path: Option<&Path>) -> duckdb::Result<Connection> {
        // Extension autoloading stays off; nothing here needs an extension
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        match db_path {
            Some(path) => Connection::open_with_flags(path, config),
            None => Connection::open_in_memory_with_flags(config),
        }
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Run database migrations using the MigrationService
    pub fn run_migrations(&self) -> Result<MigrationResult> {
        let conn = self.acquire(&OpContext::background())?;
        MigrationService::new(&conn).run_pending()
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> Result<()> {
        let result = self.run_migrations()?;
        if !result.applied.is_empty() {
            debug!(applied = ?result.applied, "schema migrations applied");
        }
        Ok(())
    }

    /// Wait for the connection, giving up when the context ends
    fn acquire(&self, ctx: &OpContext) -> Result<MutexGuard<'_, Connection>> {
        loop {
            ctx.check()?;
            match self.conn.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::WouldBlock) => thread::sleep(LOCK_POLL_INTERVAL),
                // A panicking holder's unit rolled back in Drop, so the
                // connection itself is still consistent
                Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
            }
        }
    }

    fn begin_unit<'a>(&'a self, ctx: &'a OpContext) -> Result<DuckDbUnit<'a>> {
        let conn = self.acquire(ctx)?;
        conn.execute_batch("BEGIN TRANSACTION")
            .map_err(Error::query)?;
        Ok(DuckDbUnit {
            conn,
            ctx,
            finished: false,
        })
    }
}

// === Row helpers ===

fn execute(conn: &Connection, sql: &str, params: &NamedParams) -> Result<usize> {
    let bound = bind(sql, params)?;
    let values = bound.params();
    conn.execute(&bound.sql, values.as_slice())
        .map_err(Error::query)
}

fn query_rows<T, F>(conn: &Connection, sql: &str, params: &NamedParams, map: F) -> Result<Vec<T>>
where
    F: FnMut(&Row<'_>) -> duckdb::Result<T>,
{
    let bound = bind(sql, params)?;
    let values = bound.params();
    let mut stmt = conn.prepare(&bound.sql).map_err(Error::query)?;
    let rows = stmt
        .query_map(values.as_slice(), map)
        .map_err(Error::query)?;
    let collected = rows.collect::<duckdb::Result<Vec<T>>>().map_err(Error::scan);
    collected
}

fn query_opt<T, F>(conn: &Connection, sql: &str, params: &NamedParams, map: F) -> Result<Option<T>>
where
    F: FnMut(&Row<'_>) -> duckdb::Result<T>,
{
    Ok(query_rows(conn, sql, params, map)?.into_iter().next())
}

fn query_one<T, F>(conn: &Connection, sql: &str, params: &NamedParams, map: F) -> Result<T>
where
    F: FnMut(&Row<'_>) -> duckdb::Result<T>,
{
    query_opt(conn, sql, params, map)?
        .ok_or_else(|| Error::scan("statement returned no row"))
}

type AccountRow = (i64, Option<i64>, Option<i64>, i64, String);

fn read_account_row(row: &Row<'_>) -> duckdb::Result<AccountRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn account_from_row((id, owner_id, user_id, balance_cents, status): AccountRow) -> Result<Account> {
    let status = AccountStatus::from_db(&status)
        .ok_or_else(|| Error::scan(format!("unknown account status {:?}", status)))?;
    Ok(Account {
        id,
        owner_id,
        user_id,
        balance_cents,
        status,
    })
}

type TransactionRow = (i64, i64, i64, i64, String, String, String);

fn read_transaction_row(row: &Row<'_>) -> duckdb::Result<TransactionRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn transaction_from_row(
    (id, sender_id, receiver_id, amount_cents, description, status, created_at): TransactionRow,
) -> Result<Transaction> {
    let status = TransactionStatus::from_db(&status)
        .ok_or_else(|| Error::scan(format!("unknown transaction status {:?}", status)))?;
    Ok(Transaction {
        id,
        sender_id,
        receiver_id,
        amount_cents,
        description,
        status,
        created_at: parse_timestamp(&created_at)?,
    })
}

/// Parse a TIMESTAMP rendered by `::VARCHAR`. Stored values are UTC.
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::scan(format!("invalid timestamp {:?}: {}", s, e)))
}

// === Store traits ===

impl AccountStore for DuckDbStore {
    fn accounts_for_user(&self, ctx: &OpContext, user_id: i64) -> Result<Vec<Account>> {
        let conn = self.acquire(ctx)?;
        let params = NamedParams::new().with("userId", user_id);
        query_rows(&conn, SELECT_USER_ACCOUNTS, &params, read_account_row)?
            .into_iter()
            .map(account_from_row)
            .collect()
    }

    fn find_owner_by_user(&self, ctx: &OpContext, user_id: i64) -> Result<Option<i64>> {
        let conn = self.acquire(ctx)?;
        let params = NamedParams::new().with("userId", user_id);
        query_opt(&conn, SELECT_OWNER_BY_USER, &params, |row| row.get(0))
    }

    fn create_owner(&self, ctx: &OpContext, user_id: i64) -> Result<i64> {
        let conn = self.acquire(ctx)?;
        let params = NamedParams::new().with("userId", user_id);
        query_one(&conn, INSERT_OWNER, &params, |row| row.get(0))
    }

    fn insert_account(&self, ctx: &OpContext, owner_id: i64) -> Result<i64> {
        let conn = self.acquire(ctx)?;
        let params = NamedParams::new().with("ownerId", owner_id);
        query_one(&conn, INSERT_ACCOUNT, &params, |row| row.get(0))
    }

    fn block_account(&self, ctx: &OpContext, account_id: i64) -> Result<()> {
        let conn = self.acquire(ctx)?;
        let params = NamedParams::new().with("accountId", account_id);
        execute(&conn, BLOCK_ACCOUNT, &params)?;
        Ok(())
    }

    fn account_by_id(&self, ctx: &OpContext, account_id: i64) -> Result<Option<Account>> {
        let conn = self.acquire(ctx)?;
        let params = NamedParams::new().with("accountId", account_id);
        query_opt(&conn, SELECT_ACCOUNT_BY_ID, &params, read_account_row)?
            .map(account_from_row)
            .transpose()
    }
}

impl TransactionLedger for DuckDbStore {
    fn due_transfers(
        &self,
        ctx: &OpContext,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PendingTransfer>> {
        let conn = self.acquire(ctx)?;
        let params = NamedParams::new().with("cutoff", cutoff);
        query_rows(&conn, SELECT_DUE_TRANSFERS, &params, |row| {
            Ok(PendingTransfer {
                id: row.get(0)?,
                sender_id: row.get(1)?,
                receiver_id: row.get(2)?,
                amount_cents: row.get(3)?,
            })
        })
    }

    fn transaction_by_id(&self, ctx: &OpContext, id: i64) -> Result<Option<Transaction>> {
        let conn = self.acquire(ctx)?;
        let sql = format!("SELECT {} FROM transactions WHERE id = @id", TRANSACTION_COLUMNS);
        let params = NamedParams::new().with("id", id);
        query_opt(&conn, &sql, &params, read_transaction_row)?
            .map(transaction_from_row)
            .transpose()
    }

    fn account_history(
        &self,
        ctx: &OpContext,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<AccountHistory> {
        let conn = self.acquire(ctx)?;
        let sql = format!(
            r#"SELECT {} FROM transactions
               WHERE "senderId" = @accountId OR "receiverId" = @accountId
               ORDER BY "createdAt" DESC, id DESC
               LIMIT @limit OFFSET @offset"#,
            TRANSACTION_COLUMNS
        );
        let params = NamedParams::new()
            .with("accountId", account_id)
            .with("limit", limit)
            .with("offset", offset);

        let transactions = query_rows(&conn, &sql, &params, read_transaction_row)?
            .into_iter()
            .map(transaction_from_row)
            .collect::<Result<Vec<_>>>()?;
        let total: i64 = query_one(&conn, SELECT_ACCOUNT_HISTORY_TOTAL, &params, |row| row.get(0))?;

        Ok(AccountHistory {
            transactions,
            total,
        })
    }

    fn ledger_summary(&self, ctx: &OpContext) -> Result<LedgerSummary> {
        let conn = self.acquire(ctx)?;
        let none = NamedParams::new();
        let (transactions, blocked, confirmed, in_flight_cents): (i64, i64, i64, i64) =
            query_one(&conn, SELECT_LEDGER_COUNTS, &none, |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;
        let (accounts, total_balance_cents): (i64, i64) =
            query_one(&conn, SELECT_BALANCE_TOTALS, &none, |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;

        Ok(LedgerSummary {
            accounts,
            transactions,
            blocked,
            confirmed,
            in_flight_cents,
            total_balance_cents,
        })
    }
}

impl AtmStore for DuckDbStore {
    fn register_atm(&self, ctx: &OpContext, login: &str, password_hash: &str) -> Result<AtmData> {
        let mut unit = self.begin_unit(ctx)?;
        let (atm_id, cash_cents): (i64, i64) = unit.query_one(
            INSERT_ATM,
            &NamedParams::new()
                .with("login", login)
                .with("password", password_hash),
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let owner_id: i64 = unit.query_one(
            INSERT_ATM_OWNER,
            &NamedParams::new().with("atmId", atm_id),
            |row| row.get(0),
        )?;
        let account_id: i64 = unit.query_one(
            INSERT_ACCOUNT,
            &NamedParams::new().with("ownerId", owner_id),
            |row| row.get(0),
        )?;
        Box::new(unit).commit()?;

        Ok(AtmData {
            id: atm_id,
            password_hash: password_hash.to_string(),
            cash_cents,
            account_id,
        })
    }

    fn atm_by_login(&self, ctx: &OpContext, login: &str) -> Result<Option<AtmData>> {
        let conn = self.acquire(ctx)?;
        let params = NamedParams::new().with("login", login);
        query_opt(&conn, SELECT_ATM_BY_LOGIN, &params, |row| {
            Ok(AtmData {
                id: row.get(0)?,
                password_hash: row.get(1)?,
                cash_cents: row.get(2)?,
                account_id: row.get(3)?,
            })
        })
    }

    fn update_atm_cash(&self, ctx: &OpContext, amount_cents: i64, atm_id: i64) -> Result<()> {
        let conn = self.acquire(ctx)?;
        let params = NamedParams::new()
            .with("amountCents", amount_cents)
            .with("atmId", atm_id);
        if execute(&conn, UPDATE_ATM_CASH, &params)? == 0 {
            return Err(Error::not_found(format!("atm {}", atm_id)));
        }
        Ok(())
    }

    fn update_atm_account(
        &self,
        ctx: &OpContext,
        amount_cents: i64,
        account_id: i64,
    ) -> Result<()> {
        let conn = self.acquire(ctx)?;
        let params = NamedParams::new()
            .with("deltaCents", amount_cents)
            .with("accountId", account_id);
        if execute(&conn, ADJUST_BALANCE, &params)? == 0 {
            return Err(Error::not_found(format!("account {}", account_id)));
        }
        Ok(())
    }

    fn log_cash_operation(
        &self,
        ctx: &OpContext,
        atm_account_id: i64,
        amount_cents: i64,
        user_account_id: Option<i64>,
    ) -> Result<()> {
        let conn = self.acquire(ctx)?;
        let params = NamedParams::new()
            .with("atmId", atm_account_id)
            .with("amountCents", amount_cents);
        match user_account_id {
            None => execute(&conn, INSERT_CASH_OPERATION, &params)?,
            Some(user_account_id) => execute(
                &conn,
                INSERT_USER_CASH_OPERATION,
                &params.with("userAccountId", user_account_id),
            )?,
        };
        Ok(())
    }
}

impl UnitOfWork for DuckDbStore {
    fn begin<'a>(&'a self, ctx: &'a OpContext) -> Result<Box<dyn AtomicUnit + 'a>> {
        Ok(Box::new(self.begin_unit(ctx)?))
    }
}

/// An open DuckDB transaction on the guarded connection
pub struct DuckDbUnit<'a> {
    conn: MutexGuard<'a, Connection>,
    ctx: &'a OpContext,
    finished: bool,
}

impl DuckDbUnit<'_> {
    fn execute(&mut self, sql: &str, params: &NamedParams) -> Result<usize> {
        self.ctx.check()?;
        execute(&self.conn, sql, params)
    }

    fn query_one<T, F>(&mut self, sql: &str, params: &NamedParams, map: F) -> Result<T>
    where
        F: FnMut(&Row<'_>) -> duckdb::Result<T>,
    {
        self.ctx.check()?;
        query_one(&self.conn, sql, params, map)
    }
}

impl AtomicUnit for DuckDbUnit<'_> {
    fn insert_transaction(
        &mut self,
        transfer: &NewTransfer,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        let params = NamedParams::new()
            .with("senderId", transfer.sender_id)
            .with("receiverId", transfer.receiver_id)
            .with("amountCents", transfer.amount_cents)
            .with("description", transfer.description.as_str())
            .with("createdAt", created_at);
        self.query_one(INSERT_TRANSACTION, &params, |row| row.get(0))
    }

    fn account_exists(&mut self, account_id: i64) -> Result<bool> {
        let params = NamedParams::new().with("accountId", account_id);
        let count: i64 = self.query_one(ACCOUNT_EXISTS, &params, |row| row.get(0))?;
        Ok(count > 0)
    }

    fn adjust_balance(&mut self, account_id: i64, delta_cents: i64) -> Result<()> {
        let params = NamedParams::new()
            .with("deltaCents", delta_cents)
            .with("accountId", account_id);
        if self.execute(ADJUST_BALANCE, &params)? == 0 {
            return Err(Error::not_found(format!("account {}", account_id)));
        }
        Ok(())
    }

    fn confirm_transaction(&mut self, transaction_id: i64) -> Result<bool> {
        let params = NamedParams::new().with("transactionId", transaction_id);
        Ok(self.execute(CONFIRM_TRANSACTION, &params)? > 0)
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.ctx.check()?;
        self.conn
            .execute_batch("COMMIT")
            .map_err(Error::query)?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finished = true;
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(Error::query)
    }
}

impl Drop for DuckDbUnit<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // A failed COMMIT has already ended the transaction, so a second
        // ROLLBACK error here is expected and only worth a debug line
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            debug!(error = %e, "rollback after unfinished unit");
        }
    }
}
