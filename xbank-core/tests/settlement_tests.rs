//! Transfer and settlement tests against a real DuckDB file
//!
//! Run with: cargo test --test settlement_tests -- --nocapture

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use xbank_core::adapters::duckdb::DuckDbStore;
use xbank_core::config::Config;
use xbank_core::ports::{AccountStore, ManualClock, TransactionLedger};
use xbank_core::{AccountStatus, BankContext, Error, OpContext, TransactionStatus};

const HOLD: Duration = Duration::from_secs(300);

// ============================================================================
// Test Helpers
// ============================================================================

struct Bank {
    _dir: TempDir,
    clock: Arc<ManualClock>,
    ctx: BankContext,
}

/// A bank over a fresh DuckDB file with a manual clock
fn create_test_bank() -> Bank {
    let dir = TempDir::new().unwrap();
    let store = DuckDbStore::open(&dir.path().join("test.duckdb")).expect("Failed to open store");
    store.ensure_schema().expect("Failed to initialize schema");

    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap(),
    ));
    let ctx = BankContext::with_store(Config::default(), Arc::new(store), clock.clone());
    Bank {
        _dir: dir,
        clock,
        ctx,
    }
}

/// Open an account and fund it through an ATM deposit
fn funded_account(bank: &Bank, user_id: i64, cents: i64) -> i64 {
    let op = OpContext::background();
    let account = bank.ctx.accounts.open_account(&op, user_id).unwrap();
    if cents > 0 {
        let login = format!("seed-{}", account.id);
        bank.ctx.atm.register_atm(&op, &login, "pw").unwrap();
        bank.ctx
            .atm
            .record_deposit(&op, &login, Some(account.id), cents)
            .unwrap();
    }
    account.id
}

fn balance(bank: &Bank, account_id: i64) -> i64 {
    bank.ctx
        .accounts
        .account_by_id(&OpContext::background(), account_id)
        .unwrap()
        .balance_cents
}

// ============================================================================
// Scenario
// ============================================================================

#[test]
fn test_transfer_settles_after_holding_period() {
    let bank = create_test_bank();
    let op = OpContext::background();
    let sender = funded_account(&bank, 1, 10_000);
    let receiver = funded_account(&bank, 2, 500);

    let id = bank
        .ctx
        .transfers
        .create_transfer(&op, sender, receiver, 2500, "invoice 17")
        .unwrap();

    assert_eq!(balance(&bank, sender), 7500);
    assert_eq!(balance(&bank, receiver), 500);
    let row = bank.ctx.store.transaction_by_id(&op, id).unwrap().unwrap();
    assert_eq!(row.status, TransactionStatus::Blocked);
    assert_eq!(row.amount_cents, 2500);
    assert_eq!(row.description, "invoice 17");

    // Not yet due
    bank.clock.advance(chrono::Duration::seconds(299));
    bank.ctx.settlement.confirm_due_transfers(&op, HOLD).unwrap();
    assert_eq!(balance(&bank, receiver), 500);

    bank.clock.advance(chrono::Duration::seconds(1));
    bank.ctx.settlement.confirm_due_transfers(&op, HOLD).unwrap();

    let row = bank.ctx.store.transaction_by_id(&op, id).unwrap().unwrap();
    assert_eq!(row.status, TransactionStatus::Confirmed);
    assert_eq!(balance(&bank, receiver), 3000);
    assert_eq!(balance(&bank, sender), 7500);
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_second_pass_does_not_credit_again() {
    let bank = create_test_bank();
    let op = OpContext::background();
    let sender = funded_account(&bank, 1, 5_000);
    let receiver = funded_account(&bank, 2, 0);

    for amount in [100, 250, 650] {
        bank.ctx
            .transfers
            .create_transfer(&op, sender, receiver, amount, "")
            .unwrap();
    }
    bank.clock.advance(chrono::Duration::minutes(10));

    let first = bank.ctx.settlement.sweep(&op, HOLD).unwrap();
    let second = bank.ctx.settlement.sweep(&op, HOLD).unwrap();

    assert_eq!(first.confirmed.len(), 3);
    assert_eq!(second.due, 0);
    assert_eq!(balance(&bank, receiver), 1_000);
}

#[test]
fn test_debit_failure_leaves_no_ledger_row() {
    let bank = create_test_bank();
    let op = OpContext::background();
    let receiver = funded_account(&bank, 2, 0);

    let err = bank
        .ctx
        .transfers
        .create_transfer(&op, 9_999, receiver, 100, "")
        .unwrap_err();

    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(bank.ctx.store.ledger_summary(&op).unwrap().transactions, 0);
}

#[test]
fn test_unknown_receiver_leaves_no_row_and_no_debit() {
    let bank = create_test_bank();
    let op = OpContext::background();
    let sender = funded_account(&bank, 1, 1_000);

    let err = bank
        .ctx
        .transfers
        .create_transfer(&op, sender, 424_242, 100, "")
        .unwrap_err();

    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(balance(&bank, sender), 1_000);
    let summary = bank.ctx.store.ledger_summary(&op).unwrap();
    assert_eq!(summary.transactions, 0);
    assert_eq!(summary.in_flight_cents, 0);

    // Nothing is stranded for later passes
    bank.clock.advance(chrono::Duration::minutes(10));
    bank.ctx.settlement.confirm_due_transfers(&op, HOLD).unwrap();
}

#[test]
fn test_block_twice() {
    let bank = create_test_bank();
    let op = OpContext::background();
    let account = funded_account(&bank, 3, 0);

    bank.ctx.accounts.block_account(&op, account).unwrap();
    bank.ctx.accounts.block_account(&op, account).unwrap();

    let stored = bank.ctx.accounts.account_by_id(&op, account).unwrap();
    assert_eq!(stored.status, AccountStatus::Blocked);
    assert_eq!(stored.user_id, Some(3));
}

#[test]
fn test_empty_sweep_succeeds_without_writes() {
    let bank = create_test_bank();
    let op = OpContext::background();
    let sender = funded_account(&bank, 1, 1_000);
    let receiver = funded_account(&bank, 2, 0);
    bank.ctx
        .transfers
        .create_transfer(&op, sender, receiver, 10, "")
        .unwrap();
    let before = bank.ctx.store.ledger_summary(&op).unwrap();

    let report = bank.ctx.settlement.sweep(&op, HOLD).unwrap();

    assert_eq!(report.due, 0);
    assert_eq!(bank.ctx.store.ledger_summary(&op).unwrap(), before);
}

#[test]
fn test_owner_created_once_per_user() {
    let bank = create_test_bank();
    let op = OpContext::background();

    let a = bank.ctx.accounts.open_account(&op, 77).unwrap();
    let b = bank.ctx.accounts.open_account(&op, 77).unwrap();

    assert_eq!(a.owner_id, b.owner_id);
    let ids: Vec<i64> = bank
        .ctx
        .accounts
        .accounts_for_user(&op, 77)
        .unwrap()
        .iter()
        .map(|acc| acc.id)
        .collect();
    assert_eq!(ids, vec![a.id, b.id]);
}

#[test]
fn test_history_is_newest_first_and_paged() {
    let bank = create_test_bank();
    let op = OpContext::background();
    let sender = funded_account(&bank, 1, 1_000);
    let receiver = funded_account(&bank, 2, 0);

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(
            bank.ctx
                .transfers
                .create_transfer(&op, sender, receiver, 10, "")
                .unwrap(),
        );
        bank.clock.advance(chrono::Duration::seconds(1));
    }

    let page = bank.ctx.store.account_history(&op, receiver, 2, 0).unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(
        page.transactions.iter().map(|t| t.id).collect::<Vec<_>>(),
        vec![ids[2], ids[1]]
    );

    let rest = bank.ctx.store.account_history(&op, receiver, 2, 2).unwrap();
    assert_eq!(rest.transactions.len(), 1);
    assert_eq!(rest.transactions[0].id, ids[0]);
}

#[test]
fn test_cancelled_transfer_commits_nothing() {
    let bank = create_test_bank();
    let sender = funded_account(&bank, 1, 1_000);
    let receiver = funded_account(&bank, 2, 0);

    let op = OpContext::background();
    op.cancel();
    let err = bank
        .ctx
        .transfers
        .create_transfer(&op, sender, receiver, 10, "")
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(balance(&bank, sender), 1_000);
}

#[test]
fn test_schema_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("reopen.duckdb");
    let op = OpContext::background();

    let account_id = {
        let store = DuckDbStore::open(&path).unwrap();
        store.ensure_schema().unwrap();
        let owner = store.create_owner(&op, 5).unwrap();
        store.insert_account(&op, owner).unwrap()
    };

    let store = DuckDbStore::open(&path).unwrap();
    let result = store.run_migrations().unwrap();
    assert!(result.applied.is_empty());
    assert!(store.account_by_id(&op, account_id).unwrap().is_some());
}
