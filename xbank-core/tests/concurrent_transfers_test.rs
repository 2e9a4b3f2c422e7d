//! Concurrent transfer tests
//!
//! Many threads transfer between the same accounts while a sweeper runs.
//! Money must be conserved: balances plus in-flight amounts never change.
//!
//! Run with: cargo test --test concurrent_transfers_test -- --nocapture

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use xbank_core::adapters::duckdb::DuckDbStore;
use xbank_core::config::Config;
use xbank_core::ports::{Store, SystemClock, TransactionLedger};
use xbank_core::{BankContext, OpContext};

/// Number of concurrent transfer threads
const THREAD_COUNT: usize = 6;

/// Transfers issued by each thread
const ITERATIONS_PER_THREAD: usize = 10;

const ACCOUNT_COUNT: usize = 4;
const OPENING_BALANCE: i64 = 100_000;

fn open_bank(temp_dir: &TempDir) -> Arc<BankContext> {
    let store = DuckDbStore::open(&temp_dir.path().join("concurrent.duckdb")).unwrap();
    store.ensure_schema().unwrap();
    let store: Arc<dyn Store> = Arc::new(store);
    Arc::new(BankContext::with_store(
        Config::default(),
        store,
        Arc::new(SystemClock),
    ))
}

fn seed_accounts(bank: &BankContext) -> Vec<i64> {
    let op = OpContext::background();
    bank.atm.register_atm(&op, "seed", "pw").unwrap();
    (0..ACCOUNT_COUNT)
        .map(|i| {
            let account = bank.accounts.open_account(&op, i as i64 + 1).unwrap();
            bank.atm
                .record_deposit(&op, "seed", Some(account.id), OPENING_BALANCE)
                .unwrap();
            account.id
        })
        .collect()
}

#[test]
fn test_concurrent_transfers_conserve_money() {
    let temp_dir = TempDir::new().unwrap();
    let bank = open_bank(&temp_dir);
    let accounts = Arc::new(seed_accounts(&bank));
    let op = OpContext::background();
    let seed_total = bank.store.ledger_summary(&op).unwrap().total_balance_cents;

    let barrier = Arc::new(Barrier::new(THREAD_COUNT + 1));
    let success_count = Arc::new(AtomicUsize::new(0));
    let mut handles = vec![];

    for thread_id in 0..THREAD_COUNT {
        let bank = Arc::clone(&bank);
        let accounts = Arc::clone(&accounts);
        let barrier = Arc::clone(&barrier);
        let success_count = Arc::clone(&success_count);

        handles.push(thread::spawn(move || {
            barrier.wait();
            let op = OpContext::with_timeout(Duration::from_secs(30));
            for i in 0..ITERATIONS_PER_THREAD {
                let sender = accounts[(thread_id + i) % ACCOUNT_COUNT];
                let receiver = accounts[(thread_id + i + 1) % ACCOUNT_COUNT];
                let amount = (thread_id * 10 + i + 1) as i64;
                bank.transfers
                    .create_transfer(&op, sender, receiver, amount, "")
                    .unwrap();
                success_count.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }

    // A sweeper racing the writers; zero holding makes every row due
    let sweeper = {
        let bank = Arc::clone(&bank);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            let op = OpContext::with_timeout(Duration::from_secs(30));
            for _ in 0..5 {
                bank.settlement
                    .confirm_due_transfers(&op, Duration::ZERO)
                    .unwrap();
                thread::sleep(Duration::from_millis(5));
            }
        })
    };

    for handle in handles {
        handle.join().expect("transfer thread panicked");
    }
    sweeper.join().expect("sweeper thread panicked");

    assert_eq!(
        success_count.load(Ordering::SeqCst),
        THREAD_COUNT * ITERATIONS_PER_THREAD
    );

    let mid = bank.store.ledger_summary(&op).unwrap();
    assert_eq!(mid.total_balance_cents + mid.in_flight_cents, seed_total);

    bank.settlement
        .confirm_due_transfers(&op, Duration::ZERO)
        .unwrap();
    let settled = bank.store.ledger_summary(&op).unwrap();
    assert_eq!(settled.blocked, 0);
    assert_eq!(settled.in_flight_cents, 0);
    assert_eq!(settled.total_balance_cents, seed_total);
    assert_eq!(
        settled.confirmed as usize,
        THREAD_COUNT * ITERATIONS_PER_THREAD
    );
}

#[test]
fn test_overlapping_sweeps_credit_once() {
    let temp_dir = TempDir::new().unwrap();
    let bank = open_bank(&temp_dir);
    let accounts = seed_accounts(&bank);
    let op = OpContext::background();

    for _ in 0..20 {
        bank.transfers
            .create_transfer(&op, accounts[0], accounts[1], 100, "")
            .unwrap();
    }

    let barrier = Arc::new(Barrier::new(3));
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let bank = Arc::clone(&bank);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                bank.settlement
                    .sweep(&OpContext::background(), Duration::ZERO)
                    .unwrap()
            })
        })
        .collect();

    let confirmed: usize = handles
        .into_iter()
        .map(|h| h.join().expect("sweeper panicked").confirmed.len())
        .sum();

    assert_eq!(confirmed, 20);
    let receiver = bank.accounts.account_by_id(&op, accounts[1]).unwrap();
    assert_eq!(receiver.balance_cents, OPENING_BALANCE + 2_000);
}
