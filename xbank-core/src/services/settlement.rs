//! Settlement service - confirms transfers whose holding period elapsed
//!
//! Each due row is settled in its own atomic unit: flip BLOCKED to
//! CONFIRMED, then credit the receiver. The flip is guarded by the row's
//! status, so a row can be credited at most once even when two passes
//! overlap.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::context::OpContext;
use crate::domain::result::{Error, Result};
use crate::domain::PendingTransfer;
use crate::ports::{Clock, Store};

/// Outcome of settling one row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// This call flipped the row and credited the receiver
    Confirmed,
    /// Some earlier pass already settled the row; nothing was written
    AlreadyConfirmed,
}

/// What one sweep did
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Rows selected as due
    pub due: usize,
    /// Rows this sweep confirmed, in processing order
    pub confirmed: Vec<i64>,
    pub already_confirmed: usize,
    /// Rows that failed and were rolled back, with the cause
    pub failures: Vec<(i64, Error)>,
}

impl SweepReport {
    /// Rows left for a later sweep (failed or never reached)
    pub fn remaining(&self) -> usize {
        self.due - self.confirmed.len() - self.already_confirmed
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Collapse into the first failure, if any
    pub fn into_result(self) -> Result<()> {
        match self.failures.into_iter().next() {
            Some((_, err)) => Err(err),
            None => Ok(()),
        }
    }
}

pub struct SettlementService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl SettlementService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Settle every transfer older than `holding`.
    ///
    /// Returns the first failure, after attempting every due row.
    pub fn confirm_due_transfers(&self, ctx: &OpContext, holding: Duration) -> Result<()> {
        self.sweep(ctx, holding)?.into_result()
    }

    /// Settle every transfer older than `holding` and report per-row outcomes.
    ///
    /// Fails outright only when the due rows cannot be selected. A failing
    /// row is rolled back and recorded; the remaining rows are still
    /// attempted unless the context was cancelled or ran out of time.
    pub fn sweep(&self, ctx: &OpContext, holding: Duration) -> Result<SweepReport> {
        let cutoff = self.cutoff(holding)?;
        let due = self.store.due_transfers(ctx, cutoff)?;

        let mut report = SweepReport {
            due: due.len(),
            ..SweepReport::default()
        };
        if due.is_empty() {
            debug!(%cutoff, "no transfers due");
            return Ok(report);
        }

        for transfer in &due {
            match self.confirm_one(ctx, transfer) {
                Ok(Confirmation::Confirmed) => report.confirmed.push(transfer.id),
                Ok(Confirmation::AlreadyConfirmed) => report.already_confirmed += 1,
                Err(e) => {
                    warn!(transaction_id = transfer.id, error = %e, "settlement failed, rolled back");
                    let stop = matches!(e, Error::Cancelled | Error::DeadlineExceeded);
                    report.failures.push((transfer.id, e));
                    if stop {
                        break;
                    }
                }
            }
        }

        info!(
            due = report.due,
            confirmed = report.confirmed.len(),
            already_confirmed = report.already_confirmed,
            failed = report.failures.len(),
            "settlement sweep finished"
        );
        Ok(report)
    }

    /// Settle a single row in its own atomic unit
    pub fn confirm_one(&self, ctx: &OpContext, transfer: &PendingTransfer) -> Result<Confirmation> {
        let mut unit = self.store.begin(ctx)?;

        if !unit.confirm_transaction(transfer.id)? {
            unit.rollback()?;
            debug!(transaction_id = transfer.id, "already confirmed, skipping");
            return Ok(Confirmation::AlreadyConfirmed);
        }

        unit.adjust_balance(transfer.receiver_id, transfer.amount_cents)?;
        unit.commit()?;

        debug!(
            transaction_id = transfer.id,
            receiver_id = transfer.receiver_id,
            amount_cents = transfer.amount_cents,
            "transfer confirmed"
        );
        Ok(Confirmation::Confirmed)
    }

    fn cutoff(&self, holding: Duration) -> Result<chrono::DateTime<chrono::Utc>> {
        let holding = chrono::Duration::from_std(holding)
            .map_err(|_| Error::validation("holding period out of range"))?;
        self.clock
            .now()
            .checked_sub_signed(holding)
            .ok_or_else(|| Error::validation("holding period out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{FailPoint, InMemoryStore};
    use crate::domain::TransactionStatus;
    use crate::ports::{AccountStore, AtmStore, ManualClock, TransactionLedger};
    use crate::services::TransferService;
    use chrono::{TimeZone, Utc};

    const HOLD: Duration = Duration::from_secs(300);

    struct Fixture {
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
        transfers: TransferService,
        settlement: SettlementService,
        accounts: Vec<i64>,
    }

    fn fixture(account_count: usize) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ));
        let ctx = OpContext::background();
        let owner = store.create_owner(&ctx, 1).unwrap();
        let accounts = (0..account_count)
            .map(|_| {
                let id = store.insert_account(&ctx, owner).unwrap();
                store.update_atm_account(&ctx, 10_000, id).unwrap();
                id
            })
            .collect();

        Fixture {
            transfers: TransferService::new(store.clone(), clock.clone()),
            settlement: SettlementService::new(store.clone(), clock.clone()),
            store,
            clock,
            accounts,
        }
    }

    fn balance(store: &InMemoryStore, id: i64) -> i64 {
        store
            .account_by_id(&OpContext::background(), id)
            .unwrap()
            .unwrap()
            .balance_cents
    }

    #[test]
    fn test_only_rows_past_holding_are_settled() {
        let f = fixture(2);
        let ctx = OpContext::background();
        let (a, b) = (f.accounts[0], f.accounts[1]);

        let old = f.transfers.create_transfer(&ctx, a, b, 2500, "").unwrap();
        f.clock.advance(chrono::Duration::seconds(200));
        let fresh = f.transfers.create_transfer(&ctx, a, b, 500, "").unwrap();
        f.clock.advance(chrono::Duration::seconds(100));

        let report = f.settlement.sweep(&ctx, HOLD).unwrap();

        assert_eq!(report.confirmed, vec![old]);
        assert_eq!(balance(&f.store, b), 12_500);
        let fresh_row = f.store.transaction_by_id(&ctx, fresh).unwrap().unwrap();
        assert_eq!(fresh_row.status, TransactionStatus::Blocked);
    }

    #[test]
    fn test_second_sweep_changes_nothing() {
        let f = fixture(2);
        let ctx = OpContext::background();
        let (a, b) = (f.accounts[0], f.accounts[1]);
        f.transfers.create_transfer(&ctx, a, b, 700, "").unwrap();
        f.clock.advance(chrono::Duration::seconds(301));

        f.settlement.confirm_due_transfers(&ctx, HOLD).unwrap();
        let after_first = balance(&f.store, b);
        f.settlement.confirm_due_transfers(&ctx, HOLD).unwrap();

        assert_eq!(after_first, 10_700);
        assert_eq!(balance(&f.store, b), 10_700);
    }

    #[test]
    fn test_no_due_rows_opens_no_unit() {
        let f = fixture(2);
        let ctx = OpContext::background();
        f.transfers
            .create_transfer(&ctx, f.accounts[0], f.accounts[1], 100, "")
            .unwrap();
        let before = f.store.units_begun();

        let report = f.settlement.sweep(&ctx, HOLD).unwrap();

        assert_eq!(report.due, 0);
        assert_eq!(f.store.units_begun(), before);
    }

    #[test]
    fn test_confirming_a_settled_row_is_a_no_op() {
        let f = fixture(2);
        let ctx = OpContext::background();
        let (a, b) = (f.accounts[0], f.accounts[1]);
        let id = f.transfers.create_transfer(&ctx, a, b, 300, "").unwrap();
        let pending = f
            .store
            .transaction_by_id(&ctx, id)
            .unwrap()
            .unwrap()
            .to_pending();

        assert_eq!(
            f.settlement.confirm_one(&ctx, &pending).unwrap(),
            Confirmation::Confirmed
        );
        assert_eq!(
            f.settlement.confirm_one(&ctx, &pending).unwrap(),
            Confirmation::AlreadyConfirmed
        );
        assert_eq!(balance(&f.store, b), 10_300);
    }

    #[test]
    fn test_failed_credit_keeps_row_blocked_and_others_proceed() {
        let f = fixture(3);
        let ctx = OpContext::background();
        let (a, b, c) = (f.accounts[0], f.accounts[1], f.accounts[2]);
        let first = f.transfers.create_transfer(&ctx, a, b, 100, "").unwrap();
        let second = f.transfers.create_transfer(&ctx, a, c, 200, "").unwrap();
        f.clock.advance(chrono::Duration::seconds(400));

        f.store.fail_next(FailPoint::AdjustBalance);
        let report = f.settlement.sweep(&ctx, HOLD).unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, first);
        assert_eq!(report.confirmed, vec![second]);
        assert_eq!(report.remaining(), 1);
        let row = f.store.transaction_by_id(&ctx, first).unwrap().unwrap();
        assert_eq!(row.status, TransactionStatus::Blocked);
        assert_eq!(balance(&f.store, b), 10_000);
        assert_eq!(balance(&f.store, c), 10_200);

        // The failed row is picked up by the next pass
        let retry = f.settlement.sweep(&ctx, HOLD).unwrap();
        assert_eq!(retry.confirmed, vec![first]);
        assert_eq!(balance(&f.store, b), 10_100);
    }

    #[test]
    fn test_confirm_due_transfers_surfaces_first_failure() {
        let f = fixture(2);
        let ctx = OpContext::background();
        f.transfers
            .create_transfer(&ctx, f.accounts[0], f.accounts[1], 100, "")
            .unwrap();
        f.clock.advance(chrono::Duration::seconds(400));

        f.store.fail_next(FailPoint::Commit);
        let err = f.settlement.confirm_due_transfers(&ctx, HOLD).unwrap_err();

        assert!(matches!(err, Error::Persistence { .. }));
        assert_eq!(balance(&f.store, f.accounts[1]), 10_000);
    }

    #[test]
    fn test_cancelled_sweep_writes_nothing() {
        let f = fixture(2);
        let ctx = OpContext::background();
        f.transfers
            .create_transfer(&ctx, f.accounts[0], f.accounts[1], 100, "")
            .unwrap();
        f.clock.advance(chrono::Duration::seconds(400));

        let cancelled = OpContext::background();
        cancelled.cancel();
        assert!(matches!(
            f.settlement.sweep(&cancelled, HOLD),
            Err(Error::Cancelled)
        ));
        assert_eq!(f.store.ledger_summary(&ctx).unwrap().blocked, 1);
    }

    #[test]
    fn test_money_is_conserved_through_settlement() {
        let f = fixture(3);
        let ctx = OpContext::background();
        let (a, b, c) = (f.accounts[0], f.accounts[1], f.accounts[2]);
        f.transfers.create_transfer(&ctx, a, b, 1_000, "").unwrap();
        f.transfers.create_transfer(&ctx, b, c, 400, "").unwrap();
        f.transfers.create_transfer(&ctx, c, a, 50, "").unwrap();

        let check = |store: &InMemoryStore| {
            let s = store.ledger_summary(&ctx).unwrap();
            assert_eq!(s.total_balance_cents + s.in_flight_cents, 30_000);
        };
        check(&f.store);
        f.clock.advance(chrono::Duration::seconds(301));
        f.settlement.confirm_due_transfers(&ctx, HOLD).unwrap();
        check(&f.store);
        assert_eq!(f.store.ledger_summary(&ctx).unwrap().in_flight_cents, 0);
    }
}
