//! Periodic settlement loop
//!
//! Runs a settlement sweep every `interval` on a blocking thread until the
//! shutdown token fires. A failing tick is logged and retried on the next
//! one; it never stops the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::OpContext;
use crate::domain::result::{Error, Result};
use crate::services::settlement::{SettlementService, SweepReport};

/// Running totals across ticks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub confirmed: u64,
    pub failed_rows: u64,
    pub failed_ticks: u64,
}

pub struct SettlementScheduler {
    settlement: Arc<SettlementService>,
    holding: Duration,
    interval: Duration,
    operation_timeout: Option<Duration>,
}

impl SettlementScheduler {
    pub fn new(settlement: Arc<SettlementService>, holding: Duration, interval: Duration) -> Self {
        Self {
            settlement,
            holding,
            interval,
            operation_timeout: None,
        }
    }

    /// Bound each sweep by a deadline
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Sweep every interval until `shutdown` is cancelled.
    ///
    /// The first sweep runs immediately. Cancelling the token also cancels
    /// an in-flight sweep, which rolls back its current row.
    pub async fn run(&self, shutdown: CancellationToken) -> SchedulerStats {
        let mut stats = SchedulerStats::default();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            holding_secs = self.holding.as_secs(),
            interval_secs = self.interval.as_secs(),
            "settlement scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            stats.ticks += 1;
            match self.run_once(shutdown.child_token()).await {
                Ok(report) => {
                    stats.confirmed += report.confirmed.len() as u64;
                    stats.failed_rows += report.failures.len() as u64;
                }
                Err(e) if e.is_transient() => {
                    stats.failed_ticks += 1;
                    warn!(error = %e, "settlement tick failed, retrying next tick");
                }
                Err(Error::Cancelled) => break,
                Err(e) => {
                    stats.failed_ticks += 1;
                    error!(error = %e, "settlement tick failed");
                }
            }
        }

        info!(ticks = stats.ticks, confirmed = stats.confirmed, "settlement scheduler stopped");
        stats
    }

    /// One sweep on the blocking pool
    pub async fn run_once(&self, token: CancellationToken) -> Result<SweepReport> {
        let mut ctx = OpContext::with_token(token);
        if let Some(timeout) = self.operation_timeout {
            ctx = ctx.deadline_in(timeout);
        }

        let settlement = Arc::clone(&self.settlement);
        let holding = self.holding;
        let report = tokio::task::spawn_blocking(move || settlement.sweep(&ctx, holding))
            .await
            .map_err(|e| Error::Other(format!("settlement task failed: {}", e)))??;

        if report.due > 0 {
            debug!(remaining = report.remaining(), "settlement tick done");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryStore;
    use crate::ports::{AccountStore, AtmStore, ManualClock, TransactionLedger};
    use crate::services::TransferService;
    use chrono::Utc;

    #[tokio::test]
    async fn test_run_once_settles_due_rows() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ctx = OpContext::background();
        let owner = store.create_owner(&ctx, 1).unwrap();
        let a = store.insert_account(&ctx, owner).unwrap();
        let b = store.insert_account(&ctx, owner).unwrap();
        store.update_atm_account(&ctx, 1_000, a).unwrap();

        TransferService::new(store.clone(), clock.clone())
            .create_transfer(&ctx, a, b, 400, "")
            .unwrap();
        clock.advance(chrono::Duration::seconds(61));

        let settlement = Arc::new(SettlementService::new(store.clone(), clock));
        let scheduler =
            SettlementScheduler::new(settlement, Duration::from_secs(60), Duration::from_secs(1));
        let report = scheduler.run_once(CancellationToken::new()).await.unwrap();

        assert_eq!(report.confirmed.len(), 1);
        assert_eq!(store.ledger_summary(&ctx).unwrap().blocked, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_no_tick() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let settlement = Arc::new(SettlementService::new(store, clock));
        let scheduler =
            SettlementScheduler::new(settlement, Duration::from_secs(60), Duration::from_secs(1));

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let stats = scheduler.run(shutdown).await;

        assert_eq!(stats.ticks, 0);
    }
}
