//! Settle command - run a settlement sweep once or on an interval

use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use xbank_core::services::{SettlementScheduler, SweepReport};

use super::get_context;
use crate::output;

#[derive(Serialize)]
struct SweepOutput {
    due: usize,
    confirmed: Vec<i64>,
    already_confirmed: usize,
    failed: Vec<FailedRow>,
}

#[derive(Serialize)]
struct FailedRow {
    transaction_id: i64,
    error: String,
}

impl From<&SweepReport> for SweepOutput {
    fn from(report: &SweepReport) -> Self {
        Self {
            due: report.due,
            confirmed: report.confirmed.clone(),
            already_confirmed: report.already_confirmed,
            failed: report
                .failures
                .iter()
                .map(|(id, e)| FailedRow {
                    transaction_id: *id,
                    error: e.user_message(),
                })
                .collect(),
        }
    }
}

pub fn run(holding_secs: Option<u64>, watch: bool, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let holding = holding_secs
        .map(Duration::from_secs)
        .unwrap_or(ctx.config.confirmation_holding);

    if watch {
        let scheduler = SettlementScheduler::new(
            std::sync::Arc::clone(&ctx.settlement),
            holding,
            ctx.config.sweep_interval,
        )
        .with_operation_timeout(ctx.config.operation_timeout);
        return watch_loop(scheduler, ctx.config.sweep_interval, json);
    }

    let report = ctx.settlement.sweep(&ctx.op_context(), holding)?;
    emit(report, json)
}

/// Print the report, then fail if any row failed, in either format
fn emit(report: SweepReport, json: bool) -> Result<()> {
    if json {
        output::json(&SweepOutput::from(&report))?;
    } else {
        print_report(&report);
    }

    match report.into_result() {
        Ok(()) => Ok(()),
        Err(e) => Err(e).context("Some transfers could not be settled"),
    }
}

fn watch_loop(scheduler: SettlementScheduler, interval: Duration, json: bool) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    let stats = runtime.block_on(async {
        let shutdown = CancellationToken::new();
        let on_signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_signal.cancel();
            }
        });

        if !json {
            output::info(&format!(
                "Settling every {}s, press Ctrl-C to stop",
                interval.as_secs()
            ));
        }
        scheduler.run(shutdown).await
    });

    if json {
        return output::json(&serde_json::json!({
            "ticks": stats.ticks,
            "confirmed": stats.confirmed,
            "failedRows": stats.failed_rows,
            "failedTicks": stats.failed_ticks,
        }));
    }
    println!(
        "\nStopped after {} ticks, {} transfers confirmed",
        stats.ticks, stats.confirmed
    );
    Ok(())
}

fn print_report(report: &SweepReport) {
    if report.due == 0 {
        output::info("No transfers due");
        return;
    }

    println!(
        "{} {} of {} due transfers confirmed",
        "✓".green(),
        report.confirmed.len(),
        report.due
    );
    if report.already_confirmed > 0 {
        println!(
            "{}",
            format!("{} already settled by another pass", report.already_confirmed).dimmed()
        );
    }
    for (id, e) in &report.failures {
        output::warning(&format!("Transfer {} left pending: {}", id, e.user_message()));
    }
}
