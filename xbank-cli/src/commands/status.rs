//! Status command - configuration and ledger summary

use anyhow::Result;
use colored::Colorize;
use comfy_table::{ContentArrangement, Table};
use serde::Serialize;
use xbank_core::domain::LedgerSummary;
use xbank_core::ports::TransactionLedger;

use super::{get_context, get_data_dir};
use crate::output;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusOutput {
    data_dir: String,
    database_path: String,
    confirmation_holding_secs: u64,
    sweep_interval_secs: u64,
    operation_timeout_secs: u64,
    summary: LedgerSummary,
}

pub fn run(json: bool) -> Result<()> {
    let data_dir = get_data_dir();
    let ctx = get_context()?;
    let summary = ctx.store.ledger_summary(&ctx.op_context())?;

    let status = StatusOutput {
        data_dir: data_dir.display().to_string(),
        database_path: ctx.config.database_path(&data_dir).display().to_string(),
        confirmation_holding_secs: ctx.config.confirmation_holding.as_secs(),
        sweep_interval_secs: ctx.config.sweep_interval.as_secs(),
        operation_timeout_secs: ctx.config.operation_timeout.as_secs(),
        summary,
    };

    if json {
        return output::json(&status);
    }

    println!("{}", "Settlement Engine Status".bold());
    println!();

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.add_row(vec!["Database", status.database_path.as_str()]);
    table.add_row(vec!["Holding period", &format!("{}s", status.confirmation_holding_secs)]);
    table.add_row(vec!["Sweep interval", &format!("{}s", status.sweep_interval_secs)]);
    table.add_row(vec!["Accounts", &summary.accounts.to_string()]);
    table.add_row(vec!["Transfers", &summary.transactions.to_string()]);
    table.add_row(vec!["Pending", &summary.blocked.to_string()]);
    table.add_row(vec!["Confirmed", &summary.confirmed.to_string()]);
    table.add_row(vec!["In flight", &output::money(summary.in_flight_cents)]);
    table.add_row(vec!["Total balances", &output::money(summary.total_balance_cents)]);

    println!("{}", table);
    Ok(())
}
