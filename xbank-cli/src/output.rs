//! Output formatting utilities

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL_CONDENSED, ContentArrangement, Table};
use xbank_core::domain::money::format_cents;
use xbank_core::{AccountStatus, TransactionStatus};

/// Print a success message
pub fn success(msg: &str) {
    println!("{}", msg.green());
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{}", msg.red());
}

/// Print a warning message
pub fn warning(msg: &str) {
    println!("{}", msg.yellow());
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{}", msg.cyan());
}

/// Create a styled table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Print a value as pretty JSON
pub fn json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Amount in cents as a decimal string
pub fn money(cents: i64) -> String {
    format_cents(cents)
}

pub fn account_status(status: AccountStatus) -> String {
    match status {
        AccountStatus::Active => status.as_str().green().to_string(),
        AccountStatus::Blocked => status.as_str().red().to_string(),
    }
}

pub fn transaction_status(status: TransactionStatus) -> String {
    match status {
        TransactionStatus::Blocked => status.as_str().yellow().to_string(),
        TransactionStatus::Confirmed => status.as_str().green().to_string(),
    }
}

/// Message for the terminal. Storage faults never leak their internals.
pub fn user_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<xbank_core::Error>() {
        Some(core) => core.user_message(),
        None => format!("{:#}", err),
    }
}
