//! x-bank CLI - operate the settlement engine from a terminal

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod logging;
mod output;

use commands::{account, atm, history, settle, status, transfer};

/// x-bank - accounts, deferred-settlement transfers and ATM cash
#[derive(Parser)]
#[command(name = "xbank", version, about, long_about = None)]
struct Cli {
    /// Log engine activity to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show configuration and ledger summary
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage accounts
    Account {
        #[command(subcommand)]
        command: account::AccountCommands,
    },

    /// Debit the sender now and credit the receiver after the holding period
    Transfer {
        /// Sender account ID
        #[arg(long)]
        from: i64,
        /// Receiver account ID
        #[arg(long)]
        to: i64,
        /// Amount, e.g. 25 or 25.50
        #[arg(long)]
        amount: String,
        /// Free-text description stored on the ledger row
        #[arg(long, short, default_value = "")]
        description: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Confirm transfers whose holding period has elapsed
    Settle {
        /// Override the configured holding period
        #[arg(long)]
        holding_secs: Option<u64>,
        /// Keep running and settle on the configured interval until Ctrl-C
        #[arg(long)]
        watch: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show an account's ledger rows, newest first
    History {
        /// Account ID
        account_id: i64,
        /// Maximum rows to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
        /// Rows to skip
        #[arg(long, default_value_t = 0)]
        offset: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// ATM cash operations
    Atm {
        #[command(subcommand)]
        command: atm::AtmCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let result = run(cli);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            output::error(&output::user_message(&e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Status { json } => status::run(json),
        Commands::Account { command } => account::run(command),
        Commands::Transfer { from, to, amount, description, json } => {
            transfer::run(from, to, &amount, &description, json)
        }
        Commands::Settle { holding_secs, watch, json } => settle::run(holding_secs, watch, json),
        Commands::History { account_id, limit, offset, json } => {
            history::run(account_id, limit, offset, json)
        }
        Commands::Atm { command } => atm::run(command),
    }
}
