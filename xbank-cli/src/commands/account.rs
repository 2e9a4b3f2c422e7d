//! Account commands - open, block, list and show accounts

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Confirm;
use xbank_core::Account;

use super::get_context;
use crate::output;

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open a new account for a user
    Open {
        /// User ID
        #[arg(long)]
        user_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Block an account (irreversible)
    Block {
        /// Account ID
        account_id: i64,
        /// Skip confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
    },
    /// List a user's accounts
    List {
        /// User ID
        #[arg(long)]
        user_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one account
    Show {
        /// Account ID
        account_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: AccountCommands) -> Result<()> {
    let ctx = get_context()?;
    let op = ctx.op_context();

    match command {
        AccountCommands::Open { user_id, json } => {
            let account = ctx.accounts.open_account(&op, user_id)?;
            if json {
                return output::json(&account);
            }
            output::success(&format!("Opened account {} for user {}", account.id, user_id));
        }
        AccountCommands::Block { account_id, force } => {
            let account = ctx.accounts.account_by_id(&op, account_id)?;
            if account.is_blocked() {
                output::info(&format!("Account {} is already blocked", account_id));
                return Ok(());
            }

            if !force {
                println!(
                    "\n{}",
                    format!("This will permanently block account {}.", account_id).yellow()
                );
                println!("{}\n", "Transfers already in flight still settle.".dimmed());

                if !Confirm::new()
                    .with_prompt("Are you sure?")
                    .default(false)
                    .interact()?
                {
                    println!("{}\n", "Cancelled".dimmed());
                    return Ok(());
                }
            }

            // The prompt may have outlived the first deadline
            ctx.accounts.block_account(&ctx.op_context(), account_id)?;
            println!("\n{} Account {} blocked\n", "✓".green(), account_id);
        }
        AccountCommands::List { user_id, json } => {
            let accounts = ctx.accounts.accounts_for_user(&op, user_id)?;
            if json {
                return output::json(&accounts);
            }
            if accounts.is_empty() {
                output::warning(&format!("User {} has no accounts", user_id));
                return Ok(());
            }
            print_accounts(&accounts);
        }
        AccountCommands::Show { account_id, json } => {
            let account = ctx.accounts.account_by_id(&op, account_id)?;
            if json {
                return output::json(&account);
            }
            print_accounts(std::slice::from_ref(&account));
        }
    }

    Ok(())
}

fn print_accounts(accounts: &[Account]) {
    let mut table = output::create_table();
    table.set_header(vec!["ID", "User", "Balance", "Status"]);
    for account in accounts {
        table.add_row(vec![
            account.id.to_string(),
            account.user_id_or_zero().to_string(),
            output::money(account.balance_cents),
            output::account_status(account.status),
        ]);
    }
    println!("{}", table);
}
