//! ATM commands - register machines and record cash movements

use anyhow::Result;
use clap::Subcommand;
use dialoguer::Password;
use xbank_core::domain::money::parse_amount;
use xbank_core::AtmData;

use super::get_context;
use crate::output;

#[derive(Subcommand)]
pub enum AtmCommands {
    /// Register a new ATM with its own account
    Register {
        /// ATM login
        login: String,
        /// ATM password (prompted when omitted)
        #[arg(long, env = "XBANK_ATM_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record cash taken in by an ATM
    Deposit {
        /// ATM login
        login: String,
        /// Amount, e.g. 100 or 99.95
        #[arg(long)]
        amount: String,
        /// Account to credit (defaults to the ATM's own account)
        #[arg(long)]
        account: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record cash dispensed by an ATM
    Withdraw {
        /// ATM login
        login: String,
        /// Amount, e.g. 100 or 99.95
        #[arg(long)]
        amount: String,
        /// Account to debit (defaults to the ATM's own account)
        #[arg(long)]
        account: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show an ATM's cash reserve
    Show {
        /// ATM login
        login: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: AtmCommands) -> Result<()> {
    let ctx = get_context()?;

    match command {
        AtmCommands::Register { login, password, json } => {
            let password = match password {
                Some(p) => p,
                None => Password::new()
                    .with_prompt("ATM password")
                    .with_confirmation("Confirm password", "Passwords don't match")
                    .interact()?,
            };
            let atm = ctx.atm.register_atm(&ctx.op_context(), &login, &password)?;
            if json {
                return output::json(&atm);
            }
            output::success(&format!(
                "Registered ATM {:?} (id {}, account {})",
                login, atm.id, atm.account_id
            ));
        }
        AtmCommands::Deposit { login, amount, account, json } => {
            let cents = parse_amount(&amount)?;
            let atm = ctx.atm.record_deposit(&ctx.op_context(), &login, account, cents)?;
            if json {
                return output::json(&atm);
            }
            output::success(&format!("Deposited {} at {:?}", output::money(cents), login));
            print_atm(&login, &atm);
        }
        AtmCommands::Withdraw { login, amount, account, json } => {
            let cents = parse_amount(&amount)?;
            let atm = ctx.atm.record_withdrawal(&ctx.op_context(), &login, account, cents)?;
            if json {
                return output::json(&atm);
            }
            output::success(&format!("Dispensed {} at {:?}", output::money(cents), login));
            print_atm(&login, &atm);
        }
        AtmCommands::Show { login, json } => {
            let atm = ctx.atm.atm_by_login(&ctx.op_context(), &login)?;
            if json {
                return output::json(&atm);
            }
            print_atm(&login, &atm);
        }
    }

    Ok(())
}

fn print_atm(login: &str, atm: &AtmData) {
    let mut table = output::create_table();
    table.set_header(vec!["ID", "Login", "Cash", "Account"]);
    table.add_row(vec![
        atm.id.to_string(),
        login.to_string(),
        output::money(atm.cash_cents),
        atm.account_id.to_string(),
    ]);
    println!("{}", table);
}
