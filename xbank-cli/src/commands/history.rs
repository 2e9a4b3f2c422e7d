//! History command - an account's ledger rows

use anyhow::Result;
use xbank_core::ports::TransactionLedger;

use super::get_context;
use crate::output;

pub fn run(account_id: i64, limit: i64, offset: i64, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let op = ctx.op_context();

    // Resolve first so an unknown account is an error, not an empty page
    ctx.accounts.account_by_id(&op, account_id)?;
    let history = ctx
        .store
        .account_history(&op, account_id, limit, offset)?;

    if json {
        return output::json(&history);
    }

    if history.transactions.is_empty() {
        output::info(&format!("No transfers for account {}", account_id));
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec!["ID", "Created", "Direction", "Counterparty", "Amount", "Status", "Description"]);
    for tx in &history.transactions {
        let (direction, counterparty, signed) = if tx.sender_id == account_id {
            ("out", tx.receiver_id, -tx.amount_cents)
        } else {
            ("in", tx.sender_id, tx.amount_cents)
        };
        table.add_row(vec![
            tx.id.to_string(),
            tx.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            direction.to_string(),
            counterparty.to_string(),
            output::money(signed),
            output::transaction_status(tx.status),
            tx.description.clone(),
        ]);
    }
    println!("{}", table);
    println!(
        "Showing {}-{} of {}",
        offset + 1,
        offset + history.transactions.len() as i64,
        history.total
    );
    Ok(())
}
