//! Transfer command - create a deferred-settlement transfer

use anyhow::Result;
use serde::Serialize;
use xbank_core::domain::money::parse_amount;

use super::get_context;
use crate::output;

#[derive(Serialize)]
struct TransferOutput {
    transaction_id: i64,
    sender_id: i64,
    receiver_id: i64,
    amount_cents: i64,
    settles_after_secs: u64,
}

pub fn run(from: i64, to: i64, amount: &str, description: &str, json: bool) -> Result<()> {
    let amount_cents = parse_amount(amount)?;
    let ctx = get_context()?;
    let op = ctx.op_context();

    let transaction_id = ctx
        .transfers
        .create_transfer(&op, from, to, amount_cents, description)?;

    let result = TransferOutput {
        transaction_id,
        sender_id: from,
        receiver_id: to,
        amount_cents,
        settles_after_secs: ctx.config.confirmation_holding.as_secs(),
    };
    if json {
        return output::json(&result);
    }

    output::success(&format!(
        "Transfer {} created: {} from account {} to account {}",
        transaction_id,
        output::money(amount_cents),
        from,
        to
    ));
    output::info(&format!(
        "Receiver is credited once the {}s holding period has passed",
        result.settles_after_secs
    ));
    Ok(())
}
