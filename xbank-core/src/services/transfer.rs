//! Transfer service - creates deferred-settlement transfers
//!
//! A transfer is one atomic unit with exactly two writes, in this order:
//! the BLOCKED ledger row, then the sender debit. The receiver must exist
//! when the unit starts but is only credited later, by the settlement pass.

use std::sync::Arc;

use tracing::{info, warn};

use crate::context::OpContext;
use crate::domain::result::{Error, Result};
use crate::domain::NewTransfer;
use crate::ports::{Clock, Store};

pub struct TransferService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl TransferService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Debit the sender and record a BLOCKED ledger row.
    ///
    /// Returns the ledger row id. On any failure nothing is written.
    pub fn create_transfer(
        &self,
        ctx: &OpContext,
        sender_id: i64,
        receiver_id: i64,
        amount_cents: i64,
        description: &str,
    ) -> Result<i64> {
        let transfer = NewTransfer::new(sender_id, receiver_id, amount_cents, description);
        transfer.validate()?;

        match self.apply(ctx, &transfer) {
            Ok(transaction_id) => {
                info!(
                    transaction_id,
                    sender_id, receiver_id, amount_cents, "transfer created"
                );
                Ok(transaction_id)
            }
            Err(e) => {
                warn!(sender_id, receiver_id, amount_cents, error = %e, "transfer rolled back");
                Err(e)
            }
        }
    }

    fn apply(&self, ctx: &OpContext, transfer: &NewTransfer) -> Result<i64> {
        let mut unit = self.store.begin(ctx)?;
        // Credited only at settlement, so it has to exist up front
        if !unit.account_exists(transfer.receiver_id)? {
            return Err(Error::not_found(format!("account {}", transfer.receiver_id)));
        }
        let transaction_id = unit.insert_transaction(transfer, self.clock.now())?;
        unit.adjust_balance(transfer.sender_id, -transfer.amount_cents)?;
        unit.commit()?;
        Ok(transaction_id)
    }
}
