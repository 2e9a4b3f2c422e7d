//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external dependencies. Services depend
//! only on these traits, never on a concrete storage engine.

mod clock;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{AccountStore, AtmStore, AtomicUnit, Store, TransactionLedger, UnitOfWork};
