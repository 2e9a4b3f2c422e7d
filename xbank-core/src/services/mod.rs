//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on a specific use case or feature area.

mod account;
mod atm;
pub mod migration;
mod scheduler;
pub mod settlement;
mod transfer;

pub use account::AccountService;
pub use atm::AtmService;
pub use migration::{MigrationResult, MigrationService};
pub use scheduler::{SchedulerStats, SettlementScheduler};
pub use settlement::{Confirmation, SettlementService, SweepReport};
pub use transfer::TransferService;
