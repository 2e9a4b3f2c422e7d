//! x-bank core - accounts, deferred-settlement transfers and ATM cash
//!
//! This crate implements the core domain logic following hexagonal architecture:
//!
//! - **domain**: Core business entities (Account, Transaction, etc.)
//! - **ports**: Trait definitions for external dependencies (Store, Clock)
//! - **services**: Business logic orchestration
//! - **adapters**: Concrete implementations (DuckDB, in-memory)
//!
//! A transfer debits the sender immediately and records a BLOCKED ledger
//! row. After the holding period the settlement sweep confirms the row and
//! credits the receiver.

pub mod adapters;
pub mod config;
pub mod context;
pub mod domain;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use adapters::duckdb::DuckDbStore;
use config::Config;
use ports::{Clock, Store, SystemClock};
use services::*;

// Re-export commonly used types at crate root
pub use context::OpContext;
pub use domain::result::{Error, ErrorCode, Result};
pub use domain::{Account, AccountStatus, AtmData, Transaction, TransactionStatus};

/// Main context for bank operations
///
/// This is the primary entry point for all business logic. It holds
/// the store, configuration, and all services.
pub struct BankContext {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub accounts: AccountService,
    pub transfers: TransferService,
    pub settlement: Arc<SettlementService>,
    pub atm: AtmService,
}

impl BankContext {
    /// Open the DuckDB store in `data_dir` with the wall clock
    pub fn new(data_dir: &Path) -> Result<Self> {
        Self::open_with_clock(data_dir, Arc::new(SystemClock))
    }

    pub fn open_with_clock(data_dir: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        let config = Config::load(data_dir)?;
        std::fs::create_dir_all(data_dir)?;

        let db_path = config.database_path(data_dir);
        let store = DuckDbStore::open(&db_path)?;
        store.ensure_schema()?;
        debug!(path = %db_path.display(), "store opened");

        Ok(Self::with_store(config, Arc::new(store), clock))
    }

    /// Wire services over an already opened store
    pub fn with_store(config: Config, store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        let accounts = AccountService::new(Arc::clone(&store));
        let transfers = TransferService::new(Arc::clone(&store), Arc::clone(&clock));
        let settlement = Arc::new(SettlementService::new(Arc::clone(&store), clock));
        let atm = AtmService::new(Arc::clone(&store));

        Self {
            config,
            store,
            accounts,
            transfers,
            settlement,
            atm,
        }
    }

    /// A context bounded by the configured operation timeout
    pub fn op_context(&self) -> OpContext {
        OpContext::with_timeout(self.config.operation_timeout)
    }

    /// Scheduler driving the settlement sweep on the configured cadence
    pub fn scheduler(&self) -> SettlementScheduler {
        SettlementScheduler::new(
            Arc::clone(&self.settlement),
            self.config.confirmation_holding,
            self.config.sweep_interval,
        )
        .with_operation_timeout(self.config.operation_timeout)
    }
}
