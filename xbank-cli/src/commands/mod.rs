//! CLI command implementations

pub mod account;
pub mod atm;
pub mod history;
pub mod settle;
pub mod status;
pub mod transfer;

use std::path::PathBuf;

use anyhow::{Context, Result};
use xbank_core::BankContext;

/// Get the data directory from environment or default
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XBANK_DIR") {
        PathBuf::from(dir)
    } else {
        dirs::home_dir()
            .map(|home| home.join(".xbank"))
            .unwrap_or_else(|| PathBuf::from(".xbank"))
    }
}

/// Open the bank context over the data directory
pub fn get_context() -> Result<BankContext> {
    let data_dir = get_data_dir();

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

    BankContext::new(&data_dir).context("Failed to initialize bank context")
}
