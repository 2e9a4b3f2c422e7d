//! Adapter implementations (hexagonal architecture)
//!
//! Adapters implement the port traits defined in `ports`.

pub mod duckdb;
pub mod memory;
pub mod params;
