//! # insight-sqlite
//!
//! A [`insight_agent::Warehouse`] backed by a local SQLite database, so the
//! insight engine can run end to end without a cloud warehouse.
//!
//! ```ignore
//! use insight_sqlite::SqliteWarehouse;
//!
//! let warehouse = SqliteWarehouse::open("data/ads.db")?;
//! ```

pub mod error;
pub mod warehouse;

pub use error::{WarehouseError, WarehouseResult};
pub use warehouse::SqliteWarehouse;
