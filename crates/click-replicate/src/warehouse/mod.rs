//! Warehouse client: the ClickHouse HTTP implementation of [`Warehouse`]
//! and the SQL it sends.
//!
//! [`Warehouse`]: crate::core::Warehouse

mod clickhouse;
pub mod sql;

pub use clickhouse::ClickHouseClient;
