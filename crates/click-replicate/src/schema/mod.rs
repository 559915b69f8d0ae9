//! Destination schema inference from sampled records.
//!
//! - [`flatten`]: nested record → single-level key map
//! - [`inference`]: key set → column types / definitions / sort key
//! - [`evolution`]: new-key detection for tables that already exist

pub mod evolution;
pub mod flatten;
pub mod inference;

pub use evolution::{SchemaDiff, SchemaEvolutionMode};
pub use flatten::{flatten, flatten_as_text};
pub use inference::{
    column_definitions, order_by_for, order_by_for_keys, propose_column_types, record_keys,
    ColumnDefinition, ColumnType, UNORDERED,
};
