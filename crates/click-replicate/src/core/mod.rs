//! Core abstractions shared by every component.
//!
//! - [`value`]: semi-structured record representation
//! - [`traits`]: warehouse, loader, exporter and process-runner capabilities

pub mod traits;
pub mod value;

pub use traits::{
    BulkLoader, LoadReport, PageRequest, ProcessOutput, ProcessRunner, ProcessSpec, Projection,
    TableExporter, Warehouse,
};
pub use value::{Record, Value};
