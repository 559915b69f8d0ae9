//! Bulk loaders that ingest staging artifacts into destination tables.

mod client;
mod insert;

use std::sync::Arc;

pub use client::ClientBulkLoader;
pub use insert::InsertLoader;

use crate::config::{Config, LoaderKind};
use crate::core::{BulkLoader, ProcessRunner, Warehouse};

/// Build the configured loader.
pub fn from_config(
    config: &Config,
    destination: Arc<dyn Warehouse>,
    runner: Arc<dyn ProcessRunner>,
) -> Arc<dyn BulkLoader> {
    match config.loader.kind {
        LoaderKind::Client => Arc::new(ClientBulkLoader::new(
            &config.destination,
            &config.loader,
            runner,
        )),
        LoaderKind::Insert => Arc::new(InsertLoader::new(
            destination,
            config.loader.settings.clone(),
        )),
    }
}
