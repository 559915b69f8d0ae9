//! Row-count completeness oracle.

use serde::{Deserialize, Serialize};

use crate::config::CompletenessPolicy;

/// Source and destination row counts for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletenessSignal {
    pub source_rows: u64,
    pub destination_rows: u64,
}

impl CompletenessSignal {
    pub fn new(source_rows: u64, destination_rows: u64) -> Self {
        Self {
            source_rows,
            destination_rows,
        }
    }

    /// Whether the destination is caught up under `policy`.
    pub fn is_complete(&self, policy: CompletenessPolicy) -> bool {
        match policy {
            CompletenessPolicy::AtLeast => self.destination_rows >= self.source_rows,
            CompletenessPolicy::Exact => self.destination_rows == self.source_rows,
        }
    }
}
