//! Schema evolution: detect keys the destination table does not have yet.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// How new keys appearing in later pages are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaEvolutionMode {
    /// Add each new key as a nullable text column (default).
    #[default]
    Merge,
    /// Leave the destination alone; the loader skips unknown fields.
    Ignore,
}

/// Result of comparing incoming keys against the destination columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDiff {
    /// Keys present in the incoming records but not in the table.
    pub added: Vec<String>,
    /// Table columns absent from the incoming records.
    pub missing: Vec<String>,
}

impl SchemaDiff {
    /// Compare destination columns with incoming keys.
    pub fn between(existing: &BTreeSet<String>, incoming: &BTreeSet<String>) -> Self {
        Self {
            added: incoming.difference(existing).cloned().collect(),
            missing: existing.difference(incoming).cloned().collect(),
        }
    }

    /// Whether the destination needs new columns.
    pub fn needs_columns(&self) -> bool {
        !self.added.is_empty()
    }
}
