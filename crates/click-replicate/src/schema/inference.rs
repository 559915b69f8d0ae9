//! Column type proposals for destination tables.
//!
//! Type inference across heterogeneous semi-structured sources is
//! unreliable, so every column is text. Only the identifier column is
//! non-null, because it doubles as the table's sort key.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::core::Record;
use crate::warehouse::sql::quote_ident;

/// Sort key used when no identifier column is available.
pub const UNORDERED: &str = "tuple()";

/// Proposed type of one destination column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnType {
    /// ClickHouse base type.
    pub data_type: String,
    /// Whether the column is wrapped in `Nullable(...)`.
    pub nullable: bool,
}

impl ColumnType {
    pub fn text(nullable: bool) -> Self {
        Self {
            data_type: "String".to_string(),
            nullable,
        }
    }

    /// Full ClickHouse type expression.
    pub fn type_expr(&self) -> String {
        if self.nullable {
            format!("Nullable({})", self.data_type)
        } else {
            self.data_type.clone()
        }
    }
}

/// A named column in a CREATE TABLE statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
}

impl fmt::Display for ColumnDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", quote_ident(&self.name), self.column_type.type_expr())
    }
}

/// Propose a type for every key: nullable text, except the identifier.
pub fn propose_column_types<'a, I>(keys: I, identifier: &str) -> BTreeMap<String, ColumnType>
where
    I: IntoIterator<Item = &'a String>,
{
    keys.into_iter()
        .map(|key| (key.clone(), ColumnType::text(key != identifier)))
        .collect()
}

/// Column definitions in key order.
pub fn column_definitions(types: &BTreeMap<String, ColumnType>) -> Vec<ColumnDefinition> {
    types
        .iter()
        .map(|(name, column_type)| ColumnDefinition {
            name: name.clone(),
            column_type: column_type.clone(),
        })
        .collect()
}

/// Sort key for a table created from `sample`.
///
/// The identifier column is only usable when every sampled record has it.
pub fn order_by_for(sample: &[Record], identifier: &str) -> String {
    if !sample.is_empty() && sample.iter().all(|r| r.contains_key(identifier)) {
        identifier.to_string()
    } else {
        UNORDERED.to_string()
    }
}

/// Union of the top-level keys of `records`: the columns their JSON lines
/// load into.
pub fn record_keys(records: &[Record]) -> BTreeSet<String> {
    records
        .iter()
        .flat_map(|r| r.keys().map(str::to_string))
        .collect()
}

/// Sort key for an explicitly typed table with the given columns.
pub fn order_by_for_keys(keys: &BTreeSet<String>, identifier: &str) -> String {
    if keys.contains(identifier) {
        identifier.to_string()
    } else {
        UNORDERED.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_all_text_identifier_not_null() {
        let keys = keys(&["id", "name", "properties_email"]);
        let types = propose_column_types(&keys, "id");

        assert_eq!(types.len(), 3);
        assert_eq!(types["id"], ColumnType::text(false));
        assert_eq!(types["name"], ColumnType::text(true));
        assert_eq!(types["properties_email"].type_expr(), "Nullable(String)");
        assert_eq!(types["id"].type_expr(), "String");
    }

    #[test]
    fn test_column_definition_rendering() {
        let types = propose_column_types(&keys(&["id", "first name"]), "id");
        let rendered: Vec<String> = column_definitions(&types)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            rendered,
            vec!["`first name` Nullable(String)", "`id` String"]
        );
    }

    #[test]
    fn test_order_by_requires_identifier_in_every_record() {
        let with_id = Record::parse(r#"{"id": "1"}"#).unwrap();
        let without_id = Record::parse(r#"{"name": "x"}"#).unwrap();

        assert_eq!(order_by_for(&[with_id.clone()], "id"), "id");
        assert_eq!(order_by_for(&[with_id, without_id], "id"), UNORDERED);
        assert_eq!(order_by_for(&[], "id"), UNORDERED);
    }

    #[test]
    fn test_record_keys_are_top_level_union() {
        let records = vec![
            Record::parse(r#"{"id": "1", "properties": {"email": "a@b"}}"#).unwrap(),
            Record::parse(r#"{"id": "2", "name": "x"}"#).unwrap(),
        ];
        assert_eq!(
            record_keys(&records).into_iter().collect::<Vec<_>>(),
            vec!["id", "name", "properties"]
        );
    }

    #[test]
    fn test_order_by_for_keys() {
        assert_eq!(order_by_for_keys(&keys(&["id", "a"]), "id"), "id");
        assert_eq!(order_by_for_keys(&keys(&["a"]), "id"), UNORDERED);
    }
}
