//! Flattening of nested records into single-level column maps.

use std::collections::BTreeMap;

use crate::core::{Record, Value};

/// Separator placed between nested key path segments.
pub const SEPARATOR: &str = "_";

/// Nesting deeper than this is kept as a JSON value under the current key.
const MAX_DEPTH: usize = 64;

/// Flatten a record into a single-level map.
///
/// Nested object keys are joined with `_` (`{"a": {"b": 1}}` becomes
/// `a_b = 1`), array elements are addressed by index (`tags_0`). Empty
/// objects and arrays are kept under their own key so the column is not
/// silently dropped.
pub fn flatten(record: &Record) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for (key, value) in record.fields() {
        flatten_value(value, key, &mut out, 1);
    }
    out
}

/// Flatten a record and render every scalar as text.
///
/// This is the record shape written to staging artifacts in flattened
/// payload mode, matching the text-typed destination columns.
pub fn flatten_as_text(record: &Record) -> Record {
    flatten(record)
        .into_iter()
        .map(|(k, v)| {
            let v = match v.to_text() {
                Some(text) => Value::String(text),
                None => Value::Null,
            };
            (k, v)
        })
        .collect()
}

fn flatten_value(value: &Value, prefix: &str, out: &mut BTreeMap<String, Value>, depth: usize) {
    if depth > MAX_DEPTH {
        out.insert(prefix.to_string(), value.clone());
        return;
    }
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (k, v) in map {
                flatten_value(v, &format!("{prefix}{SEPARATOR}{k}"), out, depth + 1);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (idx, v) in items.iter().enumerate() {
                flatten_value(v, &format!("{prefix}{SEPARATOR}{idx}"), out, depth + 1);
            }
        }
        _ => {
            out.insert(prefix.to_string(), value.clone());
        }
    }
}
