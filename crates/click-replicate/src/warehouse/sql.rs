//! SQL text for every warehouse operation.
//!
//! Identifiers cannot be bound as parameters, so they are validated and
//! backtick-quoted here. String literals use ClickHouse escaping
//! (backslash first, then the single quote).

use crate::error::{ReplicateError, Result};
use crate::schema::ColumnDefinition;

/// Maximum identifier length accepted in generated statements.
const MAX_IDENTIFIER_LENGTH: usize = 192;

/// Table engine for every destination table.
pub const TABLE_ENGINE: &str = "ReplacingMergeTree";

/// Reject identifiers that cannot be safely quoted.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ReplicateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }
    if name.contains('\0') {
        return Err(ReplicateError::Config(format!(
            "SECURITY: Identifier contains null byte: {:?}",
            name
        )));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ReplicateError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {}): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }
    Ok(())
}

/// Quote an identifier with backticks, doubling embedded backticks.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quote a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// `namespace`.`table`, validating both parts.
pub fn qualify(namespace: &str, table: &str) -> Result<String> {
    validate_identifier(namespace)?;
    validate_identifier(table)?;
    Ok(format!("{}.{}", quote_ident(namespace), quote_ident(table)))
}

/// Sort key expression: `tuple()` stays bare, a column name is quoted.
fn order_by_expr(order_by: &str) -> String {
    if order_by.ends_with(')') {
        order_by.to_string()
    } else {
        quote_ident(order_by)
    }
}

pub fn list_tables(namespace: &str) -> String {
    format!(
        "SELECT name FROM system.tables WHERE database = {} ORDER BY name FORMAT JSONEachRow",
        quote_literal(namespace)
    )
}

pub fn table_exists(namespace: &str, table: &str) -> String {
    format!(
        "SELECT count() FROM system.tables WHERE database = {} AND name = {} FORMAT TabSeparated",
        quote_literal(namespace),
        quote_literal(table)
    )
}

pub fn row_count(namespace: &str, table: &str) -> Result<String> {
    Ok(format!(
        "SELECT count() FROM {} FORMAT TabSeparated",
        qualify(namespace, table)?
    ))
}

pub fn column_names(namespace: &str, table: &str) -> String {
    format!(
        "SELECT name FROM system.columns WHERE database = {} AND table = {} ORDER BY position FORMAT JSONEachRow",
        quote_literal(namespace),
        quote_literal(table)
    )
}

/// One page of records.
///
/// `column` selects a single column holding a JSON document instead of
/// the whole row.
pub fn fetch_page(
    namespace: &str,
    table: &str,
    column: Option<&str>,
    order_by: Option<&str>,
    format: &str,
    limit: usize,
    offset: u64,
) -> Result<String> {
    let projection = match column {
        Some(col) => {
            validate_identifier(col)?;
            quote_ident(col)
        }
        None => "*".to_string(),
    };
    let mut sql = format!("SELECT {} FROM {}", projection, qualify(namespace, table)?);
    if let Some(order_by) = order_by {
        sql.push_str(&format!(" ORDER BY {}", order_by));
    }
    sql.push_str(&format!(" LIMIT {} OFFSET {} FORMAT {}", limit, offset, format));
    Ok(sql)
}

/// Create a table whose structure the warehouse infers from `sample`.
///
/// `LIMIT 0` keeps the sample rows out of the new table; they are loaded
/// again with the rest of the artifact.
pub fn create_table_from_sample(
    namespace: &str,
    table: &str,
    order_by: &str,
    sample: &[String],
) -> Result<String> {
    let payload: String = sample.iter().map(|line| format!("{line}\n")).collect();
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ENGINE = {} ORDER BY {} \
         AS SELECT * FROM format(JSONEachRow, {}) LIMIT 0 \
         SETTINGS schema_inference_make_columns_nullable = 0",
        qualify(namespace, table)?,
        TABLE_ENGINE,
        order_by_expr(order_by),
        quote_literal(&payload)
    ))
}

pub fn create_table_explicit(
    namespace: &str,
    table: &str,
    columns: &[ColumnDefinition],
    order_by: &str,
) -> Result<String> {
    if columns.is_empty() {
        return Err(ReplicateError::Config(format!(
            "cannot create {namespace}.{table} without columns"
        )));
    }
    for column in columns {
        validate_identifier(&column.name)?;
    }
    let defs: Vec<String> = columns.iter().map(ToString::to_string).collect();
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({}) ENGINE = {} ORDER BY {}",
        qualify(namespace, table)?,
        defs.join(", "),
        TABLE_ENGINE,
        order_by_expr(order_by)
    ))
}

pub fn add_columns(namespace: &str, table: &str, columns: &[String]) -> Result<String> {
    let mut clauses = Vec::with_capacity(columns.len());
    for column in columns {
        validate_identifier(column)?;
        clauses.push(format!(
            "ADD COLUMN IF NOT EXISTS {} Nullable(String)",
            quote_ident(column)
        ));
    }
    Ok(format!(
        "ALTER TABLE {} {}",
        qualify(namespace, table)?,
        clauses.join(", ")
    ))
}

pub fn create_namespace(namespace: &str) -> Result<String> {
    validate_identifier(namespace)?;
    Ok(format!(
        "CREATE DATABASE IF NOT EXISTS {}",
        quote_ident(namespace)
    ))
}

pub fn optimize_table(namespace: &str, table: &str) -> Result<String> {
    Ok(format!("OPTIMIZE TABLE {}", qualify(namespace, table)?))
}

pub fn latest_sync_marker(namespace: &str, table: &str, column: &str) -> Result<String> {
    validate_identifier(column)?;
    Ok(format!(
        "SELECT toUnixTimestamp(max({})) FROM {} FORMAT TabSeparated",
        quote_ident(column),
        qualify(namespace, table)?
    ))
}

/// `INSERT INTO `db`.`table` FORMAT fmt`, the data following in the body.
pub fn insert_into(namespace: &str, table: &str, format: &str) -> Result<String> {
    Ok(format!(
        "INSERT INTO {} FORMAT {}",
        qualify(namespace, table)?,
        format
    ))
}

/// `INSERT INTO `table` FORMAT fmt` as given to the command-line client.
pub fn insert_format(table: &str, format: &str) -> Result<String> {
    validate_identifier(table)?;
    Ok(format!("INSERT INTO {} FORMAT {}", quote_ident(table), format))
}

/// Full-table dump used by command-line extraction.
pub fn select_all(namespace: &str, table: &str, format: &str) -> Result<String> {
    Ok(format!(
        "SELECT * FROM {} FORMAT {}",
        qualify(namespace, table)?,
        format
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{column_definitions, propose_column_types};

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "`users`");
        assert_eq!(quote_ident("odd`name"), "`odd``name`");
    }

    #[test]
    fn test_quote_literal_escapes_backslash_first() {
        assert_eq!(quote_literal("plain"), "'plain'");
        assert_eq!(quote_literal("O'Brien"), r"'O\'Brien'");
        assert_eq!(quote_literal(r"a\b"), r"'a\\b'");
        assert_eq!(quote_literal(r"\'"), r"'\\\''");
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("contacts").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("bad\0name").is_err());
        assert!(validate_identifier(&"x".repeat(500)).is_err());
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify("db", "t").unwrap(), "`db`.`t`");
        assert!(qualify("", "t").is_err());
    }

    #[test]
    fn test_fetch_page_all_columns() {
        let sql = fetch_page("src", "orders", None, None, "JSONEachRow", 5000, 10000).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM `src`.`orders` LIMIT 5000 OFFSET 10000 FORMAT JSONEachRow"
        );
    }

    #[test]
    fn test_fetch_page_json_column_with_order() {
        let sql = fetch_page(
            "src",
            "raw",
            Some("_airbyte_data"),
            Some("_airbyte_emitted_at"),
            "JSONEachRow",
            10,
            0,
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT `_airbyte_data` FROM `src`.`raw` ORDER BY _airbyte_emitted_at LIMIT 10 OFFSET 0 FORMAT JSONEachRow"
        );
    }

    #[test]
    fn test_create_from_sample() {
        let sample = vec![
            r#"{"id":"1","name":"O'Brien"}"#.to_string(),
            r#"{"id":"2"}"#.to_string(),
        ];
        let sql = create_table_from_sample("dest", "contacts", "id", &sample).unwrap();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS `dest`.`contacts` ENGINE = ReplacingMergeTree ORDER BY `id`"));
        assert!(sql.contains(r#"format(JSONEachRow, '{"id":"1","name":"O\'Brien"}"#));
        assert!(sql.contains("LIMIT 0"));
        assert!(sql.ends_with("SETTINGS schema_inference_make_columns_nullable = 0"));
    }

    #[test]
    fn test_create_from_sample_unordered() {
        let sql = create_table_from_sample("dest", "t", "tuple()", &[r#"{"a":1}"#.into()]).unwrap();
        assert!(sql.contains("ORDER BY tuple() AS SELECT"));
    }

    #[test]
    fn test_create_explicit() {
        let keys = ["id".to_string(), "k".to_string()];
        let defs = column_definitions(&propose_column_types(&keys, "id"));
        let sql = create_table_explicit("dest", "t", &defs, "id").unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS `dest`.`t` (`id` String, `k` Nullable(String)) ENGINE = ReplacingMergeTree ORDER BY `id`"
        );
        assert!(create_table_explicit("dest", "t", &[], "id").is_err());
    }

    #[test]
    fn test_add_columns() {
        let sql = add_columns("dest", "t", &["email".into(), "phone".into()]).unwrap();
        assert_eq!(
            sql,
            "ALTER TABLE `dest`.`t` ADD COLUMN IF NOT EXISTS `email` Nullable(String), ADD COLUMN IF NOT EXISTS `phone` Nullable(String)"
        );
    }

    #[test]
    fn test_maintenance_statements() {
        assert_eq!(
            create_namespace("dest").unwrap(),
            "CREATE DATABASE IF NOT EXISTS `dest`"
        );
        assert_eq!(optimize_table("dest", "t").unwrap(), "OPTIMIZE TABLE `dest`.`t`");
        assert_eq!(
            latest_sync_marker("dest", "t", "_synced_at").unwrap(),
            "SELECT toUnixTimestamp(max(`_synced_at`)) FROM `dest`.`t` FORMAT TabSeparated"
        );
    }

    #[test]
    fn test_metadata_queries_use_literals() {
        assert_eq!(
            table_exists("dest", "o'clock"),
            r"SELECT count() FROM system.tables WHERE database = 'dest' AND name = 'o\'clock' FORMAT TabSeparated"
        );
        assert!(list_tables("src").contains("ORDER BY name"));
    }

    #[test]
    fn test_insert_format() {
        assert_eq!(
            insert_format("contacts", "JSONEachRow").unwrap(),
            "INSERT INTO `contacts` FORMAT JSONEachRow"
        );
        assert_eq!(
            insert_into("dest", "contacts", "JSONEachRow").unwrap(),
            "INSERT INTO `dest`.`contacts` FORMAT JSONEachRow"
        );
        assert!(insert_into("dest", "", "JSONEachRow").is_err());
    }
}
