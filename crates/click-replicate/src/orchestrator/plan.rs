//! Table selection and source-to-destination naming.

use serde::{Deserialize, Serialize};

use crate::config::ReplicationConfig;

/// One source table and the destination table it replicates into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePlan {
    pub source: String,
    pub destination: String,
}

/// Destination name for a source table.
///
/// The configured prefix is stripped when present; a name that is nothing
/// but the prefix keeps its full form.
pub fn destination_name(source: &str, prefix: Option<&str>) -> String {
    match prefix.and_then(|p| source.strip_prefix(p)) {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => source.to_string(),
    }
}

/// Glob match supporting `*` (any run of characters) and `?` (one character).
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();

    let (mut p, mut n) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while n < name.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, n));
                p += 1;
            }
            Some(&c) if c == '?' || c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    n = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

/// Apply include/exclude filters and the naming transform to a listing.
pub fn plan_tables(tables: Vec<String>, config: &ReplicationConfig) -> Vec<TablePlan> {
    tables
        .into_iter()
        .filter(|name| {
            config.include_tables.is_empty()
                || config.include_tables.iter().any(|p| matches_pattern(p, name))
        })
        .filter(|name| !config.exclude_tables.iter().any(|p| matches_pattern(p, name)))
        .map(|source| TablePlan {
            destination: destination_name(&source, config.table_prefix.as_deref()),
            source,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_name_strips_prefix() {
        let prefix = Some("default_raw__stream_");
        assert_eq!(
            destination_name("default_raw__stream_contacts", prefix),
            "contacts"
        );
        assert_eq!(destination_name("orders", prefix), "orders");
        assert_eq!(
            destination_name("default_raw__stream_", prefix),
            "default_raw__stream_"
        );
        assert_eq!(destination_name("contacts", None), "contacts");
    }

    #[test]
    fn test_matches_pattern() {
        assert!(matches_pattern("*", "anything"));
        assert!(matches_pattern("default_raw__stream_*", "default_raw__stream_deals"));
        assert!(matches_pattern("*_tmp", "orders_tmp"));
        assert!(matches_pattern("a*b*c", "axxbyyc"));
        assert!(matches_pattern("user?", "users"));
        assert!(!matches_pattern("user?", "user"));
        assert!(!matches_pattern("orders", "orders_v2"));
        assert!(!matches_pattern("*_tmp", "tmp_orders"));
    }

    #[test]
    fn test_plan_tables_filters_and_renames() {
        let config = ReplicationConfig {
            table_prefix: Some("default_raw__stream_".into()),
            include_tables: vec!["default_raw__stream_*".into()],
            exclude_tables: vec!["*_properties".into()],
            ..ReplicationConfig::default()
        };
        let plans = plan_tables(
            vec![
                "default_raw__stream_contacts".into(),
                "default_raw__stream_contact_properties".into(),
                "default_raw__stream_deals".into(),
                "unrelated".into(),
            ],
            &config,
        );
        assert_eq!(
            plans,
            vec![
                TablePlan {
                    source: "default_raw__stream_contacts".into(),
                    destination: "contacts".into(),
                },
                TablePlan {
                    source: "default_raw__stream_deals".into(),
                    destination: "deals".into(),
                },
            ]
        );
    }
}
