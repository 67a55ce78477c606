//! Builders for the `searchspec` filter expressions accepted by the
//! repository API.
//!
//! User input is interpolated into quoted literals, so single quotes are
//! doubled. The `*` and `?` wildcards pass through untouched and keep their
//! matching meaning.

pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// `[Name] LIKE '<prefix>*'`
pub fn name_prefix(prefix: &str) -> String {
    format!("[Name] LIKE '{}*'", escape_literal(prefix))
}

/// `[Status] = 'A' OR [Status] = 'B'`
pub fn status_in(statuses: &[&str]) -> String {
    statuses
        .iter()
        .map(|status| format!("[Status] = '{}'", escape_literal(status)))
        .collect::<Vec<_>>()
        .join(" OR ")
}
