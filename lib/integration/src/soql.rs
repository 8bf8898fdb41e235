//! SOQL building helpers.
//!
//! Model-supplied strings are only ever placed into queries through
//! [`quote`], and record ids only after [`record_id`] accepts them.

/// Escapes a value for use inside a single-quoted SOQL string literal.
#[must_use]
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

/// Returns `value` as a quoted, escaped SOQL literal.
#[must_use]
pub fn quote(value: &str) -> String {
    format!("'{}'", escape(value))
}

/// Escapes `LIKE` wildcards in addition to the usual literal escaping and
/// wraps the term in `%` for a contains match.
#[must_use]
pub fn contains_pattern(term: &str) -> String {
    let escaped = escape(term).replace('%', "\\%").replace('_', "\\_");
    format!("'%{escaped}%'")
}

/// Validates a Salesforce record id (15 or 18 alphanumeric characters).
#[must_use]
pub fn record_id(value: &str) -> Option<&str> {
    let value = value.trim();
    let valid_len = value.len() == 15 || value.len() == 18;
    (valid_len && value.chars().all(|c| c.is_ascii_alphanumeric())).then_some(value)
}
