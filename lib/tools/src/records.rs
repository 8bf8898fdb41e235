//! Helpers for reading loosely-typed CRM records.

use beyond_ops_integration::CrmRecord;
use serde_json::Value as JsonValue;

/// Reads a possibly dotted path (`Owner.Name`) from a record.
pub(crate) fn field<'a>(record: &'a CrmRecord, path: &str) -> Option<&'a JsonValue> {
    let mut parts = path.split('.');
    let mut value = record.get(parts.next()?)?;
    for part in parts {
        value = value.get(part)?;
    }
    Some(value)
}

/// Numeric value of a field; absent or null counts as zero.
pub(crate) fn number(record: &CrmRecord, path: &str) -> f64 {
    field(record, path).and_then(JsonValue::as_f64).unwrap_or(0.0)
}

/// String value of a field.
pub(crate) fn text<'a>(record: &'a CrmRecord, path: &str) -> Option<&'a str> {
    field(record, path).and_then(JsonValue::as_str)
}

/// Sum of a numeric field across records.
pub(crate) fn sum(records: &[CrmRecord], path: &str) -> f64 {
    records.iter().map(|r| number(r, path)).sum()
}

/// Rounds a currency amount to pennies.
pub(crate) fn money(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// `part / whole` as a percentage with one decimal, or zero for an empty
/// whole.
pub(crate) fn percent(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 {
        return 0.0;
    }
    (part / whole * 1000.0).round() / 10.0
}
