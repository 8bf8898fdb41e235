//! CRM connector trait.

use crate::error::ConnectorError;
use async_trait::async_trait;
use rootcause::Report;
use serde_json::{Map, Value as JsonValue};

/// A CRM record as returned by a query: field name to value, with the
/// provider's `attributes` envelope removed.
pub type CrmRecord = Map<String, JsonValue>;

/// Read and write access to the CRM.
#[async_trait]
pub trait CrmConnector: Send + Sync {
    /// Runs a SOQL query and returns every matching record.
    async fn query(&self, soql: &str) -> Result<Vec<CrmRecord>, Report<ConnectorError>>;

    /// Updates fields on an existing record.
    async fn update_record(
        &self,
        object: &str,
        id: &str,
        fields: JsonValue,
    ) -> Result<(), Report<ConnectorError>>;

    /// Creates a record and returns its id.
    async fn create_record(
        &self,
        object: &str,
        fields: JsonValue,
    ) -> Result<String, Report<ConnectorError>>;
}

/// Strips the `attributes` envelope from every record, recursively for
/// nested relationship objects.
pub(crate) fn strip_attributes(value: &mut JsonValue) {
    match value {
        JsonValue::Object(map) => {
            map.remove("attributes");
            map.values_mut().for_each(strip_attributes);
        }
        JsonValue::Array(items) => items.iter_mut().for_each(strip_attributes),
        _ => {}
    }
}
