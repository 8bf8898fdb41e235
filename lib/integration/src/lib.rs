//! External data providers for beyond-ops.
//!
//! This crate provides:
//!
//! - **CRM connector**: SOQL queries and record writes against Salesforce
//! - **Telephony connector**: call logs and the user directory from Aircall
//! - **SOQL helpers**: literal escaping, record-id validation and reporting
//!   periods shared by both providers
//!
//! Both connectors are traits so the tool layer can run against fakes.

pub mod aircall;
pub mod crm;
pub mod disabled;
pub mod error;
pub mod period;
pub mod salesforce;
pub mod soql;
pub mod telephony;

pub use aircall::{AircallClient, AircallConfig};
pub use crm::{CrmConnector, CrmRecord};
pub use disabled::DisabledConnector;
pub use error::ConnectorError;
pub use period::Period;
pub use salesforce::{SalesforceClient, SalesforceConfig};
pub use telephony::{Call, CallDirection, CallQuery, CallUser, TelephonyConnector, TelephonyUser};

/// Trims an optional setting, treating blank as unset.
pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
