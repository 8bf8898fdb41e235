//! Placeholder connector for providers without credentials.
//!
//! The server starts without CRM or telephony credentials; tools that need
//! the missing provider then report it as not configured instead of the
//! whole process refusing to boot.

use crate::crm::{CrmConnector, CrmRecord};
use crate::error::ConnectorError;
use crate::telephony::{Call, CallQuery, TelephonyConnector, TelephonyUser};
use async_trait::async_trait;
use rootcause::Report;
use serde_json::Value as JsonValue;

/// Connector that fails every call with `NotConfigured`.
#[derive(Debug, Clone)]
pub struct DisabledConnector {
    provider: String,
}

impl DisabledConnector {
    #[must_use]
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }

    fn fail<T>(&self) -> Result<T, Report<ConnectorError>> {
        Err(ConnectorError::NotConfigured {
            provider: self.provider.clone(),
        }
        .into())
    }
}

#[async_trait]
impl CrmConnector for DisabledConnector {
    async fn query(&self, _soql: &str) -> Result<Vec<CrmRecord>, Report<ConnectorError>> {
        self.fail()
    }

    async fn update_record(
        &self,
        _object: &str,
        _id: &str,
        _fields: JsonValue,
    ) -> Result<(), Report<ConnectorError>> {
        self.fail()
    }

    async fn create_record(
        &self,
        _object: &str,
        _fields: JsonValue,
    ) -> Result<String, Report<ConnectorError>> {
        self.fail()
    }
}

#[async_trait]
impl TelephonyConnector for DisabledConnector {
    async fn list_calls(&self, _query: &CallQuery) -> Result<Vec<Call>, Report<ConnectorError>> {
        self.fail()
    }

    async fn list_users(&self) -> Result<Vec<TelephonyUser>, Report<ConnectorError>> {
        self.fail()
    }
}
