//! Telephony connector trait and call-log types.

use crate::error::ConnectorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rootcause::Report;
use serde::{Deserialize, Serialize};

/// Direction of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// The rep who handled a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallUser {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// One entry of the call log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub id: u64,
    pub direction: CallDirection,
    #[serde(default)]
    pub status: String,
    /// Unix seconds.
    pub started_at: i64,
    /// Unix seconds; absent for unanswered calls.
    #[serde(default)]
    pub answered_at: Option<i64>,
    /// Seconds.
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub missed_call_reason: Option<String>,
    #[serde(default)]
    pub raw_digits: Option<String>,
    #[serde(default)]
    pub user: Option<CallUser>,
}

impl Call {
    /// Returns true if the call was picked up.
    #[must_use]
    pub fn is_answered(&self) -> bool {
        self.answered_at.is_some() && self.missed_call_reason.is_none()
    }
}

/// A telephony account holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelephonyUser {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub available: bool,
}

/// Filter for call-log reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Restrict to one rep.
    pub user_id: Option<u64>,
}

/// Read access to the telephony provider.
#[async_trait]
pub trait TelephonyConnector: Send + Sync {
    /// Lists calls started inside the query window.
    async fn list_calls(&self, query: &CallQuery) -> Result<Vec<Call>, Report<ConnectorError>>;

    /// Lists telephony users.
    async fn list_users(&self) -> Result<Vec<TelephonyUser>, Report<ConnectorError>>;
}
