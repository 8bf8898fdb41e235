//! Salesforce REST client.
//!
//! Queries go to `/services/data/{version}/query` and follow
//! `nextRecordsUrl` until the result set is exhausted or the page cap is
//! reached. Writes use the sObject endpoints.

use crate::crm::{CrmConnector, CrmRecord, strip_attributes};
use crate::error::ConnectorError;
use crate::non_blank;
use async_trait::async_trait;
use rootcause::Report;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

const PROVIDER: &str = "salesforce";

/// Upper bound on followed result pages per query.
const MAX_QUERY_PAGES: usize = 10;

/// Default REST API version.
pub const DEFAULT_API_VERSION: &str = "v60.0";

/// Connection settings.
#[derive(Clone, PartialEq, Eq)]
pub struct SalesforceConfig {
    /// Org base URL, e.g. `https://acme.my.salesforce.com`.
    pub instance_url: String,
    pub access_token: String,
    pub api_version: String,
}

impl std::fmt::Debug for SalesforceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceConfig")
            .field("instance_url", &self.instance_url)
            .field("access_token", &"<redacted>")
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl SalesforceConfig {
    /// Builds settings from optional environment values.
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` unless both URL and token are non-blank.
    pub fn from_parts(
        instance_url: Option<&str>,
        access_token: Option<&str>,
        api_version: Option<&str>,
    ) -> Result<Self, ConnectorError> {
        match (non_blank(instance_url), non_blank(access_token)) {
            (Some(url), Some(token)) => Ok(Self {
                instance_url: url.trim_end_matches('/').to_string(),
                access_token: token.to_string(),
                api_version: non_blank(api_version)
                    .unwrap_or(DEFAULT_API_VERSION)
                    .to_string(),
            }),
            _ => Err(ConnectorError::NotConfigured {
                provider: PROVIDER.to_string(),
            }),
        }
    }

    fn data_url(&self, path: &str) -> String {
        format!(
            "{}/services/data/{}/{}",
            self.instance_url,
            self.api_version,
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryPage {
    #[serde(default)]
    records: Vec<JsonValue>,
    #[serde(default)]
    next_records_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateReply {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorBody {
    message: String,
    #[serde(default)]
    error_code: Option<String>,
}

/// CRM connector over the Salesforce REST API.
#[derive(Clone)]
pub struct SalesforceClient {
    http: reqwest::Client,
    config: SalesforceConfig,
}

impl std::fmt::Debug for SalesforceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SalesforceClient {
    /// Creates a client.
    pub fn new(config: SalesforceConfig) -> Result<Self, Report<ConnectorError>> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| request_failed(&e))?;
        Ok(Self { http, config })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, Report<ConnectorError>> {
        let response = request
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| request_failed(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(api_error(status.as_u16(), &body).into())
    }
}

fn request_failed(e: &reqwest::Error) -> ConnectorError {
    ConnectorError::RequestFailed {
        provider: PROVIDER.to_string(),
        reason: e.to_string(),
    }
}

fn unexpected(reason: impl Into<String>) -> ConnectorError {
    ConnectorError::UnexpectedResponse {
        provider: PROVIDER.to_string(),
        reason: reason.into(),
    }
}

/// Salesforce reports errors as a list of `{message, errorCode}`. Request
/// limits come back as 403 `REQUEST_LIMIT_EXCEEDED`.
fn api_error(status: u16, body: &str) -> ConnectorError {
    let errors: Vec<ApiErrorBody> = serde_json::from_str(body).unwrap_or_default();
    let first = errors.into_iter().next();

    if status == 429
        || first
            .as_ref()
            .and_then(|e| e.error_code.as_deref())
            .is_some_and(|code| code == "REQUEST_LIMIT_EXCEEDED")
    {
        return ConnectorError::RateLimited {
            provider: PROVIDER.to_string(),
            retry_after_secs: None,
        };
    }

    let message = match first {
        Some(ApiErrorBody {
            message,
            error_code: Some(code),
        }) => format!("{code}: {message}"),
        Some(ApiErrorBody { message, .. }) => message,
        None => body.chars().take(200).collect(),
    };

    ConnectorError::Api {
        provider: PROVIDER.to_string(),
        status,
        message,
    }
}

fn into_records(values: Vec<JsonValue>) -> Vec<CrmRecord> {
    values
        .into_iter()
        .filter_map(|mut value| {
            strip_attributes(&mut value);
            match value {
                JsonValue::Object(map) => Some(map),
                _ => None,
            }
        })
        .collect()
}

#[async_trait]
impl CrmConnector for SalesforceClient {
    #[instrument(skip(self, soql))]
    async fn query(&self, soql: &str) -> Result<Vec<CrmRecord>, Report<ConnectorError>> {
        let first = self
            .http
            .get(self.config.data_url("query"))
            .query(&[("q", soql)]);

        let mut page: QueryPage = self
            .send(first)
            .await?
            .json()
            .await
            .map_err(|e| unexpected(e.to_string()))?;
        let mut records = into_records(std::mem::take(&mut page.records));
        let mut pages = 1;

        while let Some(next) = page.next_records_url.take() {
            if pages >= MAX_QUERY_PAGES {
                debug!(pages, "stopping query pagination at page cap");
                break;
            }
            let url = format!("{}{}", self.config.instance_url, next);
            page = self
                .send(self.http.get(url))
                .await?
                .json()
                .await
                .map_err(|e| unexpected(e.to_string()))?;
            records.extend(into_records(std::mem::take(&mut page.records)));
            pages += 1;
        }

        debug!(records = records.len(), pages, "salesforce query completed");
        Ok(records)
    }

    #[instrument(skip(self, fields))]
    async fn update_record(
        &self,
        object: &str,
        id: &str,
        fields: JsonValue,
    ) -> Result<(), Report<ConnectorError>> {
        let url = self.config.data_url(&format!("sobjects/{object}/{id}"));
        self.send(self.http.patch(url).json(&fields)).await?;
        debug!("salesforce record updated");
        Ok(())
    }

    #[instrument(skip(self, fields))]
    async fn create_record(
        &self,
        object: &str,
        fields: JsonValue,
    ) -> Result<String, Report<ConnectorError>> {
        let url = self.config.data_url(&format!("sobjects/{object}"));
        let reply: CreateReply = self
            .send(self.http.post(url).json(&fields))
            .await?
            .json()
            .await
            .map_err(|e| unexpected(e.to_string()))?;
        debug!(id = %reply.id, "salesforce record created");
        Ok(reply.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_requires_url_and_token() {
        let url = "https://x.my.salesforce.com/";
        assert!(SalesforceConfig::from_parts(Some(url), None, None).is_err());
        assert!(SalesforceConfig::from_parts(Some(" "), Some("t"), None).is_err());

        let config = SalesforceConfig::from_parts(Some(url), Some("t"), None).unwrap();
        assert_eq!(config.api_version, DEFAULT_API_VERSION);
        assert_eq!(
            config.data_url("query"),
            "https://x.my.salesforce.com/services/data/v60.0/query"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let config =
            SalesforceConfig::from_parts(Some("https://x"), Some("secret"), Some("v59.0")).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("v59.0"));
    }

    #[test]
    fn api_errors_carry_code_and_message() {
        let body = json!([{"message": "unexpected token: FROM", "errorCode": "MALFORMED_QUERY"}]);
        let body = body.to_string();
        assert_eq!(
            api_error(400, &body),
            ConnectorError::Api {
                provider: PROVIDER.to_string(),
                status: 400,
                message: "MALFORMED_QUERY: unexpected token: FROM".to_string(),
            }
        );
    }

    #[test]
    fn request_limit_is_rate_limited() {
        let body = json!([{
            "message": "TotalRequests Limit exceeded.",
            "errorCode": "REQUEST_LIMIT_EXCEEDED"
        }]);
        let body = body.to_string();
        assert!(matches!(api_error(403, &body), ConnectorError::RateLimited { .. }));
    }

    #[test]
    fn records_lose_attributes_and_non_objects() {
        let records = into_records(vec![
            json!({"attributes": {"type": "Lead"}, "Id": "00Q1"}),
            json!(42),
        ]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("Id"), Some(&json!("00Q1")));
        assert!(records[0].get("attributes").is_none());
    }
}
