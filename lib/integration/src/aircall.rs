//! Aircall REST client.
//!
//! Authenticates with HTTP basic auth (API id and token). List endpoints
//! are paginated through `meta.next_page_link`.

use crate::error::ConnectorError;
use crate::non_blank;
use crate::telephony::{Call, CallQuery, TelephonyConnector, TelephonyUser};
use async_trait::async_trait;
use rootcause::Report;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

const PROVIDER: &str = "aircall";

/// Default API host.
pub const DEFAULT_BASE_URL: &str = "https://api.aircall.io";

const PER_PAGE: u32 = 50;
const MAX_PAGES: usize = 20;

/// Connection settings.
#[derive(Clone, PartialEq, Eq)]
pub struct AircallConfig {
    pub api_id: String,
    pub api_token: String,
    pub base_url: String,
}

impl std::fmt::Debug for AircallConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AircallConfig")
            .field("api_id", &self.api_id)
            .field("api_token", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl AircallConfig {
    /// Builds settings from optional environment values.
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` unless both id and token are non-blank.
    pub fn from_parts(
        api_id: Option<&str>,
        api_token: Option<&str>,
        base_url: Option<&str>,
    ) -> Result<Self, ConnectorError> {
        match (non_blank(api_id), non_blank(api_token)) {
            (Some(id), Some(token)) => Ok(Self {
                api_id: id.to_string(),
                api_token: token.to_string(),
                base_url: non_blank(base_url)
                    .unwrap_or(DEFAULT_BASE_URL)
                    .trim_end_matches('/')
                    .to_string(),
            }),
            _ => Err(ConnectorError::NotConfigured {
                provider: PROVIDER.to_string(),
            }),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PageMeta {
    #[serde(default)]
    next_page_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallsPage {
    #[serde(default)]
    calls: Vec<Call>,
    #[serde(default)]
    meta: PageMeta,
}

#[derive(Debug, Deserialize)]
struct UsersPage {
    #[serde(default)]
    users: Vec<TelephonyUser>,
    #[serde(default)]
    meta: PageMeta,
}

trait Page: DeserializeOwned {
    type Item;
    fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

impl Page for CallsPage {
    type Item = Call;
    fn into_parts(self) -> (Vec<Call>, Option<String>) {
        (self.calls, self.meta.next_page_link)
    }
}

impl Page for UsersPage {
    type Item = TelephonyUser;
    fn into_parts(self) -> (Vec<TelephonyUser>, Option<String>) {
        (self.users, self.meta.next_page_link)
    }
}

/// Telephony connector over the Aircall public API.
#[derive(Clone)]
pub struct AircallClient {
    http: reqwest::Client,
    config: AircallConfig,
}

impl std::fmt::Debug for AircallClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AircallClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AircallClient {
    /// Creates a client.
    pub fn new(config: AircallConfig) -> Result<Self, Report<ConnectorError>> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| request_failed(&e))?;
        Ok(Self { http, config })
    }

    async fn get_page<P: Page>(&self, url: &str) -> Result<P, Report<ConnectorError>> {
        let response = self
            .http
            .get(url)
            .basic_auth(&self.config.api_id, Some(&self.config.api_token))
            .send()
            .await
            .map_err(|e| request_failed(&e))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(ConnectorError::RateLimited {
                provider: PROVIDER.to_string(),
                retry_after_secs,
            }
            .into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::Api {
                provider: PROVIDER.to_string(),
                status: status.as_u16(),
                message: error_message(&body),
            }
            .into());
        }

        Ok(response.json().await.map_err(|e| ConnectorError::UnexpectedResponse {
            provider: PROVIDER.to_string(),
            reason: e.to_string(),
        })?)
    }

    async fn collect<P: Page>(
        &self,
        first_url: String,
    ) -> Result<Vec<P::Item>, Report<ConnectorError>> {
        let mut items = Vec::new();
        let mut next = Some(first_url);
        let mut pages = 0;

        while let Some(url) = next.take() {
            if pages >= MAX_PAGES {
                debug!(pages, "stopping pagination at page cap");
                break;
            }
            let (page_items, next_link) = self.get_page::<P>(&url).await?.into_parts();
            items.extend(page_items);
            next = next_link;
            pages += 1;
        }
        Ok(items)
    }
}

fn request_failed(e: &reqwest::Error) -> ConnectorError {
    ConnectorError::RequestFailed {
        provider: PROVIDER.to_string(),
        reason: e.to_string(),
    }
}

/// Aircall error bodies look like `{"error": "...", "troubleshoot": "..."}`.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

fn calls_url(base_url: &str, query: &CallQuery) -> String {
    let mut url = format!(
        "{base_url}/v1/calls?from={}&to={}&order=desc&per_page={PER_PAGE}",
        query.from.timestamp(),
        query.to.timestamp()
    );
    if let Some(user_id) = query.user_id {
        url.push_str(&format!("&user_id={user_id}"));
    }
    url
}

#[async_trait]
impl TelephonyConnector for AircallClient {
    #[instrument(skip(self))]
    async fn list_calls(&self, query: &CallQuery) -> Result<Vec<Call>, Report<ConnectorError>> {
        let calls = self
            .collect::<CallsPage>(calls_url(&self.config.base_url, query))
            .await?;
        debug!(calls = calls.len(), "aircall calls listed");
        Ok(calls)
    }

    #[instrument(skip(self))]
    async fn list_users(&self) -> Result<Vec<TelephonyUser>, Report<ConnectorError>> {
        let url = format!("{}/v1/users?per_page={PER_PAGE}", self.config.base_url);
        let users = self.collect::<UsersPage>(url).await?;
        debug!(users = users.len(), "aircall users listed");
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn config_defaults_base_url() {
        let config = AircallConfig::from_parts(Some("id"), Some("s3cret"), None).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(AircallConfig::from_parts(Some("id"), None, None).is_err());
        assert!(!format!("{config:?}").contains("s3cret"));
    }

    #[test]
    fn calls_url_includes_window_and_user() {
        let query = CallQuery {
            from: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            to: Utc.timestamp_opt(1_700_086_400, 0).unwrap(),
            user_id: Some(42),
        };
        let url = calls_url("https://api.aircall.io", &query);
        assert!(url.starts_with("https://api.aircall.io/v1/calls?from=1700000000&to=1700086400"));
        assert!(url.ends_with("&user_id=42"));
    }

    #[test]
    fn parses_call_page() {
        let page: CallsPage = serde_json::from_value(json!({
            "calls": [{
                "id": 1,
                "direction": "inbound",
                "status": "done",
                "started_at": 1_700_000_000,
                "answered_at": null,
                "duration": 0,
                "missed_call_reason": "no_available_agent",
                "user": null
            }],
            "meta": {"next_page_link": "https://api.aircall.io/v1/calls?page=2"}
        }))
        .unwrap();
        let (calls, next) = page.into_parts();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].is_answered());
        assert!(next.is_some());
    }

    #[test]
    fn error_message_prefers_error_field() {
        assert_eq!(error_message(r#"{"error":"Invalid token"}"#), "Invalid token");
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }
}
