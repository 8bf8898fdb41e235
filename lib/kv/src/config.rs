//! Credential resolution for the key-value store.
//!
//! Two naming conventions exist for the same URL/token pair: the Vercel KV
//! names (`KV_REST_API_URL`, `KV_REST_API_TOKEN`) and the Upstash names
//! (`UPSTASH_REDIS_REST_URL`, `UPSTASH_REDIS_REST_TOKEN`). The first complete
//! pair wins; half a pair is ignored.

use crate::error::KvError;
use serde::Deserialize;

/// Raw credential values as read from the environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KvCredentialSources {
    #[serde(default)]
    pub kv_rest_api_url: Option<String>,
    #[serde(default)]
    pub kv_rest_api_token: Option<String>,
    #[serde(default)]
    pub upstash_redis_rest_url: Option<String>,
    #[serde(default)]
    pub upstash_redis_rest_token: Option<String>,
}

/// Resolved connection settings for the REST endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct KvConfig {
    /// Base URL of the REST endpoint.
    pub url: String,
    /// Bearer token.
    pub token: String,
}

impl std::fmt::Debug for KvConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl KvCredentialSources {
    /// Picks the first complete URL/token pair.
    ///
    /// # Errors
    ///
    /// Returns `KvError::NotConfigured` when neither pair is complete.
    pub fn resolve(&self) -> Result<KvConfig, KvError> {
        let candidates = [
            (&self.kv_rest_api_url, &self.kv_rest_api_token),
            (&self.upstash_redis_rest_url, &self.upstash_redis_rest_token),
        ];

        candidates
            .into_iter()
            .find_map(|(url, token)| match (non_empty(url), non_empty(token)) {
                (Some(url), Some(token)) => Some(KvConfig {
                    url: url.trim_end_matches('/').to_string(),
                    token: token.to_string(),
                }),
                _ => None,
            })
            .ok_or(KvError::NotConfigured)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
