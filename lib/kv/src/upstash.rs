//! Upstash Redis REST client.
//!
//! Every command is a `POST` of a JSON array (`["SET", "k", "v", "EX", "60"]`)
//! to the endpoint root with a bearer token. Replies are
//! `{"result": ...}` or `{"error": "..."}`.
//!
//! There is no retry policy: a failed request surfaces to the caller, which
//! addresses the store per request rather than holding a connection.

use crate::config::{KvConfig, KvCredentialSources};
use crate::error::KvError;
use crate::store::KvStore;
use async_trait::async_trait;
use rootcause::Report;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

/// `KEYS[1]` hash, `ARGV[1]` stamp field, `ARGV[2]` stamp, then field/value
/// pairs. Returns nil when the hash is missing, else the resulting stamp.
const HASH_TOUCH_SCRIPT: &str = "\
if redis.call('EXISTS', KEYS[1]) == 0 then return false end
for i = 3, #ARGV, 2 do redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1]) end
local current = tonumber(redis.call('HGET', KEYS[1], ARGV[1]))
local stamp = tonumber(ARGV[2])
if current ~= nil and current >= stamp then return current end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
return stamp";

/// Raw reply envelope.
#[derive(Debug, Default, Deserialize)]
struct UpstashReply {
    #[serde(default)]
    result: JsonValue,
    #[serde(default)]
    error: Option<String>,
}

/// Key-value client over the Upstash REST API.
#[derive(Clone)]
pub struct UpstashClient {
    http: reqwest::Client,
    config: KvConfig,
}

impl std::fmt::Debug for UpstashClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstashClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl UpstashClient {
    /// Creates a client for resolved settings.
    pub fn new(config: KvConfig) -> Result<Self, Report<KvError>> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| KvError::RequestFailed {
                details: e.to_string(),
            })?;

        Ok(Self { http, config })
    }

    /// Resolves credentials and creates a client, failing fast when neither
    /// naming convention is configured.
    pub fn from_sources(sources: &KvCredentialSources) -> Result<Self, Report<KvError>> {
        let config = sources.resolve()?;
        Self::new(config)
    }

    async fn command(&self, args: Vec<String>) -> Result<JsonValue, Report<KvError>> {
        let name = args.first().cloned().unwrap_or_default();
        // EVAL carries the script and key count ahead of the key.
        let key_at = if name == "EVAL" { 3 } else { 1 };
        let key = args.get(key_at).cloned().unwrap_or_default();

        let response = self
            .http
            .post(&self.config.url)
            .bearer_auth(&self.config.token)
            .json(&args)
            .send()
            .await
            .map_err(|e| KvError::RequestFailed {
                details: e.to_string(),
            })?;

        let status = response.status();
        let reply: UpstashReply = response.json().await.map_err(|e| KvError::UnexpectedResponse {
            command: name.clone(),
            details: format!("status {status}: {e}"),
        })?;

        debug!(command = %name, %status, "kv command completed");
        Ok(decode(&name, &key, reply)?)
    }
}

fn decode(command: &str, key: &str, reply: UpstashReply) -> Result<JsonValue, KvError> {
    match reply.error {
        Some(message) if message.starts_with("WRONGTYPE") => Err(KvError::WrongType {
            key: key.to_string(),
        }),
        Some(message) => Err(KvError::CommandFailed {
            command: command.to_string(),
            message,
        }),
        None => Ok(reply.result),
    }
}

fn as_u64(command: &str, value: &JsonValue) -> Result<u64, KvError> {
    value.as_u64().ok_or_else(|| KvError::UnexpectedResponse {
        command: command.to_string(),
        details: format!("expected integer, got {value}"),
    })
}

fn as_strings(command: &str, value: JsonValue) -> Result<Vec<String>, KvError> {
    match value {
        JsonValue::Null => Ok(Vec::new()),
        JsonValue::Array(items) => items
            .into_iter()
            .map(|item| match item {
                JsonValue::String(s) => Ok(s),
                other => Err(KvError::UnexpectedResponse {
                    command: command.to_string(),
                    details: format!("expected string element, got {other}"),
                }),
            })
            .collect(),
        other => Err(KvError::UnexpectedResponse {
            command: command.to_string(),
            details: format!("expected array, got {other}"),
        }),
    }
}

fn as_i64(command: &str, value: &JsonValue) -> Result<i64, KvError> {
    value.as_i64().ok_or_else(|| KvError::UnexpectedResponse {
        command: command.to_string(),
        details: format!("expected integer, got {value}"),
    })
}

/// Folds a flat `[field, value, field, value, ...]` reply into a map.
fn as_field_map(command: &str, value: JsonValue) -> Result<HashMap<String, String>, KvError> {
    let flat = as_strings(command, value)?;
    if flat.len() % 2 != 0 {
        return Err(KvError::UnexpectedResponse {
            command: command.to_string(),
            details: format!("odd number of elements ({})", flat.len()),
        });
    }
    let mut items = flat.into_iter();
    let mut map = HashMap::new();
    while let (Some(field), Some(value)) = (items.next(), items.next()) {
        map.insert(field, value);
    }
    Ok(map)
}

fn field_pairs<'a>(fields: &'a [(&'a str, &'a str)]) -> impl Iterator<Item = String> + 'a {
    fields
        .iter()
        .flat_map(|(field, value)| [(*field).to_string(), (*value).to_string()])
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.into_iter().map(String::from).collect()
}

#[async_trait]
impl KvStore for UpstashClient {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<String>, Report<KvError>> {
        match self.command(args(["GET", key])).await? {
            JsonValue::Null => Ok(None),
            JsonValue::String(value) => Ok(Some(value)),
            other => Err(KvError::UnexpectedResponse {
                command: "GET".to_string(),
                details: format!("expected string, got {other}"),
            }
            .into()),
        }
    }

    #[instrument(skip(self))]
    async fn del(&self, keys: &[&str]) -> Result<u64, Report<KvError>> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut command = vec!["DEL".to_string()];
        command.extend(keys.iter().map(|k| k.to_string()));
        let value = self.command(command).await?;
        Ok(as_u64("DEL", &value)?)
    }

    #[instrument(skip(self))]
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, Report<KvError>> {
        let seconds = ttl.as_secs().max(1).to_string();
        let value = self.command(args(["EXPIRE", key, &seconds])).await?;
        Ok(as_u64("EXPIRE", &value)? == 1)
    }

    #[instrument(skip(self, fields), fields(count = fields.len()))]
    async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> Result<(), Report<KvError>> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut command = args(["HSET", key]);
        command.extend(field_pairs(fields));
        self.command(command).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, Report<KvError>> {
        let value = self.command(args(["HGETALL", key])).await?;
        Ok(as_field_map("HGETALL", value)?)
    }

    #[instrument(skip(self, fields), fields(count = fields.len()))]
    async fn hash_touch(
        &self,
        key: &str,
        fields: &[(&str, &str)],
        stamp_field: &str,
        stamp: i64,
    ) -> Result<Option<i64>, Report<KvError>> {
        let stamp = stamp.to_string();
        let mut command = args(["EVAL", HASH_TOUCH_SCRIPT, "1", key, stamp_field, &stamp]);
        command.extend(field_pairs(fields));
        match self.command(command).await? {
            JsonValue::Null => Ok(None),
            value => Ok(Some(as_i64("EVAL", &value)?)),
        }
    }

    #[instrument(skip(self))]
    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<(), Report<KvError>> {
        let score = score.to_string();
        self.command(args(["ZADD", key, "GT", &score, member]))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn zrevrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, Report<KvError>> {
        let (start, stop) = (start.to_string(), stop.to_string());
        let value = self
            .command(args(["ZRANGE", key, &start, &stop, "REV"]))
            .await?;
        Ok(as_strings("ZRANGE", value)?)
    }

    #[instrument(skip(self))]
    async fn zrem(&self, key: &str, member: &str) -> Result<bool, Report<KvError>> {
        let value = self.command(args(["ZREM", key, member])).await?;
        Ok(as_u64("ZREM", &value)? > 0)
    }

    #[instrument(skip(self, values), fields(count = values.len()))]
    async fn rpush(&self, key: &str, values: &[String]) -> Result<u64, Report<KvError>> {
        let mut command = args(["RPUSH", key]);
        command.extend(values.iter().cloned());
        let value = self.command(command).await?;
        Ok(as_u64("RPUSH", &value)?)
    }

    #[instrument(skip(self))]
    async fn lrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, Report<KvError>> {
        let (start, stop) = (start.to_string(), stop.to_string());
        let value = self.command(args(["LRANGE", key, &start, &stop])).await?;
        Ok(as_strings("LRANGE", value)?)
    }
}
