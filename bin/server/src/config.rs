//! Centralized server configuration.
//!
//! Loaded once at start-up via the `config` crate from environment
//! variables. Provider credentials use their conventional flat names
//! (`ANTHROPIC_API_KEY`, `SALESFORCE_ACCESS_TOKEN`, ...); tuning knobs are
//! grouped with a `__` separator (`CHAT__MAX_STEPS`).

use beyond_ops_ai::ChatSettings;
use beyond_ops_conversation::{DEFAULT_TITLE, StoreSettings};
use beyond_ops_kv::KvCredentialSources;
use beyond_ops_tools::ToolSettings;
use serde::Deserialize;
use std::time::Duration;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    // Key-value store, either naming convention.
    #[serde(default)]
    pub kv_rest_api_url: Option<String>,
    #[serde(default)]
    pub kv_rest_api_token: Option<String>,
    #[serde(default)]
    pub upstash_redis_rest_url: Option<String>,
    #[serde(default)]
    pub upstash_redis_rest_token: Option<String>,

    // Model provider.
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default)]
    pub anthropic_model: Option<String>,
    #[serde(default)]
    pub anthropic_base_url: Option<String>,

    // CRM.
    #[serde(default)]
    pub salesforce_instance_url: Option<String>,
    #[serde(default)]
    pub salesforce_access_token: Option<String>,
    #[serde(default)]
    pub salesforce_api_version: Option<String>,

    // Telephony.
    #[serde(default)]
    pub aircall_api_id: Option<String>,
    #[serde(default)]
    pub aircall_api_token: Option<String>,
    #[serde(default)]
    pub aircall_base_url: Option<String>,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub conversations: ConversationsConfig,

    #[serde(default)]
    pub finance: FinanceConfig,
}

/// Limits for one chat request.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Model steps per request; each step may run several tools.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Wall-clock bound on one chat request, in seconds.
    #[serde(default = "default_max_duration_seconds")]
    pub max_duration_seconds: u64,

    /// Output token cap per model step.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

/// Conversation persistence settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationsConfig {
    /// Lifetime of idle conversations, in days.
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u64,

    /// Most conversations returned by the list endpoint.
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,

    #[serde(default = "default_title")]
    pub default_title: String,
}

/// Settings for finance reports.
#[derive(Debug, Clone, Deserialize)]
pub struct FinanceConfig {
    #[serde(default = "default_commission_rate")]
    pub commission_rate: f64,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_max_steps() -> u32 {
    5
}

fn default_max_duration_seconds() -> u64 {
    60
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_ttl_days() -> u64 {
    90
}

fn default_list_limit() -> usize {
    50
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

fn default_commission_rate() -> f64 {
    beyond_ops_tools::executor::DEFAULT_COMMISSION_RATE
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_duration_seconds: default_max_duration_seconds(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for ConversationsConfig {
    fn default() -> Self {
        Self {
            ttl_days: default_ttl_days(),
            list_limit: default_list_limit(),
            default_title: default_title(),
        }
    }
}

impl Default for FinanceConfig {
    fn default() -> Self {
        Self {
            commission_rate: default_commission_rate(),
        }
    }
}

impl ChatConfig {
    #[must_use]
    pub fn settings(&self) -> ChatSettings {
        ChatSettings {
            max_steps: self.max_steps.max(1),
            max_duration: Duration::from_secs(self.max_duration_seconds.max(1)),
        }
    }
}

impl ConversationsConfig {
    #[must_use]
    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            ttl: Duration::from_secs(self.ttl_days.max(1) * 24 * 60 * 60),
            default_title: self.default_title.clone(),
        }
    }
}

impl FinanceConfig {
    #[must_use]
    pub fn tool_settings(&self) -> ToolSettings {
        ToolSettings {
            commission_rate: self.commission_rate,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but cannot be parsed.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::load(None)
    }

    /// Loads configuration from the given variables instead of the process
    /// environment.
    pub fn load(vars: Option<config::Map<String, String>>) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()?
            .try_deserialize()
    }

    /// Key-value credentials in both naming conventions.
    #[must_use]
    pub fn kv_sources(&self) -> KvCredentialSources {
        KvCredentialSources {
            kv_rest_api_url: self.kv_rest_api_url.clone(),
            kv_rest_api_token: self.kv_rest_api_token.clone(),
            upstash_redis_rest_url: self.upstash_redis_rest_url.clone(),
            upstash_redis_rest_token: self.upstash_redis_rest_token.clone(),
        }
    }
}
