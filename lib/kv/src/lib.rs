//! Key-value store adapter for beyond-ops.
//!
//! This crate provides:
//!
//! - **`KvStore`**: the narrow set of Redis commands the conversation store
//!   needs (strings, lists, sorted sets, expiry)
//! - **`UpstashClient`**: production implementation over the Upstash REST API
//! - **`MemoryStore`**: in-process implementation with real TTL semantics,
//!   used by tests and local development
//! - **`KvCredentialSources`**: resolution of the two accepted env naming
//!   conventions into a single `KvConfig`
//!
//! The client is built once at start-up and shared as `Arc<dyn KvStore>`.

pub mod config;
pub mod error;
pub mod memory;
pub mod store;
pub mod upstash;

pub use config::{KvConfig, KvCredentialSources};
pub use error::KvError;
pub use memory::MemoryStore;
pub use store::KvStore;
pub use upstash::UpstashClient;
