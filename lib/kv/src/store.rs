//! The `KvStore` trait.

use crate::error::KvError;
use async_trait::async_trait;
use rootcause::Report;
use std::collections::HashMap;
use std::time::Duration;

/// The subset of Redis semantics the application relies on.
///
/// Index arguments follow Redis conventions: inclusive, negative values
/// count from the end (`-1` is the last element).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Reads a string value.
    async fn get(&self, key: &str) -> Result<Option<String>, Report<KvError>>;

    /// Deletes keys, returning how many existed.
    async fn del(&self, keys: &[&str]) -> Result<u64, Report<KvError>>;

    /// Sets a key's expiry. Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, Report<KvError>>;

    /// Writes hash fields, creating the hash if needed.
    async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> Result<(), Report<KvError>>;

    /// Reads every field of a hash. An absent key reads as an empty map.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, Report<KvError>>;

    /// Atomically updates an existing hash: writes `fields`, then raises the
    /// integer field `stamp_field` to `stamp` unless it already holds a
    /// larger value.
    ///
    /// Returns the stamp the hash holds afterwards, or `None` when the hash
    /// does not exist (nothing is written).
    async fn hash_touch(
        &self,
        key: &str,
        fields: &[(&str, &str)],
        stamp_field: &str,
        stamp: i64,
    ) -> Result<Option<i64>, Report<KvError>>;

    /// Adds a sorted-set member or raises its score. Scores never decrease.
    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<(), Report<KvError>>;

    /// Returns sorted-set members by descending score.
    async fn zrevrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, Report<KvError>>;

    /// Removes a sorted-set member. Returns whether it was present.
    async fn zrem(&self, key: &str, member: &str) -> Result<bool, Report<KvError>>;

    /// Appends values to a list atomically, returning the new length.
    async fn rpush(&self, key: &str, values: &[String]) -> Result<u64, Report<KvError>>;

    /// Reads a range of a list.
    async fn lrange(&self, key: &str, start: i64, stop: i64)
    -> Result<Vec<String>, Report<KvError>>;
}
