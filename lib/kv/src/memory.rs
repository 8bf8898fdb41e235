//! In-process key-value store.
//!
//! Mirrors the Redis behaviour the application depends on: typed values,
//! `WRONGTYPE` errors, `ZADD GT` scoring and per-key expiry checked lazily
//! on access. Lists and sorted sets disappear once they become empty.

use crate::error::KvError;
use crate::store::KvStore;
use async_trait::async_trait;
use rootcause::Report;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(Vec<String>),
    SortedSet(BTreeMap<String, i64>),
    Hash(BTreeMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Shared in-memory store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a plain string value, as older writers of the store did.
    pub fn set_string(&self, key: &str, value: &str, ttl: Duration) {
        self.lock().insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    /// Drops a key as if its expiry had elapsed.
    pub fn evict(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Returns the remaining time to live of a key, if it has one.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.lock();
        entries
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Returns whether a live key exists.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.lock().get(key).is_some_and(|e| e.is_live(now))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // A poisoned map is still structurally valid; keep serving it.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn live<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
    ) -> Option<&'a mut Entry> {
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

fn wrong_type(key: &str) -> Report<KvError> {
    KvError::WrongType {
        key: key.to_string(),
    }
    .into()
}

fn slice_bounds(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Report<KvError>> {
        let mut entries = self.lock();
        match Self::live(&mut entries, key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn del(&self, keys: &[&str]) -> Result<u64, Report<KvError>> {
        let mut entries = self.lock();
        let mut removed = 0;
        for key in keys {
            if Self::live(&mut entries, key).is_some() {
                entries.remove(*key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, Report<KvError>> {
        let mut entries = self.lock();
        match Self::live(&mut entries, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> Result<(), Report<KvError>> {
        let mut entries = self.lock();
        if Self::live(&mut entries, key).is_none() {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Hash(BTreeMap::new()),
                    expires_at: None,
                },
            );
        }
        let Some(Entry {
            value: Value::Hash(hash),
            ..
        }) = entries.get_mut(key)
        else {
            return Err(wrong_type(key));
        };
        for (field, value) in fields {
            hash.insert((*field).to_string(), (*value).to_string());
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, Report<KvError>> {
        let mut entries = self.lock();
        match Self::live(&mut entries, key) {
            None => Ok(HashMap::new()),
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hash_touch(
        &self,
        key: &str,
        fields: &[(&str, &str)],
        stamp_field: &str,
        stamp: i64,
    ) -> Result<Option<i64>, Report<KvError>> {
        let mut entries = self.lock();
        let hash = match Self::live(&mut entries, key) {
            None => return Ok(None),
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => hash,
            Some(_) => return Err(wrong_type(key)),
        };
        for (field, value) in fields {
            hash.insert((*field).to_string(), (*value).to_string());
        }
        let current = hash.get(stamp_field).and_then(|v| v.parse::<i64>().ok());
        match current {
            Some(current) if current >= stamp => Ok(Some(current)),
            _ => {
                hash.insert(stamp_field.to_string(), stamp.to_string());
                Ok(Some(stamp))
            }
        }
    }

    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<(), Report<KvError>> {
        let mut entries = self.lock();
        match Self::live(&mut entries, key) {
            Some(Entry {
                value: Value::SortedSet(set),
                ..
            }) => {
                let entry = set.entry(member.to_string()).or_insert(score);
                *entry = (*entry).max(score);
            }
            Some(_) => return Err(wrong_type(key)),
            None => {
                let mut set = BTreeMap::new();
                set.insert(member.to_string(), score);
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::SortedSet(set),
                        expires_at: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn zrevrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, Report<KvError>> {
        let mut entries = self.lock();
        let set = match Self::live(&mut entries, key) {
            None => return Ok(Vec::new()),
            Some(Entry {
                value: Value::SortedSet(set),
                ..
            }) => set,
            Some(_) => return Err(wrong_type(key)),
        };

        // Redis orders equal scores lexicographically; REV reverses both.
        let mut members: Vec<(&String, &i64)> = set.iter().collect();
        members.sort_by(|a, b| b.1.cmp(a.1).then_with(|| b.0.cmp(a.0)));

        Ok(match slice_bounds(members.len(), start, stop) {
            Some((from, to)) => members[from..=to].iter().map(|(m, _)| (*m).clone()).collect(),
            None => Vec::new(),
        })
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, Report<KvError>> {
        let mut entries = self.lock();
        let (removed, now_empty) = match Self::live(&mut entries, key) {
            None => return Ok(false),
            Some(Entry {
                value: Value::SortedSet(set),
                ..
            }) => (set.remove(member).is_some(), set.is_empty()),
            Some(_) => return Err(wrong_type(key)),
        };
        if now_empty {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn rpush(&self, key: &str, values: &[String]) -> Result<u64, Report<KvError>> {
        let mut entries = self.lock();
        match Self::live(&mut entries, key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                list.extend(values.iter().cloned());
                Ok(list.len() as u64)
            }
            Some(_) => Err(wrong_type(key)),
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::List(values.to_vec()),
                        expires_at: None,
                    },
                );
                Ok(values.len() as u64)
            }
        }
    }

    async fn lrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, Report<KvError>> {
        let mut entries = self.lock();
        match Self::live(&mut entries, key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(match slice_bounds(list.len(), start, stop) {
                Some((from, to)) => list[from..=to].to_vec(),
                None => Vec::new(),
            }),
            Some(_) => Err(wrong_type(key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn string_values_read_back() {
        let store = MemoryStore::new();
        store.set_string("k", "v", HOUR);
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert!(store.ttl("k").is_some());
    }

    #[tokio::test]
    async fn expired_keys_disappear() {
        let store = MemoryStore::new();
        store.set_string("k", "v", Duration::ZERO);
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.expire("k", HOUR).await.unwrap());
    }

    #[tokio::test]
    async fn zrevrange_orders_by_descending_score() {
        let store = MemoryStore::new();
        store.zadd("z", 10, "a").await.unwrap();
        store.zadd("z", 30, "b").await.unwrap();
        store.zadd("z", 20, "c").await.unwrap();
        assert_eq!(store.zrevrange("z", 0, -1).await.unwrap(), vec!["b", "c", "a"]);
        assert_eq!(store.zrevrange("z", 0, 1).await.unwrap(), vec!["b", "c"]);

        // Re-scoring moves a member instead of duplicating it.
        store.zadd("z", 40, "a").await.unwrap();
        assert_eq!(store.zrevrange("z", 0, 0).await.unwrap(), vec!["a"]);

        // A lower score leaves the member where it is.
        store.zadd("z", 5, "a").await.unwrap();
        assert_eq!(store.zrevrange("z", 0, 0).await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn hash_fields_merge() {
        let store = MemoryStore::new();
        assert!(store.hgetall("h").await.unwrap().is_empty());

        store.hset("h", &[("a", "1"), ("b", "2")]).await.unwrap();
        store.hset("h", &[("b", "3")]).await.unwrap();

        let fields = store.hgetall("h").await.unwrap();
        assert_eq!(fields.get("a").map(String::as_str), Some("1"));
        assert_eq!(fields.get("b").map(String::as_str), Some("3"));
    }

    #[tokio::test]
    async fn hash_touch_only_raises_the_stamp() {
        let store = MemoryStore::new();
        assert_eq!(store.hash_touch("h", &[], "at", 10).await.unwrap(), None);
        assert!(!store.contains("h"));

        store.hset("h", &[("at", "20"), ("title", "old")]).await.unwrap();

        let stamp = store.hash_touch("h", &[("title", "new")], "at", 15).await.unwrap();
        assert_eq!(stamp, Some(20));
        let stamp = store.hash_touch("h", &[], "at", 30).await.unwrap();
        assert_eq!(stamp, Some(30));

        let fields = store.hgetall("h").await.unwrap();
        assert_eq!(fields.get("title").map(String::as_str), Some("new"));
        assert_eq!(fields.get("at").map(String::as_str), Some("30"));
    }

    #[tokio::test]
    async fn zrem_removes_and_reports() {
        let store = MemoryStore::new();
        store.zadd("z", 1, "a").await.unwrap();
        assert!(store.zrem("z", "a").await.unwrap());
        assert!(!store.zrem("z", "a").await.unwrap());
        assert!(!store.contains("z"));
    }

    #[tokio::test]
    async fn list_push_and_range() {
        let store = MemoryStore::new();
        let len = store
            .rpush("l", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(len, 2);
        assert_eq!(store.rpush("l", &["c".to_string()]).await.unwrap(), 3);
        assert_eq!(store.lrange("l", 0, -1).await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(store.lrange("l", -2, -1).await.unwrap(), vec!["b", "c"]);
        assert!(store.lrange("missing", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn type_mismatch_is_wrongtype() {
        let store = MemoryStore::new();
        store.set_string("k", "v", HOUR);
        let err = store.lrange("k", 0, -1).await.unwrap_err();
        assert!(matches!(err.current_context(), KvError::WrongType { .. }));
        let err = store.hgetall("k").await.unwrap_err();
        assert!(matches!(err.current_context(), KvError::WrongType { .. }));
    }

    #[tokio::test]
    async fn del_counts_existing_keys() {
        let store = MemoryStore::new();
        store.set_string("a", "1", HOUR);
        store.rpush("b", &["x".to_string()]).await.unwrap();
        assert_eq!(store.del(&["a", "b", "c"]).await.unwrap(), 2);
        assert_eq!(store.del(&["a"]).await.unwrap(), 0);
    }

    #[test]
    fn slice_bounds_follow_redis_rules() {
        assert_eq!(slice_bounds(5, 0, -1), Some((0, 4)));
        assert_eq!(slice_bounds(5, 1, 100), Some((1, 4)));
        assert_eq!(slice_bounds(5, -100, 1), Some((0, 1)));
        assert_eq!(slice_bounds(5, 3, 1), None);
        assert_eq!(slice_bounds(0, 0, -1), None);
    }
}
