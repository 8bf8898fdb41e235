//! Conversation persistence over the key-value store.
//!
//! Messages live in a store-native list, so appends are a single atomic
//! push and concurrent turns on one conversation cannot overwrite each
//! other. Metadata is a hash: a rename writes only `title`, an append only
//! raises `updatedAt`, so neither can undo the other. The message count is
//! derived from the decoded history whenever metadata is loaded.
//!
//! Redis cannot hold an empty list: a fresh conversation has no message key
//! until its first append, and an absent key reads as zero messages.

use crate::conversation::{Conversation, ConversationMeta, DEFAULT_TITLE, derive_title};
use crate::error::{StoreError, unavailable};
use crate::export::to_markdown;
use crate::keys;
use crate::message::ChatMessage;
use beyond_ops_core::ConversationId;
use beyond_ops_kv::{KvError, KvStore};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use rootcause::Report;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Default lifetime of conversation state after its last mutation.
pub const DEFAULT_TTL: Duration = Duration::from_secs(90 * 24 * 60 * 60);

/// Store tuning.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Expiry applied to metadata, messages and index on every mutation.
    pub ttl: Duration,
    /// Title used when none is supplied.
    pub default_title: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            default_title: DEFAULT_TITLE.to_string(),
        }
    }
}

const TITLE: &str = "title";
const UPDATED_AT: &str = "updatedAt";

/// Metadata as persisted: everything except the derived message count.
#[derive(Debug, Clone)]
struct StoredMeta {
    id: ConversationId,
    title: String,
    user_email: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StoredMeta {
    fn to_fields(&self) -> [(&'static str, String); 5] {
        [
            ("id", self.id.to_string()),
            (TITLE, self.title.clone()),
            ("userEmail", self.user_email.clone()),
            ("createdAt", self.created_at.timestamp_millis().to_string()),
            (UPDATED_AT, self.updated_at.timestamp_millis().to_string()),
        ]
    }

    fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        let millis = |name: &str| {
            fields
                .get(name)?
                .parse::<i64>()
                .ok()
                .and_then(DateTime::<Utc>::from_timestamp_millis)
        };
        Some(Self {
            id: fields.get("id")?.parse().ok()?,
            title: fields.get(TITLE)?.clone(),
            user_email: fields.get("userEmail")?.clone(),
            created_at: millis("createdAt")?,
            updated_at: millis(UPDATED_AT)?,
        })
    }

    fn into_meta(self, message_count: u64) -> ConversationMeta {
        ConversationMeta {
            id: self.id,
            title: self.title,
            user_email: self.user_email,
            created_at: self.created_at,
            updated_at: self.updated_at,
            message_count,
        }
    }
}

/// Metadata written as one JSON document by older releases.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyMeta {
    id: ConversationId,
    title: String,
    user_email: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<LegacyMeta> for StoredMeta {
    fn from(legacy: LegacyMeta) -> Self {
        Self {
            id: legacy.id,
            title: legacy.title,
            user_email: legacy.user_email,
            created_at: legacy.created_at,
            updated_at: legacy.updated_at,
        }
    }
}

/// Per-user conversation storage.
#[derive(Clone)]
pub struct ConversationStore {
    kv: Arc<dyn KvStore>,
    settings: StoreSettings,
}

impl ConversationStore {
    /// Creates a store over an already-constructed key-value client.
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, settings: StoreSettings) -> Self {
        Self { kv, settings }
    }

    /// Returns the store settings.
    #[must_use]
    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Creates an empty conversation owned by `user_email`.
    #[instrument(skip_all)]
    pub async fn create_conversation(
        &self,
        user_email: &str,
        title: Option<&str>,
    ) -> Result<ConversationId, Report<StoreError>> {
        let id = ConversationId::new();
        let now = Utc::now();
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.settings.default_title)
            .to_string();

        let record = StoredMeta {
            id,
            title,
            user_email: user_email.trim().to_string(),
            created_at: now,
            updated_at: now,
        };

        self.write_meta(&record).await?;
        self.touch_index(&record.user_email, &id, now.timestamp_millis())
            .await?;

        debug!(conversation_id = %id, "created conversation");
        Ok(id)
    }

    /// Lists a user's conversations, most recently active first.
    ///
    /// Index entries whose metadata has expired are dropped from the result
    /// and pruned from the index.
    #[instrument(skip(self, user_email))]
    pub async fn get_conversations(
        &self,
        user_email: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMeta>, Report<StoreError>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let index = keys::index_key(user_email);
        let stop = i64::try_from(limit).unwrap_or(i64::MAX) - 1;
        let raw_ids = self
            .kv
            .zrevrange(&index, 0, stop)
            .await
            .map_err(unavailable)?;

        let loaded = try_join_all(raw_ids.iter().map(|raw| self.load_listed(raw))).await?;

        let mut listed = Vec::with_capacity(loaded.len());
        let mut stale = Vec::new();
        for (raw, entry) in raw_ids.iter().zip(loaded) {
            match entry {
                Some(meta) if meta.is_owned_by(user_email) => listed.push(meta),
                _ => stale.push(raw.as_str()),
            }
        }

        for raw in stale {
            if let Err(report) = self.kv.zrem(&index, raw).await {
                warn!(
                    conversation_id = %raw,
                    error = %report.current_context(),
                    "failed to prune stale index entry"
                );
            }
        }

        Ok(listed)
    }

    /// Loads metadata without the message list.
    #[instrument(skip(self))]
    pub async fn get_meta(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationMeta>, Report<StoreError>> {
        let Some(record) = self.read_meta(id).await? else {
            return Ok(None);
        };
        let count = self.load_messages(id).await?.len() as u64;
        Ok(Some(record.into_meta(count)))
    }

    /// Loads a conversation with its messages, or `None` if it is gone.
    ///
    /// A corrupted message payload reads as an empty history.
    #[instrument(skip(self))]
    pub async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, Report<StoreError>> {
        let Some(record) = self.read_meta(id).await? else {
            return Ok(None);
        };
        let messages = self.load_messages(id).await?;
        let meta = record.into_meta(messages.len() as u64);
        Ok(Some(Conversation { meta, messages }))
    }

    /// Appends messages, bumps `updated_at` and moves the conversation to
    /// the top of its owner's index. Empty input is a no-op.
    #[instrument(skip(self, messages), fields(count = messages.len()))]
    pub async fn append_messages(
        &self,
        id: &ConversationId,
        messages: &[ChatMessage],
    ) -> Result<(), Report<StoreError>> {
        if messages.is_empty() {
            return Ok(());
        }

        let Some(record) = self.read_meta(id).await? else {
            return Err(not_found(id));
        };

        let encoded = messages
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Serialization {
                details: e.to_string(),
            })?;
        let length = self.push_messages(id, &encoded).await?;

        let stamp = self.touch_meta(id, &[]).await?;
        self.touch_index(&record.user_email, id, stamp).await?;

        debug!(conversation_id = %id, length, "appended messages");
        Ok(())
    }

    /// Appends a finished chat turn. On the first exchange of a conversation
    /// that still has the default title, the title is derived from the first
    /// user message.
    #[instrument(skip(self, messages), fields(count = messages.len()))]
    pub async fn append_exchange(
        &self,
        id: &ConversationId,
        messages: &[ChatMessage],
    ) -> Result<ConversationMeta, Report<StoreError>> {
        let Some(before) = self.get_meta(id).await? else {
            return Err(not_found(id));
        };

        self.append_messages(id, messages).await?;

        if before.message_count == 0 && before.title == self.settings.default_title {
            if let Some(title) = derive_title(messages) {
                self.update_conversation_title(id, &title).await?;
            }
        }

        self.get_meta(id).await?.ok_or_else(|| not_found(id))
    }

    /// Renames a conversation.
    #[instrument(skip(self, title))]
    pub async fn update_conversation_title(
        &self,
        id: &ConversationId,
        title: &str,
    ) -> Result<(), Report<StoreError>> {
        let Some(record) = self.read_meta(id).await? else {
            return Err(not_found(id));
        };

        let title = match title.trim() {
            "" => self.settings.default_title.as_str(),
            title => title,
        };

        let stamp = self.touch_meta(id, &[(TITLE, title)]).await?;
        self.kv
            .expire(&keys::messages_key(id), self.settings.ttl)
            .await
            .map_err(unavailable)?;
        self.touch_index(&record.user_email, id, stamp).await?;
        Ok(())
    }

    /// Deletes a conversation. Deleting a missing conversation succeeds.
    ///
    /// Metadata and messages are only removed when the conversation belongs
    /// to `user_email`; the caller's own index entry is always removed.
    #[instrument(skip(self, user_email))]
    pub async fn delete_conversation(
        &self,
        user_email: &str,
        id: &ConversationId,
    ) -> Result<(), Report<StoreError>> {
        let member = id.to_string();
        self.kv
            .zrem(&keys::index_key(user_email), &member)
            .await
            .map_err(unavailable)?;

        if let Some(record) = self.read_meta(id).await? {
            if !record.into_meta(0).is_owned_by(user_email) {
                warn!(
                    conversation_id = %id,
                    "refusing to delete conversation owned by another user"
                );
                return Ok(());
            }
        }

        let (meta_key, messages_key) = (keys::meta_key(id), keys::messages_key(id));
        let removed = self
            .kv
            .del(&[meta_key.as_str(), messages_key.as_str()])
            .await
            .map_err(unavailable)?;

        debug!(conversation_id = %id, removed, "deleted conversation");
        Ok(())
    }

    /// Renders a conversation as Markdown.
    #[instrument(skip(self))]
    pub async fn export_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<String, Report<StoreError>> {
        let conversation = self
            .get_conversation(id)
            .await?
            .ok_or_else(|| not_found(id))?;
        Ok(to_markdown(&conversation))
    }

    async fn load_listed(&self, raw: &str) -> Result<Option<ConversationMeta>, Report<StoreError>> {
        let Ok(id) = raw.parse::<ConversationId>() else {
            warn!(member = %raw, "ignoring malformed index entry");
            return Ok(None);
        };
        self.get_meta(&id).await
    }

    async fn read_meta(
        &self,
        id: &ConversationId,
    ) -> Result<Option<StoredMeta>, Report<StoreError>> {
        let key = keys::meta_key(id);
        let fields = match self.kv.hgetall(&key).await {
            Ok(fields) => fields,
            Err(report) if is_wrong_type(&report) => return self.migrate_meta(id, &key).await,
            Err(report) => return Err(unavailable(report)),
        };
        if fields.is_empty() {
            return Ok(None);
        }

        let record = StoredMeta::from_fields(&fields);
        if record.is_none() {
            warn!(conversation_id = %id, "unreadable conversation metadata");
        }
        Ok(record)
    }

    /// Rewrites metadata stored as a JSON string into the hash layout.
    async fn migrate_meta(
        &self,
        id: &ConversationId,
        key: &str,
    ) -> Result<Option<StoredMeta>, Report<StoreError>> {
        let raw = match self.kv.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(report) if is_wrong_type(&report) => {
                warn!(conversation_id = %id, "metadata key holds an unexpected type");
                return Ok(None);
            }
            Err(report) => return Err(unavailable(report)),
        };

        let record = match serde_json::from_str::<LegacyMeta>(&raw) {
            Ok(legacy) => StoredMeta::from(legacy),
            Err(e) => {
                warn!(conversation_id = %id, error = %e, "unreadable conversation metadata");
                return Ok(None);
            }
        };

        self.kv.del(&[key]).await.map_err(unavailable)?;
        self.write_meta(&record).await?;
        debug!(conversation_id = %id, "migrated legacy metadata");
        Ok(Some(record))
    }

    async fn write_meta(&self, record: &StoredMeta) -> Result<(), Report<StoreError>> {
        let key = keys::meta_key(&record.id);
        let fields = record.to_fields();
        let pairs: Vec<(&str, &str)> = fields.iter().map(|(f, v)| (*f, v.as_str())).collect();
        self.kv.hset(&key, &pairs).await.map_err(unavailable)?;
        self.kv
            .expire(&key, self.settings.ttl)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    /// Writes `fields` and raises `updatedAt` to now, returning the stamp
    /// the record ends up with. Fails with not-found if the record is gone.
    async fn touch_meta(
        &self,
        id: &ConversationId,
        fields: &[(&str, &str)],
    ) -> Result<i64, Report<StoreError>> {
        let key = keys::meta_key(id);
        let now = Utc::now().timestamp_millis();
        let stamp = self
            .kv
            .hash_touch(&key, fields, UPDATED_AT, now)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| not_found(id))?;
        self.kv
            .expire(&key, self.settings.ttl)
            .await
            .map_err(unavailable)?;
        Ok(stamp)
    }

    async fn touch_index(
        &self,
        user_email: &str,
        id: &ConversationId,
        at_millis: i64,
    ) -> Result<(), Report<StoreError>> {
        let index = keys::index_key(user_email);
        self.kv
            .zadd(&index, at_millis, &id.to_string())
            .await
            .map_err(unavailable)?;
        self.kv
            .expire(&index, self.settings.ttl)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn load_messages(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<ChatMessage>, Report<StoreError>> {
        let key = keys::messages_key(id);
        match self.kv.lrange(&key, 0, -1).await {
            Ok(items) => Ok(decode_list(id, &items)),
            Err(report) if is_wrong_type(&report) => self.load_legacy(id, &key).await,
            Err(report) => Err(unavailable(report)),
        }
    }

    /// Reads the older layout, where the whole history was one JSON string.
    async fn load_legacy(
        &self,
        id: &ConversationId,
        key: &str,
    ) -> Result<Vec<ChatMessage>, Report<StoreError>> {
        match self.kv.get(key).await {
            Ok(Some(raw)) => Ok(decode_legacy(id, &raw)),
            Ok(None) => Ok(Vec::new()),
            Err(report) if is_wrong_type(&report) => {
                warn!(conversation_id = %id, "message key holds an unexpected type");
                Ok(Vec::new())
            }
            Err(report) => Err(unavailable(report)),
        }
    }

    async fn push_messages(
        &self,
        id: &ConversationId,
        encoded: &[String],
    ) -> Result<u64, Report<StoreError>> {
        let key = keys::messages_key(id);
        let length = match self.kv.rpush(&key, encoded).await {
            Ok(length) => length,
            Err(report) if is_wrong_type(&report) => {
                // Convert a legacy string payload into a list, keeping what parses.
                let mut migrated = self
                    .load_legacy(id, &key)
                    .await?
                    .iter()
                    .filter_map(|m| serde_json::to_string(m).ok())
                    .collect::<Vec<_>>();
                migrated.extend(encoded.iter().cloned());
                self.kv.del(&[key.as_str()]).await.map_err(unavailable)?;
                self.kv.rpush(&key, &migrated).await.map_err(unavailable)?
            }
            Err(report) => return Err(unavailable(report)),
        };

        self.kv
            .expire(&key, self.settings.ttl)
            .await
            .map_err(unavailable)?;
        Ok(length)
    }
}

fn not_found(id: &ConversationId) -> Report<StoreError> {
    StoreError::NotFound { id: id.to_string() }.into()
}

fn is_wrong_type(report: &Report<KvError>) -> bool {
    matches!(report.current_context(), KvError::WrongType { .. })
}

fn decode_list(id: &ConversationId, items: &[String]) -> Vec<ChatMessage> {
    match items
        .iter()
        .map(|item| serde_json::from_str::<ChatMessage>(item))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(messages) => messages,
        Err(e) => {
            warn!(conversation_id = %id, error = %e, "corrupted message list, treating as empty");
            Vec::new()
        }
    }
}

fn decode_legacy(id: &ConversationId, raw: &str) -> Vec<ChatMessage> {
    match serde_json::from_str::<JsonValue>(raw) {
        Ok(JsonValue::Array(items)) => items
            .into_iter()
            .map(serde_json::from_value::<ChatMessage>)
            .collect::<Result<Vec<_>, _>>()
            .unwrap_or_else(|e| {
                warn!(
                    conversation_id = %id,
                    error = %e,
                    "corrupted legacy messages, treating as empty"
                );
                Vec::new()
            }),
        _ => {
            warn!(conversation_id = %id, "legacy message payload is not a list, treating as empty");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageRole, ToolInvocation};
    use async_trait::async_trait;
    use beyond_ops_kv::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    const REP: &str = "rep@beyond.example";
    const OTHER: &str = "other@beyond.example";

    fn store() -> (ConversationStore, MemoryStore) {
        let kv = MemoryStore::new();
        let store = ConversationStore::new(Arc::new(kv.clone()), StoreSettings::default());
        (store, kv)
    }

    async fn pause() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    async fn listed_ids(store: &ConversationStore) -> Vec<ConversationId> {
        let listed = store.get_conversations(REP, 10).await.unwrap();
        listed.into_iter().map(|meta| meta.id).collect()
    }

    #[tokio::test]
    async fn create_starts_empty_with_default_title() {
        let (store, kv) = store();
        let id = store.create_conversation(REP, None).await.unwrap();

        let conversation = store.get_conversation(&id).await.unwrap().expect("exists");
        assert_eq!(conversation.meta.title, DEFAULT_TITLE);
        assert_eq!(conversation.meta.message_count, 0);
        assert!(conversation.messages.is_empty());
        assert_eq!(conversation.meta.user_email, REP);

        assert!(kv.ttl(&keys::meta_key(&id)).is_some());
        assert!(kv.ttl(&keys::index_key(REP)).is_some());
    }

    #[tokio::test]
    async fn create_uses_supplied_title() {
        let (store, _) = store();
        let id = store
            .create_conversation(REP, Some("  Q4 targets "))
            .await
            .unwrap();
        let meta = store.get_meta(&id).await.unwrap().expect("exists");
        assert_eq!(meta.title, "Q4 targets");
    }

    #[tokio::test]
    async fn count_tracks_list_length_across_appends() {
        let (store, _) = store();
        let id = store.create_conversation(REP, None).await.unwrap();

        for batch in [1usize, 2, 3] {
            let messages: Vec<_> = (0..batch).map(|i| ChatMessage::user(format!("m{i}"))).collect();
            store.append_messages(&id, &messages).await.unwrap();

            let conversation = store.get_conversation(&id).await.unwrap().expect("exists");
            assert_eq!(conversation.meta.message_count as usize, conversation.messages.len());
            let meta = store.get_meta(&id).await.unwrap().expect("exists");
            assert_eq!(meta.message_count as usize, conversation.messages.len());
        }

        let conversation = store.get_conversation(&id).await.unwrap().expect("exists");
        assert_eq!(conversation.messages.len(), 6);
    }

    #[tokio::test]
    async fn empty_append_is_noop() {
        let (store, _) = store();
        let id = store.create_conversation(REP, None).await.unwrap();
        let before = store.get_meta(&id).await.unwrap().expect("exists");

        store.append_messages(&id, &[]).await.unwrap();

        let after = store.get_meta(&id).await.unwrap().expect("exists");
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn append_to_missing_conversation_is_not_found() {
        let (store, _) = store();
        let err = store
            .append_messages(&ConversationId::new(), &[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(err.current_context().is_not_found());
    }

    #[tokio::test]
    async fn listing_is_isolated_per_user() {
        let (store, _) = store();
        let mine = store.create_conversation(REP, None).await.unwrap();
        let theirs = store.create_conversation(OTHER, None).await.unwrap();

        let listed: Vec<_> = store
            .get_conversations(REP, 50)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();

        assert_eq!(listed, vec![mine]);
        assert!(!listed.contains(&theirs));
    }

    #[tokio::test]
    async fn append_moves_conversation_to_top() {
        let (store, _) = store();
        let first = store.create_conversation(REP, None).await.unwrap();
        pause().await;
        let second = store.create_conversation(REP, None).await.unwrap();
        pause().await;

        let listed = listed_ids(&store).await;
        assert_eq!(listed, vec![second, first]);

        store
            .append_messages(&first, &[ChatMessage::user("bump")])
            .await
            .unwrap();

        let listed = listed_ids(&store).await;
        assert_eq!(listed, vec![first, second]);
    }

    #[tokio::test]
    async fn listing_respects_limit() {
        let (store, _) = store();
        for _ in 0..3 {
            store.create_conversation(REP, None).await.unwrap();
            pause().await;
        }
        assert_eq!(store.get_conversations(REP, 2).await.unwrap().len(), 2);
        assert!(store.get_conversations(REP, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_entries_are_dropped_and_pruned() {
        let (store, kv) = store();
        let kept = store.create_conversation(REP, None).await.unwrap();
        let expired = store.create_conversation(REP, None).await.unwrap();
        kv.evict(&keys::meta_key(&expired));

        let listed = listed_ids(&store).await;
        assert_eq!(listed, vec![kept]);

        let index = kv.zrevrange(&keys::index_key(REP), 0, -1).await.unwrap();
        assert_eq!(index, vec![kept.to_string()]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (store, kv) = store();
        let id = store.create_conversation(REP, None).await.unwrap();
        store
            .append_messages(&id, &[ChatMessage::user("hello")])
            .await
            .unwrap();

        store.delete_conversation(REP, &id).await.unwrap();
        assert!(store.get_conversation(&id).await.unwrap().is_none());

        store.delete_conversation(REP, &id).await.unwrap();
        assert!(store.get_conversation(&id).await.unwrap().is_none());

        assert!(!kv.contains(&keys::messages_key(&id)));
        assert!(store.get_conversations(REP, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_by_non_owner_keeps_data() {
        let (store, _) = store();
        let id = store.create_conversation(REP, None).await.unwrap();

        store.delete_conversation(OTHER, &id).await.unwrap();

        assert!(store.get_conversation(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn corrupted_list_element_reads_as_empty() {
        let (store, kv) = store();
        let id = store.create_conversation(REP, None).await.unwrap();
        store
            .append_messages(&id, &[ChatMessage::user("ok")])
            .await
            .unwrap();
        kv.rpush(&keys::messages_key(&id), &["{not json".to_string()])
            .await
            .unwrap();

        let conversation = store.get_conversation(&id).await.unwrap().expect("exists");
        assert!(conversation.messages.is_empty());
        assert_eq!(conversation.meta.message_count, 0);
    }

    #[tokio::test]
    async fn listed_count_matches_history_after_corruption() {
        let (store, kv) = store();
        let id = store.create_conversation(REP, None).await.unwrap();
        store
            .append_messages(&id, &[ChatMessage::user("ok")])
            .await
            .unwrap();
        kv.rpush(&keys::messages_key(&id), &["{not json".to_string()])
            .await
            .unwrap();

        let history = store.get_conversation(&id).await.unwrap().expect("exists");
        let listed = store.get_conversations(REP, 10).await.unwrap();
        let meta = store.get_meta(&id).await.unwrap().expect("exists");

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].message_count as usize, history.messages.len());
        assert_eq!(meta.message_count as usize, history.messages.len());
        assert_eq!(history.meta.message_count as usize, history.messages.len());
    }

    #[tokio::test]
    async fn corrupted_string_payload_reads_as_empty() {
        let (store, kv) = store();
        let id = store.create_conversation(REP, None).await.unwrap();
        kv.set_string(&keys::messages_key(&id), "definitely not a list", DEFAULT_TTL);

        let conversation = store.get_conversation(&id).await.unwrap().expect("exists");
        assert!(conversation.messages.is_empty());

        kv.set_string(&keys::messages_key(&id), r#"{"role":"user"}"#, DEFAULT_TTL);
        let conversation = store.get_conversation(&id).await.unwrap().expect("exists");
        assert!(conversation.messages.is_empty());
    }

    #[tokio::test]
    async fn legacy_string_payload_is_read_and_migrated() {
        let (store, kv) = store();
        let id = store.create_conversation(REP, None).await.unwrap();
        let legacy = serde_json::to_string(&vec![ChatMessage::user("old")]).unwrap();
        kv.set_string(&keys::messages_key(&id), &legacy, DEFAULT_TTL);

        let conversation = store.get_conversation(&id).await.unwrap().expect("exists");
        assert_eq!(conversation.messages.len(), 1);

        store
            .append_messages(&id, &[ChatMessage::assistant("new")])
            .await
            .unwrap();
        let conversation = store.get_conversation(&id).await.unwrap().expect("exists");
        let contents: Vec<_> = conversation.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["old", "new"]);
        assert_eq!(conversation.meta.message_count, 2);
    }

    #[tokio::test]
    async fn legacy_json_metadata_is_read_and_migrated() {
        let (store, kv) = store();
        let id = ConversationId::new();
        let legacy = json!({
            "id": id.to_string(),
            "title": "Old layout",
            "userEmail": REP,
            "createdAt": "2020-01-05T09:00:00Z",
            "updatedAt": "2020-01-05T09:30:00Z",
            "messageCount": 0
        });
        kv.set_string(&keys::meta_key(&id), &legacy.to_string(), DEFAULT_TTL);

        let meta = store.get_meta(&id).await.unwrap().expect("exists");
        assert_eq!(meta.title, "Old layout");
        assert_eq!(meta.user_email, REP);

        let fields = kv.hgetall(&keys::meta_key(&id)).await.unwrap();
        assert_eq!(fields.get("title").map(String::as_str), Some("Old layout"));

        store
            .append_messages(&id, &[ChatMessage::user("still works")])
            .await
            .unwrap();
        let meta = store.get_meta(&id).await.unwrap().expect("exists");
        assert_eq!(meta.message_count, 1);
        assert!(meta.updated_at > meta.created_at);
    }

    #[tokio::test]
    async fn rename_missing_conversation_is_not_found() {
        let (store, _) = store();
        let err = store
            .update_conversation_title(&ConversationId::new(), "x")
            .await
            .unwrap_err();
        assert!(err.current_context().is_not_found());
    }

    #[tokio::test]
    async fn export_missing_conversation_is_not_found() {
        let (store, _) = store();
        let err = store
            .export_conversation(&ConversationId::new())
            .await
            .unwrap_err();
        assert!(err.current_context().is_not_found());
    }

    #[tokio::test]
    async fn export_has_one_heading_per_stored_message() {
        let (store, _) = store();
        let id = store.create_conversation(REP, None).await.unwrap();
        let messages = vec![
            ChatMessage::user("a"),
            ChatMessage::assistant("b"),
            ChatMessage::user("c"),
            ChatMessage::assistant("d"),
        ];
        store.append_messages(&id, &messages).await.unwrap();

        let markdown = store.export_conversation(&id).await.unwrap();
        let roles: Vec<_> = markdown
            .lines()
            .filter_map(|l| l.strip_prefix("## "))
            .map(|l| l.split(' ').next().unwrap_or_default())
            .collect();
        assert_eq!(roles, vec!["User", "Assistant", "User", "Assistant"]);
    }

    #[tokio::test]
    async fn first_exchange_derives_title() {
        let (store, _) = store();
        let id = store.create_conversation(REP, None).await.unwrap();

        let meta = store
            .append_exchange(
                &id,
                &[
                    ChatMessage::user("Which events need catering confirmed?"),
                    ChatMessage::assistant("Two."),
                ],
            )
            .await
            .unwrap();
        assert_eq!(meta.title, "Which events need catering confirmed?");
        assert_eq!(meta.message_count, 2);

        let meta = store
            .append_exchange(&id, &[ChatMessage::user("And next month?")])
            .await
            .unwrap();
        assert_eq!(meta.title, "Which events need catering confirmed?");
    }

    #[tokio::test]
    async fn exchange_keeps_custom_title() {
        let (store, _) = store();
        let id = store.create_conversation(REP, Some("Wimbledon")).await.unwrap();
        let meta = store
            .append_exchange(&id, &[ChatMessage::user("Who is attending?")])
            .await
            .unwrap();
        assert_eq!(meta.title, "Wimbledon");
    }

    #[tokio::test]
    async fn pipeline_check_in_scenario() {
        let (store, _) = store();
        let id = store.create_conversation(REP, None).await.unwrap();
        let created = store.get_meta(&id).await.unwrap().expect("exists");

        store
            .append_messages(&id, &[ChatMessage::user("Show me this week's pipeline")])
            .await
            .unwrap();
        let after_first = store.get_meta(&id).await.unwrap().expect("exists");
        assert_eq!(after_first.message_count, 1);
        assert_eq!(after_first.title, created.title);

        pause().await;
        let reply = ChatMessage::assistant("You have 4 open deals worth £120k.")
            .with_tool_invocation(ToolInvocation::completed(
                "call_1",
                "get_pipeline",
                json!({"period": "this_week"}),
                json!({"totalAmount": 120000}),
            ));
        store.append_messages(&id, &[reply]).await.unwrap();
        let after_second = store.get_meta(&id).await.unwrap().expect("exists");
        assert_eq!(after_second.message_count, 2);
        assert!(after_second.updated_at > after_first.updated_at);

        store
            .update_conversation_title(&id, "Pipeline check-in")
            .await
            .unwrap();
        let renamed = store.get_meta(&id).await.unwrap().expect("exists");
        assert_eq!(renamed.title, "Pipeline check-in");
        assert_eq!(renamed.message_count, 2);
        assert!(renamed.updated_at >= after_second.updated_at);

        let markdown = store.export_conversation(&id).await.unwrap();
        assert!(markdown.contains("## User"));
        assert!(markdown.contains("## Assistant"));
        assert!(markdown.contains("Show me this week's pipeline"));

        let conversation = store.get_conversation(&id).await.unwrap().expect("exists");
        assert_eq!(conversation.messages[1].role, MessageRole::Assistant);
        assert_eq!(conversation.messages[1].tool_invocations().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_appends_keep_every_message() {
        let (store, _) = store();
        let id = store.create_conversation(REP, None).await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append_messages(&id, &[ChatMessage::user(format!("turn {i}"))])
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let conversation = store.get_conversation(&id).await.unwrap().expect("exists");
        assert_eq!(conversation.messages.len(), 8);
        assert_eq!(conversation.meta.message_count, 8);
    }

    /// Holds back the first metadata touch so another writer can finish
    /// in between.
    struct SlowFirstTouch {
        inner: MemoryStore,
        held: AtomicBool,
    }

    #[async_trait]
    impl KvStore for SlowFirstTouch {
        async fn get(&self, key: &str) -> Result<Option<String>, Report<KvError>> {
            self.inner.get(key).await
        }

        async fn del(&self, keys: &[&str]) -> Result<u64, Report<KvError>> {
            self.inner.del(keys).await
        }

        async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, Report<KvError>> {
            self.inner.expire(key, ttl).await
        }

        async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> Result<(), Report<KvError>> {
            self.inner.hset(key, fields).await
        }

        async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, Report<KvError>> {
            self.inner.hgetall(key).await
        }

        async fn hash_touch(
            &self,
            key: &str,
            fields: &[(&str, &str)],
            stamp_field: &str,
            stamp: i64,
        ) -> Result<Option<i64>, Report<KvError>> {
            if !self.held.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            self.inner.hash_touch(key, fields, stamp_field, stamp).await
        }

        async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<(), Report<KvError>> {
            self.inner.zadd(key, score, member).await
        }

        async fn zrevrange(
            &self,
            key: &str,
            start: i64,
            stop: i64,
        ) -> Result<Vec<String>, Report<KvError>> {
            self.inner.zrevrange(key, start, stop).await
        }

        async fn zrem(&self, key: &str, member: &str) -> Result<bool, Report<KvError>> {
            self.inner.zrem(key, member).await
        }

        async fn rpush(&self, key: &str, values: &[String]) -> Result<u64, Report<KvError>> {
            self.inner.rpush(key, values).await
        }

        async fn lrange(
            &self,
            key: &str,
            start: i64,
            stop: i64,
        ) -> Result<Vec<String>, Report<KvError>> {
            self.inner.lrange(key, start, stop).await
        }
    }

    #[tokio::test]
    async fn slow_append_keeps_concurrent_rename() {
        let kv = Arc::new(SlowFirstTouch {
            inner: MemoryStore::new(),
            held: AtomicBool::new(false),
        });
        let store = ConversationStore::new(kv, StoreSettings::default());
        let id = store.create_conversation(REP, Some("Original")).await.unwrap();

        let appending = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .append_messages(&id, &[ChatMessage::user("late write")])
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        store.update_conversation_title(&id, "Renamed").await.unwrap();
        let renamed = store.get_meta(&id).await.unwrap().expect("exists");

        appending.await.unwrap().unwrap();
        let after = store.get_meta(&id).await.unwrap().expect("exists");

        assert_eq!(after.title, "Renamed");
        assert!(after.updated_at >= renamed.updated_at);
        assert_eq!(after.message_count, 1);
    }
}
