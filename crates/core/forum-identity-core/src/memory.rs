//! In-memory host collaborators, used by the demo server and in tests.

use crate::{
    EventSink, HostError, HostResult, HostUser, IdentityLink, SessionStash, SsoEvent, UserStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory implementation of UserStore
#[derive(Clone, Default)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<HashMap<String, HostUser>>>,
    links: Arc<RwLock<HashSet<IdentityLink>>>,
    current_user: Arc<RwLock<Option<String>>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user: HostUser) {
        let mut users = self.users.write().await;
        users.insert(user.id.clone(), user);
    }

    /// Mark a user as the signed-in user of this store's session
    pub async fn set_current_user(&self, user_id: Option<String>) {
        *self.current_user.write().await = user_id;
    }

    pub async fn identity_links(&self) -> Vec<IdentityLink> {
        self.links.read().await.iter().cloned().collect()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn current_access_token(&self, provider_key: &str) -> HostResult<Option<String>> {
        let current = self.current_user.read().await;
        let Some(user_id) = current.as_deref() else {
            return Ok(None);
        };

        let users = self.users.read().await;
        Ok(users
            .get(user_id)
            .and_then(|user| user.stored_access_token(provider_key))
            .map(String::from))
    }

    async fn get_user_by_id(&self, id: &str) -> HostResult<Option<HostUser>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn save_identity_link(
        &self,
        user_id: &str,
        provider_key: &str,
        unique_id: &str,
    ) -> HostResult<()> {
        if !self.users.read().await.contains_key(user_id) {
            return Err(HostError::UserNotFound(user_id.to_string()));
        }

        let mut links = self.links.write().await;
        // A user holds at most one identity per provider
        links.retain(|link| !(link.user_id == user_id && link.provider_key == provider_key));
        links.insert(IdentityLink {
            user_id: user_id.to_string(),
            provider_key: provider_key.to_string(),
            unique_id: unique_id.to_string(),
        });
        Ok(())
    }

    async fn save_user_attribute(
        &self,
        user_id: &str,
        provider_key: &str,
        attributes: Value,
    ) -> HostResult<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| HostError::UserNotFound(user_id.to_string()))?;
        user.attributes.insert(provider_key.to_string(), attributes);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StashEntry {
    value: Value,
    expires_at: DateTime<Utc>,
}

impl StashEntry {
    fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// In-memory implementation of SessionStash with a per-entry TTL
#[derive(Clone)]
pub struct InMemorySessionStash {
    entries: Arc<RwLock<HashMap<(String, String), StashEntry>>>,
    ttl: Duration,
}

impl InMemorySessionStash {
    /// TTLs beyond chrono's range are clamped to the largest representable one
    pub fn new(ttl_seconds: u64) -> Self {
        let ttl = i64::try_from(ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);

        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    fn expires_at(&self) -> DateTime<Utc> {
        Utc::now()
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Drop expired entries, returning how many were removed
    pub async fn cleanup_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        purge_expired(&mut entries)
    }

    /// Number of held entries, expired ones included
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn purge_expired(entries: &mut HashMap<(String, String), StashEntry>) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired());
    before - entries.len()
}

impl Default for InMemorySessionStash {
    fn default() -> Self {
        Self::new(600) // 10 minutes
    }
}

fn stash_key(session_id: &str, key: &str) -> (String, String) {
    (session_id.to_string(), key.to_string())
}

#[async_trait]
impl SessionStash for InMemorySessionStash {
    async fn put(&self, session_id: &str, key: &str, value: Value) -> HostResult<Option<Value>> {
        let mut entries = self.entries.write().await;
        // Abandoned attempts are never taken, so writes sweep them out
        purge_expired(&mut entries);

        let previous = entries.insert(
            stash_key(session_id, key),
            StashEntry {
                value,
                expires_at: self.expires_at(),
            },
        );

        Ok(previous
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value))
    }

    async fn take(&self, session_id: &str, key: &str) -> HostResult<Option<Value>> {
        let mut entries = self.entries.write().await;

        Ok(entries
            .remove(&stash_key(session_id, key))
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value))
    }

    async fn clear(&self, session_id: &str, key: &str) -> HostResult<()> {
        self.entries
            .write()
            .await
            .remove(&stash_key(session_id, key));
        Ok(())
    }
}

/// Event sink that keeps every event it receives
#[derive(Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<RwLock<Vec<SsoEvent>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<SsoEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn notify(&self, event: SsoEvent) -> HostResult<()> {
        self.events.write().await.push(event);
        Ok(())
    }
}
