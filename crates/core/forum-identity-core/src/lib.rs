//! Host collaborator traits for forum single-sign-on.
//!
//! The SSO flow never reaches into the hosting application's storage. Users,
//! session stash entries, notifications and URLs are all accessed through the
//! traits in this crate, so a forum can plug its own database and session
//! layer in behind them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

mod memory;

pub use memory::{InMemorySessionStash, InMemoryUserStore, RecordingEventSink};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type HostResult<T> = Result<T, HostError>;

/// A user record as seen by the SSO flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostUser {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    /// Per-provider attribute bags, keyed by provider key
    #[serde(default)]
    pub attributes: serde_json::Map<String, Value>,
}

impl HostUser {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
            attributes: serde_json::Map::new(),
        }
    }

    /// Access token stored under `{provider_key}.AccessToken`, if any
    pub fn stored_access_token(&self, provider_key: &str) -> Option<&str> {
        self.attributes
            .get(provider_key)
            .and_then(|bag| bag.get("AccessToken"))
            .and_then(Value::as_str)
    }
}

/// Association between a host user and an identity at a provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityLink {
    pub user_id: String,
    pub provider_key: String,
    pub unique_id: String,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Access token the signed-in user holds for a provider
    async fn current_access_token(&self, provider_key: &str) -> HostResult<Option<String>>;

    async fn get_user_by_id(&self, id: &str) -> HostResult<Option<HostUser>>;

    async fn save_identity_link(
        &self,
        user_id: &str,
        provider_key: &str,
        unique_id: &str,
    ) -> HostResult<()>;

    async fn save_user_attribute(
        &self,
        user_id: &str,
        provider_key: &str,
        attributes: Value,
    ) -> HostResult<()>;
}

/// Session-scoped holder used to carry data across a browser redirect.
///
/// Entries are private to one session and keyed by provider key. `take`
/// consumes the entry: a second `take` for the same key returns `None`.
#[async_trait]
pub trait SessionStash: Send + Sync {
    /// Store a value, returning whatever it replaced
    async fn put(&self, session_id: &str, key: &str, value: Value) -> HostResult<Option<Value>>;

    /// Retrieve and remove a value
    async fn take(&self, session_id: &str, key: &str) -> HostResult<Option<Value>>;

    async fn clear(&self, session_id: &str, key: &str) -> HostResult<()>;
}

/// Notifications emitted to the host after flow milestones
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum SsoEvent {
    AfterConnection { provider: String, user_id: String },
}

impl SsoEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SsoEvent::AfterConnection { .. } => "AfterConnection",
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn notify(&self, event: SsoEvent) -> HostResult<()>;
}

/// An event sink that drops every event
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn notify(&self, _event: SsoEvent) -> HostResult<()> {
        Ok(())
    }
}

/// An event sink that writes every event to the log
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn notify(&self, event: SsoEvent) -> HostResult<()> {
        info!(event = event.name(), payload = ?event, "SSO event");
        Ok(())
    }
}

/// Resolves host-relative paths into absolute URLs
pub trait UrlResolver: Send + Sync {
    fn absolute_url(&self, path: &str) -> String;

    /// Path of the page listing a user's connected providers
    fn connections_path(&self, user_id: &str) -> String {
        format!("/profile/connections/{}", user_id)
    }
}

/// A resolver that prefixes paths with a fixed base URL
#[derive(Debug, Clone)]
pub struct BaseUrlResolver {
    base: String,
}

impl BaseUrlResolver {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }
}

impl UrlResolver for BaseUrlResolver {
    fn absolute_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }
}
