//! OAuth2 single-sign-on for forum identity providers.
//!
//! This crate drives the authorization-code flow against a configurable
//! provider: building the authorize URL, exchanging the returned code for an
//! access token, fetching and normalizing the user's profile, and then either
//! linking the identity to an existing user or stashing it in the session for
//! the host's connect entry point. Host storage is reached only through the
//! forum-identity-core traits.

mod api;
mod client;
mod config;
mod diagnostics;
mod error;
mod flow;
mod store;
mod types;

#[cfg(test)]
mod tests;

pub use api::{ApiClient, ApiMethod, ApiOptions, DEFAULT_CONTENT_TYPE};
pub use client::OAuth2Client;
pub use config::{
    DEFAULT_ACCEPTED_SCOPE, ENTRY_PATH, Params, ProfileKeyMap, ProviderConfig, RequestOverrides,
    SsoConfig, merge_params,
};
pub use diagnostics::{Diagnostics, SSO_LOG_TARGET, redact};
pub use error::{OAuth2Error, OAuth2Result};
pub use flow::{SsoFlow, SsoHost};
pub use store::{InMemoryProviderStore, ProviderConfigStore, ensure_provider};
pub use types::{
    AccessToken, ApiResponse, CallbackParams, ConnectData, FlowOutcome, FlowState,
    NORMALIZED_PROFILE_KEYS, NormalizedProfile, RawProfile, RedirectIntent, StashedConnection,
    TokenResponse,
};

// Re-export common types for convenience
pub use forum_identity_core::{EventSink, HostUser, SessionStash, SsoEvent, UrlResolver, UserStore};
