//! OAuth2 provider configuration types.

use crate::error::{OAuth2Error, OAuth2Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// Scope requested when a provider record does not name one
pub const DEFAULT_ACCEPTED_SCOPE: &str = "profile";

/// Path prefix of the per-provider callback entry point
pub const ENTRY_PATH: &str = "/entry";

/// Ordered request parameters as sent on the wire
pub type Params = Vec<(String, String)>;

/// Keys the provider uses in its profile JSON for each normalized field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileKeyMap {
    pub email: String,
    pub photo: String,
    pub display_name: String,
    pub full_name: String,
    pub unique_id: String,
}

impl Default for ProfileKeyMap {
    fn default() -> Self {
        Self {
            email: "email".to_string(),
            photo: "picture".to_string(),
            display_name: "displayname".to_string(),
            full_name: "name".to_string(),
            unique_id: "user_id".to_string(),
        }
    }
}

/// Stored configuration for one identity provider
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub authorize_url: String,
    #[serde(default)]
    pub token_url: String,
    #[serde(default)]
    pub profile_url: Option<String>,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Scope fixed by the integration; wins over `accepted_scope`
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default = "default_accepted_scope")]
    pub accepted_scope: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub profile_key_map: ProfileKeyMap,
    #[serde(default)]
    pub register_url: Option<String>,
    #[serde(default)]
    pub sign_out_url: Option<String>,
}

fn default_accepted_scope() -> String {
    DEFAULT_ACCEPTED_SCOPE.to_string()
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("profile_url", &self.profile_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scope", &self.scope)
            .field("accepted_scope", &self.accepted_scope)
            .field("is_default", &self.is_default)
            .field("profile_key_map", &self.profile_key_map)
            .finish()
    }
}

impl ProviderConfig {
    /// The record created for a provider key that has no stored configuration
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            name: Some(key.clone()),
            key,
            authorize_url: String::new(),
            token_url: String::new(),
            profile_url: None,
            client_id: String::new(),
            client_secret: String::new(),
            scope: None,
            accepted_scope: default_accepted_scope(),
            is_default: false,
            profile_key_map: ProfileKeyMap::default(),
            register_url: None,
            sign_out_url: None,
        }
    }

    /// Client credentials are present
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }

    /// Scope sent to the provider, if any
    pub fn effective_scope(&self) -> Option<&str> {
        self.scope
            .as_deref()
            .filter(|scope| !scope.is_empty())
            .or(Some(self.accepted_scope.as_str()).filter(|scope| !scope.is_empty()))
    }

    pub fn callback_path(&self) -> String {
        format!("{}/{}", ENTRY_PATH, self.key)
    }

    pub fn connect_path(&self) -> String {
        format!("{}/connect/{}", ENTRY_PATH, self.key)
    }

    /// Scheme and host of the authorize URL
    pub fn base_url(&self) -> Option<String> {
        let url = Url::parse(&self.authorize_url).ok()?;
        let host = url.host_str()?;
        Some(format!("{}://{}", url.scheme(), host))
    }

    pub fn profile_url(&self) -> OAuth2Result<&str> {
        self.profile_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                OAuth2Error::ConfigError(format!(
                    "profile_url missing from provider '{}'",
                    self.key
                ))
            })
    }

    /// Checks applied before a provider record is saved
    pub fn validate(&self) -> OAuth2Result<()> {
        if self.key.is_empty() {
            return Err(OAuth2Error::ConfigError(
                "provider key must not be empty".to_string(),
            ));
        }
        if self.client_id.is_empty() {
            return Err(OAuth2Error::ConfigError(
                "You must provide a unique client id".to_string(),
            ));
        }
        if self.client_secret.is_empty() {
            return Err(OAuth2Error::ConfigError(
                "You must provide a secret".to_string(),
            ));
        }

        for (field, value) in [
            ("authorize_url", &self.authorize_url),
            ("token_url", &self.token_url),
        ] {
            let url = Url::parse(value).map_err(|_| {
                OAuth2Error::ConfigError(format!("{} must be a complete URL", field))
            })?;
            if url.host_str().is_none() {
                return Err(OAuth2Error::ConfigError(format!(
                    "{} must be a complete URL",
                    field
                )));
            }
        }

        Ok(())
    }
}

/// Extra parameters an integration adds to, or replaces in, each request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOverrides {
    pub authorize: BTreeMap<String, String>,
    pub access_token: BTreeMap<String, String>,
    pub profile: BTreeMap<String, String>,
}

/// Merge overrides into default parameters.
///
/// An override replaces the default of the same name in place; new names are
/// appended in order.
pub fn merge_params(mut defaults: Params, overrides: &BTreeMap<String, String>) -> Params {
    for (key, value) in overrides {
        match defaults.iter_mut().find(|(name, _)| name == key) {
            Some(existing) => existing.1 = value.clone(),
            None => defaults.push((key.clone(), value.clone())),
        }
    }
    defaults
}

/// Flow-wide settings shared by every provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SsoConfig {
    pub connect_timeout_seconds: u64,
    pub http_timeout_seconds: u64,
    pub stash_ttl_seconds: u64,
    /// Emit verbose request/response diagnostics
    pub debug: bool,
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: 10,
            http_timeout_seconds: 10,
            stash_ttl_seconds: 600, // 10 minutes
            debug: false,
        }
    }
}

impl SsoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_http_timeout(mut self, seconds: u64) -> Self {
        self.http_timeout_seconds = seconds;
        self
    }

    pub fn with_connect_timeout(mut self, seconds: u64) -> Self {
        self.connect_timeout_seconds = seconds;
        self
    }

    pub fn with_stash_ttl(mut self, seconds: u64) -> Self {
        self.stash_ttl_seconds = seconds;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}
