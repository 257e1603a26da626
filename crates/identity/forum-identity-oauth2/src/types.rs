//! OAuth2 protocol and flow types.

use crate::error::{OAuth2Error, OAuth2Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use url::form_urlencoded;

/// Profile fields exactly as the provider returned them
pub type RawProfile = serde_json::Map<String, Value>;

/// Access token obtained from a provider's token endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    token: String,
    provider_key: String,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, provider_key: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            provider_key: provider_key.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.token
    }

    pub fn provider_key(&self) -> &str {
        &self.provider_key
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("provider_key", &self.provider_key)
            .finish()
    }
}

/// Decoded response of the token endpoint
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<Value>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(flatten)]
    pub additional: HashMap<String, Value>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("error", &self.error)
            .field("error_description", &self.error_description)
            .finish()
    }
}

impl TokenResponse {
    /// Extract the access token, failing on an error payload or a missing token
    pub fn into_access_token(self, provider_key: &str) -> OAuth2Result<AccessToken> {
        if let Some(error) = self.error.filter(|e| !e.is_empty()) {
            let message = self
                .error_description
                .filter(|d| !d.is_empty())
                .unwrap_or(error);
            return Err(OAuth2Error::ProviderRejected(message));
        }

        match self.access_token {
            Some(token) if !token.is_empty() => Ok(AccessToken::new(token, provider_key)),
            _ => Err(OAuth2Error::MissingToken),
        }
    }
}

/// Body returned by a provider endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Json(Value),
    Raw(String),
}

/// Field names of a serialized [`NormalizedProfile`]; raw provider fields
/// with these names never reach `extra`
pub const NORMALIZED_PROFILE_KEYS: &[&str] =
    &["Email", "Photo", "Name", "FullName", "UniqueID", "Provider"];

/// Profile translated into the host's field names
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedProfile {
    #[serde(rename = "Email", default, skip_serializing_if = "Option::is_none")]
    pub email: Option<Value>,
    #[serde(rename = "Photo", default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<Value>,
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Value>,
    #[serde(rename = "FullName", default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<Value>,
    #[serde(rename = "UniqueID", default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<Value>,
    #[serde(rename = "Provider")]
    pub provider: String,
    /// Provider fields with no normalized counterpart, minus any that
    /// collide with [`NORMALIZED_PROFILE_KEYS`]
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl NormalizedProfile {
    /// UniqueID as link identifier; numbers render as decimal strings
    pub fn unique_id_str(&self) -> Option<String> {
        match self.unique_id.as_ref()? {
            Value::String(id) if !id.is_empty() => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    pub fn email_str(&self) -> Option<&str> {
        self.email.as_ref().and_then(Value::as_str)
    }
}

/// Where the flow goes once the profile has been fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectIntent {
    /// Sign in or register through the connect entry point
    #[default]
    Entry,
    /// Attach the identity to an existing user from their profile page
    Profile,
}

impl RedirectIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedirectIntent::Entry => "entry",
            RedirectIntent::Profile => "profile",
        }
    }

    /// Unknown values fall back to `Entry`
    pub fn parse(value: &str) -> Self {
        match value {
            "profile" => RedirectIntent::Profile,
            _ => RedirectIntent::Entry,
        }
    }
}

/// Payload carried through the provider in the `state` parameter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowState {
    pub intent: Option<RedirectIntent>,
    pub uid: Option<String>,
    pub target: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl FlowState {
    pub fn entry() -> Self {
        Self {
            intent: Some(RedirectIntent::Entry),
            ..Self::default()
        }
    }

    pub fn profile(uid: impl Into<String>) -> Self {
        Self {
            intent: Some(RedirectIntent::Profile),
            uid: Some(uid.into()),
            ..Self::default()
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn intent(&self) -> RedirectIntent {
        self.intent.unwrap_or_default()
    }

    /// Flat query-string encoding, embedded as one `state` value
    pub fn encode(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        if let Some(intent) = self.intent {
            serializer.append_pair("r", intent.as_str());
        }
        if let Some(uid) = &self.uid {
            serializer.append_pair("uid", uid);
        }
        if let Some(target) = &self.target {
            serializer.append_pair("target", target);
        }
        for (key, value) in &self.extra {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }

    pub fn decode(raw: &str) -> Self {
        let mut state = Self::default();
        for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
            match key.as_ref() {
                "r" => state.intent = Some(RedirectIntent::parse(&value)),
                "uid" => state.uid = Some(value.into_owned()).filter(|v| !v.is_empty()),
                "target" => state.target = Some(value.into_owned()).filter(|v| !v.is_empty()),
                _ => {
                    state.extra.insert(key.into_owned(), value.into_owned());
                }
            }
        }
        state
    }
}

/// Query parameters of the provider's redirect back to the callback path
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Token and profile saved for a provider, in the stash or on a user
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct StashedConnection {
    #[serde(rename = "AccessToken")]
    pub access_token: String,
    #[serde(rename = "Profile")]
    pub profile: NormalizedProfile,
}

impl fmt::Debug for StashedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StashedConnection")
            .field("access_token", &"[REDACTED]")
            .field("profile", &self.profile)
            .finish()
    }
}

/// Data handed to the host's connect entry point
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectData {
    pub provider_key: String,
    pub access_token: AccessToken,
    pub profile: NormalizedProfile,
}

impl ConnectData {
    /// Attribute bag the host stores on the user it creates or links
    pub fn attributes(&self) -> Value {
        let mut attributes = serde_json::Map::new();
        attributes.insert(
            self.provider_key.clone(),
            serde_json::json!({
                "AccessToken": self.access_token.secret(),
                "Profile": self.profile,
            }),
        );
        Value::Object(attributes)
    }
}

/// Terminal result of a successful callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Identity attached to an existing user
    Linked { user_id: String, redirect_to: String },
    /// Data stashed; the host continues at the connect entry point
    Connect { redirect_to: String },
}

impl FlowOutcome {
    pub fn redirect_to(&self) -> &str {
        match self {
            FlowOutcome::Linked { redirect_to, .. } => redirect_to,
            FlowOutcome::Connect { redirect_to } => redirect_to,
        }
    }
}
