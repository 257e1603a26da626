//! OAuth2 error types.

use forum_identity_core::HostError;
use thiserror::Error;

pub type OAuth2Result<T> = Result<T, OAuth2Error>;

/// Failures of the SSO flow.
///
/// Display text is shown to end users by the host, so no variant carries the
/// client secret or an access token.
#[derive(Debug, Error)]
pub enum OAuth2Error {
    #[error("Provider rejected the request: {0}")]
    ProviderRejected(String),

    #[error("{message}")]
    Upstream { status: u16, message: String },

    #[error("The OAuth server did not return an access token.")]
    MissingToken,

    #[error("The OAuth server did not return a valid response.")]
    InvalidResponse,

    #[error("Missing authorization code")]
    MissingAuthorizationCode,

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("The provider profile has no unique identifier")]
    MissingUniqueId,

    #[error("No access token for provider {0}")]
    NotConnected(String),

    #[error("HTTP request failed: {0}")]
    HttpError(reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Host error: {0}")]
    HostError(HostError),
}

impl OAuth2Error {
    /// HTTP status reported by the provider, for upstream failures
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            OAuth2Error::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for OAuth2Error {
    fn from(err: reqwest::Error) -> Self {
        // Request URLs may carry an access token in the query string
        OAuth2Error::HttpError(err.without_url())
    }
}

impl From<HostError> for OAuth2Error {
    fn from(err: HostError) -> Self {
        match err {
            HostError::UserNotFound(id) => OAuth2Error::UserNotFound(id),
            other => OAuth2Error::HostError(other),
        }
    }
}
