//! HTTP routes of the demo forum host.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use forum_identity_core::{
    BaseUrlResolver, HostUser, InMemorySessionStash, InMemoryUserStore, TracingEventSink,
    UrlResolver,
};
use forum_identity_oauth2::{
    ApiClient, CallbackParams, Diagnostics, FlowState, InMemoryProviderStore, NormalizedProfile,
    OAuth2Client, OAuth2Error, ProviderConfigStore, RequestOverrides, SsoFlow, SsoHost,
    ensure_provider,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::settings::Settings;

/// Cookie that identifies the browser session owning stash entries
pub const SESSION_COOKIE: &str = "sso_session";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub providers: Arc<dyn ProviderConfigStore>,
    pub overrides: Arc<HashMap<String, RequestOverrides>>,
    pub api: ApiClient,
    pub urls: Arc<dyn UrlResolver>,
    pub flow: SsoFlow,
}

impl AppState {
    /// Build in-memory state from settings
    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let store = InMemoryProviderStore::new();
        let mut overrides = HashMap::new();

        for entry in &settings.providers {
            let provider = &entry.provider;
            if provider.is_configured() {
                store.save_provider_config(provider.clone()).await?;
                info!("Registered provider {}", provider.key);
            } else {
                ensure_provider(&store, &provider.key).await?;
                warn!(
                    "Provider {} has no client credentials, sign-in is disabled",
                    provider.key
                );
            }
            overrides.insert(provider.key.clone(), entry.overrides.clone());
        }

        let users = InMemoryUserStore::new();
        for seed in &settings.users {
            let mut user = HostUser::new(seed.id.clone(), seed.name.clone());
            user.email = seed.email.clone();
            users.add_user(user).await;
        }

        let host = SsoHost {
            users: Arc::new(users),
            stash: Arc::new(InMemorySessionStash::new(settings.sso.stash_ttl_seconds)),
            events: Arc::new(TracingEventSink),
        };

        Ok(Self {
            providers: Arc::new(store),
            overrides: Arc::new(overrides),
            api: ApiClient::new(&settings.sso)?,
            urls: Arc::new(BaseUrlResolver::new(settings.server.base_url.clone())),
            flow: SsoFlow::new(host, Diagnostics::new(settings.sso.debug)),
        })
    }

    /// A fresh client for one provider
    async fn client(&self, provider_key: &str) -> Result<OAuth2Client, AppError> {
        let config = self
            .providers
            .get_provider_config(provider_key)
            .await?
            .ok_or_else(|| AppError::UnknownProvider(provider_key.to_string()))?;
        let overrides = self.overrides.get(provider_key).cloned().unwrap_or_default();

        Ok(OAuth2Client::new(config, self.api.clone(), self.urls.clone()).with_overrides(overrides))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/providers", get(providers_handler))
        .route("/entry/signin/{provider}", get(signin_handler))
        .route("/entry/connect/{provider}", get(connect_handler))
        .route("/entry/{provider}", get(callback_handler))
        .route("/profile/connect/{provider}/{user_id}", get(profile_connect_handler))
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider {0} is not configured")]
    NotConfigured(String),

    #[error("No pending connection for provider {0}")]
    NothingStashed(String),

    #[error(transparent)]
    Flow(#[from] OAuth2Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::UnknownProvider(_) => (StatusCode::NOT_FOUND, "unknown_provider"),
            AppError::NotConfigured(_) => (StatusCode::CONFLICT, "not_configured"),
            AppError::NothingStashed(_) => (StatusCode::NOT_FOUND, "nothing_stashed"),
            AppError::Flow(err) => match err {
                OAuth2Error::ProviderRejected(_) => (StatusCode::BAD_REQUEST, "provider_rejected"),
                OAuth2Error::MissingAuthorizationCode => {
                    (StatusCode::BAD_REQUEST, "missing_authorization_code")
                }
                OAuth2Error::MissingUniqueId => (StatusCode::BAD_REQUEST, "missing_unique_id"),
                OAuth2Error::NotConnected(_) => (StatusCode::BAD_REQUEST, "not_connected"),
                OAuth2Error::UserNotFound(_) => (StatusCode::NOT_FOUND, "user_not_found"),
                OAuth2Error::Upstream { .. } => (StatusCode::BAD_GATEWAY, "upstream_error"),
                OAuth2Error::MissingToken => (StatusCode::BAD_GATEWAY, "missing_token"),
                OAuth2Error::InvalidResponse => (StatusCode::BAD_GATEWAY, "invalid_response"),
                OAuth2Error::HttpError(_) => (StatusCode::BAD_GATEWAY, "http_error"),
                OAuth2Error::ConfigError(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error")
                }
                OAuth2Error::SerializationError(_)
                | OAuth2Error::UrlError(_)
                | OAuth2Error::HostError(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                }
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }

        let body = ErrorBody {
            error: code,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Session id from the cookie, issuing a new one when absent
fn session(jar: CookieJar) -> (CookieJar, String) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let id = cookie.value().to_string();
        return (jar, id);
    }

    let id = Uuid::new_v4().to_string();
    let cookie = Cookie::build((SESSION_COOKIE, id.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax);
    (jar.add(cookie), id)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub key: String,
    pub name: Option<String>,
    pub configured: bool,
    pub default: bool,
    pub callback_url: String,
    pub sign_in_url: Option<String>,
}

async fn providers_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProviderSummary>>, AppError> {
    let mut summaries = Vec::new();
    for config in state.providers.list_provider_configs().await? {
        let client = state.client(&config.key).await?;
        summaries.push(ProviderSummary {
            key: config.key.clone(),
            name: config.name.clone(),
            configured: client.is_configured(),
            default: client.is_default(),
            callback_url: client.redirect_uri(),
            sign_in_url: client.sign_in_url(None)?,
        });
    }
    Ok(Json(summaries))
}

#[derive(Debug, Default, Deserialize)]
pub struct TargetQuery {
    #[serde(rename = "Target")]
    target: Option<String>,
}

/// Start a sign-in at the provider
async fn signin_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<TargetQuery>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), AppError> {
    let (jar, _) = session(jar);
    let client = state.client(&provider).await?;
    let url = client
        .sign_in_url(query.target.as_deref())?
        .ok_or(AppError::NotConfigured(provider))?;

    Ok((jar, Redirect::to(&url)))
}

/// Start attaching a provider identity to an existing user
async fn profile_connect_handler(
    State(state): State<AppState>,
    Path((provider, user_id)): Path<(String, String)>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), AppError> {
    let (jar, _) = session(jar);
    let client = state.client(&provider).await?;
    if !client.is_configured() {
        return Err(AppError::NotConfigured(provider));
    }

    let url = client.authorize_uri(Some(&FlowState::profile(user_id)))?;
    Ok((jar, Redirect::to(&url)))
}

/// The provider's redirect back to the forum
async fn callback_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), AppError> {
    info!("Handling callback for provider {}", provider);

    let (jar, session_id) = session(jar);
    let mut client = state.client(&provider).await?;
    let outcome = state
        .flow
        .handle_callback(&mut client, &session_id, params)
        .await?;

    Ok((jar, Redirect::to(outcome.redirect_to())))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub provider: String,
    pub unique_id: Option<String>,
    pub email: Option<String>,
    pub target: Option<String>,
    pub profile: NormalizedProfile,
}

/// Connect entry point: hands the stashed profile to the host
async fn connect_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<TargetQuery>,
    jar: CookieJar,
) -> Result<Json<ConnectResponse>, AppError> {
    let session_id = jar
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .ok_or_else(|| AppError::NothingStashed(provider.clone()))?;

    let data = state
        .flow
        .connect_data(&session_id, &provider)
        .await?
        .ok_or_else(|| AppError::NothingStashed(provider.clone()))?;

    Ok(Json(ConnectResponse {
        unique_id: data.profile.unique_id_str(),
        email: data.profile.email_str().map(String::from),
        provider: data.provider_key,
        target: query.target,
        profile: data.profile,
    }))
}
