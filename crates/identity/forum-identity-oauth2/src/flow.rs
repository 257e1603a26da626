//! Callback handling: from the provider's redirect to a linked or stashed
//! identity.

use crate::client::OAuth2Client;
use crate::diagnostics::Diagnostics;
use crate::error::{OAuth2Error, OAuth2Result};
use crate::types::{
    AccessToken, CallbackParams, ConnectData, FlowOutcome, FlowState, NormalizedProfile,
    RedirectIntent, StashedConnection,
};
use forum_identity_core::{EventSink, SessionStash, SsoEvent, UserStore};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use url::form_urlencoded;

/// Host collaborators the flow writes its results to
#[derive(Clone)]
pub struct SsoHost {
    pub users: Arc<dyn UserStore>,
    pub stash: Arc<dyn SessionStash>,
    pub events: Arc<dyn EventSink>,
}

#[derive(Clone)]
pub struct SsoFlow {
    host: SsoHost,
    diagnostics: Diagnostics,
}

impl SsoFlow {
    pub fn new(host: SsoHost, diagnostics: Diagnostics) -> Self {
        Self { host, diagnostics }
    }

    pub fn host(&self) -> &SsoHost {
        &self.host
    }

    /// Process the provider's redirect to the callback path.
    ///
    /// Exchanges the code, fetches the profile, then either links the identity
    /// to the user named in `state` or stashes it for the connect entry point.
    pub async fn handle_callback(
        &self,
        client: &mut OAuth2Client,
        session_id: &str,
        params: CallbackParams,
    ) -> OAuth2Result<FlowOutcome> {
        let provider_key = client.provider_key().to_string();

        if let Some(error) = params.error.filter(|e| !e.is_empty()) {
            let message = match params.error_description.filter(|d| !d.is_empty()) {
                Some(description) => format!("{}: {}", error, description),
                None => error,
            };
            warn!("Provider {} returned an error: {}", provider_key, message);
            return Err(OAuth2Error::ProviderRejected(message));
        }

        // A new attempt replaces whatever an earlier one left behind
        self.host.stash.clear(session_id, &provider_key).await?;

        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or(OAuth2Error::MissingAuthorizationCode)?;

        let token = client.exchange_code(&code).await?;

        self.diagnostics.log("Getting profile", json!({}));
        let profile = client.get_profile().await?;
        self.diagnostics.log("Profile", json!({ "profile": profile }));

        let state = params
            .state
            .filter(|s| !s.is_empty())
            .map(|s| FlowState::decode(&s))
            .unwrap_or_else(FlowState::entry);

        match state.intent() {
            RedirectIntent::Profile => self.link_to_user(client, &state, token, profile).await,
            RedirectIntent::Entry => {
                self.stash_for_connect(client, session_id, &state, token, profile)
                    .await
            }
        }
    }

    /// Connect request from a user's profile page
    async fn link_to_user(
        &self,
        client: &OAuth2Client,
        state: &FlowState,
        token: AccessToken,
        profile: NormalizedProfile,
    ) -> OAuth2Result<FlowOutcome> {
        let uid = state.uid.clone().unwrap_or_default();
        let user = self
            .host
            .users
            .get_user_by_id(&uid)
            .await?
            .ok_or_else(|| OAuth2Error::UserNotFound(uid.clone()))?;

        let unique_id = profile
            .unique_id_str()
            .ok_or(OAuth2Error::MissingUniqueId)?;
        let provider_key = client.provider_key();

        self.host
            .users
            .save_identity_link(&user.id, provider_key, &unique_id)
            .await?;

        let attributes = serde_json::to_value(StashedConnection {
            access_token: token.secret().to_string(),
            profile,
        })?;
        self.host
            .users
            .save_user_attribute(&user.id, provider_key, attributes)
            .await?;

        self.host
            .events
            .notify(SsoEvent::AfterConnection {
                provider: provider_key.to_string(),
                user_id: user.id.clone(),
            })
            .await?;

        info!("Linked {} identity to user {}", provider_key, user.id);

        Ok(FlowOutcome::Linked {
            redirect_to: client.urls().connections_path(&user.id),
            user_id: user.id,
        })
    }

    /// Sign-in request: stash the result and continue at the connect entry point
    async fn stash_for_connect(
        &self,
        client: &OAuth2Client,
        session_id: &str,
        state: &FlowState,
        token: AccessToken,
        profile: NormalizedProfile,
    ) -> OAuth2Result<FlowOutcome> {
        if profile.unique_id_str().is_none() {
            return Err(OAuth2Error::MissingUniqueId);
        }

        let stashed = serde_json::to_value(StashedConnection {
            access_token: token.secret().to_string(),
            profile,
        })?;
        self.host
            .stash
            .put(session_id, client.provider_key(), stashed)
            .await?;

        let mut redirect_to = client.config().connect_path();
        if let Some(target) = &state.target {
            let query = form_urlencoded::Serializer::new(String::new())
                .append_pair("Target", target)
                .finish();
            redirect_to.push('?');
            redirect_to.push_str(&query);
        }

        info!(
            "Stashed {} profile, continuing at {}",
            client.provider_key(),
            redirect_to
        );
        Ok(FlowOutcome::Connect { redirect_to })
    }

    /// Consume the stashed result of a sign-in callback
    pub async fn connect_data(
        &self,
        session_id: &str,
        provider_key: &str,
    ) -> OAuth2Result<Option<ConnectData>> {
        let Some(value) = self.host.stash.take(session_id, provider_key).await? else {
            return Ok(None);
        };

        let stashed: StashedConnection = serde_json::from_value(value)?;
        self.diagnostics.log(
            "Connect data profile saved in session",
            json!({ "profile": stashed.profile }),
        );

        Ok(Some(ConnectData {
            provider_key: provider_key.to_string(),
            access_token: AccessToken::new(stashed.access_token, provider_key),
            profile: stashed.profile,
        }))
    }
}
