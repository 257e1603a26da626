//! OAuth2 client bound to a single provider.

use crate::api::{ApiClient, ApiMethod, ApiOptions};
use crate::config::{Params, ProviderConfig, RequestOverrides, merge_params};
use crate::error::{OAuth2Error, OAuth2Result};
use crate::types::{
    AccessToken, ApiResponse, FlowState, NORMALIZED_PROFILE_KEYS, NormalizedProfile, RawProfile,
    TokenResponse,
};
use forum_identity_core::{UrlResolver, UserStore};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info};
use url::{Url, form_urlencoded};

/// Authorization-code client for one configured provider
#[derive(Clone)]
pub struct OAuth2Client {
    config: ProviderConfig,
    overrides: RequestOverrides,
    api: ApiClient,
    urls: Arc<dyn UrlResolver>,
    access_token: Option<AccessToken>,
}

impl OAuth2Client {
    pub fn new(config: ProviderConfig, api: ApiClient, urls: Arc<dyn UrlResolver>) -> Self {
        Self {
            config,
            overrides: RequestOverrides::default(),
            api,
            urls,
            access_token: None,
        }
    }

    pub fn with_overrides(mut self, overrides: RequestOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Start from a token obtained elsewhere
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.set_access_token(token);
        self
    }

    pub fn provider_key(&self) -> &str {
        &self.config.key
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn urls(&self) -> &Arc<dyn UrlResolver> {
        &self.urls
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    pub fn is_default(&self) -> bool {
        self.config.is_default
    }

    /// An access token is held
    pub fn is_connected(&self) -> bool {
        self.access_token.is_some()
    }

    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = Some(AccessToken::new(token, self.config.key.clone()));
    }

    /// Current access token.
    ///
    /// Returns `None` when the provider is not configured and no value is
    /// given. Otherwise stores `new_value` if given, or falls back to the
    /// token saved on the signed-in user.
    pub async fn access_token(
        &mut self,
        new_value: Option<String>,
        users: &dyn UserStore,
    ) -> OAuth2Result<Option<String>> {
        if !self.is_configured() && new_value.is_none() {
            return Ok(None);
        }

        if let Some(token) = new_value {
            self.set_access_token(token);
        }

        if self.access_token.is_none() {
            if let Some(token) = users.current_access_token(&self.config.key).await? {
                self.set_access_token(token);
            }
        }

        Ok(self
            .access_token
            .as_ref()
            .map(|token| token.secret().to_string()))
    }

    /// Absolute URL of this provider's callback entry point
    pub fn redirect_uri(&self) -> String {
        self.urls.absolute_url(&self.config.callback_path())
    }

    /// URL the user is sent to at the provider.
    ///
    /// Integration overrides win over the default parameters. `state` is
    /// always last and always the caller's.
    pub fn authorize_uri(&self, state: Option<&FlowState>) -> OAuth2Result<String> {
        let mut url = Url::parse(&self.config.authorize_url)?;

        let mut defaults: Params = vec![
            ("response_type".to_string(), "code".to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
            ("redirect_uri".to_string(), self.redirect_uri()),
        ];
        if let Some(scope) = self.config.effective_scope() {
            defaults.push(("scope".to_string(), scope.to_string()));
        }

        let mut params = merge_params(defaults, &self.overrides.authorize);
        params.retain(|(key, _)| key != "state");
        if let Some(state) = state {
            params.push(("state".to_string(), state.encode()));
        }

        url.query_pairs_mut().extend_pairs(&params);

        debug!(
            "Generated authorization URL for provider {}",
            self.config.key
        );
        Ok(url.to_string())
    }

    /// Authorize URL for a sign-in button, or `None` when unconfigured
    pub fn sign_in_url(&self, target: Option<&str>) -> OAuth2Result<Option<String>> {
        if !self.is_configured() {
            return Ok(None);
        }

        let mut state = FlowState::default();
        if let Some(target) = target {
            state = state.with_target(target);
        }
        self.authorize_uri(Some(&state)).map(Some)
    }

    /// POST the authorization code to the token endpoint
    pub async fn request_access_token(&self, code: &str) -> OAuth2Result<TokenResponse> {
        let mut defaults: Params = vec![
            ("code".to_string(), code.to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
            ("redirect_uri".to_string(), self.redirect_uri()),
            ("client_secret".to_string(), self.config.client_secret.clone()),
            ("grant_type".to_string(), "authorization_code".to_string()),
        ];
        if let Some(scope) = self.config.effective_scope() {
            defaults.push(("scope".to_string(), scope.to_string()));
        }
        let params = merge_params(defaults, &self.overrides.access_token);

        self.api.diagnostics().log(
            "Requesting access token",
            json!({ "target_uri": self.config.token_url }),
        );

        let response = self
            .api
            .call(
                &self.config.token_url,
                ApiMethod::Post,
                &params,
                &ApiOptions::default(),
            )
            .await?;

        match response {
            ApiResponse::Json(value @ Value::Object(_)) => Ok(serde_json::from_value(value)?),
            ApiResponse::Json(_) => Err(OAuth2Error::InvalidResponse),
            ApiResponse::Raw(body) => token_response_from_form(&body),
        }
    }

    /// Exchange a code and keep the resulting token
    pub async fn exchange_code(&mut self, code: &str) -> OAuth2Result<AccessToken> {
        let response = self.request_access_token(code).await?;
        let token = response.into_access_token(&self.config.key)?;

        info!(
            "Exchanged authorization code for provider {}",
            self.config.key
        );
        self.access_token = Some(token.clone());
        Ok(token)
    }

    /// Fetch the profile with the held access token and normalize it
    pub async fn get_profile(&self) -> OAuth2Result<NormalizedProfile> {
        let uri = self.config.profile_url()?;
        let token = self
            .access_token
            .as_ref()
            .ok_or_else(|| OAuth2Error::NotConnected(self.config.key.clone()))?;

        let defaults: Params = vec![("access_token".to_string(), token.secret().to_string())];
        let params = merge_params(defaults, &self.overrides.profile);

        let raw = match self
            .api
            .call(uri, ApiMethod::Get, &params, &ApiOptions::default())
            .await?
        {
            ApiResponse::Json(Value::Object(raw)) => raw,
            _ => return Err(OAuth2Error::InvalidResponse),
        };

        let profile = self.translate_profile_results(&raw);

        self.api.diagnostics().log(
            "getProfile API call",
            json!({
                "profile_url": uri,
                "raw_profile": raw,
                "profile": profile,
            }),
        );

        Ok(profile)
    }

    /// Map provider-specific profile keys onto the normalized fields.
    ///
    /// Absent fields are omitted; unmapped provider fields are kept as extras.
    pub fn translate_profile_results(&self, raw: &RawProfile) -> NormalizedProfile {
        let keys = &self.config.profile_key_map;
        let mut remaining = raw.clone();
        let mut take = |key: &str| remaining.remove(key).filter(|value| !value.is_null());

        let email = take(&keys.email);
        let photo = take(&keys.photo);
        let name = take(&keys.display_name);
        let full_name = take(&keys.full_name);
        let unique_id = take(&keys.unique_id);

        // Extras are flattened next to the normalized fields and must not shadow them
        remaining.retain(|key, _| !NORMALIZED_PROFILE_KEYS.contains(&key.as_str()));

        NormalizedProfile {
            email,
            photo,
            name,
            full_name,
            unique_id,
            provider: self.config.key.clone(),
            extra: remaining,
        }
    }
}

/// Some providers answer the token request with a form-encoded body
fn token_response_from_form(body: &str) -> OAuth2Result<TokenResponse> {
    let fields: serde_json::Map<String, Value> = form_urlencoded::parse(body.as_bytes())
        .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
        .collect();

    if !fields.contains_key("access_token") && !fields.contains_key("error") {
        return Err(OAuth2Error::InvalidResponse);
    }
    Ok(serde_json::from_value(Value::Object(fields))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SsoConfig;
    use crate::types::StashedConnection;
    use forum_identity_core::{BaseUrlResolver, HostUser, InMemoryUserStore};
    use std::collections::HashMap;

    fn provider_config() -> ProviderConfig {
        ProviderConfig {
            authorize_url: "https://id.example.com/oauth/authorize".to_string(),
            token_url: "https://id.example.com/oauth/token".to_string(),
            profile_url: Some("https://id.example.com/api/me".to_string()),
            client_id: "test_client_id".to_string(),
            client_secret: "test_secret".to_string(),
            ..ProviderConfig::new("acme")
        }
    }

    fn client(config: ProviderConfig) -> OAuth2Client {
        let api = ApiClient::new(&SsoConfig::default()).unwrap();
        let urls = Arc::new(BaseUrlResolver::new("https://forum.example.com"));
        OAuth2Client::new(config, api, urls)
    }

    fn query(url: &str) -> Vec<(String, String)> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn test_authorization_url_generation() {
        let client = client(provider_config());
        let state = FlowState::entry().with_target("/discussions");

        let auth_url = client.authorize_uri(Some(&state)).unwrap();
        let url = Url::parse(&auth_url).unwrap();
        assert_eq!(url.host_str(), Some("id.example.com"));
        assert_eq!(url.path(), "/oauth/authorize");

        assert_eq!(
            query(&auth_url),
            vec![
                ("response_type".to_string(), "code".to_string()),
                ("client_id".to_string(), "test_client_id".to_string()),
                (
                    "redirect_uri".to_string(),
                    "https://forum.example.com/entry/acme".to_string()
                ),
                ("scope".to_string(), "profile".to_string()),
                ("state".to_string(), "r=entry&target=%2Fdiscussions".to_string()),
            ]
        );
    }

    #[test]
    fn test_authorize_overrides_win_except_state() {
        let mut overrides = RequestOverrides::default();
        overrides
            .authorize
            .insert("scope".to_string(), "openid email".to_string());
        overrides
            .authorize
            .insert("prompt".to_string(), "consent".to_string());
        overrides
            .authorize
            .insert("state".to_string(), "forged".to_string());

        let client = client(provider_config()).with_overrides(overrides);
        let state = FlowState::profile("42");
        let params: HashMap<_, _> = query(&client.authorize_uri(Some(&state)).unwrap())
            .into_iter()
            .collect();

        assert_eq!(params.get("scope").map(String::as_str), Some("openid email"));
        assert_eq!(params.get("prompt").map(String::as_str), Some("consent"));
        assert_eq!(params.get("state").map(String::as_str), Some("r=profile&uid=42"));

        let pairs = query(&client.authorize_uri(Some(&state)).unwrap());
        assert_eq!(pairs.last().map(|(k, _)| k.as_str()), Some("state"));
    }

    #[test]
    fn test_authorize_uri_without_state() {
        let client = client(provider_config());
        let pairs = query(&client.authorize_uri(None).unwrap());

        assert!(pairs.iter().all(|(k, _)| k != "state"));
    }

    #[test]
    fn test_authorize_uri_works_unconfigured() {
        let config = ProviderConfig {
            client_id: String::new(),
            client_secret: String::new(),
            ..provider_config()
        };
        let client = client(config);

        assert!(!client.is_configured());
        assert!(client.authorize_uri(None).is_ok());
        assert_eq!(client.sign_in_url(Some("/")).unwrap(), None);
    }

    #[test]
    fn test_sign_in_url_carries_target() {
        let client = client(provider_config());
        let url = client.sign_in_url(Some("/categories")).unwrap().unwrap();
        let params: HashMap<_, _> = query(&url).into_iter().collect();

        let state = FlowState::decode(&params["state"]);
        assert_eq!(state.target.as_deref(), Some("/categories"));
        assert_eq!(state.intent, None);
    }

    #[test]
    fn test_translate_profile_with_default_keys() {
        let client = client(provider_config());
        let raw: RawProfile = serde_json::from_value(json!({
            "email": "a@b.com",
            "picture": "p",
            "user_id": "123"
        }))
        .unwrap();

        let profile = client.translate_profile_results(&raw);
        assert_eq!(
            serde_json::to_value(&profile).unwrap(),
            json!({"Email": "a@b.com", "Photo": "p", "UniqueID": "123", "Provider": "acme"})
        );
        assert_eq!(profile.name, None);
        assert_eq!(profile.full_name, None);
    }

    #[test]
    fn test_translate_profile_with_custom_keys() {
        let mut config = provider_config();
        config.profile_key_map.unique_id = "sub".to_string();
        config.profile_key_map.display_name = "nickname".to_string();
        let client = client(config);

        let raw: RawProfile = serde_json::from_value(json!({
            "sub": 987,
            "nickname": "ali",
            "name": "Alice Smith",
            "locale": "en",
            "email": null
        }))
        .unwrap();

        let profile = client.translate_profile_results(&raw);
        assert_eq!(profile.unique_id_str().as_deref(), Some("987"));
        assert_eq!(profile.name, Some(json!("ali")));
        assert_eq!(profile.full_name, Some(json!("Alice Smith")));
        assert_eq!(profile.email, None);
        assert_eq!(profile.extra.get("locale"), Some(&json!("en")));
        assert_eq!(profile.provider, "acme");
    }

    #[test]
    fn test_raw_fields_cannot_shadow_normalized_fields() {
        let client = client(provider_config());
        let raw: RawProfile = serde_json::from_value(json!({
            "user_id": "u-9",
            "Provider": "evil",
            "Email": "spoof@x",
            "UniqueID": "admin",
            "locale": "en"
        }))
        .unwrap();

        let profile = client.translate_profile_results(&raw);
        assert_eq!(profile.extra.len(), 1);
        assert_eq!(profile.extra.get("locale"), Some(&json!("en")));

        let stashed = serde_json::to_value(StashedConnection {
            access_token: "T".to_string(),
            profile,
        })
        .unwrap();
        assert_eq!(
            stashed["Profile"],
            json!({"UniqueID": "u-9", "Provider": "acme", "locale": "en"})
        );

        let restored: StashedConnection = serde_json::from_value(stashed).unwrap();
        assert_eq!(restored.profile.provider, "acme");
        assert_eq!(restored.profile.unique_id_str().as_deref(), Some("u-9"));
        assert_eq!(restored.profile.email, None);
    }

    #[test]
    fn test_token_response_from_form_body() {
        let response = token_response_from_form("access_token=abc&token_type=bearer").unwrap();
        assert_eq!(response.access_token.as_deref(), Some("abc"));

        assert!(matches!(
            token_response_from_form("<html>oops</html>"),
            Err(OAuth2Error::InvalidResponse)
        ));
    }

    #[tokio::test]
    async fn test_access_token_accessor() {
        let users = InMemoryUserStore::new();
        let mut user = HostUser::new("7", "alice");
        user.attributes
            .insert("acme".to_string(), json!({"AccessToken": "stored"}));
        users.add_user(user).await;
        users.set_current_user(Some("7".to_string())).await;

        // Unconfigured with no new value
        let mut unconfigured = client(ProviderConfig::new("acme"));
        assert_eq!(unconfigured.access_token(None, &users).await.unwrap(), None);

        // Unconfigured but given a value
        assert_eq!(
            unconfigured
                .access_token(Some("given".to_string()), &users)
                .await
                .unwrap()
                .as_deref(),
            Some("given")
        );

        // Lazily loaded from the signed-in user
        let mut configured = client(provider_config());
        assert!(!configured.is_connected());
        assert_eq!(
            configured.access_token(None, &users).await.unwrap().as_deref(),
            Some("stored")
        );
        assert!(configured.is_connected());
    }
}
