//! End-to-end tests of the callback flow against a mock provider.

#[cfg(test)]
mod integration_tests {
    use crate::{
        ApiClient, CallbackParams, Diagnostics, FlowOutcome, FlowState, OAuth2Client,
        OAuth2Error, ProviderConfig, SsoConfig, SsoFlow, SsoHost,
    };
    use forum_identity_core::{
        BaseUrlResolver, HostUser, IdentityLink, InMemorySessionStash, InMemoryUserStore,
        RecordingEventSink, SessionStash, SsoEvent, UserStore,
    };
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SESSION: &str = "session-1";

    struct Harness {
        mock_server: MockServer,
        users: InMemoryUserStore,
        stash: InMemorySessionStash,
        events: RecordingEventSink,
        flow: SsoFlow,
    }

    impl Harness {
        async fn start() -> Self {
            let mock_server = MockServer::start().await;
            let users = InMemoryUserStore::new();
            let stash = InMemorySessionStash::default();
            let events = RecordingEventSink::new();

            let host = SsoHost {
                users: Arc::new(users.clone()),
                stash: Arc::new(stash.clone()),
                events: Arc::new(events.clone()),
            };
            let flow = SsoFlow::new(host, Diagnostics::new(true));

            Self {
                mock_server,
                users,
                stash,
                events,
                flow,
            }
        }

        fn provider_config(&self) -> ProviderConfig {
            ProviderConfig {
                authorize_url: format!("{}/authorize", self.mock_server.uri()),
                token_url: format!("{}/token", self.mock_server.uri()),
                profile_url: Some(format!("{}/me", self.mock_server.uri())),
                client_id: "mock_client_id".to_string(),
                client_secret: "mock_secret".to_string(),
                ..ProviderConfig::new("acme")
            }
        }

        fn client(&self, config: ProviderConfig) -> OAuth2Client {
            let api = ApiClient::new(&SsoConfig::default().with_debug(true)).unwrap();
            let urls = Arc::new(BaseUrlResolver::new("https://forum.example.com"));
            OAuth2Client::new(config, api, urls)
        }

        async fn mount_token(&self, response: ResponseTemplate) {
            Mock::given(method("POST"))
                .and(path("/token"))
                .and(body_string_contains("grant_type=authorization_code"))
                .and(body_string_contains("code=abc"))
                .and(body_string_contains("client_secret=mock_secret"))
                .respond_with(response)
                .mount(&self.mock_server)
                .await;
        }

        async fn mount_profile(&self, expected_calls: u64) {
            Mock::given(method("GET"))
                .and(path("/me"))
                .and(query_param("access_token", "T"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "user_id": "u-9",
                    "email": "a@b.com",
                    "displayname": "ali",
                    "picture": null
                })))
                .expect(expected_calls)
                .mount(&self.mock_server)
                .await;
        }
    }

    fn callback(code: &str, state: Option<&FlowState>) -> CallbackParams {
        CallbackParams {
            code: Some(code.to_string()),
            state: state.map(FlowState::encode),
            ..CallbackParams::default()
        }
    }

    #[tokio::test]
    async fn test_sign_in_flow_stashes_connection() {
        let harness = Harness::start().await;
        harness
            .mount_token(ResponseTemplate::new(200).set_body_json(json!({"access_token": "T"})))
            .await;
        harness.mount_profile(1).await;

        let mut client = harness.client(harness.provider_config());
        let state = FlowState::entry().with_target("/discussions");
        let outcome = harness
            .flow
            .handle_callback(&mut client, SESSION, callback("abc", Some(&state)))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            FlowOutcome::Connect {
                redirect_to: "/entry/connect/acme?Target=%2Fdiscussions".to_string()
            }
        );
        assert!(client.is_connected());

        let data = harness
            .flow
            .connect_data(SESSION, "acme")
            .await
            .unwrap()
            .expect("stashed connection");
        assert_eq!(data.access_token.secret(), "T");
        assert_eq!(data.profile.unique_id_str().as_deref(), Some("u-9"));
        assert_eq!(data.profile.email_str(), Some("a@b.com"));
        assert_eq!(data.profile.photo, None);

        // The stash is consumed by the first read
        assert!(harness.flow.connect_data(SESSION, "acme").await.unwrap().is_none());
        assert!(harness.users.identity_links().await.is_empty());
    }

    #[tokio::test]
    async fn test_profile_flow_links_identity() {
        let harness = Harness::start().await;
        harness.users.add_user(HostUser::new("42", "alice")).await;
        harness
            .mount_token(ResponseTemplate::new(200).set_body_json(json!({"access_token": "T"})))
            .await;
        harness.mount_profile(1).await;

        let mut client = harness.client(harness.provider_config());
        let state = FlowState::profile("42");
        let outcome = harness
            .flow
            .handle_callback(&mut client, SESSION, callback("abc", Some(&state)))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            FlowOutcome::Linked {
                user_id: "42".to_string(),
                redirect_to: "/profile/connections/42".to_string()
            }
        );

        assert_eq!(
            harness.users.identity_links().await,
            vec![IdentityLink {
                user_id: "42".to_string(),
                provider_key: "acme".to_string(),
                unique_id: "u-9".to_string(),
            }]
        );

        let user = harness.users.get_user_by_id("42").await.unwrap().unwrap();
        assert_eq!(user.stored_access_token("acme"), Some("T"));
        assert_eq!(user.attributes["acme"]["Profile"]["Email"], "a@b.com");

        assert_eq!(
            harness.events.events().await,
            vec![SsoEvent::AfterConnection {
                provider: "acme".to_string(),
                user_id: "42".to_string(),
            }]
        );

        // Nothing is stashed on the profile path
        assert!(harness.stash.take(SESSION, "acme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_token_error_surfaces_provider_message() {
        let harness = Harness::start().await;
        harness
            .mount_token(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "expired"
            })))
            .await;
        harness.mount_profile(0).await;

        let mut client = harness.client(harness.provider_config());
        let err = harness
            .flow
            .handle_callback(&mut client, SESSION, callback("abc", None))
            .await
            .unwrap_err();

        assert_eq!(err.upstream_status(), Some(400));
        assert!(err.to_string().contains("expired"));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_missing_access_token_stops_before_profile() {
        let harness = Harness::start().await;
        harness
            .mount_token(ResponseTemplate::new(200).set_body_json(json!({"token_type": "Bearer"})))
            .await;
        harness.mount_profile(0).await;

        let mut client = harness.client(harness.provider_config());
        let err = harness
            .flow
            .handle_callback(&mut client, SESSION, callback("abc", None))
            .await
            .unwrap_err();

        assert!(matches!(err, OAuth2Error::MissingToken));
        assert_eq!(
            err.to_string(),
            "The OAuth server did not return an access token."
        );
    }

    #[tokio::test]
    async fn test_absent_state_defaults_to_connect_entry() {
        let harness = Harness::start().await;
        harness
            .mount_token(ResponseTemplate::new(200).set_body_json(json!({"access_token": "T"})))
            .await;
        harness.mount_profile(1).await;

        let mut client = harness.client(harness.provider_config());
        let outcome = harness
            .flow
            .handle_callback(&mut client, SESSION, callback("abc", None))
            .await
            .unwrap();

        assert_eq!(outcome.redirect_to(), "/entry/connect/acme");
    }

    #[tokio::test]
    async fn test_unknown_user_is_rejected() {
        let harness = Harness::start().await;
        harness
            .mount_token(ResponseTemplate::new(200).set_body_json(json!({"access_token": "T"})))
            .await;
        harness.mount_profile(1).await;

        let mut client = harness.client(harness.provider_config());
        let state = FlowState::profile("999");
        let err = harness
            .flow
            .handle_callback(&mut client, SESSION, callback("abc", Some(&state)))
            .await
            .unwrap_err();

        assert!(matches!(err, OAuth2Error::UserNotFound(ref id) if id == "999"));
        assert!(harness.users.identity_links().await.is_empty());
        assert!(harness.events.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_profile_url_is_config_error() {
        let harness = Harness::start().await;
        harness
            .mount_token(ResponseTemplate::new(200).set_body_json(json!({"access_token": "T"})))
            .await;

        let config = ProviderConfig {
            profile_url: None,
            ..harness.provider_config()
        };
        let mut client = harness.client(config);
        let err = harness
            .flow
            .handle_callback(&mut client, SESSION, callback("abc", None))
            .await
            .unwrap_err();

        assert!(matches!(err, OAuth2Error::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_provider_error_redirect() {
        let harness = Harness::start().await;
        let mut client = harness.client(harness.provider_config());

        let params = CallbackParams {
            error: Some("access_denied".to_string()),
            error_description: Some("User cancelled".to_string()),
            ..CallbackParams::default()
        };
        let err = harness
            .flow
            .handle_callback(&mut client, SESSION, params)
            .await
            .unwrap_err();

        assert!(
            matches!(err, OAuth2Error::ProviderRejected(ref m) if m.contains("User cancelled"))
        );
    }

    #[tokio::test]
    async fn test_missing_code_clears_previous_stash() {
        let harness = Harness::start().await;
        harness
            .stash
            .put(SESSION, "acme", json!({"AccessToken": "old"}))
            .await
            .unwrap();

        let mut client = harness.client(harness.provider_config());
        let err = harness
            .flow
            .handle_callback(&mut client, SESSION, CallbackParams::default())
            .await
            .unwrap_err();

        assert!(matches!(err, OAuth2Error::MissingAuthorizationCode));
        assert!(harness.flow.connect_data(SESSION, "acme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_profile_without_unique_id_is_rejected() {
        let harness = Harness::start().await;
        harness
            .mount_token(ResponseTemplate::new(200).set_body_json(json!({"access_token": "T"})))
            .await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"email": "a@b.com"})))
            .mount(&harness.mock_server)
            .await;

        let mut client = harness.client(harness.provider_config());
        let err = harness
            .flow
            .handle_callback(&mut client, SESSION, callback("abc", None))
            .await
            .unwrap_err();

        assert!(matches!(err, OAuth2Error::MissingUniqueId));
        assert!(harness.stash.take(SESSION, "acme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stash_is_private_to_session() {
        let harness = Harness::start().await;
        harness
            .mount_token(ResponseTemplate::new(200).set_body_json(json!({"access_token": "T"})))
            .await;
        harness.mount_profile(1).await;

        let mut client = harness.client(harness.provider_config());
        harness
            .flow
            .handle_callback(&mut client, SESSION, callback("abc", None))
            .await
            .unwrap();

        assert!(harness.flow.connect_data("other-session", "acme").await.unwrap().is_none());
        assert!(harness.flow.connect_data(SESSION, "acme").await.unwrap().is_some());
    }
}
