//! End-to-end tests for the generic OAuth 2.0 provider.
//!
//! wiremock stands in for the authorization server's token and user-info
//! endpoints.

#![cfg(feature = "oauth")]

use platform_federation::session::CONTINUATION_KEY;
use platform_federation::{
    CallbackParams, ContinuationToken, FederationConfig, IdentityFetch, LoginPolicy, LoginResult,
    MappingStore, MemoryAccountStore, MemoryMappingStore, MemorySession, OAuth2Provider, Orchestrator,
    Provider, ProviderConfig, ProviderRegistry, RequestContext, Resolution, SessionStore,
    OAUTH2_PROVIDER_TYPE,
};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mock authorization server plus a provider configuration pointing at it.
struct TestFixture {
    server: MockServer,
    config: ProviderConfig,
}

impl TestFixture {
    async fn new() -> Self {
        let server = MockServer::start().await;
        let config = ProviderConfig::new(OAUTH2_PROVIDER_TYPE, "wiki-client", "wiki-secret")
            .with_authorize_uri(format!("{}/oauth/authorize", server.uri()))
            .with_redirect_uri("https://wiki.example.com/callback")
            .with_extension("token_uri", json!(format!("{}/oauth/token", server.uri())))
            .with_extension("userinfo_uri", json!(format!("{}/oauth/userinfo", server.uri())));

        Self { server, config }
    }

    async fn mock_token(&self, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("code=auth-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-123",
                "token_type": "bearer",
                "expires_in": 3600
            })))
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    async fn mock_userinfo(&self, claims: serde_json::Value, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path("/oauth/userinfo"))
            .and(header("Authorization", "Bearer access-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(claims))
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }
}

fn callback_for(token: &ContinuationToken) -> CallbackParams {
    CallbackParams::new()
        .with("code", "auth-code")
        .with("state", token.request_secret.clone())
}

#[tokio::test]
async fn test_fetch_identity_exchanges_code_and_reads_userinfo() {
    let fixture = TestFixture::new().await;
    fixture.mock_token(1).await;
    fixture
        .mock_userinfo(
            json!({
                "sub": "u-1",
                "preferred_username": "alice",
                "name": "Alice Smith",
                "email": "alice@example.com"
            }),
            1,
        )
        .await;

    let provider = OAuth2Provider::new(&fixture.config).unwrap();
    let request = provider.login().await.unwrap();
    assert!(request
        .authorize_url
        .starts_with(&format!("{}/oauth/authorize", fixture.server.uri())));

    let result = provider
        .fetch_identity(&request.token, &callback_for(&request.token))
        .await
        .unwrap();

    let IdentityFetch::Identity(identity) = result else {
        panic!("expected identity");
    };
    assert_eq!(identity.username.as_deref(), Some("alice"));
    assert_eq!(identity.real_name.as_deref(), Some("Alice Smith"));
    assert_eq!(identity.email.as_deref(), Some("alice@example.com"));
    assert_eq!(identity.extra["sub"], json!("u-1"));
}

#[tokio::test]
async fn test_pkce_verifier_is_sent_with_token_request() {
    let fixture = TestFixture::new().await;
    let config = fixture.config.clone().with_extension("pkce", json!(true));

    let provider = OAuth2Provider::new(&config).unwrap();
    let request = provider.login().await.unwrap();
    let verifier = request.token.request_key.clone().unwrap();

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains(format!("code_verifier={}", verifier)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-123",
            "token_type": "bearer"
        })))
        .expect(1)
        .mount(&fixture.server)
        .await;
    fixture
        .mock_userinfo(json!({"preferred_username": "alice"}), 1)
        .await;

    let result = provider
        .fetch_identity(&request.token, &callback_for(&request.token))
        .await
        .unwrap();
    assert!(matches!(result, IdentityFetch::Identity(_)));
}

#[tokio::test]
async fn test_forged_state_never_reaches_token_endpoint() {
    let fixture = TestFixture::new().await;
    fixture.mock_token(0).await;

    let provider = OAuth2Provider::new(&fixture.config).unwrap();
    let request = provider.login().await.unwrap();
    let forged = CallbackParams::new()
        .with("code", "auth-code")
        .with("state", "attacker-state");

    let result = provider.fetch_identity(&request.token, &forged).await.unwrap();
    assert_eq!(result, IdentityFetch::rejected());
}

#[tokio::test]
async fn test_required_group_rejects_outsiders() {
    let fixture = TestFixture::new().await;
    let config = fixture
        .config
        .clone()
        .with_extension("required_group", json!("verified"));
    fixture.mock_token(1).await;
    fixture
        .mock_userinfo(json!({"preferred_username": "mallory", "groups": ["guests"]}), 1)
        .await;

    let provider = OAuth2Provider::new(&config).unwrap();
    let request = provider.login().await.unwrap();
    let result = provider
        .fetch_identity(&request.token, &callback_for(&request.token))
        .await
        .unwrap();

    assert_eq!(
        result,
        IdentityFetch::rejected_with("You must be a member of the verified group to log in.")
    );
}

#[tokio::test]
async fn test_full_login_through_default_registry() {
    let fixture = TestFixture::new().await;
    fixture.mock_token(1).await;
    fixture
        .mock_userinfo(json!({"preferred_username": "alice", "name": "Alice Smith"}), 1)
        .await;

    let config = FederationConfig::new("idp", fixture.config.clone()).with_policy(LoginPolicy {
        use_real_name_as_username: true,
        ..Default::default()
    });
    let mappings = Arc::new(MemoryMappingStore::new());
    let orchestrator = Orchestrator::new(
        &config,
        &ProviderRegistry::with_defaults(),
        Arc::new(MemoryAccountStore::new()),
        mappings.clone(),
    )
    .unwrap();

    let session = MemorySession::new();
    let ctx = RequestContext::new(&session);

    let redirect = orchestrator
        .authenticate(&ctx, &CallbackParams::new())
        .await
        .unwrap();
    assert!(matches!(redirect, LoginResult::Redirect { .. }));

    let stored = session.get(CONTINUATION_KEY).await.unwrap().unwrap();
    let token: ContinuationToken = serde_json::from_value(stored).unwrap();

    let result = orchestrator
        .authenticate(&ctx, &callback_for(&token))
        .await
        .unwrap();
    let LoginResult::Authenticated(user) = result else {
        panic!("expected authenticated user");
    };
    assert_eq!(user.resolution, Resolution::CreateNew("Alice Smith".to_string()));

    let account_id = orchestrator.provision_account(&ctx, &user).await.unwrap();
    assert_eq!(
        mappings.lookup("idp", "Alice").await.unwrap(),
        Some(account_id)
    );
}

#[tokio::test]
async fn test_token_endpoint_failure_is_generic_login_failure() {
    let fixture = TestFixture::new().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "authorization code expired"
        })))
        .expect(1)
        .mount(&fixture.server)
        .await;

    let orchestrator = Orchestrator::new(
        &FederationConfig::new("idp", fixture.config.clone()),
        &ProviderRegistry::with_defaults(),
        Arc::new(MemoryAccountStore::new()),
        Arc::new(MemoryMappingStore::new()),
    )
    .unwrap();

    let session = MemorySession::new();
    let ctx = RequestContext::new(&session);
    orchestrator.initiate(&ctx).await.unwrap();
    let stored = session.get(CONTINUATION_KEY).await.unwrap().unwrap();
    let token: ContinuationToken = serde_json::from_value(stored).unwrap();

    let result = orchestrator
        .authenticate(&ctx, &callback_for(&token))
        .await
        .unwrap();

    assert_eq!(
        result,
        LoginResult::Failed {
            message: platform_federation::error::GENERIC_AUTHENTICATION_FAILURE.to_string()
        }
    );
    assert!(session.get(CONTINUATION_KEY).await.unwrap().is_none());
}
