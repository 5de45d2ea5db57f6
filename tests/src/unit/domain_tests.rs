use cinefluent_core::api::ApiGateway;
use cinefluent_core::config::{ClientConfig, PasswordPolicy};
use cinefluent_core::domain::{GamificationClient, LearningClient};
use cinefluent_core::session::{SessionError, SessionManager, SessionPhase};
use cinefluent_core::vault::TokenStore;
use cinefluent_core::GatewayError;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

fn can_bind_localhost() -> bool {
    std::net::TcpListener::bind("127.0.0.1:0").is_ok()
}

fn stack(server: &MockServer) -> (ApiGateway, SessionManager, TokenStore) {
    let tokens = TokenStore::in_memory();
    let config = ClientConfig::for_base_url(&server.uri()).expect("config");
    let gateway = ApiGateway::new(&config, tokens.clone()).expect("gateway");
    let session = SessionManager::new(
        Arc::new(gateway.clone()),
        tokens.clone(),
        PasswordPolicy::default(),
    );
    (gateway, session, tokens)
}

#[test]
fn rejected_call_is_retried_once_after_a_refresh() {
    if !can_bind_localhost() {
        return;
    }
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        // The stale token is rejected; the rotated one is accepted.
        Mock::given(method("GET"))
            .and(path("/api/v1/learning/continue"))
            .and(header("authorization", "Bearer tok-old"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({ "detail": "Could not validate credentials" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/learning/continue"))
            .and(header("authorization", "Bearer tok-new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "has_active_session": false,
                "recommended_movie": null
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok-new",
                "refresh_token": "ref-new"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/auth/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "7b3f9e54-6f0f-4f2a-9a3e-1c5d2ad3b111",
                "email": "maria@example.com",
                "created_at": "2026-01-15T10:00:00Z"
            })))
            .mount(&server)
            .await;

        let (gateway, session, tokens) = stack(&server);
        tokens.store("tok-old", "ref-old").expect("store");

        let client = LearningClient::new(gateway, session.clone());
        let learning = client.continue_learning().await.expect("retry succeeds");
        assert!(!learning.has_active_session);
        assert_eq!(
            tokens.load().expect("load").expect("pair").access,
            "tok-new"
        );
        assert!(session.snapshot().is_authenticated());
    });
}

#[test]
fn failed_refresh_surfaces_the_original_rejection() {
    if !can_bind_localhost() {
        return;
    }
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/gamification/streak"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({ "detail": "Could not validate credentials" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({ "detail": "Invalid refresh token" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (gateway, session, tokens) = stack(&server);
        tokens.store("tok-old", "ref-old").expect("store");

        let client = GamificationClient::new(gateway, session.clone());
        let err = client.streak().await.expect_err("must fail");
        assert!(matches!(err, GatewayError::Unauthorized { .. }));

        // The failed refresh tore the session down.
        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Unauthenticated);
        assert_eq!(snapshot.error, Some(SessionError::SessionExpired));
        assert!(tokens.load().expect("load").is_none());
    });
}
