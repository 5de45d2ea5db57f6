use cinefluent_core::api::{ApiGateway, AuthApi, GatewayError};
use cinefluent_core::config::ClientConfig;
use cinefluent_core::vault::TokenStore;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

/// Sandboxed environments sometimes forbid binding sockets; skip rather
/// than fail there.
fn can_bind_localhost() -> bool {
    std::net::TcpListener::bind("127.0.0.1:0").is_ok()
}

fn gateway_for(server: &MockServer, tokens: TokenStore) -> ApiGateway {
    let config = ClientConfig::for_base_url(&server.uri()).expect("config");
    ApiGateway::new(&config, tokens).expect("gateway")
}

fn user_body(email: &str) -> serde_json::Value {
    json!({
        "id": "7b3f9e54-6f0f-4f2a-9a3e-1c5d2ad3b111",
        "email": email,
        "is_premium": false,
        "created_at": "2026-01-15T10:00:00Z",
        "words_learned": 120,
        "current_streak": 4,
        "longest_streak": 9,
        "total_study_time": 300,
        "movies_completed": 2
    })
}

#[test]
fn login_posts_credentials_and_parses_the_pair() {
    if !can_bind_localhost() {
        return;
    }
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/login"))
            .and(body_json(json!({
                "email": "maria@example.com",
                "password": "Spanish1"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok-1",
                "refresh_token": "ref-1",
                "token_type": "bearer",
                "expires_in": 1800
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, TokenStore::in_memory());
        let pair = gateway
            .login("maria@example.com", "Spanish1")
            .await
            .expect("login");
        assert_eq!(pair.access_token, "tok-1");
        assert_eq!(pair.refresh_token, "ref-1");
        assert_eq!(pair.token_type, "bearer");
        assert_eq!(pair.expires_in, 1800);
    });
}

#[test]
fn attaches_stored_access_token_as_bearer() {
    if !can_bind_localhost() {
        return;
    }
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/auth/me"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(user_body("maria@example.com")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let tokens = TokenStore::in_memory();
        tokens.store("tok-1", "ref-1").expect("store");
        let gateway = gateway_for(&server, tokens);

        let user = gateway.current_user().await.expect("me");
        assert_eq!(user.email, "maria@example.com");
        // Wire name differs from the field name.
        assert_eq!(user.total_study_time_minutes, 300);
    });
}

#[test]
fn unauthorized_carries_the_server_detail() {
    if !can_bind_localhost() {
        return;
    }
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/login"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({ "detail": "Incorrect email or password" })),
            )
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, TokenStore::in_memory());
        let err = gateway
            .login("maria@example.com", "wrong")
            .await
            .expect_err("must fail");
        match err {
            GatewayError::Unauthorized { detail } => {
                assert_eq!(detail, "Incorrect email or password");
            }
            other => panic!("expected unauthorized, got {other:?}"),
        }
    });
}

#[test]
fn server_errors_keep_status_and_read_both_detail_keys() {
    if !can_bind_localhost() {
        return;
    }
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/register"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({ "detail": "Passwords do not match" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/auth/me"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "error": "boom" })))
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, TokenStore::in_memory());

        let err = gateway
            .register("a@b.c", "x", "y")
            .await
            .expect_err("must fail");
        match err {
            GatewayError::Api { status, detail } => {
                assert_eq!(status, 400);
                assert_eq!(detail, "Passwords do not match");
            }
            other => panic!("expected api error, got {other:?}"),
        }

        let err = gateway.current_user().await.expect_err("must fail");
        match err {
            GatewayError::Api { status, detail } => {
                assert_eq!(status, 500);
                assert_eq!(detail, "boom");
            }
            other => panic!("expected api error, got {other:?}"),
        }
    });
}

#[test]
fn non_json_error_body_keeps_the_status() {
    if !can_bind_localhost() {
        return;
    }
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/auth/me"))
            .respond_with(
                ResponseTemplate::new(502).set_body_string("<html>Bad Gateway</html>"),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/login"))
            .respond_with(ResponseTemplate::new(401).set_body_string("nope"))
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, TokenStore::in_memory());

        let err = gateway.current_user().await.expect_err("must fail");
        match err {
            GatewayError::Api { status, detail } => {
                assert_eq!(status, 502);
                assert_eq!(detail, "");
            }
            other => panic!("expected api error, got {other:?}"),
        }

        let err = gateway
            .login("maria@example.com", "Spanish1")
            .await
            .expect_err("must fail");
        match err {
            GatewayError::Unauthorized { detail } => assert_eq!(detail, ""),
            other => panic!("expected unauthorized, got {other:?}"),
        }
    });
}

#[test]
fn timeouts_map_to_the_network_variant() {
    if !can_bind_localhost() {
        return;
    }
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/auth/me"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(user_body("maria@example.com"))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let config = ClientConfig::for_base_url(&server.uri())
            .expect("config")
            .with_timeout(Duration::from_millis(50));
        let gateway = ApiGateway::new(&config, TokenStore::in_memory()).expect("gateway");

        let err = gateway.current_user().await.expect_err("must time out");
        match err {
            GatewayError::Network(msg) => assert_eq!(msg, "request timed out"),
            other => panic!("expected network error, got {other:?}"),
        }
    });
}

#[test]
fn empty_success_body_is_accepted() {
    if !can_bind_localhost() {
        return;
    }
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/logout"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, TokenStore::in_memory());
        gateway.logout().await.expect("logout");
    });
}

#[test]
fn refresh_posts_the_refresh_token() {
    if !can_bind_localhost() {
        return;
    }
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/refresh"))
            .and(body_json(json!({ "refresh_token": "ref-1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok-2",
                "refresh_token": "ref-2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, TokenStore::in_memory());
        let pair = gateway.refresh("ref-1").await.expect("refresh");
        assert_eq!(pair.access_token, "tok-2");
        // Defaults fill the optional wire fields.
        assert_eq!(pair.token_type, "bearer");
        assert_eq!(pair.expires_in, 0);
    });
}
