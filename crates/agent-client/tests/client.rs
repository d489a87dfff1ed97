//! Wire-level tests for the agent session against a mock agent endpoint.

use std::time::Duration;

use agent_client::{AgentAuth, AgentError, AgentSession, ConnectOptions};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn options_for(server: &MockServer, auth: AgentAuth) -> ConnectOptions {
    let addr = server.address();
    ConnectOptions::new(addr.ip().to_string(), addr.port(), auth).with_timeout_ms(2_000)
}

async fn mount_ping(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"pong": true})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_health_round_trip_with_token_auth() {
    let server = MockServer::start().await;
    mount_ping(&server).await;

    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .and(header("authorization", "Bearer sekrit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "channels": [
                {"name": "ops", "type": "slack", "ok": true},
                {"name": "support", "type": "telegram", "ok": false}
            ],
            "uptime": 1234
        })))
        .mount(&server)
        .await;

    let opts = options_for(&server, AgentAuth::Token("sekrit".into()));
    let session = AgentSession::connect(&opts).await.expect("connect");
    let health = session.health().await;
    session.disconnect();

    let health = health.expect("health");
    assert!(health.ok);
    assert_eq!(health.channels.len(), 2);
    assert_eq!(health.degraded_channels(), 1);
    assert_eq!(health.uptime, 1234);
}

#[tokio::test]
async fn test_status_round_trip_with_password_auth() {
    let server = MockServer::start().await;
    mount_ping(&server).await;

    Mock::given(method("GET"))
        .and(path("/v1/status"))
        .and(header("X-Agent-Password", "hunter2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": "running",
            "version": "2.1.0",
            "configHash": "cafe01"
        })))
        .mount(&server)
        .await;

    let opts = options_for(&server, AgentAuth::Password("hunter2".into()));
    let session = AgentSession::connect(&opts).await.expect("connect");
    let status = session.status().await;
    session.disconnect();

    let status = status.expect("status");
    assert_eq!(status.state, "running");
    assert_eq!(status.config_hash.as_deref(), Some("cafe01"));
}

#[tokio::test]
async fn test_connect_rejected_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/ping"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let opts = options_for(&server, AgentAuth::Token("wrong".into()));
    let err = AgentSession::connect(&opts).await.expect_err("must fail");
    assert!(matches!(err, AgentError::Unauthorized { status: 401 }));
}

#[tokio::test]
async fn test_call_timeout_maps_to_timeout_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/ping"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"pong": true}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let addr = server.address();
    let opts = ConnectOptions::new(addr.ip().to_string(), addr.port(), AgentAuth::Token("t".into()))
        .with_timeout_ms(50);

    let err = AgentSession::connect(&opts).await.expect_err("must time out");
    assert!(matches!(err, AgentError::Timeout { timeout_ms: 50 }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_malformed_payload_is_protocol_error() {
    let server = MockServer::start().await;
    mount_ping(&server).await;

    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let opts = options_for(&server, AgentAuth::Token("t".into()));
    let session = AgentSession::connect(&opts).await.expect("connect");
    let err = session.health().await.expect_err("must fail");
    session.disconnect();

    assert!(matches!(err, AgentError::Protocol(_)));
}

#[tokio::test]
async fn test_unreachable_host_is_connect_error() {
    // Port 9 (discard) on localhost is almost certainly closed
    let opts = ConnectOptions::new("127.0.0.1", 9, AgentAuth::Token("t".into()))
        .with_timeout_ms(1_000);
    let err = AgentSession::connect(&opts).await.expect_err("must fail");
    assert!(err.is_transient());
}
