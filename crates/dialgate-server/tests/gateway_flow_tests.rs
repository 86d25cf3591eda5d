//! End-to-end tests: gateway callback through the router to the engine

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use dialgate_core::{
    ApiOutcome, CoreError, ExternalApiConfig, ExternalApiInvoker, Session, SessionRepository,
    SessionStatus,
};
use dialgate_server::definitions::DefinitionFile;
use dialgate_server::{DialgateServer, ServerConfig};
use dialgate_state_inmemory::InMemoryApiConfigRepository;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const DEFINITIONS: &str = r#"
apis:
  - id: balance_api
    name: Balance lookup
    url: https://bank.example/balance
    response_mapping:
      - response_path: data.balance
        state_key: balance

services:
  - id: "*100#"
    name: Demo Bank
    flows:
      - id: main
        service_id: "*100#"
        title: Demo Bank
        is_root: true
        options:
          - selector: "1"
            label: Check Balance
            action:
              type: navigate
            next_flow: balance
            position: 0
          - selector: "2"
            label: Exit
            action:
              type: end_session
              message: Goodbye.
            position: 1
      - id: balance
        service_id: "*100#"
        title: Balance
        text: "Your balance is {{balance}}"
        kind:
          type: dynamic
          api_id: balance_api
          continuation:
            type: end
        options: []
"#;

/// Invoker stub answering every call with a fixed balance payload
struct FixedInvoker;

#[async_trait]
impl ExternalApiInvoker for FixedInvoker {
    async fn invoke(
        &self,
        config: &ExternalApiConfig,
        _session: &Session,
    ) -> Result<ApiOutcome, CoreError> {
        assert_eq!(config.id.0, "balance_api");
        Ok(ApiOutcome {
            mapped: json!({"balance": "500"}).as_object().cloned().unwrap(),
            raw: json!({"data": {"balance": "500"}}),
            latency_ms: 3,
        })
    }
}

async fn test_server() -> Arc<DialgateServer> {
    let file: DefinitionFile = serde_yaml::from_str(DEFINITIONS).unwrap();
    let apis = Arc::new(InMemoryApiConfigRepository::new());
    DialgateServer::assemble(
        ServerConfig::default(),
        apis,
        Arc::new(FixedInvoker),
        file,
    )
    .await
    .unwrap()
}

fn ussd_request(session_id: &str, text: &str) -> Request<Body> {
    let body = format!(
        "sessionId={}&serviceCode=%2A100%23&phoneNumber=%2B254700000001&text={}",
        session_id, text
    );
    Request::builder()
        .method("POST")
        .uri("/v1/ussd")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn gateway_callback_walks_the_balance_flow() {
    let server = test_server().await;
    let app = server.router();

    let response = app.clone().oneshot(ussd_request("s1", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.starts_with("CON Demo Bank"), "got: {}", body);
    assert!(body.contains("1. Check Balance"));

    let response = app.clone().oneshot(ussd_request("s1", "1")).await.unwrap();
    let body = body_string(response).await;
    assert_eq!(body, "END Your balance is 500");

    let session = server
        .sessions()
        .find_by_provider_id("s1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
}

#[tokio::test]
async fn duplicate_gateway_delivery_replays() {
    let server = test_server().await;
    let app = server.router();

    app.clone().oneshot(ussd_request("s1", "")).await.unwrap();
    let first = body_string(app.clone().oneshot(ussd_request("s1", "1")).await.unwrap()).await;
    let second = body_string(app.clone().oneshot(ussd_request("s1", "1")).await.unwrap()).await;

    assert_eq!(first, second);
}

#[tokio::test]
async fn health_check_responds_ok() {
    let server = test_server().await;
    let app = server.router();

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn admin_lists_published_services() {
    let server = test_server().await;
    let app = server.router();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/admin/services")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body, json!(["*100#"]));
}

#[tokio::test]
async fn admin_session_lookup() {
    let server = test_server().await;
    let app = server.router();

    app.clone().oneshot(ussd_request("s9", "")).await.unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/admin/sessions/s9")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["provider_session_id"], "s9");
    assert_eq!(body["status"], "active");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/admin/sessions/unknown")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn session_log_captures_the_dialog() {
    let server = test_server().await;
    let app = server.router();

    app.clone().oneshot(ussd_request("s1", "")).await.unwrap();
    app.clone().oneshot(ussd_request("s1", "2")).await.unwrap();

    let entries = server.log_sink().recent(10).await;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].action, "navigate");
    assert_eq!(entries[1].action, "end_session");
    assert_eq!(entries[1].status, SessionStatus::Completed);
}
