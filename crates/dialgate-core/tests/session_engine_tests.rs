//! Scenario tests for the session state machine against a fixture graph

use async_trait::async_trait;
use dialgate_core::application::definition_service::ServiceDefinitionService;
use dialgate_core::domain::repository::memory::{
    MemoryApiConfigRepository, MemoryFlowRepository, MemorySessionLogSink,
    MemorySessionRepository,
};
use dialgate_core::{
    ApiOutcome, CoreError, EngineConfig, ExternalApiConfig, ExternalApiInvoker, GatewayRequest,
    Session, SessionExecutionService, SessionKeying, SessionStatus, TemplateRenderer,
};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Scripted invoker: queued outcomes per API ID, every call recorded
#[derive(Default)]
struct StubInvoker {
    outcomes: Mutex<HashMap<String, VecDeque<Result<ApiOutcome, CoreError>>>>,
    calls: Mutex<Vec<String>>,
}

impl StubInvoker {
    fn push(&self, api_id: &str, result: Result<ApiOutcome, CoreError>) {
        self.outcomes
            .lock()
            .unwrap()
            .entry(api_id.to_string())
            .or_default()
            .push_back(result);
    }

    fn calls_to(&self, api_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == api_id)
            .count()
    }
}

#[async_trait]
impl ExternalApiInvoker for StubInvoker {
    async fn invoke(
        &self,
        config: &ExternalApiConfig,
        _session: &Session,
    ) -> Result<ApiOutcome, CoreError> {
        self.calls.lock().unwrap().push(config.id.0.clone());
        if let Some(queue) = self.outcomes.lock().unwrap().get_mut(&config.id.0) {
            if let Some(result) = queue.pop_front() {
                return result;
            }
        }
        Ok(ApiOutcome {
            mapped: Map::new(),
            raw: Value::Null,
            latency_ms: 1,
        })
    }
}

fn outcome(mapped: Value, raw: Value) -> ApiOutcome {
    ApiOutcome {
        mapped: mapped.as_object().cloned().unwrap_or_default(),
        raw,
        latency_ms: 1,
    }
}

fn catalog_items() -> Value {
    json!({
        "items": (1..=7)
            .map(|i| json!({"id": i, "name": format!("Item {}", i)}))
            .collect::<Vec<_>>()
    })
}

struct Harness {
    engine: SessionExecutionService,
    sessions: Arc<MemorySessionRepository>,
    log_sink: Arc<MemorySessionLogSink>,
    invoker: Arc<StubInvoker>,
}

async fn harness_with(config: EngineConfig) -> Harness {
    let sessions = Arc::new(MemorySessionRepository::new());
    let flows = Arc::new(MemoryFlowRepository::new());
    let apis = Arc::new(MemoryApiConfigRepository::new());
    let log_sink = Arc::new(MemorySessionLogSink::new());
    let invoker = Arc::new(StubInvoker::default());

    let definitions = ServiceDefinitionService::new(flows.clone(), apis.clone());
    for api in ["balance_api", "catalog_api", "airtime"] {
        let mut config = json!({
            "id": api,
            "name": api,
            "url": format!("https://upstream.example/{}", api)
        });
        if api == "airtime" {
            config["error_policy"] = json!({"message": "Top up failed. Try again later."});
        }
        definitions
            .publish_api(serde_json::from_value(config).unwrap())
            .await
            .unwrap();
    }
    definitions
        .publish(serde_json::from_value(fixture_service()).unwrap())
        .await
        .unwrap();

    let engine = SessionExecutionService::new(
        sessions.clone(),
        flows,
        apis,
        invoker.clone(),
        log_sink.clone(),
        TemplateRenderer::new(),
        config,
    );

    Harness {
        engine,
        sessions,
        log_sink,
        invoker,
    }
}

async fn harness() -> Harness {
    harness_with(EngineConfig::default()).await
}

fn fixture_service() -> Value {
    json!({
        "id": "*384#",
        "name": "Dialgate Demo",
        "flows": [
            {
                "id": "main_menu",
                "service_id": "*384#",
                "title": "Welcome to Dialgate Demo",
                "is_root": true,
                "options": [
                    {"selector": "1", "label": "Check Balance",
                     "action": {"type": "navigate"}, "next_flow": "balance", "position": 0},
                    {"selector": "2", "label": "Products",
                     "action": {"type": "navigate"}, "next_flow": "products", "position": 1},
                    {"selector": "3", "label": "Set PIN",
                     "action": {"type": "collect_input",
                                "prompt": "Enter your 4 digit PIN",
                                "rule": {"kind": "pin", "min_len": 4, "max_len": 4},
                                "store_key": "input_pin",
                                "error_message": "Invalid PIN."},
                     "next_flow": "pin_saved", "position": 2},
                    {"selector": "4", "label": "About",
                     "action": {"type": "message", "text": "Dial anytime."}, "position": 3},
                    {"selector": "5", "label": "Exit",
                     "action": {"type": "end_session",
                                "message": "Goodbye {{session.phone_number}}."},
                     "position": 4},
                    {"selector": "6", "label": "Top Up",
                     "action": {"type": "api_call", "api_id": "airtime",
                                "success_message": "Airtime topped up: {{amount}}",
                                "terminal": true},
                     "position": 5}
                ]
            },
            {
                "id": "balance",
                "service_id": "*384#",
                "title": "Balance",
                "text": "Your balance is {{balance}}",
                "kind": {"type": "dynamic", "api_id": "balance_api",
                         "continuation": {"type": "end"}},
                "options": []
            },
            {
                "id": "products",
                "service_id": "*384#",
                "title": "Products",
                "kind": {"type": "dynamic", "api_id": "catalog_api",
                         "items_path": "items", "label_field": "name",
                         "value_field": "id", "page_size": 3,
                         "continuation": {"type": "continue"},
                         "next_flow": "product_detail"},
                "options": []
            },
            {
                "id": "product_detail",
                "service_id": "*384#",
                "title": "Product",
                "text": "You chose {{session.data.name}} ({{selected_item}})",
                "options": [
                    {"selector": "9", "label": "Exit",
                     "action": {"type": "end_session", "message": "Bye."}, "position": 0}
                ]
            },
            {
                "id": "pin_saved",
                "service_id": "*384#",
                "title": "PIN saved",
                "text": "Your PIN {{session.data.input_pin}} was saved.",
                "options": [
                    {"selector": "0", "label": "Main menu",
                     "action": {"type": "navigate"}, "next_flow": "main_menu", "position": 0}
                ]
            }
        ]
    })
}

fn request(provider_id: &str, text: &str) -> GatewayRequest {
    GatewayRequest {
        service_code: "*384#".to_string(),
        provider_session_id: provider_id.to_string(),
        phone_number: "+254700000001".to_string(),
        text: text.to_string(),
    }
}

async fn stored(harness: &Harness, provider_id: &str) -> Session {
    use dialgate_core::SessionRepository;
    harness
        .sessions
        .find_by_provider_id(provider_id)
        .await
        .unwrap()
        .expect("session should exist")
}

#[tokio::test]
async fn root_flow_on_empty_input() {
    let h = harness().await;

    let response = h.engine.handle(&request("s1", "")).await;

    assert!(
        response.starts_with("CON Welcome to Dialgate Demo"),
        "unexpected response: {}",
        response
    );
    assert!(response.contains("1. Check Balance"));
    assert!(response.contains("5. Exit"));

    let session = stored(&h, "s1").await;
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.step_count, 1);
}

#[tokio::test]
async fn unmatched_input_reprompts_without_advancing() {
    let h = harness().await;
    h.engine.handle(&request("s1", "")).await;

    let response = h.engine.handle(&request("s1", "42")).await;

    assert!(response.starts_with("CON Invalid choice."));
    assert!(response.contains("1. Check Balance"));

    let session = stored(&h, "s1").await;
    assert_eq!(session.step_count, 1, "re-prompt must not advance the step");
    assert_eq!(session.status, SessionStatus::Active);
}

#[tokio::test]
async fn balance_scenario_renders_mapped_state_and_completes() {
    let h = harness().await;
    h.invoker.push(
        "balance_api",
        Ok(outcome(json!({"balance": "500"}), json!({"balance": "500"}))),
    );

    h.engine.handle(&request("s1", "")).await;
    let response = h.engine.handle(&request("s1", "1")).await;

    assert_eq!(response, "END Your balance is 500");
    let session = stored(&h, "s1").await;
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(h.invoker.calls_to("balance_api"), 1);
}

#[tokio::test]
async fn idempotent_replay_returns_cached_response() {
    let h = harness().await;
    h.invoker
        .push("catalog_api", Ok(outcome(json!({}), catalog_items())));

    h.engine.handle(&request("s1", "")).await;
    let first = h.engine.handle(&request("s1", "2")).await;
    assert_eq!(h.invoker.calls_to("catalog_api"), 1);

    let replayed = h.engine.handle(&request("s1", "2")).await;

    assert_eq!(replayed, first);
    assert_eq!(
        h.invoker.calls_to("catalog_api"),
        1,
        "replay must not re-invoke the API"
    );
    let session = stored(&h, "s1").await;
    assert_eq!(session.step_count, 2, "replay must not advance the step");
}

#[tokio::test]
async fn terminal_replay_repeats_end_response() {
    let h = harness().await;
    h.engine.handle(&request("s1", "")).await;
    let first = h.engine.handle(&request("s1", "5")).await;
    assert_eq!(first, "END Goodbye +254700000001.");

    let replayed = h.engine.handle(&request("s1", "5")).await;
    assert_eq!(replayed, first);

    let session = stored(&h, "s1").await;
    assert_eq!(session.status, SessionStatus::Completed);
}

#[tokio::test]
async fn option_dispatch_matches_every_selector() {
    // (selector, expected flow afterwards, expected status)
    let cases = [
        ("1", "balance", SessionStatus::Completed),
        ("2", "products", SessionStatus::Active),
        ("3", "main_menu", SessionStatus::Active),
        ("4", "main_menu", SessionStatus::Active),
        ("5", "main_menu", SessionStatus::Completed),
        ("6", "main_menu", SessionStatus::Completed),
    ];

    for (selector, expected_flow, expected_status) in cases {
        let h = harness().await;
        h.invoker
            .push("catalog_api", Ok(outcome(json!({}), catalog_items())));
        h.invoker.push(
            "balance_api",
            Ok(outcome(json!({"balance": "1"}), json!({}))),
        );
        h.invoker
            .push("airtime", Ok(outcome(json!({"amount": "100"}), json!({}))));

        h.engine.handle(&request("s1", "")).await;
        h.engine.handle(&request("s1", selector)).await;

        let session = stored(&h, "s1").await;
        assert_eq!(
            session.current_flow.0, expected_flow,
            "selector {} should land on {}",
            selector, expected_flow
        );
        assert_eq!(
            session.status, expected_status,
            "selector {} status",
            selector
        );
    }
}

#[tokio::test]
async fn input_collection_validates_and_stores() {
    let h = harness().await;
    h.engine.handle(&request("s1", "")).await;

    let prompt = h.engine.handle(&request("s1", "3")).await;
    assert_eq!(prompt, "CON Enter your 4 digit PIN");
    let session = stored(&h, "s1").await;
    assert_eq!(session.step_count, 2);
    assert!(session.pending_input.is_some());
    assert_eq!(session.current_flow.0, "main_menu", "prompting must not advance");

    // Rejected input re-prompts without advancing or storing
    let rejected = h.engine.handle(&request("s1", "3*12a4")).await;
    assert!(rejected.starts_with("CON Invalid PIN."));
    assert!(rejected.contains("Enter your 4 digit PIN"));
    let session = stored(&h, "s1").await;
    assert_eq!(session.step_count, 2);
    assert_eq!(session.status, SessionStatus::Active);
    assert!(session.state.get("input_pin").is_none());

    // Valid input stores the value and advances
    let accepted = h.engine.handle(&request("s1", "3*1234")).await;
    assert!(accepted.contains("Your PIN 1234 was saved."));
    let session = stored(&h, "s1").await;
    assert_eq!(session.current_flow.0, "pin_saved");
    assert_eq!(session.state.get("input_pin"), Some(&json!("1234")));
    assert_eq!(
        session.state.lookup("collected_inputs.input_pin"),
        Some(&json!("1234"))
    );
    assert!(session.pending_input.is_none());
}

#[tokio::test]
async fn dynamic_menu_paginates_and_selects() {
    let h = harness().await;
    h.invoker
        .push("catalog_api", Ok(outcome(json!({}), catalog_items())));

    h.engine.handle(&request("s1", "")).await;
    let page0 = h.engine.handle(&request("s1", "2")).await;
    assert!(page0.contains("1. Item 1"));
    assert!(page0.contains("3. Item 3"));
    assert!(page0.contains("99. Next"));
    assert!(!page0.contains("0. Back"));

    let page1 = h.engine.handle(&request("s1", "2*99")).await;
    assert!(page1.contains("1. Item 4"));
    assert!(page1.contains("99. Next"));
    assert!(page1.contains("0. Back"));

    let page2 = h.engine.handle(&request("s1", "2*99*99")).await;
    assert!(page2.contains("1. Item 7"));
    assert!(!page2.contains("99. Next"));
    assert!(page2.contains("0. Back"));

    let back = h.engine.handle(&request("s1", "2*99*99*0")).await;
    assert!(back.contains("1. Item 4"));

    // Selecting the second item of page 1 resolves Item 5
    let detail = h.engine.handle(&request("s1", "2*99*99*0*2")).await;
    assert!(detail.contains("You chose Item 5 (5)"), "got: {}", detail);

    let session = stored(&h, "s1").await;
    assert_eq!(session.current_flow.0, "product_detail");
    assert_eq!(session.state.get("selected_item"), Some(&json!(5)));
    assert_eq!(h.invoker.calls_to("catalog_api"), 1, "items are fetched once");
}

#[tokio::test]
async fn dynamic_menu_empty_list_ends_with_message() {
    let h = harness().await;
    h.invoker
        .push("catalog_api", Ok(outcome(json!({}), json!({"items": []}))));

    h.engine.handle(&request("s1", "")).await;
    let response = h.engine.handle(&request("s1", "2")).await;

    assert_eq!(response, "END No items available.");
    let session = stored(&h, "s1").await;
    assert_eq!(session.status, SessionStatus::Completed);
}

#[tokio::test]
async fn api_failure_applies_error_policy() {
    let h = harness().await;
    h.invoker.push(
        "airtime",
        Err(CoreError::ExternalApiError("upstream 500".to_string())),
    );

    h.engine.handle(&request("s1", "")).await;
    let response = h.engine.handle(&request("s1", "6")).await;

    assert_eq!(response, "END Top up failed. Try again later.");
    let session = stored(&h, "s1").await;
    assert_eq!(session.status, SessionStatus::Terminated);
}

#[tokio::test]
async fn unknown_service_yields_generic_terminal_message() {
    let h = harness().await;

    let mut bad = request("s1", "");
    bad.service_code = "*999#".to_string();
    let response = h.engine.handle(&bad).await;

    assert_eq!(
        response,
        "END The service is temporarily unavailable. Please try again later."
    );
}

#[tokio::test]
async fn expired_session_restarts_at_root() {
    use dialgate_core::SessionRepository;

    let h = harness().await;
    h.engine.handle(&request("s1", "")).await;

    let mut session = stored(&h, "s1").await;
    session.expires_at = chrono::Utc::now() - chrono::Duration::seconds(5);
    h.sessions.save(&session).await.unwrap();

    let response = h.engine.handle(&request("s1", "1")).await;

    assert!(
        response.starts_with("CON Welcome to Dialgate Demo"),
        "expired continuation must restart at the root: {}",
        response
    );
    let fresh = stored(&h, "s1").await;
    assert_eq!(fresh.step_count, 1);
    assert_eq!(fresh.status, SessionStatus::Active);
}

#[tokio::test]
async fn phone_keying_continues_across_provider_ids() {
    let h = harness_with(EngineConfig {
        keying: SessionKeying::ServiceAndPhone,
        ..EngineConfig::default()
    })
    .await;

    h.engine.handle(&request("gw-a", "")).await;
    let response = h.engine.handle(&request("gw-b", "5")).await;

    assert_eq!(response, "END Goodbye +254700000001.");
}

#[tokio::test]
async fn session_log_records_each_step() {
    let h = harness().await;
    h.engine.handle(&request("s1", "")).await;
    h.engine.handle(&request("s1", "42")).await;
    h.engine.handle(&request("s1", "5")).await;
    // Duplicate delivery is logged as a replay
    h.engine.handle(&request("s1", "5")).await;

    let entries = h.log_sink.entries();
    let actions: Vec<&str> = entries.iter().map(|e| e.action.as_str()).collect();

    assert_eq!(
        actions,
        vec!["navigate", "invalid_option", "end_session", "replay"]
    );
    assert!(entries.iter().all(|e| e.error.is_none()));
    assert_eq!(entries[2].status, SessionStatus::Completed);
}

#[tokio::test]
async fn custom_markers_frame_responses() {
    let h = harness_with(EngineConfig {
        markers: dialgate_core::MarkerVocabulary::new("C", "E"),
        ..EngineConfig::default()
    })
    .await;

    let response = h.engine.handle(&request("s1", "")).await;
    assert!(response.starts_with("C Welcome"));

    let response = h.engine.handle(&request("s1", "5")).await;
    assert!(response.starts_with("E Goodbye"));
}
