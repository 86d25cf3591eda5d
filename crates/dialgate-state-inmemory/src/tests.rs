use crate::{
    InMemoryApiConfigRepository, InMemoryFlowRepository, InMemorySessionLogSink,
    InMemorySessionRepository,
};
use chrono::{Duration, Utc};
use dialgate_core::domain::api_config::ApiConfigId;
use dialgate_core::domain::flow::ServiceDefinition;
use dialgate_core::domain::repository::{
    ApiConfigRepository, FlowRepository, SessionLogSink, SessionRepository,
};
use dialgate_core::domain::session::{FlowId, ServiceId, Session, SessionStatus};
use dialgate_core::domain::session_log::SessionLogEntry;
use serde_json::json;

fn session(provider_id: &str, phone: &str) -> Session {
    Session::new(
        ServiceId("*384#".to_string()),
        provider_id,
        phone,
        FlowId("main".to_string()),
        Duration::seconds(60),
    )
}

fn definition(service: &str, flow_ids: &[&str]) -> ServiceDefinition {
    let flows: Vec<serde_json::Value> = flow_ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            json!({
                "id": id,
                "service_id": service,
                "title": format!("Flow {}", id),
                "is_root": i == 0,
                "options": []
            })
        })
        .collect();
    serde_json::from_value(json!({
        "id": service,
        "name": "Test",
        "flows": flows
    }))
    .unwrap()
}

#[tokio::test]
async fn session_lookup_by_provider_and_phone() {
    let repo = InMemorySessionRepository::new();
    let session = session("prov-1", "+254700000001");
    repo.save(&session).await.unwrap();

    let by_provider = repo.find_by_provider_id("prov-1").await.unwrap().unwrap();
    assert_eq!(by_provider.id, session.id);

    let by_phone = repo
        .find_active_by_phone(&ServiceId("*384#".to_string()), "+254700000001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_phone.id, session.id);

    assert!(repo.find_by_provider_id("prov-2").await.unwrap().is_none());
}

#[tokio::test]
async fn terminal_session_leaves_phone_index() {
    let repo = InMemorySessionRepository::new();
    let mut session = session("prov-1", "+254700000001");
    repo.save(&session).await.unwrap();

    session.complete().unwrap();
    repo.save(&session).await.unwrap();

    // Provider lookup still resolves, for idempotent replay of the final
    // response; the phone index no longer offers it as a continuation.
    assert!(repo.find_by_provider_id("prov-1").await.unwrap().is_some());
    assert!(repo
        .find_active_by_phone(&ServiceId("*384#".to_string()), "+254700000001")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn newer_session_takes_over_phone_index() {
    let repo = InMemorySessionRepository::new();
    let mut first = session("prov-1", "+254700000001");
    repo.save(&first).await.unwrap();

    let second = session("prov-2", "+254700000001");
    repo.save(&second).await.unwrap();

    // Completing the first session must not evict the second's index slot
    first.complete().unwrap();
    repo.save(&first).await.unwrap();

    let active = repo
        .find_active_by_phone(&ServiceId("*384#".to_string()), "+254700000001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.id, second.id);
}

#[tokio::test]
async fn expire_stale_is_status_conditioned() {
    let repo = InMemorySessionRepository::new();

    let mut stale = session("prov-1", "+254700000001");
    stale.expires_at = Utc::now() - Duration::seconds(10);
    repo.save(&stale).await.unwrap();

    let fresh = session("prov-2", "+254700000002");
    repo.save(&fresh).await.unwrap();

    let mut completed = session("prov-3", "+254700000003");
    completed.expires_at = Utc::now() - Duration::seconds(10);
    completed.complete().unwrap();
    repo.save(&completed).await.unwrap();

    let expired = repo.expire_stale(Utc::now()).await.unwrap();
    assert_eq!(expired, 1);

    let stale = repo.find_by_provider_id("prov-1").await.unwrap().unwrap();
    assert_eq!(stale.status, SessionStatus::Expired);
    let fresh = repo.find_by_provider_id("prov-2").await.unwrap().unwrap();
    assert_eq!(fresh.status, SessionStatus::Active);
    let completed = repo.find_by_provider_id("prov-3").await.unwrap().unwrap();
    assert_eq!(completed.status, SessionStatus::Completed);
}

#[tokio::test]
async fn delete_clears_indexes() {
    let repo = InMemorySessionRepository::new();
    let session = session("prov-1", "+254700000001");
    repo.save(&session).await.unwrap();

    repo.delete(&session.id).await.unwrap();

    assert!(repo.is_empty().await);
    assert!(repo.find_by_provider_id("prov-1").await.unwrap().is_none());
    assert!(repo
        .find_active_by_phone(&ServiceId("*384#".to_string()), "+254700000001")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn republish_replaces_flow_index() {
    let repo = InMemoryFlowRepository::new();
    repo.save_service(&definition("*384#", &["main", "old_flow"]))
        .await
        .unwrap();
    assert!(repo
        .find_flow(&FlowId("old_flow".to_string()))
        .await
        .unwrap()
        .is_some());

    repo.save_service(&definition("*384#", &["main", "new_flow"]))
        .await
        .unwrap();

    assert!(repo
        .find_flow(&FlowId("old_flow".to_string()))
        .await
        .unwrap()
        .is_none());
    assert!(repo
        .find_flow(&FlowId("new_flow".to_string()))
        .await
        .unwrap()
        .is_some());

    let root = repo
        .root_flow(&ServiceId("*384#".to_string()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(root.id, FlowId("main".to_string()));
}

#[tokio::test]
async fn usage_counters_accumulate() {
    let repo = InMemoryApiConfigRepository::new();
    let id = ApiConfigId("balance".to_string());

    repo.record_usage(&id, true, 100).await.unwrap();
    repo.record_usage(&id, false, 300).await.unwrap();

    let stats = repo.usage(&id).await.unwrap().unwrap();
    assert_eq!(stats.total_calls, 2);
    assert_eq!(stats.successful_calls, 1);
    assert_eq!(stats.failed_calls, 1);
    assert!((stats.avg_latency_ms - 200.0).abs() < f64::EPSILON);

    assert_eq!(repo.all_usage().await.len(), 1);
}

#[tokio::test]
async fn log_sink_is_bounded() {
    let sink = InMemorySessionLogSink::with_capacity(3);
    for i in 0..5 {
        let entry = SessionLogEntry::new(
            dialgate_core::SessionId(format!("s-{}", i)),
            "prov-1",
            None,
            "navigate",
            None,
            None,
            SessionStatus::Active,
            1,
            None,
        );
        sink.append(entry).await.unwrap();
    }

    assert_eq!(sink.len().await, 3);
    let recent = sink.recent(2).await;
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].session_id.0, "s-3");
    assert_eq!(recent[1].session_id.0, "s-4");
}
