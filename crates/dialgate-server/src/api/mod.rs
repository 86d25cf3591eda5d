//! API module for the Dialgate server
//!
//! One gateway-facing callback plus health and read-only admin routes.

use axum::extract::{Form, Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use dialgate_core::domain::repository::{FlowRepository, SessionRepository};
use dialgate_core::{GatewayRequest, ServiceId, Session};

use crate::error::ServerError;
use crate::server::DialgateServer;

/// Build the router for API endpoints
pub fn build_router(server: Arc<DialgateServer>) -> Router {
    Router::new()
        // Gateway callback
        .route("/v1/ussd", post(handle_ussd_callback))
        // Read-only admin surface
        .route("/v1/admin/services", get(list_services_handler))
        .route("/v1/admin/services/:service_id", get(get_service_handler))
        .route("/v1/admin/sessions/:provider_id", get(get_session_handler))
        .route("/v1/admin/usage", get(usage_handler))
        // Health check
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

/// AT-style gateway callback parameters
#[derive(Debug, Deserialize)]
pub struct UssdCallback {
    /// Gateway-assigned session ID
    #[serde(rename = "sessionId")]
    pub session_id: String,

    /// Dialed service code
    #[serde(rename = "serviceCode")]
    pub service_code: String,

    /// Subscriber phone number
    #[serde(rename = "phoneNumber")]
    pub phone_number: String,

    /// Accumulated input chain
    #[serde(default)]
    pub text: String,
}

/// The gateway callback: always 200, body is `<marker> <text>`
async fn handle_ussd_callback(
    State(server): State<Arc<DialgateServer>>,
    Form(callback): Form<UssdCallback>,
) -> String {
    let request = GatewayRequest {
        service_code: callback.service_code,
        provider_session_id: callback.session_id,
        phone_number: callback.phone_number,
        text: callback.text,
    };
    server.engine().handle(&request).await
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_services_handler(
    State(server): State<Arc<DialgateServer>>,
) -> Result<Json<Vec<String>>, ServerError> {
    let ids = server.flows().list_services().await?;
    Ok(Json(ids.into_iter().map(|id| id.0).collect()))
}

async fn get_service_handler(
    State(server): State<Arc<DialgateServer>>,
    Path(service_id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    let definition = server
        .flows()
        .find_service(&ServiceId(service_id.clone()))
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("Service {}", service_id)))?;
    Ok(Json(serde_json::to_value(definition).map_err(|e| {
        ServerError::InternalError(e.to_string())
    })?))
}

async fn get_session_handler(
    State(server): State<Arc<DialgateServer>>,
    Path(provider_id): Path<String>,
) -> Result<Json<Session>, ServerError> {
    let session = server
        .sessions()
        .find_by_provider_id(&provider_id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("Session {}", provider_id)))?;
    Ok(Json(session))
}

async fn usage_handler(State(server): State<Arc<DialgateServer>>) -> Json<Value> {
    let usage = server.apis().all_usage().await;
    let rows: Vec<Value> = usage
        .into_iter()
        .map(|(id, stats)| {
            json!({
                "api_id": id.0,
                "total_calls": stats.total_calls,
                "successful_calls": stats.successful_calls,
                "failed_calls": stats.failed_calls,
                "avg_latency_ms": stats.avg_latency_ms,
            })
        })
        .collect();
    Json(json!({ "usage": rows }))
}
