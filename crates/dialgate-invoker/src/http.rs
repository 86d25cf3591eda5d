use async_trait::async_trait;
use dialgate_core::application::context::{resolve, value_to_display, RenderContext};
use dialgate_core::domain::api_config::{
    evaluate_criteria, ApiKeyLocation, AuthScheme, ExternalApiConfig, HttpMethod, RequestTarget,
};
use dialgate_core::types::lookup_path;
use dialgate_core::{
    ApiConfigRepository, ApiOutcome, CoreError, ExternalApiInvoker, Session, TemplateRenderer,
};
use reqwest::{Client, Method, RequestBuilder};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Response-body paths probed for an upstream error message
const ERROR_MESSAGE_PATHS: [&str; 4] = ["message", "error.message", "error_message", "error"];

/// One attempt's failure, split by whether a retry can help
enum AttemptError {
    /// Transport failure, timeout, or 5xx
    Transient(String),

    /// 4xx or a malformed configuration; retrying cannot change the outcome
    Permanent(String),
}

/// Executes configured external API calls over HTTP
///
/// Holds one connection-pooled client for all configurations; per-call
/// timeouts come from the configuration being invoked.
pub struct HttpInvoker {
    client: Client,
    api_repo: Arc<dyn ApiConfigRepository>,
    renderer: TemplateRenderer,
}

impl HttpInvoker {
    /// Create an invoker recording usage through the given repository
    pub fn new(api_repo: Arc<dyn ApiConfigRepository>) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .expect("default reqwest client"),
            api_repo,
            renderer: TemplateRenderer::new(),
        }
    }

    async fn call_with_retry(
        &self,
        config: &ExternalApiConfig,
        session: &Session,
    ) -> Result<(Value, Map<String, Value>), CoreError> {
        let attempts = config.retry_attempts + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.execute_once(config, session).await {
                Ok(body) => {
                    if !evaluate_criteria(&config.success_criteria, config.criteria_mode, &body) {
                        return Err(CoreError::ExternalApiError(failure_message(
                            config,
                            Some(&body),
                            "success criteria not met",
                        )));
                    }
                    let mapped = extract_mapped(config, &body);
                    return Ok((body, mapped));
                }
                Err(AttemptError::Permanent(message)) => {
                    return Err(CoreError::ExternalApiError(message));
                }
                Err(AttemptError::Transient(message)) => {
                    last_error = message;
                    if attempt < attempts {
                        debug!(
                            api = %config.id.0,
                            attempt,
                            error = %last_error,
                            "retrying after transient failure"
                        );
                        tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                    }
                }
            }
        }

        Err(CoreError::ExternalApiError(failure_message(
            config,
            None,
            &last_error,
        )))
    }

    async fn execute_once(
        &self,
        config: &ExternalApiConfig,
        session: &Session,
    ) -> Result<Value, AttemptError> {
        let request = self.build_request(config, session).await?;

        let response = request
            .send()
            .await
            .map_err(|e| AttemptError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AttemptError::Transient(format!("failed to read response: {}", e)))?;
        let body: Value =
            serde_json::from_str(&text).unwrap_or_else(|_| json!({ "raw_body": text }));

        if status.is_server_error() {
            return Err(AttemptError::Transient(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(AttemptError::Permanent(failure_message(
                config,
                Some(&body),
                &format!("HTTP {}", status.as_u16()),
            )));
        }

        Ok(body)
    }

    async fn build_request(
        &self,
        config: &ExternalApiConfig,
        session: &Session,
    ) -> Result<RequestBuilder, AttemptError> {
        let ctx = RenderContext::for_session(session);
        let url = self.renderer.render(&config.url, &ctx);
        let method = to_method(config.method);

        let mut request = self
            .client
            .request(method, &url)
            .timeout(Duration::from_millis(config.timeout_ms));

        for (name, value) in &config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        // Body template first, then field mappings layered on top of it
        let mut body_map: Map<String, Value> = Map::new();
        let mut raw_body: Option<String> = None;
        if let Some(template) = &config.body_template {
            let rendered = self.renderer.render(template, &ctx);
            match serde_json::from_str::<Value>(&rendered) {
                Ok(Value::Object(map)) => body_map = map,
                Ok(other) => body_map = Map::from_iter([("body".to_string(), other)]),
                Err(_) => raw_body = Some(rendered),
            }
        }

        let mut query: Vec<(String, String)> = Vec::new();
        for mapping in &config.request_mapping {
            let Some(value) = resolve(&ctx, &mapping.state_path) else {
                debug!(
                    api = %config.id.0,
                    path = %mapping.state_path,
                    "request mapping path unresolved"
                );
                continue;
            };
            match mapping.target {
                RequestTarget::Body => {
                    body_map.insert(mapping.request_field.clone(), value);
                }
                RequestTarget::Query => {
                    query.push((mapping.request_field.clone(), value_to_display(&value)));
                }
                RequestTarget::Header => {
                    request = request
                        .header(mapping.request_field.as_str(), value_to_display(&value));
                }
            }
        }

        match &config.auth {
            AuthScheme::None => {}
            AuthScheme::ApiKey {
                location,
                name,
                value,
            } => match location {
                ApiKeyLocation::Header => {
                    request = request.header(name.as_str(), value.as_str());
                }
                ApiKeyLocation::Query => query.push((name.clone(), value.clone())),
            },
            AuthScheme::Bearer { token } => request = request.bearer_auth(token),
            AuthScheme::Basic { username, password } => {
                request = request.basic_auth(username, password.as_deref());
            }
            AuthScheme::OauthClientCredentials {
                token_url,
                client_id,
                client_secret,
                scope,
            } => {
                let token = self
                    .fetch_oauth_token(token_url, client_id, client_secret, scope.as_deref())
                    .await?;
                request = request.bearer_auth(token);
            }
        }

        if !query.is_empty() {
            request = request.query(&query);
        }
        if let Some(raw) = raw_body {
            request = request.body(raw);
        } else if !body_map.is_empty() {
            request = request.json(&Value::Object(body_map));
        }

        Ok(request)
    }

    // TODO: cache client-credentials tokens until expiry instead of
    // fetching one per call.
    async fn fetch_oauth_token(
        &self,
        token_url: &str,
        client_id: &str,
        client_secret: &str,
        scope: Option<&str>,
    ) -> Result<String, AttemptError> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        if let Some(scope) = scope {
            form.push(("scope", scope));
        }

        let response = self
            .client
            .post(token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AttemptError::Transient(format!("token request failed: {}", e)))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| AttemptError::Transient(format!("token response unreadable: {}", e)))?;

        body.get("access_token")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| {
                AttemptError::Permanent("token response missing access_token".to_string())
            })
    }
}

#[async_trait]
impl ExternalApiInvoker for HttpInvoker {
    async fn invoke(
        &self,
        config: &ExternalApiConfig,
        session: &Session,
    ) -> Result<ApiOutcome, CoreError> {
        let started = Instant::now();
        let result = self.call_with_retry(config, session).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        if let Err(err) = self
            .api_repo
            .record_usage(&config.id, result.is_ok(), latency_ms)
            .await
        {
            warn!(api = %config.id.0, error = %err, "failed to record API usage");
        }

        result.map(|(raw, mapped)| ApiOutcome {
            mapped,
            raw,
            latency_ms,
        })
    }
}

fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// Extract response-mapped fields; missing paths are skipped, not errors
fn extract_mapped(config: &ExternalApiConfig, body: &Value) -> Map<String, Value> {
    let mut mapped = Map::new();
    for mapping in &config.response_mapping {
        match lookup_path(body, &mapping.response_path) {
            Some(value) => {
                mapped.insert(mapping.state_key.clone(), value.clone());
            }
            None => debug!(
                api = %config.id.0,
                path = %mapping.response_path,
                "response mapping path missing"
            ),
        }
    }
    mapped
}

/// The configured error message, else one extracted from the body, else
/// the fallback
fn failure_message(config: &ExternalApiConfig, body: Option<&Value>, fallback: &str) -> String {
    if let Some(message) = &config.error_policy.message {
        return message.clone();
    }
    if let Some(body) = body {
        for path in ERROR_MESSAGE_PATHS {
            if let Some(message) = lookup_path(body, path).and_then(|v| v.as_str()) {
                if !message.is_empty() {
                    return message.to_string();
                }
            }
        }
    }
    fallback.to_string()
}
