use crate::domain::session::FlowId;
use crate::types::{lookup_path, value_is_empty};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Value object: external API configuration ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiConfigId(pub String);

/// HTTP method of a configured call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    /// GET
    #[default]
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl HttpMethod {
    /// Uppercase method name
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// Where an API key is injected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyLocation {
    /// Request header
    #[default]
    Header,
    /// Query-string parameter
    Query,
}

/// Authentication scheme for a configured call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthScheme {
    /// No authentication
    #[default]
    None,

    /// Static API key in a header or query parameter
    ApiKey {
        /// Header or query injection
        #[serde(default)]
        location: ApiKeyLocation,
        /// Header/parameter name
        name: String,
        /// Key value
        value: String,
    },

    /// Static bearer token
    Bearer {
        /// Token value
        token: String,
    },

    /// HTTP basic auth
    Basic {
        /// Username
        username: String,
        /// Password
        #[serde(default)]
        password: Option<String>,
    },

    /// OAuth2 client-credentials grant, token fetched per call
    OauthClientCredentials {
        /// Token endpoint
        token_url: String,
        /// Client ID
        client_id: String,
        /// Client secret
        client_secret: String,
        /// Requested scope
        #[serde(default)]
        scope: Option<String>,
    },
}

/// Where a mapped request field lands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestTarget {
    /// JSON body field
    #[default]
    Body,
    /// Query-string parameter
    Query,
    /// Request header
    Header,
}

/// Copies a session-state value into a request field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMapping {
    /// Dotted path into session state
    pub state_path: String,

    /// Request field/parameter/header name
    pub request_field: String,

    /// Body, query, or header
    #[serde(default)]
    pub target: RequestTarget,
}

/// Extracts a response value into a session-state key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMapping {
    /// Dotted path into the response body
    pub response_path: String,

    /// Session-state key the value is stored under
    pub state_key: String,
}

/// Comparison operator of a success criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionOp {
    /// Value equals the expectation
    Equals,
    /// Value differs from the expectation
    NotEquals,
    /// String/array/object containment
    Contains,
    /// Numeric greater-than
    GreaterThan,
    /// Numeric less-than
    LessThan,
    /// Path resolves to a non-empty value
    Exists,
    /// Path is absent or empty
    NotExists,
}

/// One declarative success rule evaluated against the response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessCriterion {
    /// Dotted path into the response body
    pub path: String,

    /// Comparison operator
    pub op: CriterionOp,

    /// Expected value; ignored by exists/not_exists
    #[serde(default)]
    pub expected: Value,
}

impl SuccessCriterion {
    /// Whether the criterion holds for a response body
    pub fn holds(&self, body: &Value) -> bool {
        let actual = lookup_path(body, &self.path);
        match self.op {
            CriterionOp::Exists => actual.map(|v| !value_is_empty(v)).unwrap_or(false),
            CriterionOp::NotExists => actual.map(value_is_empty).unwrap_or(true),
            CriterionOp::Equals => actual.map(|v| loosely_equal(v, &self.expected)).unwrap_or(false),
            CriterionOp::NotEquals => actual
                .map(|v| !loosely_equal(v, &self.expected))
                .unwrap_or(true),
            CriterionOp::Contains => actual.map(|v| contains(v, &self.expected)).unwrap_or(false),
            CriterionOp::GreaterThan => compare(actual, &self.expected)
                .map(|ord| ord == std::cmp::Ordering::Greater)
                .unwrap_or(false),
            CriterionOp::LessThan => compare(actual, &self.expected)
                .map(|ord| ord == std::cmp::Ordering::Less)
                .unwrap_or(false),
        }
    }
}

/// Gateway configs routinely express numbers as strings, so equality
/// falls back to a textual comparison when the JSON types differ.
fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    scalar_text(actual)
        .zip(scalar_text(expected))
        .map(|(a, b)| a == b)
        .unwrap_or(false)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::String(s) => scalar_text(expected).map(|e| s.contains(&e)).unwrap_or(false),
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, expected)),
        Value::Object(map) => scalar_text(expected)
            .map(|key| map.contains_key(&key))
            .unwrap_or(false),
        _ => false,
    }
}

fn compare(actual: Option<&Value>, expected: &Value) -> Option<std::cmp::Ordering> {
    let a = numeric(actual?)?;
    let b = numeric(expected)?;
    a.partial_cmp(&b)
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// How multiple success criteria combine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriteriaMode {
    /// Every criterion must hold
    #[default]
    All,
    /// At least one criterion must hold
    Any,
}

/// Evaluate a criteria list against a response body
///
/// An empty list always succeeds.
pub fn evaluate_criteria(criteria: &[SuccessCriterion], mode: CriteriaMode, body: &Value) -> bool {
    if criteria.is_empty() {
        return true;
    }
    match mode {
        CriteriaMode::All => criteria.iter().all(|c| c.holds(body)),
        CriteriaMode::Any => criteria.iter().any(|c| c.holds(body)),
    }
}

/// What the session engine does when a call fails after retries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPolicy {
    /// User-facing failure message
    #[serde(default)]
    pub message: Option<String>,

    /// Flow to route the session to instead of terminating
    #[serde(default)]
    pub fallback_flow: Option<FlowId>,

    /// Terminate the session when no fallback flow applies
    #[serde(default = "default_terminate")]
    pub terminate: bool,
}

fn default_terminate() -> bool {
    true
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            message: None,
            fallback_flow: None,
            terminate: true,
        }
    }
}

/// Reusable description of a third-party HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalApiConfig {
    /// Configuration ID
    pub id: ApiConfigId,

    /// Human-readable name
    pub name: String,

    /// Endpoint URL; may contain `{{...}}` placeholders
    pub url: String,

    /// HTTP method
    #[serde(default)]
    pub method: HttpMethod,

    /// Per-attempt timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Extra attempts after the first on transport failure or 5xx
    #[serde(default)]
    pub retry_attempts: u32,

    /// Authentication scheme
    #[serde(default)]
    pub auth: AuthScheme,

    /// Static request headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Body template rendered against session state; parsed as JSON when
    /// possible, otherwise sent verbatim
    #[serde(default)]
    pub body_template: Option<String>,

    /// Session-state values copied into the request
    #[serde(default)]
    pub request_mapping: Vec<RequestMapping>,

    /// Response values extracted into session state
    #[serde(default)]
    pub response_mapping: Vec<ResponseMapping>,

    /// Declarative success rules
    #[serde(default)]
    pub success_criteria: Vec<SuccessCriterion>,

    /// AND/OR combination of the rules
    #[serde(default)]
    pub criteria_mode: CriteriaMode,

    /// Failure handling after retries are exhausted
    #[serde(default)]
    pub error_policy: ErrorPolicy,
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// Usage counters maintained per API configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiUsageStats {
    /// Total invocation count
    pub total_calls: u64,

    /// Successful invocations
    pub successful_calls: u64,

    /// Failed invocations
    pub failed_calls: u64,

    /// Rolling average latency in milliseconds
    pub avg_latency_ms: f64,
}

impl ApiUsageStats {
    /// Record one call outcome, folding the latency into the rolling average
    pub fn record(&mut self, success: bool, latency_ms: u64) {
        self.total_calls += 1;
        if success {
            self.successful_calls += 1;
        } else {
            self.failed_calls += 1;
        }
        self.avg_latency_ms +=
            (latency_ms as f64 - self.avg_latency_ms) / self.total_calls as f64;
    }
}
