//! Session-state context resolution for template placeholders
//!
//! Input collection, API response mapping, and manual session writes land
//! data under different keys, so `{{session.*}}` paths resolve through
//! documented fallback chains. This module is the single source of truth
//! for that precedence; flow authors depend on the exact order.

use crate::domain::session::Session;
use crate::types::{value_is_empty, SessionState};
use serde_json::Value;

/// Phone-like state keys consulted by the `session.phone_number` chain,
/// in precedence order. The list is a contract; do not extend it.
const PHONE_FIELDS: [&str; 4] = ["phone", "phone_number", "msisdn", "mobile"];

/// Fallback locations for `session.data.<field>`, tried after the nested
/// `data` key itself. The order is a contract.
const DATA_FALLBACKS: [&str; 3] = ["collected_input", "selected_item_data", "collected_inputs"];

/// Borrowed view of the values templates resolve against
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    /// Session working memory
    pub state: &'a SessionState,

    /// Registered phone number, the final phone fallback
    pub phone_number: &'a str,
}

impl<'a> RenderContext<'a> {
    /// Create a context from parts
    pub fn new(state: &'a SessionState, phone_number: &'a str) -> Self {
        Self {
            state,
            phone_number,
        }
    }

    /// Context over a session's state and registered phone number
    pub fn for_session(session: &'a Session) -> Self {
        Self {
            state: &session.state,
            phone_number: &session.phone_number,
        }
    }
}

/// Resolve a placeholder path against the context
///
/// Returns `None` when the path resolves to nothing; the renderer turns
/// that into an empty substitution.
pub fn resolve(ctx: &RenderContext<'_>, path: &str) -> Option<Value> {
    if let Some(rest) = path.strip_prefix("session.") {
        if rest == "phone_number" {
            return Some(Value::String(resolve_phone(ctx)));
        }
        if rest == "data" {
            return ctx
                .state
                .get("data")
                .filter(|v| !value_is_empty(v))
                .cloned();
        }
        if let Some(field) = rest.strip_prefix("data.") {
            return resolve_data_field(ctx, field);
        }
        return resolve_state(ctx.state, rest);
    }
    resolve_state(ctx.state, path)
}

/// The phone-number fallback chain
///
/// Explicit use-registered flag, then `input_phone`, then
/// `collected_inputs.input_phone`, then the fixed phone-like field list,
/// then the session's own registered number. Always produces a value.
fn resolve_phone(ctx: &RenderContext<'_>) -> String {
    if ctx
        .state
        .get("use_registered_phone")
        .map(is_truthy)
        .unwrap_or(false)
    {
        return ctx.phone_number.to_string();
    }

    let candidates = ["input_phone", "collected_inputs.input_phone"];
    for path in candidates {
        if let Some(value) = ctx.state.lookup(path).filter(|v| !value_is_empty(v)) {
            return value_to_display(value);
        }
    }

    for field in PHONE_FIELDS {
        if let Some(value) = ctx.state.get(field).filter(|v| !value_is_empty(v)) {
            return value_to_display(value);
        }
    }

    ctx.phone_number.to_string()
}

/// The `session.data.<field>` fallback chain: the nested `data` key, then
/// each fallback location in order; first non-empty value wins.
fn resolve_data_field(ctx: &RenderContext<'_>, field: &str) -> Option<Value> {
    let direct = format!("data.{}", field);
    if let Some(value) = ctx.state.lookup(&direct).filter(|v| !value_is_empty(v)) {
        return Some(value.clone());
    }

    for location in DATA_FALLBACKS {
        let path = format!("{}.{}", location, field);
        if let Some(value) = ctx.state.lookup(&path).filter(|v| !value_is_empty(v)) {
            return Some(value.clone());
        }
    }

    None
}

/// Flat literal key first, nested dotted traversal second
fn resolve_state(state: &SessionState, path: &str) -> Option<Value> {
    if let Some(value) = state.get(path) {
        return Some(value.clone());
    }
    state.lookup(path).cloned()
}

/// Render a resolved value as display text
///
/// Strings render without quotes, null as the empty string, and compound
/// values as compact JSON.
pub fn value_to_display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        _ => false,
    }
}
