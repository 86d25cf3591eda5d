//! Template rendering for prompts, menus, and messages

use crate::application::context::{resolve, value_to_display, RenderContext};
use regex::{Captures, Regex};

/// Maximum length of a single substituted value
const MAX_VALUE_LEN: usize = 500;

/// Substitutes `{{path.to.value}}` placeholders against a render context
///
/// Unresolvable placeholders render as the empty string; a template never
/// fails to render and never leaks the raw placeholder. Every substituted
/// value passes the output sanitizer before insertion.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    placeholder: Regex,
    max_value_len: usize,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    /// Create a renderer with the default value-length cap
    pub fn new() -> Self {
        Self {
            placeholder: Regex::new(r"\{\{([^{}]+)\}\}").expect("placeholder pattern is valid"),
            max_value_len: MAX_VALUE_LEN,
        }
    }

    /// Render a template against the context
    pub fn render(&self, template: &str, ctx: &RenderContext<'_>) -> String {
        self.placeholder
            .replace_all(template, |caps: &Captures<'_>| {
                let path = caps[1].trim();
                match resolve(ctx, path) {
                    Some(value) => self.sanitize(&value_to_display(&value)),
                    None => String::new(),
                }
            })
            .into_owned()
    }

    /// Clamp length and strip control characters from a substituted value
    ///
    /// Substituted values must never inject protocol-significant characters
    /// into the gateway response.
    fn sanitize(&self, value: &str) -> String {
        value
            .chars()
            .filter(|c| !c.is_control())
            .take(self.max_value_len)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionState;
    use serde_json::json;

    fn state_of(value: serde_json::Value) -> SessionState {
        SessionState::from(value.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn test_render_simple_substitution() {
        let state = state_of(json!({"balance": "500"}));
        let ctx = RenderContext::new(&state, "");
        let renderer = TemplateRenderer::new();

        assert_eq!(
            renderer.render("Your balance is {{balance}}", &ctx),
            "Your balance is 500"
        );
    }

    #[test]
    fn test_render_multiple_and_whitespace() {
        let state = state_of(json!({"name": "Amina", "amount": 50}));
        let ctx = RenderContext::new(&state, "");
        let renderer = TemplateRenderer::new();

        assert_eq!(
            renderer.render("{{ name }} pays {{ amount }}", &ctx),
            "Amina pays 50"
        );
    }

    #[test]
    fn test_unresolvable_renders_empty() {
        let state = SessionState::new();
        let ctx = RenderContext::new(&state, "");
        let renderer = TemplateRenderer::new();

        assert_eq!(renderer.render("Hello {{missing}}!", &ctx), "Hello !");
    }

    #[test]
    fn test_no_placeholders_passes_through() {
        let state = SessionState::new();
        let ctx = RenderContext::new(&state, "");
        let renderer = TemplateRenderer::new();

        let text = "Welcome.\n1. Check Balance\n2. Exit";
        assert_eq!(renderer.render(text, &ctx), text);
    }

    #[test]
    fn test_sanitizer_strips_control_characters() {
        let state = state_of(json!({"evil": "a\nb\rc\u{0007}d"}));
        let ctx = RenderContext::new(&state, "");
        let renderer = TemplateRenderer::new();

        assert_eq!(renderer.render("[{{evil}}]", &ctx), "[abcd]");
    }

    #[test]
    fn test_sanitizer_clamps_length() {
        let long = "x".repeat(600);
        let state = state_of(json!({ "long": long }));
        let ctx = RenderContext::new(&state, "");
        let renderer = TemplateRenderer::new();

        let rendered = renderer.render("{{long}}", &ctx);
        assert_eq!(rendered.len(), 500);
    }

    #[test]
    fn test_template_newlines_are_preserved() {
        // Only substituted values are sanitized, never the template itself
        let state = state_of(json!({"name": "Amina"}));
        let ctx = RenderContext::new(&state, "");
        let renderer = TemplateRenderer::new();

        assert_eq!(
            renderer.render("Hello {{name}}\n1. Continue", &ctx),
            "Hello Amina\n1. Continue"
        );
    }

    #[test]
    fn test_render_session_paths() {
        let state = state_of(json!({"collected_input": {"account": "ACC-9"}}));
        let ctx = RenderContext::new(&state, "+254700000001");
        let renderer = TemplateRenderer::new();

        assert_eq!(
            renderer.render("{{session.phone_number}} / {{session.data.account}}", &ctx),
            "+254700000001 / ACC-9"
        );
    }
}
