use crate::domain::api_config::ApiConfigId;
use crate::domain::session::{FlowId, ServiceId};
use crate::CoreError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One menu/screen node in a USSD dialog graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    /// ID of the flow
    pub id: FlowId,

    /// Service the flow belongs to
    pub service_id: ServiceId,

    /// Display title, first line of the rendered menu
    pub title: String,

    /// Body text; when absent the menu body is derived from the options
    #[serde(default)]
    pub text: Option<String>,

    /// Whether this is the service's entry flow
    #[serde(default)]
    pub is_root: bool,

    /// Static menu or runtime-generated dynamic menu
    #[serde(default)]
    pub kind: FlowKind,

    /// Selectable options
    #[serde(default)]
    pub options: Vec<FlowOption>,
}

/// Flow type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowKind {
    /// Fixed menu defined by the flow's options
    #[default]
    Static,

    /// Menu generated at runtime from an external API response
    Dynamic(DynamicMenuConfig),
}

impl Flow {
    /// Dynamic-menu configuration, if this is a dynamic flow
    pub fn dynamic_config(&self) -> Option<&DynamicMenuConfig> {
        match &self.kind {
            FlowKind::Dynamic(config) => Some(config),
            FlowKind::Static => None,
        }
    }

    /// Whether the flow's menu is generated at runtime
    pub fn is_dynamic(&self) -> bool {
        matches!(self.kind, FlowKind::Dynamic(_))
    }

    /// Options sorted by display position
    pub fn ordered_options(&self) -> Vec<&FlowOption> {
        let mut options: Vec<&FlowOption> = self.options.iter().collect();
        options.sort_by_key(|o| o.position);
        options
    }

    /// Find the option selected by a raw input value
    pub fn option_for(&self, selector: &str) -> Option<&FlowOption> {
        self.options.iter().find(|o| o.selector == selector)
    }

    /// Full menu text: title, body, then one `<selector>. <label>` line per option
    pub fn menu_text(&self) -> String {
        let mut lines = vec![self.title.clone()];
        if let Some(text) = &self.text {
            if !text.is_empty() {
                lines.push(text.clone());
            }
        }
        for option in self.ordered_options() {
            lines.push(format!("{}. {}", option.selector, option.label));
        }
        lines.join("\n")
    }
}

/// An edge from a flow to an action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowOption {
    /// Input value that selects this option
    pub selector: String,

    /// Display label
    pub label: String,

    /// What selecting the option does
    pub action: OptionAction,

    /// Flow to advance to, when the action navigates
    #[serde(default)]
    pub next_flow: Option<FlowId>,

    /// Display ordering
    #[serde(default)]
    pub position: u32,
}

/// Action bound to a flow option
///
/// A closed set: adding an action kind is a compile-time-checked change to
/// every dispatch site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptionAction {
    /// Move the session to the option's next flow
    Navigate,

    /// Show a message; terminal messages end the session
    Message {
        /// Message template
        text: String,
        /// End the session after showing the message
        #[serde(default)]
        terminal: bool,
    },

    /// Show a final message and complete the session
    EndSession {
        /// Final message template
        message: String,
    },

    /// Prompt for free-form input, validate it, store it in session state
    CollectInput {
        /// Prompt template
        prompt: String,
        /// Validation rule for the captured value
        #[serde(default)]
        rule: InputRule,
        /// Session-state key the value is stored under
        store_key: String,
        /// Message shown before the prompt on validation failure
        #[serde(default)]
        error_message: Option<String>,
    },

    /// Invoke a configured external API and merge mapped fields into state
    ApiCall {
        /// External API configuration to invoke
        api_id: ApiConfigId,
        /// Template rendered after a successful call
        #[serde(default)]
        success_message: Option<String>,
        /// End the session after a successful call
        #[serde(default)]
        terminal: bool,
    },
}

impl OptionAction {
    /// Short tag for logging and session-log rows
    pub fn tag(&self) -> &'static str {
        match self {
            OptionAction::Navigate => "navigate",
            OptionAction::Message { .. } => "message",
            OptionAction::EndSession { .. } => "end_session",
            OptionAction::CollectInput { .. } => "input_collection",
            OptionAction::ApiCall { .. } => "api_call",
        }
    }
}

/// Expected shape of a collected input value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    /// Any text
    #[default]
    Text,

    /// Digits only
    Numeric,

    /// Digits with an optional leading `+`, at least seven digits
    Phone,

    /// Digits only, typically length-bounded by the rule
    Pin,
}

/// Validation rule for an input-collection option
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputRule {
    /// Expected value shape
    #[serde(default)]
    pub kind: InputKind,

    /// Minimum length in characters
    #[serde(default)]
    pub min_len: Option<usize>,

    /// Maximum length in characters
    #[serde(default)]
    pub max_len: Option<usize>,

    /// Full-match regex the value must satisfy
    #[serde(default)]
    pub pattern: Option<String>,
}

impl InputRule {
    /// Validate a raw input value, returning a user-facing rejection reason
    pub fn validate(&self, input: &str) -> Result<(), String> {
        let length = input.chars().count();
        if let Some(min) = self.min_len {
            if length < min {
                return Err(format!("Enter at least {} characters.", min));
            }
        }
        if let Some(max) = self.max_len {
            if length > max {
                return Err(format!("Enter at most {} characters.", max));
            }
        }

        match self.kind {
            InputKind::Text => {}
            InputKind::Numeric | InputKind::Pin => {
                if input.is_empty() || !input.chars().all(|c| c.is_ascii_digit()) {
                    return Err("Enter digits only.".to_string());
                }
            }
            InputKind::Phone => {
                let digits = input.strip_prefix('+').unwrap_or(input);
                if digits.len() < 7 || !digits.chars().all(|c| c.is_ascii_digit()) {
                    return Err("Enter a valid phone number.".to_string());
                }
            }
        }

        if let Some(pattern) = &self.pattern {
            match Regex::new(&format!("^(?:{})$", pattern)) {
                Ok(re) => {
                    if !re.is_match(input) {
                        return Err("Invalid value.".to_string());
                    }
                }
                Err(_) => return Err("Invalid value.".to_string()),
            }
        }

        Ok(())
    }
}

/// What happens after a dynamic-menu item is selected
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContinuationPolicy {
    /// Navigate to the configured next flow
    #[default]
    Continue,

    /// Render the flow's text and complete the session
    End,

    /// Invoke a follow-up API before continuing or ending
    ApiDependent {
        /// Follow-up API configuration
        api_id: ApiConfigId,
    },
}

/// Configuration block for a dynamic flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicMenuConfig {
    /// API whose response backs the menu
    pub api_id: ApiConfigId,

    /// Path to the item list within the response; absent means message mode
    /// (invoke, merge mapped fields, render the flow's text)
    #[serde(default)]
    pub items_path: Option<String>,

    /// Item field rendered as the option label
    #[serde(default = "default_label_field")]
    pub label_field: String,

    /// Item field stored as the selected value
    #[serde(default = "default_value_field")]
    pub value_field: String,

    /// Items per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// What selecting an item does
    #[serde(default)]
    pub continuation: ContinuationPolicy,

    /// Next flow for the `continue` policy
    #[serde(default)]
    pub next_flow: Option<FlowId>,

    /// Message rendered when the API returns no items
    #[serde(default = "default_empty_message")]
    pub empty_message: String,

    /// Label of the next-page option
    #[serde(default = "default_next_label")]
    pub next_label: String,

    /// Label of the previous-page option
    #[serde(default = "default_back_label")]
    pub back_label: String,

    /// Selector of the next-page option
    #[serde(default = "default_next_selector")]
    pub next_selector: String,

    /// Selector of the previous-page option
    #[serde(default = "default_back_selector")]
    pub back_selector: String,
}

fn default_label_field() -> String {
    "name".to_string()
}

fn default_value_field() -> String {
    "id".to_string()
}

fn default_page_size() -> usize {
    5
}

fn default_empty_message() -> String {
    "No items available.".to_string()
}

fn default_next_label() -> String {
    "Next".to_string()
}

fn default_back_label() -> String {
    "Back".to_string()
}

fn default_next_selector() -> String {
    "99".to_string()
}

fn default_back_selector() -> String {
    "0".to_string()
}

/// A service's complete flow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Service ID (dialed short code)
    pub id: ServiceId,

    /// Human-readable name
    pub name: String,

    /// All flows of the service
    pub flows: Vec<Flow>,
}

impl ServiceDefinition {
    /// The service's entry flow
    pub fn root_flow(&self) -> Option<&Flow> {
        self.flows.iter().find(|f| f.is_root)
    }

    /// Find a flow by ID
    pub fn flow(&self, id: &FlowId) -> Option<&Flow> {
        self.flows.iter().find(|f| &f.id == id)
    }

    /// All API configuration IDs referenced by the graph
    pub fn referenced_api_ids(&self) -> Vec<ApiConfigId> {
        let mut ids = Vec::new();
        for flow in &self.flows {
            if let FlowKind::Dynamic(config) = &flow.kind {
                ids.push(config.api_id.clone());
                if let ContinuationPolicy::ApiDependent { api_id } = &config.continuation {
                    ids.push(api_id.clone());
                }
            }
            for option in &flow.options {
                if let OptionAction::ApiCall { api_id, .. } = &option.action {
                    ids.push(api_id.clone());
                }
            }
        }
        ids
    }

    /// Validate the flow graph
    ///
    /// Checks the single-root invariant, ID and selector uniqueness, option
    /// constraints per action kind, and that every `next_flow` reference
    /// resolves within this service. Cycles are legal: menu graphs loop
    /// back to the main menu by design.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.flows.is_empty() {
            return Err(CoreError::ValidationError(format!(
                "Service {} has no flows",
                self.id.0
            )));
        }

        let root_count = self.flows.iter().filter(|f| f.is_root).count();
        if root_count != 1 {
            return Err(CoreError::ValidationError(format!(
                "Service {} must have exactly one root flow, found {}",
                self.id.0, root_count
            )));
        }

        let mut flow_ids = HashSet::new();
        for flow in &self.flows {
            if !flow_ids.insert(&flow.id) {
                return Err(CoreError::ValidationError(format!(
                    "Duplicate flow ID: {}",
                    flow.id.0
                )));
            }
            if flow.service_id != self.id {
                return Err(CoreError::ValidationError(format!(
                    "Flow {} belongs to service {}, not {}",
                    flow.id.0, flow.service_id.0, self.id.0
                )));
            }
        }

        for flow in &self.flows {
            self.validate_flow(flow, &flow_ids)?;
        }

        Ok(())
    }

    fn validate_flow(&self, flow: &Flow, flow_ids: &HashSet<&FlowId>) -> Result<(), CoreError> {
        let mut selectors = HashSet::new();
        for option in &flow.options {
            if option.selector.is_empty() {
                return Err(CoreError::ValidationError(format!(
                    "Flow {} has an option with an empty selector",
                    flow.id.0
                )));
            }
            if !selectors.insert(&option.selector) {
                return Err(CoreError::ValidationError(format!(
                    "Flow {} has duplicate selector: {}",
                    flow.id.0, option.selector
                )));
            }

            match &option.action {
                OptionAction::Navigate => {
                    if option.next_flow.is_none() {
                        return Err(CoreError::ValidationError(format!(
                            "Navigate option {} on flow {} has no next flow",
                            option.selector, flow.id.0
                        )));
                    }
                }
                OptionAction::EndSession { .. } => {
                    if option.next_flow.is_some() {
                        return Err(CoreError::ValidationError(format!(
                            "End-session option {} on flow {} must not have a next flow",
                            option.selector, flow.id.0
                        )));
                    }
                }
                OptionAction::Message { terminal, .. } => {
                    if *terminal && option.next_flow.is_some() {
                        return Err(CoreError::ValidationError(format!(
                            "Terminal message option {} on flow {} must not have a next flow",
                            option.selector, flow.id.0
                        )));
                    }
                }
                OptionAction::CollectInput {
                    store_key, rule, ..
                } => {
                    if store_key.is_empty() {
                        return Err(CoreError::ValidationError(format!(
                            "Input option {} on flow {} has no store key",
                            option.selector, flow.id.0
                        )));
                    }
                    if let Some(pattern) = &rule.pattern {
                        if Regex::new(pattern).is_err() {
                            return Err(CoreError::ValidationError(format!(
                                "Input option {} on flow {} has an invalid pattern",
                                option.selector, flow.id.0
                            )));
                        }
                    }
                }
                OptionAction::ApiCall { .. } => {}
            }

            if let Some(next) = &option.next_flow {
                if !flow_ids.contains(next) {
                    return Err(CoreError::ValidationError(format!(
                        "Option {} on flow {} references unknown flow: {}",
                        option.selector, flow.id.0, next.0
                    )));
                }
            }
        }

        if let FlowKind::Dynamic(config) = &flow.kind {
            if config.page_size == 0 {
                return Err(CoreError::ValidationError(format!(
                    "Dynamic flow {} has a zero page size",
                    flow.id.0
                )));
            }
            if let Some(next) = &config.next_flow {
                if !flow_ids.contains(next) {
                    return Err(CoreError::ValidationError(format!(
                        "Dynamic flow {} references unknown next flow: {}",
                        flow.id.0, next.0
                    )));
                }
            }
            if matches!(config.continuation, ContinuationPolicy::Continue)
                && config.items_path.is_some()
                && config.next_flow.is_none()
            {
                return Err(CoreError::ValidationError(format!(
                    "Dynamic flow {} continues but names no next flow",
                    flow.id.0
                )));
            }
        }

        Ok(())
    }
}
