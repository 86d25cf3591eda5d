//! The session state machine
//!
//! Single authority for session mutation: one inbound gateway request is
//! one serialized turn against one session. The per-session lock is held
//! for the whole turn, external API calls included; sessions for different
//! phone numbers proceed fully in parallel.

use crate::application::context::RenderContext;
use crate::application::paginator::paginate;
use crate::application::render::TemplateRenderer;
use crate::application::response::{GatewayReply, MarkerVocabulary};
use crate::domain::api_config::{ApiConfigId, ExternalApiConfig};
use crate::domain::flow::{ContinuationPolicy, DynamicMenuConfig, Flow, FlowKind, FlowOption, OptionAction};
use crate::domain::repository::{
    ApiConfigRepository, FlowRepository, SessionLogSink, SessionRepository,
};
use crate::domain::session::{FlowId, PendingInput, ServiceId, Session};
use crate::domain::session_log::SessionLogEntry;
use crate::{CoreError, ExternalApiInvoker};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Session-state key holding the fetched dynamic-menu items
const DYNAMIC_ITEMS: &str = "dynamic_items";

/// Session-state key holding the current dynamic-menu page
const DYNAMIC_PAGE: &str = "dynamic_page";

/// Session-state key holding the selected item's extracted value
const SELECTED_ITEM: &str = "selected_item";

/// Session-state key holding the selected item's full object
const SELECTED_ITEM_DATA: &str = "selected_item_data";

/// Session-state map collecting validated input values
const COLLECTED_INPUTS: &str = "collected_inputs";

/// Reply for a terminal API call with no configured message
const DEFAULT_API_SUCCESS: &str = "Request completed.";

/// Reply for a dynamic selection that ends with no flow text
const DEFAULT_DYNAMIC_END: &str = "Thank you.";

/// One inbound gateway request
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// Dialed service code
    pub service_code: String,

    /// Gateway-assigned session ID, stable across retries
    pub provider_session_id: String,

    /// Subscriber phone number
    pub phone_number: String,

    /// Accumulated `*`-delimited input chain since session start
    pub text: String,
}

/// How continuations are matched to stored sessions
///
/// Gateways vary: some guarantee a stable session ID, others only the
/// service/phone pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKeying {
    /// Match on the gateway-assigned session ID
    ProviderSessionId,

    /// Match on the active session for the service/phone pair
    ServiceAndPhone,
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Session TTL in seconds, refreshed from last activity
    pub session_ttl_secs: u64,

    /// Continuation matching mode
    pub keying: SessionKeying,

    /// Gateway marker tokens
    pub markers: MarkerVocabulary,

    /// Generic terminal message for unexpected failures
    pub error_message: String,

    /// Message prefixed to a re-prompt after unmatched input
    pub invalid_option_message: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 30 * 60,
            keying: SessionKeying::ProviderSessionId,
            markers: MarkerVocabulary::default(),
            error_message: "The service is temporarily unavailable. Please try again later."
                .to_string(),
            invalid_option_message: "Invalid choice.".to_string(),
        }
    }
}

/// Terminal transition requested by a dispatched step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminal {
    Completed,
    Terminated,
}

/// Result of dispatching one step
#[derive(Debug)]
struct StepOutcome {
    reply: GatewayReply,
    action: String,
    reprompt: bool,
    terminal: Option<Terminal>,
}

impl StepOutcome {
    fn cont(text: String, action: &str) -> Self {
        Self {
            reply: GatewayReply::Continue(text),
            action: action.to_string(),
            reprompt: false,
            terminal: None,
        }
    }

    fn invalid(text: String, action: &str) -> Self {
        Self {
            reply: GatewayReply::Continue(text),
            action: action.to_string(),
            reprompt: true,
            terminal: None,
        }
    }

    fn end_completed(text: String, action: &str) -> Self {
        Self {
            reply: GatewayReply::End(text),
            action: action.to_string(),
            reprompt: false,
            terminal: Some(Terminal::Completed),
        }
    }

    fn end_terminated(text: String, action: &str) -> Self {
        Self {
            reply: GatewayReply::End(text),
            action: action.to_string(),
            reprompt: false,
            terminal: Some(Terminal::Terminated),
        }
    }
}

/// Drives sessions through flow graphs, one gateway request at a time
pub struct SessionExecutionService {
    /// Repository for session records
    session_repo: Arc<dyn SessionRepository>,

    /// Repository for flow definitions
    flow_repo: Arc<dyn FlowRepository>,

    /// Repository for external API configurations
    api_repo: Arc<dyn ApiConfigRepository>,

    /// External API invoker
    invoker: Arc<dyn ExternalApiInvoker>,

    /// Per-step audit sink
    log_sink: Arc<dyn SessionLogSink>,

    /// Template renderer
    renderer: TemplateRenderer,

    /// Engine configuration
    config: EngineConfig,

    /// Per-session turn locks
    turn_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionExecutionService {
    /// Create a new session execution service
    pub fn new(
        session_repo: Arc<dyn SessionRepository>,
        flow_repo: Arc<dyn FlowRepository>,
        api_repo: Arc<dyn ApiConfigRepository>,
        invoker: Arc<dyn ExternalApiInvoker>,
        log_sink: Arc<dyn SessionLogSink>,
        renderer: TemplateRenderer,
        config: EngineConfig,
    ) -> Self {
        Self {
            session_repo,
            flow_repo,
            api_repo,
            invoker,
            log_sink,
            renderer,
            config,
            turn_locks: DashMap::new(),
        }
    }

    /// The engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle one gateway turn
    ///
    /// Never fails: unexpected errors are caught, the session is marked
    /// errored, and a generic terminal message is framed instead. The
    /// gateway never sees internal error text.
    pub async fn handle(&self, request: &GatewayRequest) -> String {
        let started = Instant::now();
        let lock_key = self.lock_key(request);
        let lock = self
            .turn_locks
            .entry(lock_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock().await;

        let framed = match self.process(request, started).await {
            Ok(reply) => {
                let framed = self.config.markers.frame(&reply);
                if reply.is_end() {
                    drop(guard);
                    self.turn_locks.remove(&lock_key);
                }
                framed
            }
            Err(err) => {
                error!(
                    provider_session_id = %request.provider_session_id,
                    error = %err,
                    "gateway turn failed"
                );
                self.fail_session(request, &err, started).await;
                drop(guard);
                self.turn_locks.remove(&lock_key);
                self.config
                    .markers
                    .frame(&GatewayReply::End(self.config.error_message.clone()))
            }
        };
        framed
    }

    /// One full state-machine turn
    async fn process(
        &self,
        request: &GatewayRequest,
        started: Instant,
    ) -> Result<GatewayReply, CoreError> {
        let ttl = self.ttl();
        let now = Utc::now();
        let existing = self.find_session(request).await?;

        // Idempotent replay: a redelivered (session, input) pair returns the
        // previously computed response without re-executing anything.
        if let Some(existing) = &existing {
            if let Some(cached) = existing.replay_of(&request.text) {
                debug!(
                    provider_session_id = %request.provider_session_id,
                    "duplicate delivery, replaying cached response"
                );
                let reply = if existing.status.is_terminal() {
                    GatewayReply::End(cached.to_string())
                } else {
                    GatewayReply::Continue(cached.to_string())
                };
                self.log_replay(existing, request, started).await;
                return Ok(reply);
            }
        }

        let (mut session, fresh) = match existing {
            Some(session) if !session.status.is_terminal() && !session.is_expired(now) => {
                (session, false)
            }
            Some(mut stale) => {
                // Expired-but-active sessions the sweep has not caught yet
                // are closed here; terminal ones are simply left behind.
                if !stale.status.is_terminal() {
                    let _ = stale.expire();
                    self.session_repo.save(&stale).await?;
                }
                (self.new_session(request, ttl).await?, true)
            }
            None => (self.new_session(request, ttl).await?, true),
        };

        let new_input = last_segment(&request.text);
        let outcome = self.dispatch(&mut session, new_input, fresh).await?;

        if outcome.reprompt {
            session.record_reprompt(&request.text, outcome.reply.text(), ttl)?;
        } else {
            session.record_step(&request.text, outcome.reply.text(), ttl)?;
        }
        match outcome.terminal {
            Some(Terminal::Completed) => {
                session.complete()?;
                // Observation point for the billing subsystem: the status
                // transition is the hook, nothing more is emitted here.
                info!(
                    session_id = %session.id.0,
                    service = %session.service_id.0,
                    steps = session.step_count,
                    "session completed"
                );
            }
            Some(Terminal::Terminated) => session.terminate()?,
            None => {}
        }

        self.session_repo.save(&session).await?;

        let entry = SessionLogEntry::new(
            session.id.clone(),
            &session.provider_session_id,
            Some(session.current_flow.clone()),
            &outcome.action,
            (!new_input.is_empty()).then(|| new_input.to_string()),
            Some(outcome.reply.text().to_string()),
            session.status,
            started.elapsed().as_millis() as u64,
            None,
        );
        if let Err(err) = self.log_sink.append(entry).await {
            warn!(error = %err, "failed to append session log entry");
        }

        Ok(outcome.reply)
    }

    /// Resolve which step the new input selects and apply it
    async fn dispatch(
        &self,
        session: &mut Session,
        new_input: &str,
        fresh: bool,
    ) -> Result<StepOutcome, CoreError> {
        // A fresh session always answers with its root flow, whatever the
        // gateway sent; empty input on a brand-new session is the normal
        // "show the menu" case, not an error.
        if fresh {
            let flow = self.load_flow(&session.current_flow).await?;
            return self.enter_flow(session, &flow).await;
        }

        if let Some(pending) = session.pending_input.clone() {
            return self.handle_pending_input(session, &pending, new_input).await;
        }

        let flow = self.load_flow(&session.current_flow).await?;

        if new_input.is_empty() {
            // Blank continuation input: re-show the current screen.
            return match self.render_current(session, &flow) {
                Some(text) => Ok(StepOutcome::invalid(text, "reprompt")),
                None => self.enter_flow(session, &flow).await,
            };
        }

        if let FlowKind::Dynamic(config) = &flow.kind {
            let config = config.clone();
            return self
                .handle_dynamic_input(session, &flow, &config, new_input)
                .await;
        }

        match flow.option_for(new_input) {
            Some(option) => {
                let option = option.clone();
                self.apply_option(session, &flow, &option).await
            }
            None => {
                debug!(
                    flow = %flow.id.0,
                    input = new_input,
                    "unmatched input, re-prompting"
                );
                let menu = self
                    .render_current(session, &flow)
                    .unwrap_or_else(|| self.render_flow_menu(&flow, session));
                Ok(StepOutcome::invalid(
                    format!("{}\n{}", self.config.invalid_option_message, menu),
                    "invalid_option",
                ))
            }
        }
    }

    /// Apply a selected static-flow option
    async fn apply_option(
        &self,
        session: &mut Session,
        flow: &Flow,
        option: &FlowOption,
    ) -> Result<StepOutcome, CoreError> {
        debug!(
            flow = %flow.id.0,
            selector = %option.selector,
            action = option.action.tag(),
            "dispatching option"
        );

        match &option.action {
            OptionAction::Navigate => {
                let next = option.next_flow.as_ref().ok_or_else(|| {
                    CoreError::ConfigurationError(format!(
                        "navigate option {} on flow {} has no next flow",
                        option.selector, flow.id.0
                    ))
                })?;
                session.current_flow = next.clone();
                let target = self.load_flow(next).await?;
                self.enter_flow(session, &target).await
            }

            OptionAction::Message { text, terminal } => {
                let rendered = self.render_text(text, session);
                if *terminal {
                    Ok(StepOutcome::end_completed(rendered, "message"))
                } else {
                    if let Some(next) = &option.next_flow {
                        session.current_flow = next.clone();
                    }
                    Ok(StepOutcome::cont(rendered, "message"))
                }
            }

            OptionAction::EndSession { message } => {
                let rendered = self.render_text(message, session);
                Ok(StepOutcome::end_completed(rendered, "end_session"))
            }

            OptionAction::CollectInput {
                prompt,
                rule,
                store_key,
                error_message,
            } => {
                // The flow pointer does not advance on the prompting step;
                // the captured value decides the advance on the next turn.
                let rendered = self.render_text(prompt, session);
                session.pending_input = Some(PendingInput {
                    store_key: store_key.clone(),
                    rule: rule.clone(),
                    prompt: prompt.clone(),
                    error_message: error_message.clone(),
                    next_flow: option.next_flow.clone(),
                });
                Ok(StepOutcome::cont(rendered, "input_collection"))
            }

            OptionAction::ApiCall {
                api_id,
                success_message,
                terminal,
            } => {
                self.run_api_call(session, option, api_id, success_message.as_deref(), *terminal)
                    .await
            }
        }
    }

    /// Validate and store a pending collected input
    async fn handle_pending_input(
        &self,
        session: &mut Session,
        pending: &PendingInput,
        input: &str,
    ) -> Result<StepOutcome, CoreError> {
        match pending.rule.validate(input) {
            Ok(()) => {
                session.pending_input = None;
                session.state.set(pending.store_key.clone(), json!(input));
                session
                    .state
                    .set_nested(COLLECTED_INPUTS, pending.store_key.clone(), json!(input));

                if let Some(next) = &pending.next_flow {
                    session.current_flow = next.clone();
                    let target = self.load_flow(next).await?;
                    let mut outcome = self.enter_flow(session, &target).await?;
                    outcome.action = "input_collection".to_string();
                    Ok(outcome)
                } else {
                    let flow = self.load_flow(&session.current_flow).await?;
                    match self.render_current(session, &flow) {
                        Some(text) => Ok(StepOutcome::cont(text, "input_collection")),
                        None => self.enter_flow(session, &flow).await,
                    }
                }
            }
            Err(reason) => {
                // Rejected input re-prompts; nothing is stored and the flow
                // pointer stays put.
                let message = pending.error_message.clone().unwrap_or(reason);
                let prompt = self.render_text(&pending.prompt, session);
                Ok(StepOutcome::invalid(
                    format!("{}\n{}", message, prompt),
                    "input_validation",
                ))
            }
        }
    }

    /// Invoke an option-level API call and apply its outcome
    async fn run_api_call(
        &self,
        session: &mut Session,
        option: &FlowOption,
        api_id: &ApiConfigId,
        success_message: Option<&str>,
        terminal: bool,
    ) -> Result<StepOutcome, CoreError> {
        let config = self.load_api(api_id).await?;
        match self.invoker.invoke(&config, session).await {
            Ok(outcome) => {
                session.state.merge(outcome.mapped);

                if terminal {
                    let text = success_message
                        .map(|t| self.render_text(t, session))
                        .unwrap_or_else(|| DEFAULT_API_SUCCESS.to_string());
                    return Ok(StepOutcome::end_completed(text, "api_call"));
                }

                if let Some(next) = &option.next_flow {
                    let prefix = success_message.map(|t| self.render_text(t, session));
                    session.current_flow = next.clone();
                    let target = self.load_flow(next).await?;
                    let mut step = self.enter_flow(session, &target).await?;
                    if let Some(prefix) = prefix {
                        step.reply = match step.reply {
                            GatewayReply::Continue(text) => {
                                GatewayReply::Continue(format!("{}\n{}", prefix, text))
                            }
                            GatewayReply::End(text) => {
                                GatewayReply::End(format!("{}\n{}", prefix, text))
                            }
                        };
                    }
                    step.action = "api_call".to_string();
                    return Ok(step);
                }

                let text = match success_message {
                    Some(t) => self.render_text(t, session),
                    None => {
                        let flow = self.load_flow(&session.current_flow).await?;
                        self.render_current(session, &flow)
                            .unwrap_or_else(|| DEFAULT_API_SUCCESS.to_string())
                    }
                };
                Ok(StepOutcome::cont(text, "api_call"))
            }
            Err(err) => self.apply_error_policy(session, &config, err).await,
        }
    }

    /// Apply an API configuration's error policy after a failed call
    async fn apply_error_policy(
        &self,
        session: &mut Session,
        config: &ExternalApiConfig,
        err: CoreError,
    ) -> Result<StepOutcome, CoreError> {
        warn!(api = %config.id.0, error = %err, "external API call failed");
        let policy = &config.error_policy;

        if let Some(fallback) = &policy.fallback_flow {
            session.current_flow = fallback.clone();
            let target = self.load_flow(fallback).await?;
            let mut outcome = self.enter_flow(session, &target).await?;
            outcome.action = "api_error_fallback".to_string();
            return Ok(outcome);
        }

        let message = policy
            .message
            .clone()
            .unwrap_or_else(|| self.config.error_message.clone());
        let rendered = self.render_text(&message, session);
        if policy.terminate {
            Ok(StepOutcome::end_terminated(rendered, "api_error"))
        } else {
            Ok(StepOutcome::cont(rendered, "api_error"))
        }
    }

    /// Render the entry screen of a flow, fetching dynamic content
    ///
    /// Boxed so error fallbacks and continuations may re-enter flows.
    fn enter_flow<'a>(
        &'a self,
        session: &'a mut Session,
        flow: &'a Flow,
    ) -> BoxFuture<'a, Result<StepOutcome, CoreError>> {
        Box::pin(async move {
            match &flow.kind {
                FlowKind::Static => Ok(StepOutcome::cont(
                    self.render_flow_menu(flow, session),
                    "navigate",
                )),
                FlowKind::Dynamic(config) => {
                    let config = config.clone();
                    self.enter_dynamic(session, flow, &config).await
                }
            }
        })
    }

    /// Invoke a dynamic flow's API and render its first screen
    async fn enter_dynamic(
        &self,
        session: &mut Session,
        flow: &Flow,
        config: &DynamicMenuConfig,
    ) -> Result<StepOutcome, CoreError> {
        let api = self.load_api(&config.api_id).await?;
        let outcome = match self.invoker.invoke(&api, session).await {
            Ok(outcome) => outcome,
            Err(err) => return self.apply_error_policy(session, &api, err).await,
        };
        session.state.merge(outcome.mapped);

        match &config.items_path {
            Some(path) => {
                let items: Vec<Value> = crate::types::lookup_path(&outcome.raw, path)
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();

                if items.is_empty() {
                    let text = self.render_text(&config.empty_message, session);
                    return Ok(StepOutcome::end_completed(text, "dynamic_menu"));
                }

                session.state.set(DYNAMIC_ITEMS, Value::Array(items.clone()));
                session.state.set(DYNAMIC_PAGE, json!(0));
                let text = self.render_dynamic_page(flow, config, &items, 0, session);
                Ok(StepOutcome::cont(text, "dynamic_menu"))
            }
            None => {
                // Message mode: merge mapped fields, render the flow text.
                let template = flow.text.clone().unwrap_or_else(|| flow.title.clone());
                let rendered = self.render_text(&template, session);
                match &config.continuation {
                    ContinuationPolicy::End => {
                        Ok(StepOutcome::end_completed(rendered, "dynamic_message"))
                    }
                    _ => {
                        if let Some(next) = &config.next_flow {
                            session.current_flow = next.clone();
                        }
                        Ok(StepOutcome::cont(rendered, "dynamic_message"))
                    }
                }
            }
        }
    }

    /// Resolve input against a dynamic flow's current page
    async fn handle_dynamic_input(
        &self,
        session: &mut Session,
        flow: &Flow,
        config: &DynamicMenuConfig,
        input: &str,
    ) -> Result<StepOutcome, CoreError> {
        let items: Option<Vec<Value>> = session
            .state
            .get(DYNAMIC_ITEMS)
            .and_then(|v| v.as_array())
            .cloned();
        let items = match items {
            Some(items) if config.items_path.is_some() => items,
            // No cached items (message mode, or state lost): re-enter.
            _ => return self.enter_dynamic(session, flow, config).await,
        };

        let page = current_page(session);
        let menu = paginate(&items, page, config);

        if input == config.next_selector && menu.has_next {
            let next = page + 1;
            session.state.set(DYNAMIC_PAGE, json!(next));
            let text = self.render_dynamic_page(flow, config, &items, next, session);
            return Ok(StepOutcome::cont(text, "dynamic_page"));
        }

        if input == config.back_selector && menu.has_back {
            let previous = page - 1;
            session.state.set(DYNAMIC_PAGE, json!(previous));
            let text = self.render_dynamic_page(flow, config, &items, previous, session);
            return Ok(StepOutcome::cont(text, "dynamic_page"));
        }

        if let Some(item) = menu.item_for(input) {
            let item = item.clone();
            session.state.set(SELECTED_ITEM, item.value.clone());
            session.state.set(SELECTED_ITEM_DATA, item.item.clone());
            return self.apply_continuation(session, flow, config).await;
        }

        let text = self.render_dynamic_page(flow, config, &items, page, session);
        Ok(StepOutcome::invalid(
            format!("{}\n{}", self.config.invalid_option_message, text),
            "invalid_option",
        ))
    }

    /// Apply a dynamic flow's continuation policy after a selection
    async fn apply_continuation(
        &self,
        session: &mut Session,
        flow: &Flow,
        config: &DynamicMenuConfig,
    ) -> Result<StepOutcome, CoreError> {
        match &config.continuation {
            ContinuationPolicy::Continue => {
                let next = config.next_flow.as_ref().ok_or_else(|| {
                    CoreError::ConfigurationError(format!(
                        "dynamic flow {} continues but names no next flow",
                        flow.id.0
                    ))
                })?;
                session.current_flow = next.clone();
                let target = self.load_flow(next).await?;
                let mut outcome = self.enter_flow(session, &target).await?;
                outcome.action = "dynamic_select".to_string();
                Ok(outcome)
            }

            ContinuationPolicy::End => {
                let template = flow
                    .text
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DYNAMIC_END.to_string());
                let rendered = self.render_text(&template, session);
                Ok(StepOutcome::end_completed(rendered, "dynamic_select"))
            }

            ContinuationPolicy::ApiDependent { api_id } => {
                let api = self.load_api(api_id).await?;
                match self.invoker.invoke(&api, session).await {
                    Ok(api_outcome) => {
                        session.state.merge(api_outcome.mapped);
                        if let Some(next) = &config.next_flow {
                            session.current_flow = next.clone();
                            let target = self.load_flow(next).await?;
                            let mut outcome = self.enter_flow(session, &target).await?;
                            outcome.action = "dynamic_select".to_string();
                            Ok(outcome)
                        } else {
                            let template = flow
                                .text
                                .clone()
                                .unwrap_or_else(|| DEFAULT_DYNAMIC_END.to_string());
                            let rendered = self.render_text(&template, session);
                            Ok(StepOutcome::end_completed(rendered, "dynamic_select"))
                        }
                    }
                    Err(err) => self.apply_error_policy(session, &api, err).await,
                }
            }
        }
    }

    /// Render the current screen without side effects, when possible
    fn render_current(&self, session: &Session, flow: &Flow) -> Option<String> {
        match &flow.kind {
            FlowKind::Static => Some(self.render_flow_menu(flow, session)),
            FlowKind::Dynamic(config) => {
                let items: Vec<Value> = session
                    .state
                    .get(DYNAMIC_ITEMS)
                    .and_then(|v| v.as_array())
                    .cloned()?;
                Some(self.render_dynamic_page(flow, config, &items, current_page(session), session))
            }
        }
    }

    fn render_dynamic_page(
        &self,
        flow: &Flow,
        config: &DynamicMenuConfig,
        items: &[Value],
        page: usize,
        session: &Session,
    ) -> String {
        let header = self.render_text(&flow.title, session);
        let body = paginate(items, page, config).render_lines(config);
        format!("{}\n{}", header, body)
    }

    fn render_flow_menu(&self, flow: &Flow, session: &Session) -> String {
        self.render_text(&flow.menu_text(), session)
    }

    fn render_text(&self, template: &str, session: &Session) -> String {
        let ctx = RenderContext::for_session(session);
        self.renderer.render(template, &ctx)
    }

    /// Find the session a request continues, per the configured keying
    async fn find_session(&self, request: &GatewayRequest) -> Result<Option<Session>, CoreError> {
        match self.config.keying {
            SessionKeying::ProviderSessionId => {
                self.session_repo
                    .find_by_provider_id(&request.provider_session_id)
                    .await
            }
            SessionKeying::ServiceAndPhone => {
                self.session_repo
                    .find_active_by_phone(
                        &ServiceId(request.service_code.clone()),
                        &request.phone_number,
                    )
                    .await
            }
        }
    }

    /// Create a session rooted at the service's root flow
    async fn new_session(
        &self,
        request: &GatewayRequest,
        ttl: Duration,
    ) -> Result<Session, CoreError> {
        let service_id = ServiceId(request.service_code.clone());
        let root = self
            .flow_repo
            .root_flow(&service_id)
            .await?
            .ok_or_else(|| CoreError::ServiceNotFound(request.service_code.clone()))?;
        info!(
            service = %service_id.0,
            provider_session_id = %request.provider_session_id,
            "creating session"
        );
        Ok(Session::new(
            service_id,
            &request.provider_session_id,
            &request.phone_number,
            root.id,
            ttl,
        ))
    }

    async fn load_flow(&self, id: &FlowId) -> Result<Flow, CoreError> {
        self.flow_repo
            .find_flow(id)
            .await?
            .ok_or_else(|| CoreError::ConfigurationError(format!("flow not found: {}", id.0)))
    }

    async fn load_api(&self, id: &ApiConfigId) -> Result<ExternalApiConfig, CoreError> {
        self.api_repo.find_by_id(id).await?.ok_or_else(|| {
            CoreError::ConfigurationError(format!("API configuration not found: {}", id.0))
        })
    }

    /// Best-effort error bookkeeping for a failed turn
    async fn fail_session(&self, request: &GatewayRequest, err: &CoreError, started: Instant) {
        if let Ok(Some(mut session)) = self.find_session(request).await {
            if !session.status.is_terminal() {
                session.mark_error();
                if let Err(save_err) = self.session_repo.save(&session).await {
                    warn!(error = %save_err, "failed to persist errored session");
                }
            }
            let entry = SessionLogEntry::new(
                session.id.clone(),
                &session.provider_session_id,
                Some(session.current_flow.clone()),
                "error",
                None,
                None,
                session.status,
                started.elapsed().as_millis() as u64,
                Some(err.to_string()),
            );
            let _ = self.log_sink.append(entry).await;
        }
    }

    /// Audit entry for a replayed duplicate delivery
    async fn log_replay(&self, session: &Session, request: &GatewayRequest, started: Instant) {
        let entry = SessionLogEntry::new(
            session.id.clone(),
            &session.provider_session_id,
            Some(session.current_flow.clone()),
            "replay",
            Some(last_segment(&request.text).to_string()),
            session.last_response.clone(),
            session.status,
            started.elapsed().as_millis() as u64,
            None,
        );
        let _ = self.log_sink.append(entry).await;
    }

    fn lock_key(&self, request: &GatewayRequest) -> String {
        match self.config.keying {
            SessionKeying::ProviderSessionId => request.provider_session_id.clone(),
            SessionKeying::ServiceAndPhone => {
                format!("{}:{}", request.service_code, request.phone_number)
            }
        }
    }

    fn ttl(&self) -> Duration {
        Duration::seconds(self.config.session_ttl_secs as i64)
    }
}

/// The new input for this step: the last `*`-delimited segment
fn last_segment(text: &str) -> &str {
    text.rsplit('*').next().unwrap_or("").trim()
}

fn current_page(session: &Session) -> usize {
    session
        .state
        .get(DYNAMIC_PAGE)
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize
}
