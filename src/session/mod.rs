//! Session: turn-by-turn progression of one call through a workflow.
//!
//! Grounded on `examples/original_source/scheduling/session.py`'s
//! `SchedulingSession` — `handle_utterance`/`_handle_llm_step`/
//! `_run_tool_steps`/`_resolve_transition`/`_build_tool_args`/
//! `_process_step_completion` are the direct ancestors of the methods below,
//! translated from an attribute-mutating Python object into an explicit
//! `Inner` struct guarded by a single `tokio::sync::Mutex` (the session is
//! driven by exactly one Turn Controller at a time
//! one-controller-per-call scheduling model, so a single async mutex is
//! sufficient — no sharding needed).

pub mod caller_state;
pub mod field_progress;
pub mod json_signal;
pub mod prompt;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use serde_json::{json, Value};
use tokio::sync::{Mutex as AsyncMutex, Notify};

use crate::channel::CallerInfo;
use crate::debug::DebugBroadcaster;
use crate::external::{ExternalError, Llm, TurnMessage, TurnRole};
use crate::tools::{build_args_from_map, truncate_for_event, ToolRegistry};
use crate::workflow::{parse_target, StepType, Target, Workflow, WorkflowState};

use caller_state::CallerState;

const MAX_HISTORY: usize = 30;
const RETAINED_HISTORY: usize = 20;
const SYSTEM_PROMPT_EVENT_PREVIEW: usize = 100;
const STEP_DATA_SNAPSHOT_ELIDE_LEN: usize = 500;
const SNAPSHOT_RECENT_MESSAGES: usize = 6;

struct Inner {
    current_state_id: String,
    caller_state: CallerState,
    step_data: HashMap<String, Value>,
    messages: Vec<TurnMessage>,
    done: bool,
}

/// One call's progression through a [`Workflow`].
pub struct Session {
    session_id: String,
    workflow: Arc<Workflow>,
    tools: Arc<ToolRegistry>,
    llm: Arc<dyn Llm>,
    provider: String,
    model: String,
    broadcaster: SyncMutex<DebugBroadcaster>,
    paused: AtomicBool,
    resume_notify: Notify,
    inner: AsyncMutex<Inner>,
}

impl Session {
    pub fn new(
        session_id: impl Into<String>,
        workflow: Arc<Workflow>,
        tools: Arc<ToolRegistry>,
        llm: Arc<dyn Llm>,
        provider: impl Into<String>,
        model: impl Into<String>,
        broadcaster: DebugBroadcaster,
    ) -> Self {
        let initial_state = workflow.initial_state.clone();
        Self {
            session_id: session_id.into(),
            workflow,
            tools,
            llm,
            provider: provider.into(),
            model: model.into(),
            broadcaster: SyncMutex::new(broadcaster),
            paused: AtomicBool::new(false),
            resume_notify: Notify::new(),
            inner: AsyncMutex::new(Inner {
                current_state_id: initial_state,
                caller_state: CallerState::default(),
                step_data: HashMap::new(),
                messages: Vec::new(),
                done: false,
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Stamps caller identifiers; does not advance the state machine.
    pub async fn start(&self, caller_info: &CallerInfo) {
        let mut inner = self.inner.lock().await;
        inner.caller_state.call_sid = caller_info.call_id.clone();
        inner.caller_state.phone_number = caller_info.phone_number.clone();
    }

    pub async fn attach_broadcaster(&self, broadcaster: DebugBroadcaster) {
        *self.broadcaster.lock() = broadcaster;
    }

    pub async fn is_done(&self) -> bool {
        self.inner.lock().await.done
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resume_notify.notify_waiters();
    }

    async fn wait_while_paused(&self) {
        while self.paused.load(Ordering::SeqCst) {
            self.resume_notify.notified().await;
        }
    }

    /// Runs the LLM once in the initial state with a fixed greeting prompt;
    /// does not parse a JSON signal and does not advance state.
    pub async fn get_greeting(&self) -> String {
        let mut inner = self.inner.lock().await;
        let Some(state) = self.workflow.states.get(&inner.current_state_id).cloned() else {
            return "Hello! Thanks for calling.".to_string();
        };
        let system_prompt = prompt::render_system_prompt(
            &state.system_prompt,
            &inner.caller_state,
            &inner.step_data,
        );
        match self
            .call_llm(&mut inner, &system_prompt, "You just connected the call. Greet the caller warmly.")
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "greeting llm call failed");
                "Hello! Thanks for calling.".to_string()
            }
        }
    }

    /// The main turn driver.
    pub async fn handle_utterance(&self, text: &str) -> String {
        self.wait_while_paused().await;

        let mut inner = self.inner.lock().await;
        if inner.done {
            return self.workflow.exit_message.clone();
        }

        let Some(state) = self.workflow.states.get(&inner.current_state_id).cloned() else {
            return "I'm sorry, something went wrong. Goodbye!".to_string();
        };

        self.emit(&inner, "stt", Some(&state.id), json!({ "text": text }));

        match state.step_type {
            StepType::Llm => self.handle_llm_step(&mut inner, &state, text).await,
            StepType::Tool => {
                // Tool states auto-execute and should never receive an
                // utterance directly; route through the auto-intent and
                // fall back to handling whichever state results.
                let intent = state.auto_intent().to_string();
                match self.apply_transition(&mut inner, &state, &intent) {
                    Target::Advance { .. } => {
                        let next_id = inner.current_state_id.clone();
                        if let Some(next) = self.workflow.states.get(&next_id).cloned() {
                            if next.step_type == StepType::Llm {
                                return self.handle_llm_step(&mut inner, &next, text).await;
                            }
                        }
                        self.handle_llm_step(&mut inner, &state, text).await
                    }
                    _ => self.handle_llm_step(&mut inner, &state, text).await,
                }
            }
        }
    }

    async fn handle_llm_step(&self, inner: &mut Inner, state: &WorkflowState, text: &str) -> String {
        let system_prompt =
            prompt::render_system_prompt(&state.system_prompt, &inner.caller_state, &inner.step_data);

        let response = match self.call_llm(inner, &system_prompt, text).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, state = %state.id, error = %e, "llm call failed");
                return "I'm sorry, I'm having trouble right now. Could you say that again?".to_string();
            }
        };

        let matched_fields = field_progress::detect_field_progress(text, &response, &state.state_fields);
        if !matched_fields.is_empty() {
            self.emit(inner, "field_progress", Some(&state.id), json!({ "fields": matched_fields }));
        }

        let Some(signal) = json_signal::extract_json_signal(&response) else {
            return response;
        };

        let text_response = json_signal::strip_response(&response, &signal.matched_text);
        self.apply_state_fields(inner, state, &signal.json);
        self.emit(inner, "step_complete", Some(&state.id), json!({ "extracted_data": signal.json }));

        let intent = signal
            .json
            .get("intent")
            .and_then(Value::as_str)
            .unwrap_or("success")
            .to_string();

        match self.apply_transition(inner, state, &intent) {
            Target::Stay => text_response,
            Target::Exit { message } => {
                let goodbye = message.unwrap_or_else(|| self.workflow.exit_message.clone());
                if text_response.is_empty() {
                    goodbye
                } else {
                    text_response
                }
            }
            Target::Advance { .. } => {
                self.run_tool_steps(inner).await;
                if inner.done {
                    return text_response;
                }
                let current_id = inner.current_state_id.clone();
                if let Some(current) = self.workflow.states.get(&current_id).cloned() {
                    if current.step_type == StepType::Llm && !current.on_enter.is_empty() {
                        let follow_up = self.get_step_opening(inner, &current).await;
                        return format!("{text_response} {follow_up}").trim().to_string();
                    }
                }
                text_response
            }
        }
    }

    /// Applies a `state_fields` (or legacy fallback) mapping from an
    /// extracted JSON signal onto CallerState/step_data.
    fn apply_state_fields(&self, inner: &mut Inner, state: &WorkflowState, data: &Value) {
        let Some(object) = data.as_object() else { return };

        if !state.state_fields.is_empty() {
            for (json_key, target) in &state.state_fields {
                let Some(value) = object.get(json_key) else { continue };
                if value.is_null() {
                    continue;
                }
                if let Some(key) = target.strip_prefix("step_data.") {
                    inner.step_data.insert(key.to_string(), value.clone());
                } else if let Some(field) = target.strip_prefix("state.") {
                    inner.caller_state.set_field(field, value);
                }
            }
        } else {
            legacy_apply_state_fields(&state.id, object, &mut inner.caller_state);
        }

        if state.id == "propose_times" {
            let selected_date = object.get("selected_date").and_then(Value::as_str).unwrap_or("");
            let selected_time = object.get("selected_time").and_then(Value::as_str).unwrap_or("");
            inner.caller_state.selected_time_slot =
                Some(format!("{selected_date} {selected_time}").trim().to_string());
            inner.step_data.insert("selected_date".to_string(), json!(selected_date));
            inner.step_data.insert("selected_time".to_string(), json!(selected_time));
        }
    }

    /// Routes `transitions[intent]` → `transitions["*"]` → stay, applies the
    /// result to `inner`, and emits the `transition` event on advance.
    fn apply_transition(&self, inner: &mut Inner, state: &WorkflowState, intent: &str) -> Target {
        let raw = state
            .transitions
            .get(intent)
            .or_else(|| state.transitions.get("*"));

        let Some(raw) = raw else {
            return Target::Stay;
        };
        let target = parse_target(raw);

        match &target {
            Target::Stay => {}
            Target::Exit { .. } => {
                inner.done = true;
            }
            Target::Advance { state_id, .. } => {
                self.emit(
                    inner,
                    "transition",
                    Some(&state.id),
                    json!({ "from": state.id, "to": state_id, "intent": intent }),
                );
                inner.current_state_id = state_id.clone();
            }
        }
        target
    }

    /// Auto-executes consecutive tool states, advancing via intent routing
    /// until a non-tool state is reached or the session is done.
    async fn run_tool_steps(&self, inner: &mut Inner) {
        loop {
            let Some(state) = self.workflow.states.get(&inner.current_state_id).cloned() else {
                break;
            };
            if state.step_type != StepType::Tool {
                break;
            }

            let intent = self.execute_tool_step(inner, &state).await;

            match self.apply_transition(inner, &state, &intent) {
                Target::Stay => break,
                Target::Exit { .. } => break,
                Target::Advance { .. } => continue,
            }
        }
    }

    async fn execute_tool_step(&self, inner: &mut Inner, state: &WorkflowState) -> String {
        let mut results = Vec::new();
        let mut intent = state.auto_intent().to_string();

        for tool_name in &state.tool_names {
            let Some(tool) = self.tools.get(tool_name) else {
                tracing::warn!(tool = %tool_name, "tool not found");
                results.push(format!("Tool {tool_name} not available"));
                continue;
            };

            let caller_state_json = serde_json::to_value(&inner.caller_state).unwrap_or(Value::Null);
            let args = if !state.tool_args_map.is_empty() {
                build_args_from_map(&state.tool_args_map, &caller_state_json, &inner.step_data)
            } else {
                legacy_tool_args(tool_name, &inner.caller_state)
            };

            match tool.execute(args.clone()).await {
                Ok(result) => {
                    self.emit(
                        inner,
                        "tool_exec",
                        Some(&state.id),
                        json!({
                            "tool_name": tool_name,
                            "args": args,
                            "result": truncate_for_event(&result),
                        }),
                    );
                    results.push(result);
                }
                Err(e) => {
                    tracing::warn!(tool = %tool_name, error = %e, "tool execution failed");
                    self.emit(
                        inner,
                        "tool_exec",
                        Some(&state.id),
                        json!({
                            "tool_name": tool_name,
                            "args": args,
                            "result": truncate_for_event(&e.to_string()),
                        }),
                    );
                    results.push(format!("Error: {e}"));
                    intent = "error".to_string();
                }
            }
        }

        let combined = results.join("\n");
        inner.step_data.insert(state.id.clone(), Value::String(combined));
        intent
    }

    async fn get_step_opening(&self, inner: &mut Inner, state: &WorkflowState) -> String {
        let system_prompt =
            prompt::render_system_prompt(&state.system_prompt, &inner.caller_state, &inner.step_data);
        let user_text = if state.on_enter.is_empty() {
            "Continue the conversation.".to_string()
        } else {
            format!(
                "You are now entering this conversation step. Say this to the caller (rephrase naturally): {}",
                state.on_enter
            )
        };
        match self.call_llm(inner, &system_prompt, &user_text).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "on_enter rephrase call failed");
                state.on_enter.clone()
            }
        }
    }

    async fn call_llm(
        &self,
        inner: &mut Inner,
        system_prompt: &str,
        user_text: &str,
    ) -> Result<String, ExternalError> {
        let mut history = inner.messages.clone();
        history.push(TurnMessage { role: TurnRole::User, text: user_text.to_string() });
        let current_state_id = inner.current_state_id.clone();

        self.emit(
            inner,
            "llm_call",
            Some(&current_state_id),
            json!({
                "system_prompt": truncate_chars(system_prompt, SYSTEM_PROMPT_EVENT_PREVIEW),
                "user_text": user_text,
            }),
        );

        let reply = self.llm.complete(system_prompt, &history, &self.provider, &self.model).await?;

        let has_json_signal = json_signal::extract_json_signal(&reply).is_some();
        self.emit(
            inner,
            "llm_response",
            Some(&current_state_id),
            json!({ "response": reply, "has_json_signal": has_json_signal }),
        );

        inner.messages.push(TurnMessage { role: TurnRole::User, text: user_text.to_string() });
        inner.messages.push(TurnMessage { role: TurnRole::Assistant, text: reply.clone() });
        if inner.messages.len() > MAX_HISTORY {
            let start = inner.messages.len() - RETAINED_HISTORY;
            inner.messages = inner.messages[start..].to_vec();
        }

        Ok(reply)
    }

    fn emit(&self, _inner: &Inner, event_type: &str, state_id: Option<&str>, data: Value) {
        self.broadcaster.lock().emit(event_type, state_id, data);
    }

    /// A JSON-friendly view of the session. `detail` adds
    /// truncated step_data, the last six messages, and the event log.
    pub async fn snapshot(&self, detail: bool) -> Value {
        let inner = self.inner.lock().await;
        let mut value = json!({
            "session_id": self.session_id,
            "workflow_id": self.workflow.id,
            "current_state_id": inner.current_state_id,
            "done": inner.done,
            "caller_state": redacted_caller_state(&inner.caller_state),
        });

        if detail {
            let truncated_step_data: HashMap<&String, Value> = inner
                .step_data
                .iter()
                .map(|(k, v)| (k, elide_large_value(v)))
                .collect();
            let recent: Vec<&TurnMessage> = inner
                .messages
                .iter()
                .rev()
                .take(SNAPSHOT_RECENT_MESSAGES)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            let obj = value.as_object_mut().expect("snapshot root is an object");
            obj.insert("step_data".to_string(), json!(truncated_step_data));
            obj.insert("recent_messages".to_string(), json!(recent));
            obj.insert("event_log".to_string(), json!(self.broadcaster.lock().event_log()));
        }

        value
    }
}

fn truncate_chars(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        s.to_string()
    } else {
        s.chars().take(n).collect()
    }
}

fn elide_large_value(value: &Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > STEP_DATA_SNAPSHOT_ELIDE_LEN => {
            let head: String = s.chars().take(STEP_DATA_SNAPSHOT_ELIDE_LEN).collect();
            Value::String(format!("{head}... [elided]"))
        }
        other => other.clone(),
    }
}

fn redacted_caller_state(state: &CallerState) -> Value {
    let mut value = serde_json::to_value(state).unwrap_or(Value::Null);
    if let Some(obj) = value.as_object_mut() {
        for field in ["phone_number", "caller_email"] {
            if let Some(Value::String(s)) = obj.get(field) {
                let redacted = caller_state::redact(s);
                obj.insert(field.to_string(), Value::String(redacted));
            }
        }
    }
    value
}

/// Legacy hardcoded `state_fields` mapping, used only when a state's
/// `state_fields` map is empty (the backward-compatibility fallthrough),
/// grounded on
/// `examples/original_source/scheduling/session.py`'s
/// `_process_step_completion` else-branch.
fn legacy_apply_state_fields(
    state_id: &str,
    data: &serde_json::Map<String, Value>,
    caller_state: &mut CallerState,
) {
    match state_id {
        "greet_and_gather" => {
            if let Some(v) = data.get("bedrooms") {
                caller_state.set_field("bedrooms", v);
            }
            if let Some(v) = data.get("budget") {
                caller_state.set_field("max_budget", v);
            }
            if let Some(v) = data.get("area") {
                caller_state.set_field("preferred_area", v);
            }
        }
        "present_options" => {
            if let Some(v) = data.get("selected_listing_id") {
                caller_state.set_field("selected_listing_id", v);
            }
            if let Some(v) = data.get("selected_address") {
                caller_state.set_field("selected_listing_address", v);
            }
        }
        "collect_details" => {
            if let Some(v) = data.get("name") {
                caller_state.set_field("caller_name", v);
            }
            if let Some(v) = data.get("email") {
                caller_state.set_field("caller_email", v);
            }
        }
        _ => {}
    }
}

/// Legacy hardcoded tool-argument builder, used only when a tool state's
/// `tool_args_map` is empty (fallback), grounded on
/// `examples/original_source/scheduling/session.py`'s
/// `_build_tool_args_legacy`.
fn legacy_tool_args(tool_name: &str, caller_state: &CallerState) -> HashMap<String, Value> {
    let mut args = HashMap::new();
    match tool_name {
        "apartment_search" => {
            let mut parts = Vec::new();
            if let Some(bedrooms) = caller_state.bedrooms {
                parts.push(format!("{bedrooms} bedroom"));
            }
            if let Some(area) = &caller_state.preferred_area {
                parts.push(format!("near {area}"));
            }
            if let Some(budget) = caller_state.max_budget {
                parts.push(format!("under ${budget}"));
            }
            let query = if parts.is_empty() { "apartment".to_string() } else { parts.join(" ") };
            args.insert("query".to_string(), Value::String(query));
        }
        "create_booking" => {
            if let Some(name) = &caller_state.caller_name {
                args.insert("caller_name".to_string(), Value::String(name.clone()));
            }
            if let Some(email) = &caller_state.caller_email {
                args.insert("caller_email".to_string(), Value::String(email.clone()));
            }
        }
        // "check_availability" has no session state worth seeding; the tool
        // defaults its own search window when start/end are absent.
        _ => {}
    }
    args
}
