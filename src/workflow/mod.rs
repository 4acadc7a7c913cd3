//! Workflow Definition.
//!
//! Grounded on `examples/original_source/scheduling/workflows/schema.py`'s
//! Pydantic models, translated to plain serde structs. `ui` and
//! `trigger_intent` are carried over from the original schema as
//! passthrough/supplemental fields with no engine behaviour attached.

pub mod loader;
pub mod validate;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Llm,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub id: String,
    pub step_type: StepType,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub tool_names: Vec<String>,
    /// intent → transition target string ("Transition target string").
    #[serde(default)]
    pub transitions: HashMap<String, String>,
    #[serde(default)]
    pub on_enter: String,
    #[serde(default)]
    pub narration: String,
    /// JSON-signal key → target path ("state.<field>" | "step_data.<key>").
    #[serde(default)]
    pub state_fields: HashMap<String, String>,
    /// tool parameter name → data path ("state.<field>" | "step_data.<key>" | literal).
    #[serde(default)]
    pub tool_args_map: HashMap<String, String>,
    #[serde(default)]
    pub auto_intent: Option<String>,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub max_turns: Option<u32>,
    #[serde(default)]
    pub max_turns_target: Option<String>,
    /// Editor layout metadata; opaque to the engine.
    #[serde(default)]
    pub ui: Value,
    /// Carried from the original schema for workflow-selection parity; inert
    /// within this core.
    #[serde(default)]
    pub trigger_intent: Option<String>,
}

impl WorkflowState {
    pub fn auto_intent(&self) -> &str {
        self.auto_intent.as_deref().unwrap_or("success")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub initial_state: String,
    #[serde(default)]
    pub exit_phrases: Vec<String>,
    #[serde(default = "default_exit_message")]
    pub exit_message: String,
    #[serde(default)]
    pub trigger_keywords: Vec<String>,
    pub states: HashMap<String, WorkflowState>,
}

fn default_exit_message() -> String {
    "Goodbye!".to_string()
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("initial_state '{0}' is not a state in this workflow")]
    MissingInitialState(String),
    #[error("state '{from}' transition '{intent}' targets unknown state '{target}'")]
    UnknownTransitionTarget { from: String, intent: String, target: String },
    #[error("state '{0}' cannot reach an exit")]
    NoPathToExit(String),
    #[error("state '{0}' is unreachable from initial_state")]
    Unreachable(String),
}

/// A parsed transition target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Remain in the current state; no-op.
    Stay,
    /// Advance to another state, with an optional override message.
    Advance { state_id: String, message: Option<String> },
    /// Terminate the call, with an optional override goodbye message.
    Exit { message: Option<String> },
}

/// Parses a transition target string.
pub fn parse_target(raw: &str) -> Target {
    if raw.is_empty() {
        return Target::Stay;
    }
    if raw == "exit" || raw.starts_with("exit:") {
        let message = raw.strip_prefix("exit:").map(str::to_string);
        return Target::Exit { message };
    }
    match raw.split_once(':') {
        Some((state_id, message)) => Target::Advance {
            state_id: state_id.to_string(),
            message: Some(message.to_string()),
        },
        None => Target::Advance { state_id: raw.to_string(), message: None },
    }
}

/// Whitelist of fields a runtime patch may touch.
pub const PATCHABLE_FIELDS: &[&str] = &[
    "on_enter",
    "system_prompt",
    "narration",
    "tool_names",
    "transitions",
    "state_fields",
    "tool_args_map",
    "auto_intent",
    "step_type",
    "handler",
    "max_turns",
    "max_turns_target",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_target_bare_id() {
        assert_eq!(parse_target("hello"), Target::Advance { state_id: "hello".into(), message: None });
    }

    #[test]
    fn parse_target_id_with_message() {
        assert_eq!(
            parse_target("hello:hi there"),
            Target::Advance { state_id: "hello".into(), message: Some("hi there".into()) }
        );
    }

    #[test]
    fn parse_target_bare_exit() {
        assert_eq!(parse_target("exit"), Target::Exit { message: None });
    }

    #[test]
    fn parse_target_exit_with_message() {
        assert_eq!(parse_target("exit:goodbye"), Target::Exit { message: Some("goodbye".into()) });
    }

    #[test]
    fn parse_target_empty_stays() {
        assert_eq!(parse_target(""), Target::Stay);
    }

    #[test]
    fn auto_intent_defaults_to_success() {
        let state = WorkflowState {
            id: "s".into(),
            step_type: StepType::Tool,
            system_prompt: String::new(),
            tool_names: vec![],
            transitions: HashMap::new(),
            on_enter: String::new(),
            narration: String::new(),
            state_fields: HashMap::new(),
            tool_args_map: HashMap::new(),
            auto_intent: None,
            handler: None,
            max_turns: None,
            max_turns_target: None,
            ui: Value::Null,
            trigger_intent: None,
        };
        assert_eq!(state.auto_intent(), "success");
    }
}
