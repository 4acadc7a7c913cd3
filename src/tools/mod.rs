//! Tool Registry.
//!
//! Concrete tools (search/availability/booking) are thin narrators over the
//! external Search/Calendar contracts in `crate::external`; this module only
//! owns the naming/dispatch contract and the declarative argument-path
//! resolution shared by every tool state.

pub mod builtin;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool '{0}' is not registered")]
    NotFound(String),
    #[error("{0}")]
    ExecutionFailed(String),
}

/// A named capability invocable by tool states.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// Declared parameter names; used only for documentation/admin display —
    /// the args builder does not type-check against this today. A future
    /// improvement could validate tool-step args against this list before
    /// execution.
    fn parameters(&self) -> &[&str];

    /// Executes with already-resolved arguments, returning narrated text fit
    /// for direct inclusion in a prompt.
    async fn execute(&self, args: HashMap<String, Value>) -> Result<String, ToolError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }
}

/// Resolves one declarative argument path against CallerState and
/// step_data: `state.<field>` reads CallerState (by JSON projection),
/// `step_data.<key>` reads step_data, anything else is a literal.
pub fn resolve_data_path(
    path: &str,
    caller_state: &Value,
    step_data: &HashMap<String, Value>,
) -> Value {
    if let Some(field) = path.strip_prefix("state.") {
        return caller_state.get(field).cloned().unwrap_or(Value::Null);
    }
    if let Some(key) = path.strip_prefix("step_data.") {
        return step_data.get(key).cloned().unwrap_or(Value::Null);
    }
    Value::String(path.to_string())
}

/// Builds a tool's argument map from its `tool_args_map`: map non-empty →
/// use map; the legacy hardcoded builder is the caller's fallback when the
/// map is empty.
pub fn build_args_from_map(
    tool_args_map: &HashMap<String, String>,
    caller_state: &Value,
    step_data: &HashMap<String, Value>,
) -> HashMap<String, Value> {
    tool_args_map
        .iter()
        .map(|(param, path)| (param.clone(), resolve_data_path(path, caller_state, step_data)))
        .collect()
}

/// Truncates a tool result to the debug-event preview length.
pub const TOOL_EXEC_PREVIEW_LEN: usize = 200;

pub fn truncate_for_event(text: &str) -> String {
    if text.chars().count() <= TOOL_EXEC_PREVIEW_LEN {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(TOOL_EXEC_PREVIEW_LEN).collect();
        format!("{truncated}...")
    }
}
