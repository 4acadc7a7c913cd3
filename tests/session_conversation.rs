//! End-to-end conversation tests driving `Session` through a small
//! in-memory workflow, standing in for a real call. Grounded on
//! `examples/original_source/scheduling/tests/test_session.py`'s
//! fixture-workflow style: a tiny two/three-state workflow built inline
//! per test rather than loaded from disk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dialflow_core::debug::DebugBroadcaster;
use dialflow_core::external::{ExternalError, Llm, TurnMessage};
use dialflow_core::session::Session;
use dialflow_core::tools::{Tool, ToolError, ToolRegistry};
use dialflow_core::workflow::{StepType, Workflow, WorkflowState};
use serde_json::json;

/// An `Llm` whose replies are scripted per call, in order.
struct ScriptedLlm {
    replies: Vec<String>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: replies.into_iter().map(str::to_string).collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Llm for ScriptedLlm {
    async fn complete(
        &self,
        _system_prompt: &str,
        _history: &[TurnMessage],
        _provider: &str,
        _model: &str,
    ) -> Result<String, ExternalError> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .get(idx)
            .cloned()
            .ok_or_else(|| ExternalError::Llm("script exhausted".into()))
    }
}

/// An `Llm` that always fails, for the tool/LLM error-recovery path.
struct FailingLlm;

#[async_trait]
impl Llm for FailingLlm {
    async fn complete(
        &self,
        _system_prompt: &str,
        _history: &[TurnMessage],
        _provider: &str,
        _model: &str,
    ) -> Result<String, ExternalError> {
        Err(ExternalError::Llm("provider unreachable".into()))
    }
}

/// A tool that always fails, to exercise the tool-step error path.
struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "always_fails"
    }
    fn description(&self) -> &str {
        "a tool that always errors, for testing"
    }
    fn parameters(&self) -> &[&str] {
        &[]
    }
    async fn execute(&self, _args: HashMap<String, serde_json::Value>) -> Result<String, ToolError> {
        Err(ToolError::ExecutionFailed("backend unavailable".into()))
    }
}

fn greeting_state() -> WorkflowState {
    WorkflowState {
        id: "greeting".to_string(),
        step_type: StepType::Llm,
        system_prompt: "Greet the caller and ask for their name.".to_string(),
        tool_names: Vec::new(),
        transitions: HashMap::from([("success".to_string(), "collect_name".to_string())]),
        on_enter: String::new(),
        narration: String::new(),
        state_fields: HashMap::new(),
        tool_args_map: HashMap::new(),
        auto_intent: None,
        handler: None,
        max_turns: None,
        max_turns_target: None,
        ui: json!({}),
        trigger_intent: None,
    }
}

fn collect_name_state() -> WorkflowState {
    WorkflowState {
        id: "collect_name".to_string(),
        step_type: StepType::Llm,
        system_prompt: "Collect the caller's name.".to_string(),
        tool_names: Vec::new(),
        transitions: HashMap::from([("success".to_string(), "exit".to_string())]),
        on_enter: String::new(),
        narration: String::new(),
        state_fields: HashMap::from([("name".to_string(), "state.caller_name".to_string())]),
        tool_args_map: HashMap::new(),
        auto_intent: None,
        handler: None,
        max_turns: None,
        max_turns_target: None,
        ui: json!({}),
        trigger_intent: None,
    }
}

fn tool_state(name: &str, tool_names: Vec<&str>, transitions: HashMap<&str, &str>) -> WorkflowState {
    WorkflowState {
        id: name.to_string(),
        step_type: StepType::Tool,
        system_prompt: String::new(),
        tool_names: tool_names.into_iter().map(str::to_string).collect(),
        transitions: transitions
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        on_enter: String::new(),
        narration: String::new(),
        state_fields: HashMap::new(),
        tool_args_map: HashMap::new(),
        auto_intent: None,
        handler: None,
        max_turns: None,
        max_turns_target: None,
        ui: json!({}),
        trigger_intent: None,
    }
}

fn two_state_workflow() -> Arc<Workflow> {
    Arc::new(Workflow {
        id: "greet-and-collect".to_string(),
        initial_state: "greeting".to_string(),
        exit_phrases: Vec::new(),
        exit_message: "Goodbye, thanks for calling!".to_string(),
        trigger_keywords: Vec::new(),
        states: HashMap::from([
            ("greeting".to_string(), greeting_state()),
            ("collect_name".to_string(), collect_name_state()),
        ]),
    })
}

fn session_with(workflow: Arc<Workflow>, llm: Arc<dyn Llm>, tools: Arc<ToolRegistry>) -> Arc<Session> {
    Arc::new(Session::new(
        "test-session",
        workflow,
        tools,
        llm,
        "openai",
        "gpt-4o-mini",
        DebugBroadcaster::new("test-session"),
    ))
}

#[tokio::test]
async fn happy_path_advances_and_captures_data() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        "Nice to meet you! ```json\n{\"intent\": \"success\"}\n```",
        "Thanks, Jordan. ```json\n{\"name\": \"Jordan\", \"intent\": \"success\"}\n```",
    ]));
    let session = session_with(two_state_workflow(), llm, Arc::new(ToolRegistry::new()));

    let first = session.handle_utterance("Hi there").await;
    assert!(first.contains("Nice to meet you"));
    assert!(!first.contains("intent"), "json signal must be stripped from the spoken reply");

    let snapshot_mid = session.snapshot(true).await;
    assert_eq!(snapshot_mid["current_state_id"], "collect_name");

    let second = session.handle_utterance("It's Jordan").await;
    assert!(second.contains("Thanks, Jordan"));

    let snapshot_final = session.snapshot(true).await;
    assert_eq!(snapshot_final["caller_state"]["caller_name"], "Jordan");
}

#[tokio::test]
async fn llm_failure_falls_back_to_a_retry_prompt_without_advancing() {
    let session = session_with(two_state_workflow(), Arc::new(FailingLlm), Arc::new(ToolRegistry::new()));

    let reply = session.handle_utterance("Hi there").await;
    assert!(reply.to_lowercase().contains("trouble"));

    let snapshot = session.snapshot(true).await;
    assert_eq!(snapshot["current_state_id"], "greeting", "a failed LLM call must not advance state");
}

#[tokio::test]
async fn tool_step_error_is_caught_and_routed_via_the_error_intent() {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(FailingTool));

    let mut transitions = HashMap::new();
    transitions.insert("success", "collect_name");
    transitions.insert("error", "greeting");
    let tool = tool_state("book_it", vec!["always_fails"], transitions);

    let mut ask_to_book = greeting_state();
    ask_to_book.id = "ask_to_book".to_string();
    ask_to_book.transitions = HashMap::from([("success".to_string(), "book_it".to_string())]);

    let workflow = Arc::new(Workflow {
        id: "tool-error".to_string(),
        initial_state: "ask_to_book".to_string(),
        exit_phrases: Vec::new(),
        exit_message: "Goodbye!".to_string(),
        trigger_keywords: Vec::new(),
        states: HashMap::from([
            ("ask_to_book".to_string(), ask_to_book),
            ("book_it".to_string(), tool),
            ("greeting".to_string(), greeting_state()),
            ("collect_name".to_string(), collect_name_state()),
        ]),
    });

    let llm = Arc::new(ScriptedLlm::new(vec![
        "Sure, booking that now. ```json\n{\"intent\": \"success\"}\n```",
    ]));
    let session = session_with(workflow, llm, Arc::new(registry));

    // Advancing into "book_it" runs its tool step automatically; the
    // failing tool should route through "error" back to "greeting" rather
    // than panic or hang.
    let reply = session.handle_utterance("go ahead and book it").await;
    assert!(reply.contains("booking that now"));

    let snapshot = session.snapshot(true).await;
    assert_eq!(snapshot["current_state_id"], "greeting");
}

#[tokio::test]
async fn exit_transition_marks_the_session_done() {
    let exit_state = WorkflowState {
        id: "goodbye".to_string(),
        step_type: StepType::Llm,
        system_prompt: "Say goodbye.".to_string(),
        tool_names: Vec::new(),
        transitions: HashMap::from([("success".to_string(), "exit".to_string())]),
        on_enter: String::new(),
        narration: String::new(),
        state_fields: HashMap::new(),
        tool_args_map: HashMap::new(),
        auto_intent: None,
        handler: None,
        max_turns: None,
        max_turns_target: None,
        ui: json!({}),
        trigger_intent: None,
    };
    let workflow = Arc::new(Workflow {
        id: "single-state".to_string(),
        initial_state: "goodbye".to_string(),
        exit_phrases: Vec::new(),
        exit_message: "Take care!".to_string(),
        trigger_keywords: Vec::new(),
        states: HashMap::from([("goodbye".to_string(), exit_state)]),
    });

    let llm = Arc::new(ScriptedLlm::new(vec!["Bye now! ```json\n{\"intent\": \"success\"}\n```"]));
    let session = session_with(workflow, llm, Arc::new(ToolRegistry::new()));

    assert!(!session.is_done().await);
    session.handle_utterance("I have to go").await;
    assert!(session.is_done().await, "transitioning to \"exit\" must mark the session done");

    let after = session.handle_utterance("hello?").await;
    assert_eq!(after, "Take care!", "once done, further utterances get the exit message verbatim");
}

#[tokio::test]
async fn pause_blocks_utterance_handling_until_resumed() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        "Nice to meet you! ```json\n{\"intent\": \"success\"}\n```",
    ]));
    let session = session_with(two_state_workflow(), llm, Arc::new(ToolRegistry::new()));

    session.pause();
    let session_clone = Arc::clone(&session);
    let handle = tokio::spawn(async move { session_clone.handle_utterance("Hi there").await });

    // Give the paused task a chance to actually block rather than race ahead.
    tokio::task::yield_now().await;
    assert!(!handle.is_finished(), "a paused session must not process utterances");

    session.resume();
    let reply = handle.await.unwrap();
    assert!(reply.contains("Nice to meet you"));
}
