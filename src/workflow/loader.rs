//! Workflow JSONL loader/saver.
//!
//! Grounded on
//! `examples/original_source/scheduling/workflows/loader.py`: one workflow
//! per file, one JSON object per non-empty line (first non-empty line is
//! used; a file may carry trailing blank lines). Validation runs after
//! parsing; a failed validation means nothing is partially loaded.

use std::fs;
use std::path::Path;

use thiserror::Error;

use super::{validate::validate, Workflow, WorkflowError};

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("io error reading '{path}': {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("file '{0}' has no non-empty JSON line")]
    Empty(String),
    #[error("failed to parse workflow JSON in '{path}': {source}")]
    Parse { path: String, #[source] source: serde_json::Error },
    #[error(transparent)]
    Invalid(#[from] WorkflowError),
}

pub fn load_workflow_jsonl(path: impl AsRef<Path>) -> Result<Workflow, LoaderError> {
    let path_ref = path.as_ref();
    let path_str = path_ref.display().to_string();
    let contents = fs::read_to_string(path_ref)
        .map_err(|e| LoaderError::Io { path: path_str.clone(), source: e })?;

    let line = contents
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| LoaderError::Empty(path_str.clone()))?;

    let workflow: Workflow = serde_json::from_str(line)
        .map_err(|e| LoaderError::Parse { path: path_str.clone(), source: e })?;

    validate(&workflow)?;
    Ok(workflow)
}

/// Loads every `*.jsonl` file directly under `dir`, skipping files that fail
/// to parse or validate (logged, not fatal — a workflow directory may be
/// edited concurrently with the server running).
pub fn load_workflows_dir(dir: impl AsRef<Path>) -> Vec<Workflow> {
    let mut workflows = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else { return workflows };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        match load_workflow_jsonl(&path) {
            Ok(workflow) => workflows.push(workflow),
            Err(e) => tracing::warn!("skipping workflow file {}: {e}", path.display()),
        }
    }
    workflows
}

/// Serialises the workflow to a single JSON line, creating parent
/// directories as needed. Re-validates before writing.
pub fn save_workflow_jsonl(workflow: &Workflow, path: impl AsRef<Path>) -> Result<(), LoaderError> {
    validate(workflow)?;

    let path_ref = path.as_ref();
    if let Some(parent) = path_ref.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| LoaderError::Io { path: path_ref.display().to_string(), source: e })?;
    }

    let mut line = serde_json::to_string(workflow)
        .map_err(|e| LoaderError::Parse { path: path_ref.display().to_string(), source: e })?;
    line.push('\n');

    fs::write(path_ref, line)
        .map_err(|e| LoaderError::Io { path: path_ref.display().to_string(), source: e })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_json() -> String {
        serde_json::json!({
            "id": "apartment_viewing",
            "initial_state": "hello",
            "exit_phrases": [],
            "exit_message": "Goodbye!",
            "trigger_keywords": [],
            "states": {
                "hello": {
                    "id": "hello",
                    "step_type": "llm",
                    "system_prompt": "Greet the caller.",
                    "tool_names": [],
                    "transitions": {"greeted": "exit"},
                    "on_enter": "",
                    "narration": "",
                    "state_fields": {},
                    "tool_args_map": {},
                }
            }
        })
        .to_string()
    }

    #[test]
    fn round_trips_through_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apartment_viewing.jsonl");
        fs::write(&path, sample_json()).unwrap();

        let workflow = load_workflow_jsonl(&path).unwrap();
        assert_eq!(workflow.id, "apartment_viewing");
        assert_eq!(workflow.initial_state, "hello");

        let save_path = dir.path().join("saved.jsonl");
        save_workflow_jsonl(&workflow, &save_path).unwrap();
        let reloaded = load_workflow_jsonl(&save_path).unwrap();
        assert_eq!(reloaded.id, workflow.id);
    }

    #[test]
    fn skips_leading_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wf.jsonl");
        fs::write(&path, format!("\n\n{}\n", sample_json())).unwrap();
        assert!(load_workflow_jsonl(&path).is_ok());
    }

    #[test]
    fn empty_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.jsonl");
        fs::write(&path, "\n\n").unwrap();
        assert!(matches!(load_workflow_jsonl(&path), Err(LoaderError::Empty(_))));
    }

    #[test]
    fn invalid_workflow_does_not_save() {
        let dir = tempfile::tempdir().unwrap();
        let mut states = HashMap::new();
        states.insert(
            "a".to_string(),
            crate::workflow::WorkflowState {
                id: "a".into(),
                step_type: crate::workflow::StepType::Llm,
                system_prompt: String::new(),
                tool_names: vec![],
                transitions: [("success".to_string(), "ghost".to_string())].into(),
                on_enter: String::new(),
                narration: String::new(),
                state_fields: HashMap::new(),
                tool_args_map: HashMap::new(),
                auto_intent: None,
                handler: None,
                max_turns: None,
                max_turns_target: None,
                ui: serde_json::Value::Null,
                trigger_intent: None,
            },
        );
        let workflow = Workflow {
            id: "bad".into(),
            initial_state: "a".into(),
            exit_phrases: vec![],
            exit_message: "Goodbye!".into(),
            trigger_keywords: vec![],
            states,
        };
        let path = dir.path().join("bad.jsonl");
        assert!(save_workflow_jsonl(&workflow, &path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn load_workflows_dir_skips_non_jsonl_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();
        fs::write(dir.path().join("wf.jsonl"), sample_json()).unwrap();
        let workflows = load_workflows_dir(dir.path());
        assert_eq!(workflows.len(), 1);
    }
}
