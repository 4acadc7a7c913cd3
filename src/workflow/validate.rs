//! Workflow validation: transition closure and
//! reachability-to-exit, checked with plain BFS over the state graph.

use std::collections::{HashSet, VecDeque};

use super::{parse_target, Target, Workflow, WorkflowError};

pub fn validate(workflow: &Workflow) -> Result<(), WorkflowError> {
    if !workflow.states.contains_key(&workflow.initial_state) {
        return Err(WorkflowError::MissingInitialState(workflow.initial_state.clone()));
    }

    check_transition_closure(workflow)?;
    check_reachable_from_initial(workflow)?;
    check_every_state_reaches_exit(workflow)?;
    Ok(())
}

fn targets_of(state: &super::WorkflowState) -> Vec<Target> {
    state.transitions.values().map(|raw| parse_target(raw)).collect()
}

fn check_transition_closure(workflow: &Workflow) -> Result<(), WorkflowError> {
    for state in workflow.states.values() {
        for (intent, raw) in &state.transitions {
            if let Target::Advance { state_id, .. } = parse_target(raw) {
                if !workflow.states.contains_key(&state_id) {
                    return Err(WorkflowError::UnknownTransitionTarget {
                        from: state.id.clone(),
                        intent: intent.clone(),
                        target: state_id,
                    });
                }
            }
        }
    }
    Ok(())
}

fn check_reachable_from_initial(workflow: &Workflow) -> Result<(), WorkflowError> {
    let reachable = reachable_set(workflow, &workflow.initial_state);
    for id in workflow.states.keys() {
        if !reachable.contains(id) {
            return Err(WorkflowError::Unreachable(id.clone()));
        }
    }
    Ok(())
}

fn check_every_state_reaches_exit(workflow: &Workflow) -> Result<(), WorkflowError> {
    for id in workflow.states.keys() {
        if !can_reach_exit(workflow, id) {
            return Err(WorkflowError::NoPathToExit(id.clone()));
        }
    }
    Ok(())
}

fn reachable_set(workflow: &Workflow, from: &str) -> HashSet<String> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(from.to_string());
    visited.insert(from.to_string());

    while let Some(current) = queue.pop_front() {
        let Some(state) = workflow.states.get(&current) else { continue };
        for target in targets_of(state) {
            if let Target::Advance { state_id, .. } = target {
                if visited.insert(state_id.clone()) {
                    queue.push_back(state_id);
                }
            }
        }
    }
    visited
}

fn can_reach_exit(workflow: &Workflow, from: &str) -> bool {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(from.to_string());
    visited.insert(from.to_string());

    while let Some(current) = queue.pop_front() {
        let Some(state) = workflow.states.get(&current) else { continue };
        for target in targets_of(state) {
            match target {
                Target::Exit { .. } => return true,
                Target::Advance { state_id, .. } => {
                    if visited.insert(state_id.clone()) {
                        queue.push_back(state_id);
                    }
                }
                Target::Stay => {}
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::StepType;
    use std::collections::HashMap;

    fn state(id: &str, transitions: &[(&str, &str)]) -> super::super::WorkflowState {
        super::super::WorkflowState {
            id: id.to_string(),
            step_type: StepType::Llm,
            system_prompt: String::new(),
            tool_names: vec![],
            transitions: transitions.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
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
        }
    }

    fn workflow(states: Vec<super::super::WorkflowState>) -> Workflow {
        Workflow {
            id: "wf".into(),
            initial_state: states[0].id.clone(),
            exit_phrases: vec![],
            exit_message: "Goodbye!".into(),
            trigger_keywords: vec![],
            states: states.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    #[test]
    fn valid_linear_workflow_passes() {
        let wf = workflow(vec![
            state("a", &[("success", "b")]),
            state("b", &[("success", "exit")]),
        ]);
        assert!(validate(&wf).is_ok());
    }

    #[test]
    fn unknown_target_is_rejected() {
        let wf = workflow(vec![state("a", &[("success", "nonexistent")])]);
        assert!(matches!(validate(&wf), Err(WorkflowError::UnknownTransitionTarget { .. })));
    }

    #[test]
    fn unreachable_state_is_rejected() {
        let mut wf = workflow(vec![
            state("a", &[("success", "exit")]),
        ]);
        wf.states.insert("orphan".into(), state("orphan", &[("success", "exit")]));
        assert!(matches!(validate(&wf), Err(WorkflowError::Unreachable(_))));
    }

    #[test]
    fn state_with_no_path_to_exit_is_rejected() {
        let wf = workflow(vec![
            state("a", &[("success", "b")]),
            state("b", &[("success", "a")]),
        ]);
        assert!(matches!(validate(&wf), Err(WorkflowError::NoPathToExit(_))));
    }

    #[test]
    fn missing_initial_state_is_rejected() {
        let mut wf = workflow(vec![state("a", &[("success", "exit")])]);
        wf.initial_state = "ghost".into();
        assert!(matches!(validate(&wf), Err(WorkflowError::MissingInitialState(_))));
    }

    #[test]
    fn wildcard_fallback_counts_as_a_valid_target() {
        let wf = workflow(vec![
            state("a", &[("next", "b"), ("*", "b")]),
            state("b", &[("success", "exit")]),
        ]);
        assert!(validate(&wf).is_ok());
    }
}
