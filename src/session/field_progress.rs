//! Field-progress detection.
//!
//! For each key in a state's `state_fields`, tests whether the key — or an
//! underscore/hyphen/space variant — appears case-insensitively in the
//! combined (user_text, llm_response) text. Grounded on
//! `examples/original_source/scheduling/session.py`'s
//! `_detect_field_progress`.

use std::collections::HashMap;

/// Returns the set of `state_fields` keys that appear to have been
/// discussed in this turn. Deterministic given the same inputs — running
/// twice on the same (user, reply) pair yields the same set.
pub fn detect_field_progress(
    user_text: &str,
    llm_response: &str,
    state_fields: &HashMap<String, String>,
) -> Vec<String> {
    let haystack = format!("{user_text} {llm_response}").to_lowercase();

    let mut matched: Vec<String> = state_fields
        .keys()
        .filter(|key| key_matches(&haystack, key))
        .cloned()
        .collect();
    matched.sort();
    matched
}

fn key_matches(haystack: &str, key: &str) -> bool {
    let key_lower = key.to_lowercase();
    let underscore_space = key_lower.replace('_', " ");
    let underscore_hyphen = key_lower.replace('_', "-");

    haystack.contains(&key_lower)
        || haystack.contains(&underscore_space)
        || haystack.contains(&underscore_hyphen)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> HashMap<String, String> {
        [
            ("max_budget".to_string(), "state.max_budget".to_string()),
            ("preferred_area".to_string(), "state.preferred_area".to_string()),
        ]
        .into()
    }

    #[test]
    fn matches_underscore_form() {
        let matched = detect_field_progress("my max_budget is 2000", "", &fields());
        assert_eq!(matched, vec!["max_budget"]);
    }

    #[test]
    fn matches_space_variant() {
        let matched = detect_field_progress("", "your max budget sounds reasonable", &fields());
        assert_eq!(matched, vec!["max_budget"]);
    }

    #[test]
    fn matches_hyphen_variant() {
        let matched = detect_field_progress("preferred-area: downtown", "", &fields());
        assert_eq!(matched, vec!["preferred_area"]);
    }

    #[test]
    fn is_case_insensitive() {
        let matched = detect_field_progress("MAX_BUDGET is two grand", "", &fields());
        assert_eq!(matched, vec!["max_budget"]);
    }

    #[test]
    fn is_idempotent_on_same_inputs() {
        let first = detect_field_progress("budget and area talk", "preferred area noted", &fields());
        let second = detect_field_progress("budget and area talk", "preferred area noted", &fields());
        assert_eq!(first, second);
    }

    #[test]
    fn returns_empty_when_nothing_matches() {
        let matched = detect_field_progress("hello there", "nice to meet you", &fields());
        assert!(matched.is_empty());
    }
}
