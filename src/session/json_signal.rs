//! JSON completion-signal extraction.
//!
//! Extraction order: last fenced ```` ```json ... ``` ```` (or bare
//! ```` ``` ... ``` ````) block that parses as a JSON object, else the last
//! bare `{...}` line, else no signal. This takes the *last* matching block
//! deliberately, rather than
//! `examples/original_source/scheduling/session.py`'s `re.search` (which
//! returns the first match): an LLM that second-guesses itself and emits a
//! corrected block later in the same response should have the correction
//! win.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*\n?(\{.*?\})\s*\n?```").unwrap());

pub struct ExtractedSignal {
    pub json: Value,
    /// Exact substring (including fences, if any) that was removed from the
    /// response to produce the stripped text.
    pub matched_text: String,
}

/// Extracts a JSON completion signal from an LLM response, applying the
/// ordered extraction rules above.
pub fn extract_json_signal(response: &str) -> Option<ExtractedSignal> {
    if let Some(found) = extract_last_fenced(response) {
        return Some(found);
    }
    extract_last_bare_line(response)
}

fn extract_last_fenced(response: &str) -> Option<ExtractedSignal> {
    FENCED_BLOCK
        .captures_iter(response)
        .filter_map(|caps| {
            let whole = caps.get(0)?.as_str().to_string();
            let body = caps.get(1)?.as_str();
            let json: Value = serde_json::from_str(body).ok()?;
            if !json.is_object() {
                return None;
            }
            Some(ExtractedSignal { json, matched_text: whole })
        })
        .last()
}

fn extract_last_bare_line(response: &str) -> Option<ExtractedSignal> {
    response
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            if !trimmed.starts_with('{') || !trimmed.ends_with('}') {
                return None;
            }
            let json: Value = serde_json::from_str(trimmed).ok()?;
            if !json.is_object() {
                return None;
            }
            Some(ExtractedSignal { json, matched_text: line.to_string() })
        })
        .last()
}

/// Removes exactly the matched text and trims the remainder.
pub fn strip_response(response: &str, matched_text: &str) -> String {
    response.replacen(matched_text, "", 1).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_json_block() {
        let response = "Great!\n```json\n{\"intent\":\"greeted\"}\n```";
        let signal = extract_json_signal(response).unwrap();
        assert_eq!(signal.json["intent"], "greeted");
    }

    #[test]
    fn prefers_last_fenced_block_when_multiple_present() {
        let response = "```json\n{\"intent\":\"first\"}\n```\ntext\n```json\n{\"intent\":\"second\"}\n```";
        let signal = extract_json_signal(response).unwrap();
        assert_eq!(signal.json["intent"], "second");
    }

    #[test]
    fn falls_back_to_bare_fence_without_json_tag() {
        let response = "Sure.\n```\n{\"intent\":\"ok\"}\n```";
        let signal = extract_json_signal(response).unwrap();
        assert_eq!(signal.json["intent"], "ok");
    }

    #[test]
    fn falls_back_to_bare_json_line() {
        let response = "Done.\n{\"intent\":\"no_times\"}";
        let signal = extract_json_signal(response).unwrap();
        assert_eq!(signal.json["intent"], "no_times");
    }

    #[test]
    fn returns_none_when_no_signal_present() {
        assert!(extract_json_signal("Just a normal reply.").is_none());
    }

    #[test]
    fn strip_removes_exactly_the_matched_text() {
        let response = "Great to meet you!\n```json\n{\"intent\":\"greeted\"}\n```";
        let signal = extract_json_signal(response).unwrap();
        let stripped = strip_response(response, &signal.matched_text);
        assert_eq!(stripped, "Great to meet you!");
        assert!(!stripped.contains('{'));
    }

    #[test]
    fn strip_json_round_trip_property() {
        let spoken = "Here is your answer.";
        let response = format!("{spoken}\n```json\n{{\"intent\":\"x\"}}\n```");
        let signal = extract_json_signal(&response).unwrap();
        assert_eq!(strip_response(&response, &signal.matched_text), spoken);
        assert_eq!(signal.json["intent"], "x");
    }

    #[test]
    fn ignores_fenced_non_object_json() {
        let response = "Some text\n```json\n[1,2,3]\n```";
        assert!(extract_json_signal(response).is_none());
    }
}
