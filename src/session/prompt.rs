//! System prompt rendering.
//!
//! Substitutes the closed placeholder set against CallerState/step_data and
//! appends the two fixed directives every LLM turn carries, grounded on
//! `examples/original_source/scheduling/session.py`'s
//! `_render_system_prompt`. The placeholder set is a closed enumeration
//! with typed resolvers — unknown placeholders are left literal rather
//! than silently dropped.

use std::collections::HashMap;

use serde_json::Value;

use super::caller_state::CallerState;

const TTS_FORMATTING_DIRECTIVE: &str = "\n\nSpeak naturally, as if on a phone call: no markdown, no bullet points or numbered lists, spell out numbers as words when it reads more naturally aloud.";
const NEVER_VERBALISE_NULL_DIRECTIVE: &str = "\n\nNever say the words \"null\", \"none\", or \"N/A\" aloud; if a value is unknown, simply omit it from what you say.";

/// The closed set of placeholders recognised in `system_prompt` templates.
pub const KNOWN_PLACEHOLDERS: &[&str] = &[
    "search_results",
    "available_slots",
    "selected_address",
    "selected_time_display",
    "caller_email",
    "booking_confirmation",
];

fn resolve_placeholder(
    name: &str,
    caller_state: &CallerState,
    step_data: &HashMap<String, Value>,
) -> Option<String> {
    match name {
        "search_results" => step_data.get("search_listings").map(value_to_text),
        "available_slots" => step_data.get("check_availability").map(value_to_text),
        "selected_address" => caller_state.selected_listing_address.clone(),
        "selected_time_display" => caller_state.selected_time_slot.clone(),
        "caller_email" => caller_state.caller_email.clone(),
        "booking_confirmation" => step_data.get("create_booking").map(value_to_text),
        _ => None,
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitutes `{{placeholder}}` tokens, leaving unknown ones literal, then
/// appends the two fixed directives.
pub fn render_system_prompt(
    template: &str,
    caller_state: &CallerState,
    step_data: &HashMap<String, Value>,
) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        rendered.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            // Unterminated token — emit the rest literally and stop.
            rendered.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let name = after_open[..end].trim();
        let replacement = resolve_placeholder(name, caller_state, step_data)
            .unwrap_or_default();
        if KNOWN_PLACEHOLDERS.contains(&name) {
            rendered.push_str(&replacement);
        } else {
            // Unknown placeholder: left literal.
            rendered.push_str("{{");
            rendered.push_str(name);
            rendered.push_str("}}");
        }
        rest = &after_open[end + 2..];
    }
    rendered.push_str(rest);

    rendered.push_str(TTS_FORMATTING_DIRECTIVE);
    rendered.push_str(NEVER_VERBALISE_NULL_DIRECTIVE);
    rendered
}
