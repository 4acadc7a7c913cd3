//! CallerState and PII redaction.
//!
//! Field list grounded on
//! `examples/original_source/scheduling/models/caller.py`'s `CallerState`
//! Pydantic model.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallerState {
    pub call_sid: Option<String>,
    pub phone_number: Option<String>,
    pub bedrooms: Option<i64>,
    pub max_budget: Option<i64>,
    pub preferred_area: Option<String>,
    pub move_in_date: Option<String>,
    pub selected_listing_id: Option<String>,
    pub selected_listing_address: Option<String>,
    pub selected_time_slot: Option<String>,
    pub caller_name: Option<String>,
    pub caller_email: Option<String>,
    pub booking_event_id: Option<String>,
    pub booking_confirmed: bool,
}

impl CallerState {
    /// Sets a field by name, for the `state.<field>` target path convention.
    /// Unknown field names are ignored rather than erroring, since they
    /// originate from workflow-author-controlled `state_fields` maps, not
    /// caller input.
    pub fn set_field(&mut self, field: &str, value: &serde_json::Value) {
        match field {
            "bedrooms" => self.bedrooms = value.as_i64(),
            "max_budget" => self.max_budget = value.as_i64(),
            "preferred_area" => self.preferred_area = value_as_string(value),
            "move_in_date" => self.move_in_date = value_as_string(value),
            "selected_listing_id" => self.selected_listing_id = value_as_string(value),
            "selected_listing_address" => self.selected_listing_address = value_as_string(value),
            "selected_time_slot" => self.selected_time_slot = value_as_string(value),
            "caller_name" => self.caller_name = value_as_string(value),
            "caller_email" => self.caller_email = value_as_string(value),
            "booking_event_id" => self.booking_event_id = value_as_string(value),
            "booking_confirmed" => self.booking_confirmed = value.as_bool().unwrap_or(false),
            _ => tracing::debug!("ignoring unknown CallerState field '{field}'"),
        }
    }

    pub fn get_field(&self, field: &str) -> Option<String> {
        match field {
            "bedrooms" => self.bedrooms.map(|v| v.to_string()),
            "max_budget" => self.max_budget.map(|v| v.to_string()),
            "preferred_area" => self.preferred_area.clone(),
            "move_in_date" => self.move_in_date.clone(),
            "selected_listing_id" => self.selected_listing_id.clone(),
            "selected_listing_address" => self.selected_listing_address.clone(),
            "selected_time_slot" => self.selected_time_slot.clone(),
            "caller_name" => self.caller_name.clone(),
            "caller_email" => self.caller_email.clone(),
            "booking_event_id" => self.booking_event_id.clone(),
            "booking_confirmed" => Some(self.booking_confirmed.to_string()),
            _ => None,
        }
    }
}

fn value_as_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Redacts a PII value for logs/events (PII redaction property).
pub fn redact(s: &str) -> String {
    if s.chars().count() <= 5 {
        return "***".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    let head: String = chars[0..3].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}***{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redact_short_string_is_fully_masked() {
        assert_eq!(redact("abcde"), "***");
    }

    #[test]
    fn redact_empty_string_is_masked() {
        assert_eq!(redact(""), "***");
    }

    #[test]
    fn redact_phone_number_keeps_head_and_tail() {
        assert_eq!(redact("+15551234567"), "+15***67");
    }

    #[test]
    fn set_field_bedrooms_parses_integer() {
        let mut state = CallerState::default();
        state.set_field("bedrooms", &json!(2));
        assert_eq!(state.bedrooms, Some(2));
    }

    #[test]
    fn set_field_unknown_name_is_ignored() {
        let mut state = CallerState::default();
        state.set_field("not_a_real_field", &json!("x"));
        assert_eq!(state.get_field("not_a_real_field"), None);
    }

    #[test]
    fn get_field_round_trips_string_fields() {
        let mut state = CallerState::default();
        state.set_field("preferred_area", &json!("downtown"));
        assert_eq!(state.get_field("preferred_area"), Some("downtown".to_string()));
    }
}
