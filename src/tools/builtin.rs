//! Concrete tools: apartment search, availability check, booking creation.
//!
//! Grounded on the tool names and narration style in
//! `examples/original_source/scheduling/session.py`'s
//! `_build_tool_args_legacy` and `_init_tools`. Each tool is a thin narrator
//! over the `Search`/`Calendar` external contracts — it does not itself
//! implement ranking or calendar storage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::external::{Calendar, CalendarEvent, Search};
use crate::tools::{Tool, ToolError};

pub struct ApartmentSearchTool {
    search: Arc<dyn Search>,
}

impl ApartmentSearchTool {
    pub fn new(search: Arc<dyn Search>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl Tool for ApartmentSearchTool {
    fn name(&self) -> &str {
        "apartment_search"
    }

    fn description(&self) -> &str {
        "Search available apartment listings matching caller criteria."
    }

    fn parameters(&self) -> &[&str] {
        &["query"]
    }

    async fn execute(&self, args: HashMap<String, Value>) -> Result<String, ToolError> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_default();

        let results = self
            .search
            .query(&query, 5)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        if results.is_empty() {
            return Ok("No listings matched that search.".to_string());
        }

        let narrated = results
            .iter()
            .map(|r| format!("- {}", r.text))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(format!("Found {} listings matching criteria:\n{narrated}", results.len()))
    }
}

pub struct CheckAvailabilityTool {
    calendar: Arc<dyn Calendar>,
    calendar_id: String,
}

impl CheckAvailabilityTool {
    pub fn new(calendar: Arc<dyn Calendar>, calendar_id: String) -> Self {
        Self { calendar, calendar_id }
    }
}

#[async_trait]
impl Tool for CheckAvailabilityTool {
    fn name(&self) -> &str {
        "check_availability"
    }

    fn description(&self) -> &str {
        "List available viewing time slots for the selected listing."
    }

    fn parameters(&self) -> &[&str] {
        &["start", "end"]
    }

    async fn execute(&self, args: HashMap<String, Value>) -> Result<String, ToolError> {
        let start = parse_datetime_arg(&args, "start").unwrap_or_else(Utc::now);
        let end = parse_datetime_arg(&args, "end").unwrap_or_else(|| start + chrono::Duration::days(7));

        let slots = self
            .calendar
            .list_available_slots(&self.calendar_id, start, end, 30)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        if slots.is_empty() {
            return Ok("No available viewing slots in that range.".to_string());
        }

        let narrated = slots
            .iter()
            .map(|s| format!("- {}", s.start.format("%A %B %-d at %-I:%M %p")))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(format!("Available times:\n{narrated}"))
    }
}

fn parse_datetime_arg(args: &HashMap<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    args.get(key)
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

pub struct CreateBookingTool {
    calendar: Arc<dyn Calendar>,
    calendar_id: String,
}

impl CreateBookingTool {
    pub fn new(calendar: Arc<dyn Calendar>, calendar_id: String) -> Self {
        Self { calendar, calendar_id }
    }
}

#[async_trait]
impl Tool for CreateBookingTool {
    fn name(&self) -> &str {
        "create_booking"
    }

    fn description(&self) -> &str {
        "Book a viewing appointment on the calendar for the caller."
    }

    fn parameters(&self) -> &[&str] {
        &["start", "end", "caller_name", "caller_email"]
    }

    async fn execute(&self, args: HashMap<String, Value>) -> Result<String, ToolError> {
        let start = parse_datetime_arg(&args, "start")
            .ok_or_else(|| ToolError::ExecutionFailed("missing or invalid 'start'".to_string()))?;
        let end = args
            .get("end")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| start + chrono::Duration::minutes(30));

        let caller_name = args.get("caller_name").and_then(|v| v.as_str()).unwrap_or("Caller").to_string();
        let caller_email = args.get("caller_email").and_then(|v| v.as_str()).map(str::to_string);

        let event = CalendarEvent {
            calendar_id: self.calendar_id.clone(),
            start,
            end,
            summary: format!("Apartment viewing for {caller_name}"),
            attendee_email: caller_email,
        };

        let handle = self
            .calendar
            .create_event(event)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(format!("Booking confirmed, event id {}.", handle.event_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{CalendarEventHandle, CalendarSlot, ExternalError, SearchResult};

    struct FakeSearch {
        results: Vec<SearchResult>,
    }

    #[async_trait]
    impl Search for FakeSearch {
        async fn query(&self, _text: &str, _top_k: u32) -> Result<Vec<SearchResult>, ExternalError> {
            Ok(self.results.clone())
        }
    }

    struct FakeCalendar;

    #[async_trait]
    impl Calendar for FakeCalendar {
        async fn list_available_slots(
            &self,
            _calendar_id: &str,
            start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _min_duration_minutes: i64,
        ) -> Result<Vec<CalendarSlot>, ExternalError> {
            Ok(vec![CalendarSlot { start, end: start + chrono::Duration::minutes(30) }])
        }

        async fn create_event(&self, _event: CalendarEvent) -> Result<CalendarEventHandle, ExternalError> {
            Ok(CalendarEventHandle { event_id: "evt_123".to_string() })
        }

        async fn cancel_event(&self, _calendar_id: &str, _event_id: &str) -> Result<(), ExternalError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn apartment_search_narrates_results() {
        let tool = ApartmentSearchTool::new(Arc::new(FakeSearch {
            results: vec![SearchResult {
                id: "1".into(),
                text: "2BR downtown, $1900".into(),
                score: 0.9,
                metadata: Value::Null,
            }],
        }));
        let mut args = HashMap::new();
        args.insert("query".to_string(), Value::String("2 bedroom downtown".into()));
        let result = tool.execute(args).await.unwrap();
        assert!(result.contains("Found 1 listings"));
        assert!(result.contains("2BR downtown"));
    }

    #[tokio::test]
    async fn apartment_search_reports_no_matches() {
        let tool = ApartmentSearchTool::new(Arc::new(FakeSearch { results: vec![] }));
        let result = tool.execute(HashMap::new()).await.unwrap();
        assert_eq!(result, "No listings matched that search.");
    }

    #[tokio::test]
    async fn check_availability_narrates_slots() {
        let tool = CheckAvailabilityTool::new(Arc::new(FakeCalendar), "primary".into());
        let result = tool.execute(HashMap::new()).await.unwrap();
        assert!(result.starts_with("Available times:"));
    }

    #[tokio::test]
    async fn create_booking_requires_start() {
        let tool = CreateBookingTool::new(Arc::new(FakeCalendar), "primary".into());
        let err = tool.execute(HashMap::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(_)));
    }

    #[tokio::test]
    async fn create_booking_returns_event_id() {
        let tool = CreateBookingTool::new(Arc::new(FakeCalendar), "primary".into());
        let mut args = HashMap::new();
        args.insert("start".to_string(), Value::String(Utc::now().to_rfc3339()));
        args.insert("caller_name".to_string(), Value::String("Jordan".into()));
        let result = tool.execute(args).await.unwrap();
        assert!(result.contains("evt_123"));
    }
}
