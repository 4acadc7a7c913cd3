//! External collaborator contracts.
//!
//! Concrete STT/TTS engines, LLM provider SDKs, the search RAG service, and
//! the calendar backend are explicitly out of scope; only their
//! contracts live here. The one concrete implementation this core ships is
//! the Twilio-backed NAT traversal credential fetch,
//! because it has no meaningful "provider" abstraction to defer — it's a
//! single HTTP call the core itself must make.

pub mod twilio_turn;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExternalError {
    #[error("llm call failed: {0}")]
    Llm(String),
    #[error("stt call failed: {0}")]
    Stt(String),
    #[error("tts call failed: {0}")]
    Tts(String),
    #[error("calendar call failed: {0}")]
    Calendar(String),
    #[error("search call failed: {0}")]
    Search(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnMessage {
    pub role: TurnRole,
    pub text: String,
}

/// LLM contract: the core parses only the JSON completion signal
/// embedded in the text reply; it does not parse provider function-call
/// JSON.
#[async_trait]
pub trait Llm: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[TurnMessage],
        provider: &str,
        model: &str,
    ) -> Result<String, ExternalError>;
}

pub struct SttResult {
    pub text: String,
    pub no_speech_probability: f32,
    pub average_logprob: f32,
}

/// STT contract. The core discards text whose
/// `no_speech_probability > 0.6` (low-confidence transcription).
pub const NO_SPEECH_DISCARD_THRESHOLD: f32 = 0.6;

#[async_trait]
pub trait Stt: Send + Sync {
    async fn transcribe(&self, pcm16: &[i16], sample_rate: u32) -> Result<SttResult, ExternalError>;
}

pub fn accept_transcript(result: &SttResult) -> bool {
    result.no_speech_probability <= NO_SPEECH_DISCARD_THRESHOLD
}

/// TTS contract: returns PCM at a provider-native rate; the
/// Channel adapts to transport.
#[async_trait]
pub trait Tts: Send + Sync {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<TtsAudio, ExternalError>;
}

pub struct TtsAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarSlot {
    pub start: chrono::DateTime<chrono::Utc>,
    pub end: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub calendar_id: String,
    pub start: chrono::DateTime<chrono::Utc>,
    pub end: chrono::DateTime<chrono::Utc>,
    pub summary: String,
    pub attendee_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEventHandle {
    pub event_id: String,
}

#[async_trait]
pub trait Calendar: Send + Sync {
    async fn list_available_slots(
        &self,
        calendar_id: &str,
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
        min_duration_minutes: i64,
    ) -> Result<Vec<CalendarSlot>, ExternalError>;

    async fn create_event(&self, event: CalendarEvent) -> Result<CalendarEventHandle, ExternalError>;

    async fn cancel_event(&self, calendar_id: &str, event_id: &str) -> Result<(), ExternalError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait Search: Send + Sync {
    async fn query(&self, text: &str, top_k: u32) -> Result<Vec<SearchResult>, ExternalError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// NAT traversal credential contract: an empty Vec means "fall
/// back to a statically configured set".
#[async_trait]
pub trait IceCredentials: Send + Sync {
    async fn fetch(&self) -> Vec<IceServer>;
}
