//! Transport-agnostic Audio Channel.
//!
//! Concrete adapters (telephony, WebRTC) perform codec and sample-rate
//! conversion at the edge; everything above this trait works exclusively in
//! 16kHz mono int16 frames.

pub mod telephony;
pub mod webrtc;

use async_trait::async_trait;
use thiserror::Error;

/// One chunk of canonical-rate int16 mono audio. Immutable once created.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }
}

/// Identifying information a Channel can surface about its caller.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CallerInfo {
    pub phone_number: Option<String>,
    pub call_id: Option<String>,
    pub stream_id: Option<String>,
    pub session_id: Option<String>,
    pub user_agent: Option<String>,
    pub transport: &'static str,
}

/// Connection liveness as reported by the underlying transport. An adapter
/// that cannot determine state reports `Unknown`, and callers must treat
/// `Unknown` as alive rather than tearing the call down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Closed,
    Failed,
    Unknown,
}

impl ConnectionState {
    pub fn is_dead(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("transport read error: {0}")]
    Read(String),
    #[error("transport write error: {0}")]
    Write(String),
    #[error("channel already closed")]
    Closed,
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// Duplex carrier of canonical 16kHz mono int16 frames, transport-agnostic
///. Implementations own all codec/rate adaptation.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Receive the next inbound frame, already converted to canonical rate.
    /// Returns `Ok(None)` when the transport has closed cleanly.
    async fn receive_frame(&mut self) -> Result<Option<AudioFrame>, ChannelError>;

    /// Enqueue canonical-rate frames for outbound playback. Converts to the
    /// transport's native rate/codec before sending.
    async fn send_audio(&mut self, frames: &[AudioFrame]) -> Result<(), ChannelError>;

    /// Drain and clear mic frames accumulated by an underlying push-based
    /// transport since the last drain (replaces reaching directly into
    /// adapter-private buffers).
    fn drain_mic_frames(&mut self) -> Vec<AudioFrame>;

    /// Enqueue PCM for playback without waiting for completion.
    fn enqueue_playback(&mut self, pcm: AudioFrame);

    /// Stop any in-flight playback immediately (barge-in).
    fn stop_speaking(&mut self);

    /// Current liveness of the underlying transport.
    fn connection_state(&self) -> ConnectionState;

    fn caller_info(&self) -> CallerInfo;

    /// Idempotent; releases transport resources.
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_ms_at_canonical_rate() {
        let frame = AudioFrame::new(vec![0i16; 320], 16_000);
        assert_eq!(frame.duration_ms(), 20);
    }

    #[test]
    fn duration_ms_zero_rate_is_zero() {
        let frame = AudioFrame::new(vec![0i16; 10], 0);
        assert_eq!(frame.duration_ms(), 0);
    }

    #[test]
    fn connection_state_unknown_is_not_dead() {
        assert!(!ConnectionState::Unknown.is_dead());
        assert!(ConnectionState::Closed.is_dead());
        assert!(ConnectionState::Failed.is_dead());
        assert!(!ConnectionState::Connected.is_dead());
    }
}
