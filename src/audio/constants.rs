//! Audio constants — single source of truth.
//!
//! All audio-related constants MUST be imported from here; do not hardcode
//! sample rates, frame widths, or buffer sizes elsewhere.

/// Canonical sample rate the turn loop, VAD, and Session operate on (Hz).
pub const CANONICAL_SAMPLE_RATE: u32 = 16_000;

/// One frame is 20ms of canonical-rate audio: 320 int16 samples.
pub const FRAME_SAMPLES: usize = 320;

/// Frame duration in milliseconds, matching FRAME_SAMPLES at CANONICAL_SAMPLE_RATE.
pub const FRAME_DURATION_MS: u64 = 20;

/// Telephony media-stream sample rate (8kHz mulaw).
pub const TELEPHONY_SAMPLE_RATE: u32 = 8_000;

/// Peer-connection sample rate (48kHz int16).
pub const WEBRTC_SAMPLE_RATE: u32 = 48_000;

/// Bytes per sample (16-bit PCM).
pub const BYTES_PER_SAMPLE: usize = 2;

/// Hard upper bound on accumulated speech before forced endpointing.
pub const MAX_UTTERANCE_SECONDS: u32 = 30;

/// Minimum accumulated speech before an endpoint is honoured (~0.1s).
pub const MIN_UTTERANCE_SAMPLES: usize = CANONICAL_SAMPLE_RATE as usize / 10;

/// Dead-transport timeout: no frames received for this long ends the call.
pub const DEAD_TRANSPORT_TIMEOUT_SECS: u64 = 10;

/// Barge-in poll interval during playback.
pub const BARGE_IN_POLL_MS: u64 = 100;
