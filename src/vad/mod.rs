//! Voice Activity Detector.
//!
//! A pure per-frame operation over RMS energy plus a small amount of state.
//! Listening mode (endpointing) and playback mode (barge-in) share this same
//! state machine; they differ only in threshold, confirm-frame count, and
//! whether a recent-frames window is used.

use thiserror::Error;

use crate::audio::constants::{FRAME_SAMPLES, MAX_UTTERANCE_SECONDS, MIN_UTTERANCE_SAMPLES};
use crate::audio::rms;

#[derive(Debug, Error)]
pub enum VadError {
    #[error("frame has wrong sample count: expected {expected}, got {actual}")]
    WrongFrameSize { expected: usize, actual: usize },
}

/// Tunable thresholds for one VAD mode. Runtime settings mutate
/// these live; the turn controller reads them on every poll.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    pub energy_threshold: f64,
    pub speech_confirm_frames: u32,
    pub silence_gap_frames: u32,
}

impl VadConfig {
    /// Listening-mode defaults for 16kHz canonical audio.
    pub const LISTENING_16K: VadConfig = VadConfig {
        energy_threshold: 300.0,
        speech_confirm_frames: 1,
        silence_gap_frames: 8,
    };

    /// Listening-mode defaults tuned for mulaw-derived telephony audio.
    pub const LISTENING_MULAW: VadConfig = VadConfig {
        energy_threshold: 500.0,
        speech_confirm_frames: 1,
        silence_gap_frames: 8,
    };

    /// Playback-mode (barge-in) defaults — higher threshold, more confirms.
    pub const PLAYBACK: VadConfig = VadConfig {
        energy_threshold: 900.0,
        speech_confirm_frames: 3,
        silence_gap_frames: 0, // unused in playback mode
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Quiet,
    Speaking,
    Endpoint,
}

/// Listening-mode VAD: drives the quiet → speaking → endpoint state machine
/// for one turn's worth of accumulated audio.
pub struct Vad {
    config: VadConfig,
    state: TurnState,
    consecutive_speech: u32,
    consecutive_silence: u32,
    accumulated_samples: usize,
}

impl Vad {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            state: TurnState::Quiet,
            consecutive_speech: 0,
            consecutive_silence: 0,
            accumulated_samples: 0,
        }
    }

    pub fn set_config(&mut self, config: VadConfig) {
        self.config = config;
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Feed one frame; returns the resulting turn state. Call sites drain
    /// the frame buffer and request transcription when this returns
    /// `TurnState::Endpoint`, then call `reset`.
    pub fn push_frame(&mut self, samples: &[i16]) -> TurnState {
        let energy = rms(samples);
        let is_speech = energy >= self.config.energy_threshold;

        if self.state != TurnState::Endpoint {
            self.accumulated_samples += samples.len();
        }

        if is_speech {
            self.consecutive_speech += 1;
            self.consecutive_silence = 0;
        } else {
            self.consecutive_silence += 1;
            self.consecutive_speech = 0;
        }

        match self.state {
            TurnState::Quiet => {
                if self.consecutive_speech >= self.config.speech_confirm_frames {
                    self.state = TurnState::Speaking;
                }
            }
            TurnState::Speaking => {
                let enough_speech = self.accumulated_samples >= MIN_UTTERANCE_SAMPLES;
                if enough_speech && self.consecutive_silence >= self.config.silence_gap_frames {
                    self.state = TurnState::Endpoint;
                } else if self.hit_hard_cap() {
                    self.state = TurnState::Endpoint;
                }
            }
            TurnState::Endpoint => {}
        }

        self.state
    }

    fn hit_hard_cap(&self) -> bool {
        let cap_samples = MAX_UTTERANCE_SECONDS as usize * (1000 / crate::audio::constants::FRAME_DURATION_MS as usize) * FRAME_SAMPLES;
        self.accumulated_samples >= cap_samples
    }

    /// Reset all counters for the next turn, optionally seeding the state as
    /// already "speaking" (used when barge-in preserves triggering frames —
    /// : `has_speech = true`).
    pub fn reset(&mut self, start_speaking: bool) {
        self.state = if start_speaking { TurnState::Speaking } else { TurnState::Quiet };
        self.consecutive_speech = 0;
        self.consecutive_silence = 0;
        self.accumulated_samples = 0;
    }
}

/// Windowed barge-in detector for use during playback. Tracks
/// the max RMS over the last `window_size` frames to avoid single
/// frame-boundary false negatives, and a confirm-count that resets whenever
/// the windowed max drops back below threshold.
pub struct BargeInDetector {
    config: VadConfig,
    window: std::collections::VecDeque<f64>,
    window_size: usize,
    confirm_count: u32,
}

impl BargeInDetector {
    pub fn new(config: VadConfig, window_size: usize) -> Self {
        Self {
            config,
            window: std::collections::VecDeque::with_capacity(window_size),
            window_size,
            confirm_count: 0,
        }
    }

    pub fn set_config(&mut self, config: VadConfig) {
        self.config = config;
    }

    /// Feed one frame's energy; returns `true` once confirm_frames
    /// consecutive windowed-max detections have occurred.
    pub fn push_frame(&mut self, samples: &[i16]) -> bool {
        let energy = rms(samples);
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(energy);

        let windowed_max = self.window.iter().cloned().fold(0.0f64, f64::max);
        if windowed_max >= self.config.energy_threshold {
            self.confirm_count += 1;
        } else {
            self.confirm_count = 0;
        }

        self.confirm_count >= self.config.speech_confirm_frames
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.confirm_count = 0;
    }
}

pub fn validate_frame(samples: &[i16]) -> Result<(), VadError> {
    if samples.len() != FRAME_SAMPLES {
        return Err(VadError::WrongFrameSize {
            expected: FRAME_SAMPLES,
            actual: samples.len(),
        });
    }
    Ok(())
}
