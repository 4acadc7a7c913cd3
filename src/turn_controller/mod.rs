//! Turn Controller: orchestrates one complete call.
//!
//! Owns the Channel ↔ VAD ↔ Session loop for a single call: plays the
//! greeting, then alternates between listening for an endpointed utterance
//! and speaking the Session's reply, watching for barge-in throughout
//! playback. One controller runs per call, on its own task — this matches
//! the cooperative, single-threaded-per-call scheduling model the rest of
//! this crate assumes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::constants::{
    BARGE_IN_POLL_MS, CANONICAL_SAMPLE_RATE, DEAD_TRANSPORT_TIMEOUT_SECS,
};
use crate::channel::{AudioFrame, Channel};
use crate::external::{accept_transcript, Stt, Tts};
use crate::session::Session;
use crate::vad::{BargeInDetector, TurnState, Vad, VadConfig};

const BARGE_IN_WINDOW_FRAMES: usize = 5;

enum PlaybackOutcome {
    Finished,
    BargeIn,
}

/// Orchestrates one call end-to-end. Construct one per accepted connection
/// and call [`run`](Self::run) on a dedicated task.
pub struct TurnController {
    channel: Box<dyn Channel>,
    stt: Arc<dyn Stt>,
    tts: Arc<dyn Tts>,
    session: Arc<Session>,
    voice_id: String,
    cancel: Arc<AtomicBool>,
    pending_frames: Vec<AudioFrame>,
}

impl TurnController {
    pub fn new(
        channel: Box<dyn Channel>,
        stt: Arc<dyn Stt>,
        tts: Arc<dyn Tts>,
        session: Arc<Session>,
        voice_id: impl Into<String>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            channel,
            stt,
            tts,
            session,
            voice_id: voice_id.into(),
            cancel,
            pending_frames: Vec::new(),
        }
    }

    /// Runs the call to completion: greeting, turn loop, then a graceful
    /// close. Consumes `self` since a controller is single-use.
    pub async fn run(mut self) {
        let caller_info = self.channel.caller_info();
        self.session.start(&caller_info).await;

        let greeting = self.session.get_greeting().await;
        let mut buffer: Vec<i16> = Vec::new();
        let mut vad = Vad::new(VadConfig::LISTENING_16K);

        if matches!(self.speak(&greeting).await, PlaybackOutcome::BargeIn) {
            vad.reset(true);
            self.drain_pending_into(&mut buffer);
        }

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                tracing::info!(session_id = %self.session.session_id(), "turn controller cancelled");
                break;
            }
            if self.session.is_done().await {
                break;
            }

            let frame = match tokio::time::timeout(
                Duration::from_secs(DEAD_TRANSPORT_TIMEOUT_SECS),
                self.channel.receive_frame(),
            )
            .await
            {
                Ok(Ok(Some(frame))) => frame,
                Ok(Ok(None)) => {
                    tracing::info!(session_id = %self.session.session_id(), "transport closed cleanly");
                    break;
                }
                Ok(Err(e)) => {
                    tracing::warn!(session_id = %self.session.session_id(), error = %e, "frame read error");
                    break;
                }
                Err(_) => {
                    tracing::warn!(session_id = %self.session.session_id(), "dead transport timeout");
                    break;
                }
            };

            let state = vad.push_frame(&frame.samples);
            buffer.extend_from_slice(&frame.samples);

            if state != TurnState::Endpoint {
                continue;
            }

            let utterance_samples = std::mem::take(&mut buffer);
            vad.reset(false);

            let transcript = match self.stt.transcribe(&utterance_samples, CANONICAL_SAMPLE_RATE).await {
                Ok(result) if accept_transcript(&result) => result.text,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(session_id = %self.session.session_id(), error = %e, "transcription failed");
                    continue;
                }
            };

            let reply = self.session.handle_utterance(&transcript).await;

            if self.session.is_done().await {
                let _ = self.speak(&reply).await;
                break;
            }

            if matches!(self.speak(&reply).await, PlaybackOutcome::BargeIn) {
                vad.reset(true);
                self.drain_pending_into(&mut buffer);
            }
        }

        self.channel.close().await;
    }

    fn drain_pending_into(&mut self, buffer: &mut Vec<i16>) {
        for frame in self.pending_frames.drain(..) {
            buffer.extend_from_slice(&frame.samples);
        }
    }

    /// Synthesizes and plays `text`, polling for barge-in every
    /// [`BARGE_IN_POLL_MS`] until the estimated playback duration elapses or
    /// speech is confirmed.
    async fn speak(&mut self, text: &str) -> PlaybackOutcome {
        let audio = match self.tts.synthesize(text, &self.voice_id).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(session_id = %self.session.session_id(), error = %e, "tts synthesis failed");
                return PlaybackOutcome::Finished;
            }
        };

        if audio.samples.is_empty() || audio.sample_rate == 0 {
            return PlaybackOutcome::Finished;
        }

        let chunk_samples = (audio.sample_rate as usize * 20) / 1000;
        for chunk in audio.samples.chunks(chunk_samples.max(1)) {
            self.channel.enqueue_playback(AudioFrame::new(chunk.to_vec(), audio.sample_rate));
        }

        let total_ms = (audio.samples.len() as u64 * 1000) / audio.sample_rate as u64;
        let polls = (total_ms / BARGE_IN_POLL_MS).max(1);
        let mut detector = BargeInDetector::new(VadConfig::PLAYBACK, BARGE_IN_WINDOW_FRAMES);

        for _ in 0..polls {
            tokio::time::sleep(Duration::from_millis(BARGE_IN_POLL_MS)).await;
            let drained = self.channel.drain_mic_frames();
            let mut confirmed = false;
            for frame in &drained {
                if detector.push_frame(&frame.samples) {
                    confirmed = true;
                }
            }
            self.pending_frames.extend(drained);
            if confirmed {
                self.channel.stop_speaking();
                return PlaybackOutcome::BargeIn;
            }
        }

        PlaybackOutcome::Finished
    }
}
