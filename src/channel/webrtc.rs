//! Peer-connection (WebRTC) adapter.
//!
//! The signaling socket (`hello` / `webrtc_offer` / `hangup` / `ping`) is
//! handled by the admin/signaling layer; this module models the media-path
//! half as explicit `drain_mic_frames`, `enqueue_playback`, `stop_speaking`,
//! `connection_state` methods instead of
//! reaching into a peer connection's private fields. Mic capture and TTS
//! playback delivery are modeled here as bounded in-process queues fed by
//! whatever WebRTC media engine is wired in at the call boundary (out of
//! scope — concrete RTP handling is an external collaborator).

use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::mpsc;

use crate::audio::constants::CANONICAL_SAMPLE_RATE;
use crate::audio::resample;

use super::{AudioFrame, CallerInfo, ChannelError, ConnectionState, Channel};

/// Fed by the external WebRTC media engine as 48kHz frames arrive; drained
/// by the turn controller via `drain_mic_frames`.
pub struct WebRtcChannel {
    mic_rx: mpsc::UnboundedReceiver<AudioFrame>,
    playback_tx: mpsc::UnboundedSender<AudioFrame>,
    pending_mic: VecDeque<AudioFrame>,
    state: ConnectionState,
    call_id: Option<String>,
    session_id: Option<String>,
    stop_requested: bool,
}

/// The other half of the channel: handed to whatever drives the actual RTP
/// media engine, which pushes captured mic frames in and drains playback
/// frames out.
pub struct WebRtcMediaHandle {
    pub mic_tx: mpsc::UnboundedSender<AudioFrame>,
    pub playback_rx: mpsc::UnboundedReceiver<AudioFrame>,
}

impl WebRtcChannel {
    pub fn new(call_id: Option<String>, session_id: Option<String>) -> (Self, WebRtcMediaHandle) {
        let (mic_tx, mic_rx) = mpsc::unbounded_channel();
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let channel = Self {
            mic_rx,
            playback_tx,
            pending_mic: VecDeque::new(),
            state: ConnectionState::Connected,
            call_id,
            session_id,
            stop_requested: false,
        };
        (channel, WebRtcMediaHandle { mic_tx, playback_rx })
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    fn drain_incoming(&mut self) {
        while let Ok(frame) = self.mic_rx.try_recv() {
            self.pending_mic.push_back(frame);
        }
    }
}

#[async_trait]
impl Channel for WebRtcChannel {
    async fn receive_frame(&mut self) -> Result<Option<AudioFrame>, ChannelError> {
        if let Some(frame) = self.pending_mic.pop_front() {
            let downsampled = resample::downsample_stride(&frame.samples, 3);
            return Ok(Some(AudioFrame::new(downsampled, CANONICAL_SAMPLE_RATE)));
        }
        match self.mic_rx.recv().await {
            Some(frame) => {
                let downsampled = resample::downsample_stride(&frame.samples, 3);
                Ok(Some(AudioFrame::new(downsampled, CANONICAL_SAMPLE_RATE)))
            }
            None => Ok(None),
        }
    }

    async fn send_audio(&mut self, frames: &[AudioFrame]) -> Result<(), ChannelError> {
        for frame in frames {
            let upsampled = resample::upsample_linear(&frame.samples, 3);
            if self
                .playback_tx
                .send(AudioFrame::new(upsampled, 48_000))
                .is_err()
            {
                // Write error: log once, drop remaining frames, do not
                // abort the call. The media handle's receiver was
                // dropped, meaning the RTP sink is gone; nothing further to
                // send this turn.
                return Ok(());
            }
        }
        Ok(())
    }

    fn drain_mic_frames(&mut self) -> Vec<AudioFrame> {
        self.drain_incoming();
        self.pending_mic.drain(..).collect()
    }

    fn enqueue_playback(&mut self, pcm: AudioFrame) {
        let _ = self.playback_tx.send(pcm);
    }

    fn stop_speaking(&mut self) {
        self.stop_requested = true;
        // The media engine on the other side of playback_rx is expected to
        // drop buffered frames when it observes a stop; there is no queue
        // to clear on this side since frames are pushed, not pulled.
    }

    fn connection_state(&self) -> ConnectionState {
        self.state
    }

    fn caller_info(&self) -> CallerInfo {
        CallerInfo {
            phone_number: None,
            call_id: self.call_id.clone(),
            stream_id: None,
            session_id: self.session_id.clone(),
            user_agent: None,
            transport: "webrtc",
        }
    }

    async fn close(&mut self) {
        self.state = ConnectionState::Closed;
        self.mic_rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_mic_frames_consumes_buffered_and_pending() {
        let (mut chan, handle) = WebRtcChannel::new(Some("c1".into()), None);
        handle.mic_tx.send(AudioFrame::new(vec![0i16; 48], 48_000)).unwrap();
        handle.mic_tx.send(AudioFrame::new(vec![1i16; 48], 48_000)).unwrap();
        drop(handle.mic_tx);
        // give the channel a beat to register both sends
        tokio::task::yield_now().await;
        let drained = chan.drain_mic_frames();
        assert_eq!(drained.len(), 2);
    }

    #[tokio::test]
    async fn send_audio_upsamples_by_three() {
        let (mut chan, mut handle) = WebRtcChannel::new(None, None);
        chan.send_audio(&[AudioFrame::new(vec![0i16; 16], 16_000)]).await.unwrap();
        let frame = handle.playback_rx.recv().await.unwrap();
        assert_eq!(frame.samples.len(), 48);
        assert_eq!(frame.sample_rate, 48_000);
    }

    #[test]
    fn caller_info_reports_webrtc_transport() {
        let (chan, _handle) = WebRtcChannel::new(Some("c1".into()), Some("s1".into()));
        let info = chan.caller_info();
        assert_eq!(info.transport, "webrtc");
        assert_eq!(info.call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn connection_state_defaults_connected() {
        let (chan, _handle) = WebRtcChannel::new(None, None);
        assert_eq!(chan.connection_state(), ConnectionState::Connected);
    }
}
