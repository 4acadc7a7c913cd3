//! Telephony media-stream adapter.
//!
//! Inbound JSON events over a WebSocket: `connected`, `start{stream_id,
//! call_id, from}`, `media{payload_base64}`, `stop`. Outbound: `media`
//! wrapping base64 mu-law payloads tagged with the stream id. Audio on the
//! wire is 8kHz mu-law; this adapter converts to/from canonical 16kHz int16
//! at the edge so the rest of the system never sees mu-law.

use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::warn;

use crate::audio::constants::CANONICAL_SAMPLE_RATE;
use crate::audio::{mulaw, resample};

use super::{AudioFrame, CallerInfo, ChannelError, ConnectionState, Channel};

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum InboundEvent {
    Connected,
    Start { start: StartPayload },
    Media { media: MediaPayload },
    Stop,
}

#[derive(Debug, Deserialize)]
struct StartPayload {
    #[serde(rename = "streamSid")]
    stream_sid: String,
    #[serde(rename = "callSid")]
    call_sid: Option<String>,
    #[serde(default)]
    from: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaPayload {
    payload: String,
}

#[derive(Debug, Serialize)]
struct OutboundMedia<'a> {
    event: &'a str,
    #[serde(rename = "streamSid")]
    stream_sid: &'a str,
    media: OutboundMediaPayload,
}

#[derive(Debug, Serialize)]
struct OutboundMediaPayload {
    payload: String,
}

pub struct TelephonyChannel {
    ws: WebSocketStream<TcpStream>,
    stream_id: Option<String>,
    call_id: Option<String>,
    phone_number: Option<String>,
    closed: bool,
}

impl TelephonyChannel {
    /// Blocks until the handshake (`connected` + `start`) has been received,
    /// telephony initialization contract.
    pub async fn accept(mut ws: WebSocketStream<TcpStream>) -> Result<Self, ChannelError> {
        let mut stream_id = None;
        let mut call_id = None;
        let mut phone_number = None;
        let mut saw_connected = false;

        loop {
            let msg = ws
                .next()
                .await
                .ok_or_else(|| ChannelError::Handshake("transport closed during handshake".into()))?
                .map_err(|e| ChannelError::Handshake(e.to_string()))?;

            let Message::Text(text) = msg else { continue };
            let event: InboundEvent = match serde_json::from_str(&text) {
                Ok(e) => e,
                Err(_) => continue,
            };

            match event {
                InboundEvent::Connected => saw_connected = true,
                InboundEvent::Start { start } => {
                    stream_id = Some(start.stream_sid);
                    call_id = start.call_sid;
                    phone_number = start.from;
                    break;
                }
                InboundEvent::Media { .. } | InboundEvent::Stop => continue,
            }
        }

        if !saw_connected {
            warn!("telephony stream started without a preceding `connected` event");
        }

        Ok(Self {
            ws,
            stream_id,
            call_id,
            phone_number,
            closed: false,
        })
    }
}

#[async_trait]
impl Channel for TelephonyChannel {
    async fn receive_frame(&mut self) -> Result<Option<AudioFrame>, ChannelError> {
        loop {
            let Some(msg) = self.ws.next().await else {
                return Ok(None);
            };
            let msg = msg.map_err(|e| ChannelError::Read(e.to_string()))?;
            let Message::Text(text) = msg else {
                continue;
            };

            let event: InboundEvent = match serde_json::from_str(&text) {
                Ok(e) => e,
                Err(_) => continue,
            };

            match event {
                InboundEvent::Media { media } => {
                    let mulaw_bytes = base64::engine::general_purpose::STANDARD
                        .decode(media.payload)
                        .map_err(|e| ChannelError::Read(format!("bad base64 payload: {e}")))?;
                    let linear_8k = mulaw::decode(&mulaw_bytes);
                    let linear_16k = resample::upsample_linear(&linear_8k, 2);
                    return Ok(Some(AudioFrame::new(linear_16k, CANONICAL_SAMPLE_RATE)));
                }
                InboundEvent::Stop => return Ok(None),
                InboundEvent::Connected | InboundEvent::Start { .. } => continue,
            }
        }
    }

    async fn send_audio(&mut self, frames: &[AudioFrame]) -> Result<(), ChannelError> {
        let Some(stream_id) = self.stream_id.clone() else {
            return Err(ChannelError::Write("no stream id established".into()));
        };
        for frame in frames {
            let downsampled = resample::downsample_stride(&frame.samples, 2);
            let mulaw_bytes = mulaw::encode(&downsampled);
            let payload = base64::engine::general_purpose::STANDARD.encode(mulaw_bytes);
            let outbound = OutboundMedia {
                event: "media",
                stream_sid: &stream_id,
                media: OutboundMediaPayload { payload },
            };
            let text = serde_json::to_string(&outbound)
                .expect("OutboundMedia serializes infallibly");
            if let Err(e) = self.ws.send(Message::Text(text)).await {
                // Write error: log once, drop remaining frames for this
                // turn, do not abort the call.
                warn!("telephony write failed, dropping remaining frames this turn: {e}");
                return Ok(());
            }
        }
        Ok(())
    }

    fn drain_mic_frames(&mut self) -> Vec<AudioFrame> {
        // Telephony adapter is pull-based (receive_frame is awaited directly
        // by the turn controller); nothing buffered to drain.
        Vec::new()
    }

    fn enqueue_playback(&mut self, _pcm: AudioFrame) {
        // Playback goes out synchronously through send_audio; this adapter
        // has no separate playback queue to enqueue into.
    }

    fn stop_speaking(&mut self) {
        // Outbound frames are sent synchronously per call to send_audio, so
        // there is no in-flight playback buffer to cancel here; the turn
        // controller simply stops calling send_audio.
    }

    fn connection_state(&self) -> ConnectionState {
        if self.closed {
            ConnectionState::Closed
        } else {
            ConnectionState::Unknown
        }
    }

    fn caller_info(&self) -> CallerInfo {
        CallerInfo {
            phone_number: self.phone_number.clone(),
            call_id: self.call_id.clone(),
            stream_id: self.stream_id.clone(),
            session_id: None,
            user_agent: None,
            transport: "telephony",
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.ws.close(None).await;
    }
}
