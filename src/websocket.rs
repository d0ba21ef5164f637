//! # WebSocket Audio Ingest Handler
//!
//! Handles the persistent bidirectional connection a capture client holds
//! open against `/ws`. Clients stream base64-encoded PCM chunks inside JSON
//! envelopes; the handler decodes them, feeds the session accumulator, and
//! commits numbered artifact pairs whenever the flush threshold is reached.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: client connects; the server allocates an ingest session
//! 2. **Audio streaming**: text messages `{"type": "input_audio_buffer.append",
//!    "audio": "<base64 PCM>"}` accumulate into the session buffer
//! 3. **Keepalive**: the server sends `{"type": "ping"}` every configured
//!    interval for the lifetime of the connection
//! 4. **Errors**: a malformed message is answered with `{"type": "error", ...}`
//!    and the connection stays up; envelopes with unrecognized `type` values
//!    are accepted and ignored
//!
//! Messages on one connection are processed strictly in arrival order, and a
//! triggered flush completes before the next message is taken. A slow flush
//! therefore delays intake on that connection only.

use crate::audio::session::{IngestSession, SessionManager, SessionSettings};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Inbound message envelope.
///
/// The discriminator is the `type` field. Only the append message carries a
/// payload; every other `type` value lands in `Unrecognized` and is a no-op,
/// which keeps the protocol open for future message kinds.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum InboundEnvelope {
    /// One audio chunk, base64-encoded raw PCM
    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend {
        #[serde(with = "base64_serde")]
        audio: Vec<u8>,
    },

    /// Any other `type` value; accepted and ignored
    #[serde(other)]
    Unrecognized,
}

/// Outbound message envelope.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum OutboundEnvelope {
    /// Periodic liveness signal
    #[serde(rename = "ping")]
    Ping,

    /// Per-message rejection; the connection stays up
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

/// Base64 decoding for the `audio` field of append envelopes.
mod base64_serde {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded)
            .map_err(|e| serde::de::Error::custom(format!("Invalid base64: {}", e)))
    }
}

/// WebSocket actor for one ingest connection.
///
/// ## Actor Model:
/// Each connection is an independent actor; its mailbox serializes inbound
/// frames, which is what gives the per-connection arrival-order guarantee.
/// The keepalive interval registered in `started` is owned by the actor
/// context and cancelled with it, so no liveness traffic can outlive the
/// session.
pub struct IngestWebSocket {
    /// Ingest session backing this connection (set once in `started`)
    session: Option<Arc<IngestSession>>,

    /// Process-wide session registry
    session_manager: Arc<SessionManager>,

    /// Shared application state for metrics
    app_state: web::Data<AppState>,

    /// Settings snapshot for the session this connection creates
    settings: SessionSettings,

    /// Time between keepalive pings
    keepalive_interval: Duration,
}

impl IngestWebSocket {
    pub fn new(
        app_state: web::Data<AppState>,
        session_manager: Arc<SessionManager>,
        settings: SessionSettings,
        keepalive_interval: Duration,
    ) -> Self {
        Self {
            session: None,
            session_manager,
            app_state,
            settings,
            keepalive_interval,
        }
    }

    /// Handle one inbound text frame.
    ///
    /// Decode failures reject the single message and leave the connection up;
    /// the raw text of every successfully parsed message is recorded in the
    /// session's message log before it is acted on.
    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let envelope: InboundEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.app_state.increment_error_count();
                self.send_error(ctx, "decode_error", &format!("Invalid envelope: {}", err));
                return;
            }
        };

        let session = match &self.session {
            Some(session) => Arc::clone(session),
            None => return,
        };

        if let Err(err) = session.log_message(text) {
            error!(session_id = %session.session_id, error = %err, "Failed to record inbound message");
        }

        match envelope {
            InboundEnvelope::AudioAppend { audio } => {
                self.handle_audio_append(&session, audio, ctx);
            }
            InboundEnvelope::Unrecognized => {
                debug!(session_id = %session.session_id, "Ignoring unrecognized message type");
            }
        }
    }

    /// Route one decoded chunk through the session's accumulator.
    fn handle_audio_append(
        &mut self,
        session: &IngestSession,
        audio: Vec<u8>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        if let Err(err) = session.validate_chunk(&audio) {
            self.app_state.increment_error_count();
            self.send_error(ctx, "invalid_audio", &err);
            return;
        }

        let chunk_bytes = audio.len();

        // The flush, when triggered, runs to completion here; the next frame
        // is not taken off the mailbox until this returns.
        match session.ingest_chunk(audio) {
            Ok(Some(receipt)) => {
                self.app_state.record_chunk(chunk_bytes);
                self.app_state.record_flush(receipt.byte_len);
                debug!(
                    session_id = %session.session_id,
                    sequence = receipt.sequence,
                    pcm = %receipt.pcm_path.display(),
                    wav = %receipt.wav_path.display(),
                    "Committed flush artifacts"
                );
            }
            Ok(None) => {
                self.app_state.record_chunk(chunk_bytes);
                debug!(
                    session_id = %session.session_id,
                    pending = session.pending_chunks(),
                    "Buffered audio chunk"
                );
            }
            Err(err) => {
                self.app_state.record_flush_failure();
                error!(session_id = %session.session_id, error = %err, "Flush failed");
                self.send_error(ctx, "flush_error", &err);
            }
        }
    }

    /// Send an error envelope to the client.
    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        let envelope = OutboundEnvelope::Error {
            code: code.to_string(),
            message: message.to_string(),
        };

        if let Ok(json) = serde_json::to_string(&envelope) {
            ctx.text(json);
        }

        warn!(code = code, message = message, "Rejected WebSocket message");
    }
}

impl Actor for IngestWebSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Called when the WebSocket connection starts.
    fn started(&mut self, ctx: &mut Self::Context) {
        match self.session_manager.create_session(&self.settings) {
            Ok(session) => {
                if let Err(err) = session.activate() {
                    error!(session_id = %session.session_id, error = %err, "Session activation failed");
                    ctx.stop();
                    return;
                }

                info!(session_id = %session.session_id, "WebSocket session started");
                self.app_state.increment_active_sessions();
                self.session = Some(session);
            }
            Err(err) => {
                warn!(error = %err, "Refusing WebSocket connection");
                self.send_error(ctx, "session_unavailable", &err);
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Again,
                    description: Some(err),
                }));
                ctx.stop();
                return;
            }
        }

        // Keepalive loop, independent of receive-path activity. The interval
        // handle lives in the actor context, so stopping the actor cancels it.
        ctx.run_interval(self.keepalive_interval, |_act, ctx| {
            if let Ok(json) = serde_json::to_string(&OutboundEnvelope::Ping) {
                ctx.text(json);
            }
        });
    }

    /// Called when the WebSocket connection stops.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(session) = self.session.take() {
            session.close();
            self.session_manager.remove_session(&session.session_id);
            self.app_state.decrement_active_sessions();
            info!(session_id = %session.session_id, "WebSocket session closed");
        }
    }
}

/// Handle incoming WebSocket frames.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for IngestWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.handle_text(&text, ctx);
            }
            Ok(ws::Message::Binary(_)) => {
                // The ingest protocol is text-only; audio travels base64-encoded
                warn!("Ignoring binary frame");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                info!("WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Ignoring unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                // Broken transport is teardown, not an application error
                info!(error = %err, "WebSocket transport error, closing session");
                ctx.stop();
            }
        }
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Handles the initial HTTP request and upgrades it to a WebSocket connection;
/// the upgraded connection is driven by the `IngestWebSocket` actor.
pub async fn ingest_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
    session_manager: web::Data<SessionManager>,
) -> ActixResult<HttpResponse> {
    info!(
        "New WebSocket connection request from: {:?}",
        req.connection_info().peer_addr()
    );

    // Snapshot the config at upgrade time; runtime updates apply to
    // connections accepted after them
    let config = app_state.get_config();
    let websocket = IngestWebSocket::new(
        app_state.clone(),
        session_manager.into_inner(),
        config.to_session_settings(),
        Duration::from_secs(config.server.keepalive_interval_secs),
    );

    ws::start(websocket, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

    #[test]
    fn test_append_envelope_decodes_audio_payload() {
        let pcm: Vec<u8> = vec![0x01, 0x02, 0x03, 0x04];
        let json = format!(
            r#"{{"type": "input_audio_buffer.append", "audio": "{}"}}"#,
            BASE64.encode(&pcm)
        );

        match serde_json::from_str::<InboundEnvelope>(&json).unwrap() {
            InboundEnvelope::AudioAppend { audio } => assert_eq!(audio, pcm),
            other => panic!("Wrong envelope variant: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_accepted_and_ignored() {
        let json = r#"{"type": "session.update", "session": {"voice": "alloy"}}"#;
        match serde_json::from_str::<InboundEnvelope>(json).unwrap() {
            InboundEnvelope::Unrecognized => {}
            other => panic!("Wrong envelope variant: {:?}", other),
        }
    }

    #[test]
    fn test_missing_type_is_a_decode_error() {
        let json = r#"{"audio": "AAAA"}"#;
        assert!(serde_json::from_str::<InboundEnvelope>(json).is_err());
    }

    #[test]
    fn test_invalid_base64_is_a_decode_error() {
        let json = r#"{"type": "input_audio_buffer.append", "audio": "not base64!!"}"#;
        assert!(serde_json::from_str::<InboundEnvelope>(json).is_err());
    }

    #[test]
    fn test_ping_envelope_shape() {
        let json = serde_json::to_string(&OutboundEnvelope::Ping).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_error_envelope_shape() {
        let envelope = OutboundEnvelope::Error {
            code: "decode_error".to_string(),
            message: "Invalid envelope".to_string(),
        };

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains("decode_error"));
        assert!(json.contains("Invalid envelope"));
    }
}
