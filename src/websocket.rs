//! # WebSocket Packet Streaming Handler
//!
//! Streams packets into one existing decoder session over a WebSocket.
//! Clients connect to `/api/v1/ws/sessions/{id}` after creating the session over HTTP.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: refused with a structured 404 body if the session is unknown
//! 2. **Packets**: every binary frame is one compressed packet
//! 3. **PCM**: every decoded packet is answered with one binary frame of PCM
//! 4. **Failures**: a packet the codec rejects is answered with a `decode_error` JSON message
//! 5. **Control**: JSON text messages request stats, answer pings, or destroy the session
//!
//! Replies come back in packet order. The actor waits on each decode before it
//! reads the next frame, so packets from one socket never interleave.
//!
//! ## Message Format:
//! - **Client → Server**: binary packets, JSON `{"type": "stats" | "ping" | "destroy_session"}`
//! - **Server → Client**: binary PCM (16-bit LE), JSON status and error messages

use crate::audio::engine::PacketDecode;
use crate::audio::session::{SessionId, SessionStats};
use crate::error::DecodeError;
use crate::service::{BoundaryResult, DecoderService};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// JSON messages accepted from the client.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for the session's current counters
    Stats,
    /// Application-level ping; answered with `pong`
    Ping { timestamp: i64 },
    /// Reply to a server `ping`
    Pong { timestamp: i64 },
    /// Destroy the session and close the socket
    DestroySession,
}

/// JSON messages sent to the client.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        session_id: SessionId,
    },
    Stats {
        stats: serde_json::Value,
    },
    DecodeError {
        session_id: SessionId,
        /// Zero-based index of the binary frame on this connection
        packet_index: u64,
        error: String,
        message: String,
    },
    Ping {
        timestamp: i64,
    },
    Pong {
        timestamp: i64,
    },
    SessionDestroyed {
        session_id: SessionId,
    },
    Error {
        code: String,
        message: String,
    },
}

/// One WebSocket connection bound to one decoder session.
pub struct DecodeWebSocket {
    session_id: SessionId,
    decoder: Arc<DecoderService>,
    packets_received: u64,
    last_heartbeat: Instant,
}

impl DecodeWebSocket {
    pub fn new(session_id: SessionId, decoder: Arc<DecoderService>) -> Self {
        Self {
            session_id,
            decoder,
            packets_received: 0,
            last_heartbeat: Instant::now(),
        }
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, msg: &ServerMessage) {
        match serde_json::to_string(msg) {
            Ok(json) => ctx.text(json),
            Err(err) => error!("Failed to serialize WebSocket message: {}", err),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        self.send(
            ctx,
            &ServerMessage::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
        );
    }

    /// Decode one binary frame. `ctx.wait` holds back further frames until it resolves.
    fn handle_packet(&mut self, packet: Vec<u8>, ctx: &mut ws::WebsocketContext<Self>) {
        let packet_index = self.packets_received;
        self.packets_received += 1;

        let decoder = Arc::clone(&self.decoder);
        let session_id = self.session_id;
        let fut = async move { decoder.decode_packet_bytes(session_id, packet).await };

        ctx.wait(fut.into_actor(self).map(move |result: Result<PacketDecode, DecodeError>, act, ctx| {
            match result {
                Ok(decoded) => ctx.binary(decoded.pcm),
                Err(err) => {
                    debug!(session_id, packet_index, error = %err, "WebSocket packet failed");
                    act.send(
                        ctx,
                        &ServerMessage::DecodeError {
                            session_id,
                            packet_index,
                            error: err.kind().to_string(),
                            message: err.to_string(),
                        },
                    );
                    // Nothing more can be decoded once the session is gone
                    if matches!(err, DecodeError::SessionNotFound(_)) {
                        ctx.close(Some(ws::CloseCode::Normal.into()));
                        ctx.stop();
                    }
                }
            }
        }));
    }

    fn handle_stats(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let decoder = Arc::clone(&self.decoder);
        let session_id = self.session_id;
        let fut = async move { decoder.registry().stats(session_id).await };

        ctx.wait(fut.into_actor(self).map(|result: Result<SessionStats, DecodeError>, act, ctx| {
            match result.map(|stats| serde_json::to_value(stats)) {
                Ok(Ok(stats)) => act.send(ctx, &ServerMessage::Stats { stats }),
                Ok(Err(err)) => act.send_error(ctx, "serialization_error", &err.to_string()),
                Err(err) => act.send_error(ctx, err.kind(), &err.to_string()),
            }
        }));
    }

    fn handle_destroy(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let decoder = Arc::clone(&self.decoder);
        let session_id = self.session_id;
        let fut = async move { decoder.destroy_session(session_id).await };

        ctx.wait(fut.into_actor(self).map(move |result, act, ctx| {
            if result.success {
                act.send(ctx, &ServerMessage::SessionDestroyed { session_id });
            } else {
                act.send_error(ctx, result.error.unwrap_or("Unknown"), result.message.as_deref().unwrap_or(""));
            }
            ctx.close(Some(ws::CloseCode::Normal.into()));
            ctx.stop();
        }));
    }
}

impl Actor for DecodeWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = self.session_id, "WebSocket connection started");
        self.send(ctx, &ServerMessage::Connected { session_id: self.session_id });

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(session_id = act.session_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                act.send(
                    ctx,
                    &ServerMessage::Ping {
                        timestamp: chrono::Utc::now().timestamp_millis(),
                    },
                );
            }
        });
    }

    /// The session outlives the socket; it is destroyed only on request.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(
            session_id = self.session_id,
            packets = self.packets_received,
            "WebSocket connection stopped"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for DecodeWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.handle_packet(data.to_vec(), ctx);
            }
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Stats) => self.handle_stats(ctx),
                    Ok(ClientMessage::Ping { timestamp }) => {
                        self.send(ctx, &ServerMessage::Pong { timestamp });
                    }
                    Ok(ClientMessage::Pong { .. }) => {}
                    Ok(ClientMessage::DestroySession) => self.handle_destroy(ctx),
                    Err(err) => {
                        self.send_error(ctx, "invalid_json", &format!("Invalid JSON: {}", err));
                    }
                }
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                self.send_error(ctx, "unsupported_frame", "Fragmented messages are not supported");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// Upgrade to a WebSocket bound to an existing session.
pub async fn decode_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    path: web::Path<SessionId>,
) -> Result<HttpResponse, actix_web::Error> {
    let session_id = path.into_inner();
    if let Err(err) = state.decoder.registry().get(session_id) {
        let result = BoundaryResult::<serde_json::Value>::fail(err);
        return Ok(HttpResponse::build(result.status_code()).json(result));
    }

    info!(session_id, "Upgrading to WebSocket");
    ws::start(DecodeWebSocket::new(session_id, Arc::clone(&state.decoder)), &req, stream)
}
