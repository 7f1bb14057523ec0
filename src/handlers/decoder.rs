//! HTTP routes for the decoder boundary operations.
//!
//! Each route deserializes a camelCase body, calls the matching
//! [`DecoderService`](crate::service::DecoderService) operation, and answers
//! with its [`BoundaryResult`]. The HTTP status mirrors the error kind, but the
//! body always carries `success` and, on failure, `error`.

use actix_web::{dev, error::InternalError, web, FromRequest, HttpRequest, HttpResponse};
use futures_util::future::LocalBoxFuture;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::ops::Deref;
use tokio_util::sync::CancellationToken;

use crate::audio::session::SessionId;
use crate::config::AppConfig;
use crate::error::DecodeError;
use crate::service::BoundaryResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub sample_rate: f64,
    pub channels: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodePacketRequest {
    pub packet_base64: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeFileRequest {
    pub filepath: String,
    pub chunk_size: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeBufferRequest {
    pub data_base64: String,
    pub chunk_size: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteWavRequest {
    pub decoded_data_base64: String,
    pub output_path: String,
    pub sample_rate: f64,
    pub channels: f64,
}

/// Register the decoder routes. Mounted under `/api/v1` by `main`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/sessions", web::post().to(create_session))
        .route("/sessions", web::get().to(list_sessions))
        .route("/sessions/{id}", web::get().to(session_stats))
        .route("/sessions/{id}", web::delete().to(destroy_session))
        .route("/sessions/{id}/packets", web::post().to(decode_packet))
        .route("/sessions/{id}/decode-file", web::post().to(decode_file))
        .route("/sessions/{id}/decode-buffer", web::post().to(decode_buffer))
        .route("/wav", web::post().to(write_wav));
}

/// Slack on top of the base64-inflated payload for the rest of the JSON body.
const BODY_OVERHEAD: usize = 4096;

/// Largest JSON body accepted for a decoded payload limit of `max_payload_bytes`.
///
/// Base64 inflates payloads by a third.
pub fn body_limit(max_payload_bytes: usize) -> usize {
    max_payload_bytes.saturating_mul(4) / 3 + BODY_OVERHEAD
}

/// JSON body extractor for boundary routes.
///
/// Unlike `web::Json`, the size limit is read from the live decoder policy on
/// every request, so `PUT /api/v1/config` changes it without a restart.
/// Oversized or malformed bodies are answered with a structured `InvalidArgument`.
#[derive(Debug)]
pub struct BoundaryJson<T>(pub T);

impl<T> Deref for BoundaryJson<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: DeserializeOwned + 'static> FromRequest for BoundaryJson<T> {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut dev::Payload) -> Self::Future {
        let limit = req
            .app_data::<web::Data<AppState>>()
            .map(|state| body_limit(state.decoder.policy().max_payload_bytes))
            .unwrap_or_else(|| body_limit(AppConfig::default().decoder.max_payload_bytes));
        let mut payload = Box::pin(payload.take());

        Box::pin(async move {
            let mut body = web::BytesMut::new();
            while let Some(chunk) = payload.next().await {
                let chunk = chunk.map_err(|e| rejected(DecodeError::invalid(e.to_string())))?;
                if body.len() + chunk.len() > limit {
                    return Err(rejected(DecodeError::invalid(format!(
                        "request body exceeds {} bytes",
                        limit
                    ))));
                }
                body.extend_from_slice(&chunk);
            }
            serde_json::from_slice(&body)
                .map(BoundaryJson)
                .map_err(|e| rejected(DecodeError::invalid(format!("Json deserialize error: {}", e))))
        })
    }
}

fn rejected(err: DecodeError) -> actix_web::Error {
    let cause = err.to_string();
    let body = BoundaryResult::<serde_json::Value>::fail(err);
    let response = HttpResponse::build(body.status_code()).json(body);
    InternalError::from_response(cause, response).into()
}

fn respond<T: Serialize>(result: BoundaryResult<T>) -> HttpResponse {
    HttpResponse::build(result.status_code()).json(result)
}

/// Cancelled when the request future is dropped, i.e. the client went away.
fn request_cancellation() -> (CancellationToken, tokio_util::sync::DropGuard) {
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    (token, guard)
}

pub async fn create_session(state: web::Data<AppState>, body: BoundaryJson<CreateSessionRequest>) -> HttpResponse {
    respond(state.decoder.create_session(body.sample_rate, body.channels))
}

pub async fn list_sessions(state: web::Data<AppState>) -> HttpResponse {
    let sessions = state.decoder.list_sessions().await;
    HttpResponse::Ok().json(json!({
        "success": true,
        "count": sessions.len(),
        "sessions": sessions
    }))
}

pub async fn session_stats(state: web::Data<AppState>, path: web::Path<SessionId>) -> HttpResponse {
    respond(state.decoder.session_stats(path.into_inner()).await)
}

pub async fn destroy_session(state: web::Data<AppState>, path: web::Path<SessionId>) -> HttpResponse {
    respond(state.decoder.destroy_session(path.into_inner()).await)
}

pub async fn decode_packet(
    state: web::Data<AppState>,
    path: web::Path<SessionId>,
    body: BoundaryJson<DecodePacketRequest>,
) -> HttpResponse {
    respond(state.decoder.decode_packet(path.into_inner(), &body.packet_base64).await)
}

pub async fn decode_file(
    state: web::Data<AppState>,
    path: web::Path<SessionId>,
    body: BoundaryJson<DecodeFileRequest>,
) -> HttpResponse {
    let (cancel, _guard) = request_cancellation();
    let result = state
        .decoder
        .decode_file(path.into_inner(), &body.filepath, body.chunk_size, cancel)
        .await;
    respond(result)
}

pub async fn decode_buffer(
    state: web::Data<AppState>,
    path: web::Path<SessionId>,
    body: BoundaryJson<DecodeBufferRequest>,
) -> HttpResponse {
    let (cancel, _guard) = request_cancellation();
    let result = state
        .decoder
        .decode_buffer(path.into_inner(), &body.data_base64, body.chunk_size, cancel)
        .await;
    respond(result)
}

pub async fn write_wav(state: web::Data<AppState>, body: BoundaryJson<WriteWavRequest>) -> HttpResponse {
    let result = state
        .decoder
        .write_wav(&body.decoded_data_base64, &body.output_path, body.sample_rate, body.channels)
        .await;
    respond(result)
}

/// Fallback for unknown routes, in the same shape as boundary failures.
pub async fn not_found(req: HttpRequest) -> HttpResponse {
    HttpResponse::NotFound().json(json!({
        "success": false,
        "error": "NotFound",
        "message": format!("No route for {} {}", req.method(), req.path())
    }))
}
