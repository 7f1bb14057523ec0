//! # Decoder Service
//!
//! The boundary in front of the decoder core. Every operation here:
//! - takes caller-shaped arguments (JSON numbers, base64 text, path strings)
//! - validates them before any session state is touched
//! - returns a [`BoundaryResult`] instead of an `Err`, so the caller can always
//!   tell "no result" from "result with no data"
//!
//! Base64 exists only at this layer; the core works on raw bytes throughout.
//!
//! ## Deadlines and Cancellation:
//! Every awaited operation is wrapped in the configured timeout. Whole-source
//! decodes also take a [`CancellationToken`]; the token is cancelled when the
//! deadline fires so the blocking decode loop stops at the next packet boundary
//! and releases the session.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use actix_web::http::StatusCode;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::codec::Codec;
use crate::audio::container;
use crate::audio::engine::{PacketDecode, SourceDecodeReport, SourcePolicy, StreamingDecoder};
use crate::audio::framer;
use crate::audio::session::{SessionId, SessionRegistry, SessionStats};
use crate::config::AppConfig;
use crate::error::DecodeError;

/// Structured outcome of a boundary operation.
///
/// Serializes as `{"success": true, ...payload}` or
/// `{"success": false, "error": "<Kind>", "message": "..."}`.
#[derive(Debug, Clone, Serialize)]
pub struct BoundaryResult<T: Serialize> {
    pub success: bool,
    #[serde(flatten)]
    pub payload: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip)]
    failure: Option<DecodeError>,
}

impl<T: Serialize> BoundaryResult<T> {
    pub fn ok(payload: T) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
            message: None,
            failure: None,
        }
    }

    pub fn fail(err: DecodeError) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(err.kind()),
            message: Some(err.to_string()),
            failure: Some(err),
        }
    }

    pub fn failure(&self) -> Option<&DecodeError> {
        self.failure.as_ref()
    }

    pub fn status_code(&self) -> StatusCode {
        self.failure
            .as_ref()
            .map_or(StatusCode::OK, DecodeError::status_code)
    }
}

impl<T: Serialize> From<Result<T, DecodeError>> for BoundaryResult<T> {
    fn from(result: Result<T, DecodeError>) -> Self {
        match result {
            Ok(payload) => Self::ok(payload),
            Err(err) => Self::fail(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDestroyed {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketDecoded {
    pub decoded_data_base64: String,
    pub samples_decoded: u64,
    pub bytes_decoded: u64,
    pub processing_time_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDecoded {
    pub decoded_data_base64: String,
    pub samples_decoded: u64,
    pub bytes_decoded: u64,
    pub processing_time_ms: f64,
    pub packets_total: usize,
    pub packets_failed: usize,
}

impl From<SourceDecodeReport> for SourceDecoded {
    fn from(report: SourceDecodeReport) -> Self {
        Self {
            samples_decoded: report.samples_decoded,
            bytes_decoded: report.bytes_decoded(),
            processing_time_ms: millis(report.elapsed),
            packets_total: report.packets_total,
            packets_failed: report.packets_failed,
            decoded_data_base64: STANDARD.encode(&report.pcm),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WavWritten {
    pub filepath: String,
}

/// Runtime-adjustable knobs for boundary operations.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodePolicy {
    pub source_policy: SourcePolicy,
    pub timeout: Duration,
    pub default_chunk_size: usize,
    pub max_payload_bytes: usize,
}

impl DecodePolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            source_policy: config.source_policy(),
            timeout: config.operation_timeout(),
            default_chunk_size: config.decoder.default_chunk_size,
            max_payload_bytes: config.decoder.max_payload_bytes,
        }
    }
}

/// Owns the registry and engine for the lifetime of the hosting process.
pub struct DecoderService {
    registry: Arc<SessionRegistry>,
    engine: StreamingDecoder,
    policy: RwLock<DecodePolicy>,
}

impl DecoderService {
    pub fn new(codec: Arc<dyn Codec>, config: &AppConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new(codec, config.session_limits()));
        Self {
            engine: StreamingDecoder::new(Arc::clone(&registry)),
            registry,
            policy: RwLock::new(DecodePolicy::from_config(config)),
        }
    }

    /// Build the service with the codec named in the config.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let codec: Arc<dyn Codec> = Arc::from(config.decoder.codec.build()?);
        info!(codec = codec.name(), "Decoder codec ready");
        Ok(Self::new(codec, config))
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> DecodePolicy {
        self.policy.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Apply a validated config to subsequent operations. The codec is fixed at startup.
    pub fn apply_config(&self, config: &AppConfig) {
        self.registry.set_limits(config.session_limits());
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = DecodePolicy::from_config(config);
        debug!("Decoder policy updated");
    }

    pub fn create_session(&self, sample_rate: f64, channels: f64) -> BoundaryResult<SessionCreated> {
        let result = self.try_create_session(sample_rate, channels);
        log_outcome("createSession", &result);
        result.into()
    }

    pub async fn destroy_session(&self, session_id: SessionId) -> BoundaryResult<SessionDestroyed> {
        let result = self
            .registry
            .destroy(session_id)
            .await
            .map(|_| SessionDestroyed { session_id });
        log_outcome("destroySession", &result);
        result.into()
    }

    pub async fn session_stats(&self, session_id: SessionId) -> BoundaryResult<SessionStats> {
        self.registry.stats(session_id).await.into()
    }

    pub async fn list_sessions(&self) -> Vec<SessionStats> {
        self.registry.list().await
    }

    pub async fn decode_packet(&self, session_id: SessionId, packet_base64: &str) -> BoundaryResult<PacketDecoded> {
        let result = self.try_decode_packet(session_id, packet_base64).await;
        log_outcome("decodePacket", &result);
        result.into()
    }

    pub async fn decode_buffer(
        &self,
        session_id: SessionId,
        data_base64: &str,
        chunk_size: Option<f64>,
        cancel: CancellationToken,
    ) -> BoundaryResult<SourceDecoded> {
        let result = self
            .try_decode_buffer(session_id, data_base64, chunk_size, cancel)
            .await
            .map(SourceDecoded::from);
        log_outcome("decodeBuffer", &result);
        result.into()
    }

    pub async fn decode_file(
        &self,
        session_id: SessionId,
        filepath: &str,
        chunk_size: Option<f64>,
        cancel: CancellationToken,
    ) -> BoundaryResult<SourceDecoded> {
        let result = self
            .try_decode_file(session_id, filepath, chunk_size, cancel)
            .await
            .map(SourceDecoded::from);
        log_outcome("decodeFile", &result);
        result.into()
    }

    pub async fn write_wav(
        &self,
        decoded_data_base64: &str,
        output_path: &str,
        sample_rate: f64,
        channels: f64,
    ) -> BoundaryResult<WavWritten> {
        let result = self
            .try_write_wav(decoded_data_base64, output_path, sample_rate, channels)
            .await;
        log_outcome("writeWav", &result);
        result.into()
    }

    fn try_create_session(&self, sample_rate: f64, channels: f64) -> Result<SessionCreated, DecodeError> {
        let sample_rate = whole_number(sample_rate, "sample rate", u32::MAX.into())? as u32;
        let channels = whole_number(channels, "channel count", u16::MAX.into())? as u16;
        let session_id = self.registry.create(sample_rate, channels)?;
        Ok(SessionCreated { session_id })
    }

    /// Raw-bytes packet decode for transports that carry binary frames.
    ///
    /// Same limits and deadline as [`decode_packet`](Self::decode_packet).
    pub async fn decode_packet_bytes(&self, session_id: SessionId, packet: Vec<u8>) -> Result<PacketDecode, DecodeError> {
        let policy = self.policy();
        if packet.len() > policy.max_payload_bytes {
            return Err(DecodeError::invalid(format!("packet exceeds {} bytes", policy.max_payload_bytes)));
        }
        with_deadline(policy.timeout, self.engine.decode_packet(session_id, packet)).await
    }

    async fn try_decode_packet(&self, session_id: SessionId, packet_base64: &str) -> Result<PacketDecoded, DecodeError> {
        let max_payload_bytes = self.policy().max_payload_bytes;
        let packet = decode_base64(packet_base64, "packet", max_payload_bytes)?;
        let decoded = self.decode_packet_bytes(session_id, packet).await?;
        Ok(PacketDecoded {
            bytes_decoded: decoded.bytes_decoded(),
            samples_decoded: decoded.samples_decoded,
            processing_time_ms: millis(decoded.elapsed),
            decoded_data_base64: STANDARD.encode(&decoded.pcm),
        })
    }

    async fn try_decode_buffer(
        &self,
        session_id: SessionId,
        data_base64: &str,
        chunk_size: Option<f64>,
        cancel: CancellationToken,
    ) -> Result<SourceDecodeReport, DecodeError> {
        let policy = self.policy();
        let chunk_size = resolve_chunk_size(chunk_size, &policy)?;
        let source = decode_base64(data_base64, "data", policy.max_payload_bytes)?;
        let decode = self
            .engine
            .decode_source(session_id, source, chunk_size, policy.source_policy, cancel.clone());
        cancel_on_deadline(policy.timeout, decode, &cancel).await
    }

    async fn try_decode_file(
        &self,
        session_id: SessionId,
        filepath: &str,
        chunk_size: Option<f64>,
        cancel: CancellationToken,
    ) -> Result<SourceDecodeReport, DecodeError> {
        let policy = self.policy();
        let chunk_size = resolve_chunk_size(chunk_size, &policy)?;
        if filepath.is_empty() {
            return Err(DecodeError::invalid("filepath is empty"));
        }
        let decode = self.engine.decode_file(
            session_id,
            Path::new(filepath),
            chunk_size,
            policy.max_payload_bytes,
            policy.source_policy,
            cancel.clone(),
        );
        cancel_on_deadline(policy.timeout, decode, &cancel).await
    }

    async fn try_write_wav(
        &self,
        decoded_data_base64: &str,
        output_path: &str,
        sample_rate: f64,
        channels: f64,
    ) -> Result<WavWritten, DecodeError> {
        let policy = self.policy();
        let sample_rate = whole_number(sample_rate, "sample rate", u32::MAX.into())? as u32;
        let channels = whole_number(channels, "channel count", u16::MAX.into())? as u16;
        if output_path.is_empty() {
            return Err(DecodeError::invalid("output path is empty"));
        }
        let pcm = decode_base64(decoded_data_base64, "decoded data", policy.max_payload_bytes)?;
        let path = PathBuf::from(output_path);

        let write = async move {
            tokio::task::spawn_blocking(move || container::write_container(&pcm, &path, sample_rate, channels))
                .await
                .map_err(|e| DecodeError::WriteFailure(format!("writer task aborted: {}", e)))?
        };
        let written = with_deadline(policy.timeout, write).await?;
        Ok(WavWritten {
            filepath: written.to_string_lossy().into_owned(),
        })
    }

    /// Destroy every live session. Called on process teardown.
    pub async fn shutdown(&self) -> usize {
        let destroyed = self.registry.destroy_all().await;
        info!(destroyed, "Decoder sessions released");
        destroyed
    }
}

/// Accept a JSON number only if it is a whole number in `1..=max`.
fn whole_number(value: f64, what: &str, max: u64) -> Result<u64, DecodeError> {
    if !value.is_finite() || value.fract() != 0.0 || value < 1.0 || value > max as f64 {
        return Err(DecodeError::invalid(format!("{} must be a positive integer, got {}", what, value)));
    }
    Ok(value as u64)
}

fn resolve_chunk_size(chunk_size: Option<f64>, policy: &DecodePolicy) -> Result<usize, DecodeError> {
    match chunk_size {
        Some(value) => framer::chunk_size_from_f64(value),
        None => Ok(policy.default_chunk_size),
    }
}

fn decode_base64(text: &str, what: &str, limit: usize) -> Result<Vec<u8>, DecodeError> {
    // Four base64 characters carry three bytes
    if text.len() / 4 > limit / 3 + 1 {
        return Err(DecodeError::invalid(format!("{} exceeds {} bytes", what, limit)));
    }
    let bytes = STANDARD
        .decode(text.trim())
        .map_err(|e| DecodeError::invalid(format!("{} is not valid base64: {}", what, e)))?;
    if bytes.len() > limit {
        return Err(DecodeError::invalid(format!("{} exceeds {} bytes", what, limit)));
    }
    Ok(bytes)
}

async fn with_deadline<T, F>(timeout: Duration, fut: F) -> Result<T, DecodeError>
where
    F: std::future::Future<Output = Result<T, DecodeError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| DecodeError::Timeout(timeout.as_millis() as u64))?
}

async fn cancel_on_deadline<T, F>(timeout: Duration, fut: F, cancel: &CancellationToken) -> Result<T, DecodeError>
where
    F: std::future::Future<Output = Result<T, DecodeError>>,
{
    let result = with_deadline(timeout, fut).await;
    if matches!(result, Err(DecodeError::Timeout(_))) {
        cancel.cancel();
    }
    result
}

fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

fn log_outcome<T>(operation: &'static str, result: &Result<T, DecodeError>) {
    if let Err(err) = result {
        match err {
            DecodeError::WriteFailure(_) | DecodeError::Timeout(_) => {
                warn!(operation, kind = err.kind(), error = %err, "Boundary operation failed")
            }
            _ => debug!(operation, kind = err.kind(), error = %err, "Boundary operation failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::testing::SequenceCodec;
    use crate::audio::codec::Pcm16Codec;
    use crate::audio::container::{ContainerHeader, HEADER_LEN};
    use std::io::Cursor;

    fn pcm16_service() -> DecoderService {
        DecoderService::new(Arc::new(Pcm16Codec), &AppConfig::default())
    }

    fn sequence_service() -> DecoderService {
        DecoderService::new(Arc::new(SequenceCodec::new()), &AppConfig::default())
    }

    #[tokio::test]
    async fn test_file_to_wav_scenario() {
        let service = pcm16_service();
        let dir = tempfile::tempdir().unwrap();

        let created = service.create_session(16000.0, 1.0);
        assert!(created.success);
        let session_id = created.payload.unwrap().session_id;
        assert_eq!(session_id, 1);

        // 5 seconds of 16 kHz mono
        let source = dir.path().join("sample.pcm");
        let samples: Vec<u8> = (0..80_000u32).flat_map(|i| ((i % 500) as i16).to_le_bytes()).collect();
        std::fs::write(&source, &samples).unwrap();

        let decoded = service
            .decode_file(session_id, source.to_str().unwrap(), Some(40.0), CancellationToken::new())
            .await;
        assert!(decoded.success, "{:?}", decoded.message);
        let decoded = decoded.payload.unwrap();
        assert_eq!(decoded.samples_decoded, 80_000);
        assert_eq!(decoded.bytes_decoded, 160_000);
        assert_eq!(decoded.packets_failed, 0);
        assert!(!decoded.decoded_data_base64.is_empty());

        let wav_path = dir.path().join("out.wav");
        let written = service
            .write_wav(&decoded.decoded_data_base64, wav_path.to_str().unwrap(), 16000.0, 1.0)
            .await;
        assert!(written.success, "{:?}", written.message);
        assert_eq!(written.payload.unwrap().filepath, wav_path.to_str().unwrap());

        let bytes = std::fs::read(&wav_path).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 160_000);
        let header = ContainerHeader::read_from(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!((header.sample_rate, header.channels), (16000, 1));
        assert_eq!(&bytes[HEADER_LEN..], samples.as_slice());

        assert!(service.destroy_session(session_id).await.success);
    }

    #[tokio::test]
    async fn test_decode_after_destroy_reports_session_not_found() {
        let service = sequence_service();
        let doomed = service.create_session(16000.0, 1.0).payload.unwrap().session_id;
        let other = service.create_session(48000.0, 2.0).payload.unwrap().session_id;
        assert!(service.decode_packet(other, &STANDARD.encode([1, 2, 3])).await.success);
        let before = service.session_stats(other).await.payload.unwrap();

        assert!(service.destroy_session(doomed).await.success);
        let result = service.decode_packet(doomed, &STANDARD.encode([1, 2, 3])).await;
        assert!(!result.success);
        assert_eq!(result.error, Some("SessionNotFound"));
        assert_eq!(result.status_code(), StatusCode::NOT_FOUND);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "SessionNotFound");
        assert!(json.get("decodedDataBase64").is_none());

        assert_eq!(service.session_stats(other).await.payload.unwrap(), before);
        // Repeated destroy is a structured failure, not a panic
        assert_eq!(service.destroy_session(doomed).await.error, Some("SessionNotFound"));
    }

    #[tokio::test]
    async fn test_missing_file_returns_no_data() {
        let service = sequence_service();
        let id = service.create_session(16000.0, 1.0).payload.unwrap().session_id;
        let result = service
            .decode_file(id, "/definitely/not/here.opus", Some(40.0), CancellationToken::new())
            .await;
        assert!(!result.success);
        assert_eq!(result.error, Some("SourceUnavailable"));
        assert!(result.payload.is_none());
    }

    #[tokio::test]
    async fn test_argument_validation_at_the_boundary() {
        let service = sequence_service();
        assert_eq!(service.create_session(0.0, 1.0).error, Some("InvalidArgument"));
        assert_eq!(service.create_session(16000.5, 1.0).error, Some("InvalidArgument"));
        assert_eq!(service.create_session(44100.0, 1.0).error, Some("InvalidArgument"));
        assert_eq!(service.create_session(16000.0, 0.0).error, Some("InvalidArgument"));
        assert_eq!(service.create_session(16000.0, f64::NAN).error, Some("InvalidArgument"));

        let id = service.create_session(16000.0, 1.0).payload.unwrap().session_id;
        let token = CancellationToken::new();
        let bad_chunk = service.decode_buffer(id, &STANDARD.encode([1, 2]), Some(0.0), token.clone()).await;
        assert_eq!(bad_chunk.error, Some("InvalidArgument"));
        let bad_base64 = service.decode_buffer(id, "%%%", None, token).await;
        assert_eq!(bad_base64.error, Some("InvalidArgument"));
        assert_eq!(service.decode_packet(id, "").await.error, Some("InvalidArgument"));

        // None of that touched the session
        let stats = service.session_stats(id).await.payload.unwrap();
        assert_eq!(stats.packets_decoded + stats.packets_failed, 0);
    }

    #[tokio::test]
    async fn test_buffer_uses_default_chunk_size() {
        let service = sequence_service();
        let id = service.create_session(16000.0, 1.0).payload.unwrap().session_id;
        let result = service
            .decode_buffer(id, &STANDARD.encode(vec![3u8; 100]), None, CancellationToken::new())
            .await;
        let decoded = result.payload.unwrap();
        // Default chunk is 40 bytes: 40 + 40 + 20
        assert_eq!(decoded.packets_total, 3);
        assert_eq!(decoded.samples_decoded, 100);
        assert_eq!(decoded.bytes_decoded, 200);
    }

    #[tokio::test]
    async fn test_strict_policy_applies_after_config_update() {
        let service = sequence_service();
        let id = service.create_session(16000.0, 1.0).payload.unwrap().session_id;
        let data = STANDARD.encode([1, 2, 0xFF, 4]);

        let lenient = service.decode_buffer(id, &data, Some(2.0), CancellationToken::new()).await;
        assert_eq!(lenient.payload.unwrap().packets_failed, 1);

        let mut config = AppConfig::default();
        config.decoder.strict_source_decode = true;
        service.apply_config(&config);

        let strict = service.decode_buffer(id, &data, Some(2.0), CancellationToken::new()).await;
        assert_eq!(strict.error, Some("CodecFailure"));
        assert_eq!(strict.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_payload_limit() {
        let service = sequence_service();
        let mut config = AppConfig::default();
        config.decoder.max_payload_bytes = 8;
        service.apply_config(&config);

        let id = service.create_session(16000.0, 1.0).payload.unwrap().session_id;
        let result = service.decode_packet(id, &STANDARD.encode([0u8; 9])).await;
        assert_eq!(result.error, Some("InvalidArgument"));
        assert!(service.decode_packet(id, &STANDARD.encode([0u8; 8])).await.success);
    }

    #[tokio::test]
    async fn test_cancelled_buffer_decode() {
        let service = sequence_service();
        let id = service.create_session(16000.0, 1.0).payload.unwrap().session_id;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = service.decode_buffer(id, &STANDARD.encode([1u8; 10]), Some(2.0), cancel).await;
        assert_eq!(result.error, Some("Cancelled"));
    }

    #[tokio::test]
    async fn test_file_respects_payload_limit() {
        let service = sequence_service();
        let mut config = AppConfig::default();
        config.decoder.max_payload_bytes = 8;
        service.apply_config(&config);

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("large.bin");
        std::fs::write(&source, vec![1u8; 4096]).unwrap();
        let id = service.create_session(16000.0, 1.0).payload.unwrap().session_id;

        let path = source.to_str().unwrap();
        let from_file = service.decode_file(id, path, Some(2.0), CancellationToken::new()).await;
        assert_eq!(from_file.error, Some("InvalidArgument"));
        assert!(from_file.payload.is_none());

        // Same verdict as the equivalent in-memory buffer
        let from_buffer = service
            .decode_buffer(id, &STANDARD.encode(vec![1u8; 4096]), Some(2.0), CancellationToken::new())
            .await;
        assert_eq!(from_buffer.error, from_file.error);
    }

    #[tokio::test]
    async fn test_timeout_stops_source_loop_and_frees_session() {
        let service = DecoderService::new(
            Arc::new(SequenceCodec::slow(Duration::from_millis(5))),
            &AppConfig::default(),
        );
        let mut config = AppConfig::default();
        config.decoder.operation_timeout_ms = 100;
        service.apply_config(&config);
        let id = service.create_session(16000.0, 1.0).payload.unwrap().session_id;

        // 1000 one-byte packets would take five seconds to decode
        let result = service
            .decode_buffer(id, &STANDARD.encode(vec![1u8; 1000]), Some(1.0), CancellationToken::new())
            .await;
        assert_eq!(result.error, Some("Timeout"));
        assert_eq!(result.status_code(), StatusCode::REQUEST_TIMEOUT);
        assert!(result.payload.is_none());

        // The next call waits for the cancelled loop to let go of the session
        let next = service.decode_packet(id, &STANDARD.encode([7u8])).await;
        assert!(next.success, "{:?}", next.message);

        let stats = service.session_stats(id).await.payload.unwrap();
        assert!(stats.packets_decoded < 1000, "loop ran to completion: {}", stats.packets_decoded);
    }

    #[tokio::test]
    async fn test_write_wav_failures() {
        let service = pcm16_service();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("missing").join("out.wav");

        let result = service
            .write_wav(&STANDARD.encode([0u8; 4]), target.to_str().unwrap(), 16000.0, 1.0)
            .await;
        assert_eq!(result.error, Some("WriteFailure"));

        let empty = service
            .write_wav("", dir.path().join("a.wav").to_str().unwrap(), 16000.0, 1.0)
            .await;
        assert_eq!(empty.error, Some("InvalidArgument"));
    }

    #[tokio::test]
    async fn test_shutdown_releases_everything() {
        let service = sequence_service();
        service.create_session(16000.0, 1.0);
        service.create_session(16000.0, 2.0);
        assert_eq!(service.list_sessions().await.len(), 2);
        assert_eq!(service.shutdown().await, 2);
        assert!(service.registry().is_empty());
    }
}
