//! # Streaming Decode Engine
//!
//! Drives codec calls against a session and accumulates the PCM they produce.
//!
//! ## Operation Shapes:
//! - **decode_packet**: one packet, one codec call; a codec failure is returned as-is
//! - **decode_source**: frame a buffer and decode every packet in order into one accumulator
//! - **decode_file**: same as `decode_source`, reading the buffer from disk first
//!
//! ## Failure Policy for Whole Sources:
//! Fixed-size framing does not line up with real packet boundaries, so isolated
//! codec failures are expected. Under [`SourcePolicy::Lenient`] they are counted
//! and skipped; under [`SourcePolicy::Strict`] the first one aborts the whole
//! operation. Session, source and cancellation errors always abort, and an
//! aborted operation never returns partial PCM.
//!
//! Codec work runs on tokio's blocking pool while holding the session's owned
//! lock, so the async runtime is never stalled by a slow codec.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::codec::DecodedFrame;
use crate::audio::framer::{self, packet_count};
use crate::audio::session::{SessionId, SessionRegistry};
use crate::error::DecodeError;

/// Upper bound on the PCM buffer reserved before decoding starts.
const MAX_INITIAL_PCM_CAPACITY: usize = 16 * 1024 * 1024;

/// What a whole-source decode does with a packet the codec rejects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourcePolicy {
    /// Count the failure and continue with the next packet.
    #[default]
    Lenient,
    /// Abort on the first failure.
    Strict,
}

impl SourcePolicy {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            SourcePolicy::Strict
        } else {
            SourcePolicy::Lenient
        }
    }
}

/// Ordered concatenation of PCM produced during one operation. Append-only.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PcmAccumulator {
    bytes: Vec<u8>,
    samples: u64,
}

impl PcmAccumulator {
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bytes),
            samples: 0,
        }
    }

    pub fn append(&mut self, frame: DecodedFrame) {
        self.bytes.extend_from_slice(&frame.pcm);
        self.samples += frame.samples as u64;
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Result of a single-packet decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketDecode {
    pub pcm: Vec<u8>,
    pub samples_decoded: u64,
    pub elapsed: Duration,
}

impl PacketDecode {
    pub fn bytes_decoded(&self) -> u64 {
        self.pcm.len() as u64
    }
}

/// Aggregate result of a whole-source decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDecodeReport {
    pub pcm: Vec<u8>,
    pub samples_decoded: u64,
    pub packets_total: usize,
    pub packets_failed: usize,
    /// First to last codec invocation. Advisory only.
    pub elapsed: Duration,
}

impl SourceDecodeReport {
    pub fn bytes_decoded(&self) -> u64 {
        self.pcm.len() as u64
    }

    pub fn packets_succeeded(&self) -> usize {
        self.packets_total - self.packets_failed
    }
}

/// Stateless driver over a shared registry.
#[derive(Clone)]
pub struct StreamingDecoder {
    registry: Arc<SessionRegistry>,
}

impl StreamingDecoder {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Decode one packet against the session's current state.
    pub async fn decode_packet(&self, id: SessionId, packet: Vec<u8>) -> Result<PacketDecode, DecodeError> {
        if packet.is_empty() {
            return Err(DecodeError::invalid("packet is empty"));
        }
        let handle = self.registry.get(id)?;
        let mut session = handle.lock_owned().await;

        run_blocking(move || {
            let start = Instant::now();
            let frame = session.decode(&packet)?;
            Ok(PacketDecode {
                samples_decoded: frame.samples as u64,
                pcm: frame.pcm,
                elapsed: start.elapsed(),
            })
        })
        .await
    }

    /// Frame `source` into `chunk_size` packets and decode them in order.
    ///
    /// Cancellation is checked before every packet.
    pub async fn decode_source(
        &self,
        id: SessionId,
        source: Vec<u8>,
        chunk_size: usize,
        policy: SourcePolicy,
        cancel: CancellationToken,
    ) -> Result<SourceDecodeReport, DecodeError> {
        // Argument errors surface before the session is touched
        let packets_total = framer::frame(&source, chunk_size)?.len();
        if packets_total == 0 {
            return Err(DecodeError::invalid("source is empty"));
        }
        let handle = self.registry.get(id)?;
        let mut session = handle.lock_owned().await;

        let report = run_blocking(move || {
            // Rough guess: compressed audio expands several-fold into PCM
            let capacity = source.len().saturating_mul(8).min(MAX_INITIAL_PCM_CAPACITY);
            let mut pcm = PcmAccumulator::with_capacity(capacity);
            let mut packets_failed = 0usize;
            let start = Instant::now();

            for (index, packet) in framer::frame(&source, chunk_size)?.enumerate() {
                if cancel.is_cancelled() {
                    return Err(DecodeError::Cancelled { packets_done: index });
                }
                match session.decode(packet) {
                    Ok(frame) => pcm.append(frame),
                    Err(DecodeError::CodecFailure(reason)) if policy == SourcePolicy::Lenient => {
                        packets_failed += 1;
                        debug!(session_id = id, packet = index, %reason, "Skipping undecodable packet");
                    }
                    Err(err) => return Err(err),
                }
            }

            Ok(SourceDecodeReport {
                samples_decoded: pcm.samples(),
                pcm: pcm.into_bytes(),
                packets_total,
                packets_failed,
                elapsed: start.elapsed(),
            })
        })
        .await?;

        if report.packets_failed > 0 {
            warn!(
                session_id = id,
                failed = report.packets_failed,
                total = report.packets_total,
                "Source decoded with skipped packets"
            );
        }
        info!(
            session_id = id,
            packets = report.packets_total,
            samples = report.samples_decoded,
            bytes = report.bytes_decoded(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Source decoded"
        );
        Ok(report)
    }

    /// Read `path` and decode it like [`decode_source`](Self::decode_source).
    ///
    /// A missing or unreadable file fails the whole operation. A file larger
    /// than `max_bytes` is rejected before its contents are read.
    pub async fn decode_file(
        &self,
        id: SessionId,
        path: &Path,
        chunk_size: usize,
        max_bytes: usize,
        policy: SourcePolicy,
        cancel: CancellationToken,
    ) -> Result<SourceDecodeReport, DecodeError> {
        if chunk_size == 0 {
            return Err(DecodeError::invalid("chunk size must be a positive integer"));
        }
        // Fail fast on a bad session before touching the filesystem
        self.registry.get(id)?;

        let source = read_source(path, max_bytes).await?;
        debug!(
            session_id = id,
            path = %path.display(),
            bytes = source.len(),
            packets = packet_count(source.len(), chunk_size),
            "Source file loaded"
        );

        self.decode_source(id, source, chunk_size, policy, cancel).await
    }
}

/// Read a whole source file, refusing anything over `max_bytes`.
///
/// The size is checked up front and the read itself is bounded, so a file
/// that grows in between is still refused.
async fn read_source(path: &Path, max_bytes: usize) -> Result<Vec<u8>, DecodeError> {
    let unavailable = |e: std::io::Error| DecodeError::SourceUnavailable(format!("{}: {}", path.display(), e));
    let too_large = || DecodeError::invalid(format!("source file {} exceeds {} bytes", path.display(), max_bytes));

    let limit = max_bytes as u64;
    let metadata = tokio::fs::metadata(path).await.map_err(unavailable)?;
    if metadata.len() > limit {
        return Err(too_large());
    }

    let file = tokio::fs::File::open(path).await.map_err(unavailable)?;
    let mut source = Vec::with_capacity(metadata.len() as usize);
    file.take(limit.saturating_add(1))
        .read_to_end(&mut source)
        .await
        .map_err(unavailable)?;
    if source.len() > max_bytes {
        return Err(too_large());
    }
    Ok(source)
}

/// Run codec work on the blocking pool.
async fn run_blocking<T, F>(work: F) -> Result<T, DecodeError>
where
    F: FnOnce() -> Result<T, DecodeError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| DecodeError::CodecFailure(format!("codec task aborted: {}", e)))?
}
