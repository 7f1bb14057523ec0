//! # Decoder Session Management
//!
//! Owns the mapping from session identifier to decoder state and enforces the
//! session lifecycle:
//!
//! 1. **Created**: codec state allocated, not yet visible to callers
//! 2. **Active**: registered, accepts decode calls (successful or failed decodes keep it here)
//! 3. **Destroyed**: terminal, codec state released, identifier never resolves again
//!
//! ## Thread Safety:
//! The id → session map sits behind a `std::sync::RwLock` that is only held for
//! lookups and inserts, never across an `.await`. Each session sits behind its
//! own `tokio::sync::Mutex`, so decode calls against one session queue up in
//! arrival order while different sessions decode in parallel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::audio::codec::{Codec, CodecError, CodecState, DecodedFrame};
use crate::error::DecodeError;

pub type SessionId = u64;

/// Shared, serialized access to one session.
pub type SessionHandle = Arc<Mutex<DecoderSession>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Created,
    Active,
    Destroyed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Active => "active",
            SessionStatus::Destroyed => "destroyed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SessionCounters {
    bytes_decoded: u64,
    samples_decoded: u64,
    packets_decoded: u64,
    packets_failed: u64,
}

/// One decoder bound to a sample rate and channel count.
pub struct DecoderSession {
    id: SessionId,
    sample_rate: u32,
    channels: u16,
    state: Option<Box<dyn CodecState>>,
    status: SessionStatus,
    counters: SessionCounters,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
}

impl DecoderSession {
    fn new(id: SessionId, sample_rate: u32, channels: u16, state: Box<dyn CodecState>) -> Self {
        Self {
            id,
            sample_rate,
            channels,
            state: Some(state),
            status: SessionStatus::Created,
            counters: SessionCounters::default(),
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Run one packet through the codec and fold the outcome into the counters.
    ///
    /// A codec error leaves the state exactly as the codec left it.
    pub fn decode(&mut self, packet: &[u8]) -> Result<DecodedFrame, DecodeError> {
        if self.status != SessionStatus::Active {
            return Err(DecodeError::SessionNotFound(self.id));
        }
        let state = self
            .state
            .as_mut()
            .ok_or(DecodeError::SessionNotFound(self.id))?;

        self.last_used_at = Some(Utc::now());
        match state.decode(packet) {
            Ok(frame) => {
                self.counters.packets_decoded += 1;
                self.counters.samples_decoded += frame.samples as u64;
                self.counters.bytes_decoded += frame.pcm.len() as u64;
                Ok(frame)
            }
            Err(err) => {
                self.counters.packets_failed += 1;
                Err(codec_failure(err))
            }
        }
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.id,
            sample_rate: self.sample_rate,
            channels: self.channels,
            status: self.status,
            bytes_decoded: self.counters.bytes_decoded,
            samples_decoded: self.counters.samples_decoded,
            packets_decoded: self.counters.packets_decoded,
            packets_failed: self.counters.packets_failed,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        }
    }

    fn activate(&mut self) {
        self.status = SessionStatus::Active;
    }

    fn destroy(&mut self) {
        // Dropping the boxed state releases the codec's resources
        self.state = None;
        self.status = SessionStatus::Destroyed;
    }
}

fn codec_failure(err: CodecError) -> DecodeError {
    DecodeError::CodecFailure(err.to_string())
}

/// Read-only view of a session, as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub session_id: SessionId,
    pub sample_rate: u32,
    pub channels: u16,
    pub status: SessionStatus,
    pub bytes_decoded: u64,
    pub samples_decoded: u64,
    pub packets_decoded: u64,
    pub packets_failed: u64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// What the registry accepts at `create` time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLimits {
    pub supported_sample_rates: Vec<u32>,
    pub max_channels: u16,
    pub max_sessions: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            supported_sample_rates: vec![8000, 12000, 16000, 24000, 48000],
            max_channels: 2,
            max_sessions: 64,
        }
    }
}

/// Registry of live decoder sessions.
///
/// Owned by whoever hosts it (the HTTP service holds one in `AppState`);
/// several independent registries can coexist.
pub struct SessionRegistry {
    codec: Arc<dyn Codec>,
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    limits: RwLock<SessionLimits>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new(codec: Arc<dyn Codec>, limits: SessionLimits) -> Self {
        Self {
            codec,
            sessions: RwLock::new(HashMap::new()),
            limits: RwLock::new(limits),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    pub fn limits(&self) -> SessionLimits {
        self.limits.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the limits applied to future `create` calls. Live sessions are untouched.
    pub fn set_limits(&self, limits: SessionLimits) {
        *self.limits.write().unwrap_or_else(PoisonError::into_inner) = limits;
    }

    /// Create a session and return its fresh identifier.
    ///
    /// No identifier is consumed when validation or codec initialization fails.
    pub fn create(&self, sample_rate: u32, channels: u16) -> Result<SessionId, DecodeError> {
        let limits = self.limits();
        if !limits.supported_sample_rates.contains(&sample_rate) {
            return Err(DecodeError::invalid(format!(
                "unsupported sample rate {} Hz (supported: {:?})",
                sample_rate, limits.supported_sample_rates
            )));
        }
        if channels == 0 || channels > limits.max_channels {
            return Err(DecodeError::invalid(format!(
                "channel count must be between 1 and {}, got {}",
                limits.max_channels, channels
            )));
        }
        if self.len() >= limits.max_sessions {
            return Err(DecodeError::SessionLimit(limits.max_sessions));
        }

        let state = self
            .codec
            .create_state(sample_rate, channels)
            .map_err(|e| DecodeError::CodecFailure(format!("failed to create decoder: {}", e)))?;

        let mut sessions = self.write_sessions();
        // Re-check under the write lock; another create may have won the race
        if sessions.len() >= limits.max_sessions {
            return Err(DecodeError::SessionLimit(limits.max_sessions));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut session = DecoderSession::new(id, sample_rate, channels, state);
        session.activate();
        sessions.insert(id, Arc::new(Mutex::new(session)));

        info!(session_id = id, sample_rate, channels, codec = self.codec.name(), "Decoder session created");
        Ok(id)
    }

    /// Look up a live session.
    pub fn get(&self, id: SessionId) -> Result<SessionHandle, DecodeError> {
        self.read_sessions()
            .get(&id)
            .cloned()
            .ok_or(DecodeError::SessionNotFound(id))
    }

    /// Remove a session and release its codec state.
    ///
    /// Waits for an in-flight decode on the same session to finish first.
    /// Destroying an unknown or already destroyed id returns `SessionNotFound`.
    pub async fn destroy(&self, id: SessionId) -> Result<(), DecodeError> {
        let handle = self
            .write_sessions()
            .remove(&id)
            .ok_or(DecodeError::SessionNotFound(id))?;

        handle.lock().await.destroy();
        info!(session_id = id, "Decoder session destroyed");
        Ok(())
    }

    /// Tear down every session, e.g. on shutdown. Returns how many were destroyed.
    pub async fn destroy_all(&self) -> usize {
        let drained: Vec<(SessionId, SessionHandle)> = self.write_sessions().drain().collect();
        let count = drained.len();
        for (id, handle) in drained {
            handle.lock().await.destroy();
            debug!(session_id = id, "Decoder session destroyed during teardown");
        }
        count
    }

    pub async fn stats(&self, id: SessionId) -> Result<SessionStats, DecodeError> {
        let handle = self.get(id)?;
        let session = handle.lock().await;
        Ok(session.stats())
    }

    /// Stats for every live session, ordered by identifier.
    pub async fn list(&self) -> Vec<SessionStats> {
        let mut handles: Vec<(SessionId, SessionHandle)> = self
            .read_sessions()
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect();
        handles.sort_by_key(|(id, _)| *id);

        let mut stats = Vec::with_capacity(handles.len());
        for (_, handle) in handles {
            let session = handle.lock().await;
            if session.status() == SessionStatus::Active {
                stats.push(session.stats());
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.read_sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_sessions(&self) -> RwLockReadGuard<'_, HashMap<SessionId, SessionHandle>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_sessions(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, SessionHandle>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}
