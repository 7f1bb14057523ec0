//! # Codec Capability
//!
//! The narrow contract the decoder core needs from a compressed-audio codec.
//! The core never looks inside a packet; it hands bytes to a [`CodecState`]
//! and gets 16-bit PCM back, or an error.
//!
//! ## Contract:
//! - [`Codec::create_state`] allocates decoder state for one session
//! - [`CodecState::decode`] mutates that state in place, so packets must be fed in order
//! - Dropping the boxed state releases it
//!
//! Any implementation satisfying this is substitutable, which is how tests run
//! the engine against deterministic fakes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error reported by a codec. The engine never rolls codec state back; whether
/// the state is still usable after an error is the codec's business.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unsupported configuration: {0}")]
    Unsupported(String),

    #[error("corrupted packet: {0}")]
    Corrupted(String),

    #[error("codec internal error: {0}")]
    Internal(String),
}

/// PCM produced by one codec invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Interleaved 16-bit little-endian samples.
    pub pcm: Vec<u8>,
    /// Samples per channel.
    pub samples: usize,
}

/// Factory side of the capability: one instance is shared by the whole registry.
pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;

    fn create_state(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn CodecState>, CodecError>;
}

/// Per-session decoder state.
pub trait CodecState: Send {
    fn decode(&mut self, packet: &[u8]) -> Result<DecodedFrame, CodecError>;
}

/// Which codec the service instantiates at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    Pcm16,
    Opus,
}

impl CodecKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecKind::Pcm16 => "pcm16",
            CodecKind::Opus => "opus",
        }
    }

    /// Build the configured codec. Fails if the codec was not compiled in.
    pub fn build(&self) -> anyhow::Result<Box<dyn Codec>> {
        match self {
            CodecKind::Pcm16 => Ok(Box::new(Pcm16Codec)),
            #[cfg(feature = "opus")]
            CodecKind::Opus => Ok(Box::new(super::opus::OpusCodec)),
            #[cfg(not(feature = "opus"))]
            CodecKind::Opus => Err(anyhow::anyhow!(
                "codec 'opus' requested but the binary was built without the `opus` feature"
            )),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodecKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pcm16" | "pcm" => Ok(CodecKind::Pcm16),
            "opus" => Ok(CodecKind::Opus),
            other => Err(format!("unknown codec '{}'", other)),
        }
    }
}

/// Raw interleaved 16-bit PCM carried as-is.
///
/// Useful when the upstream already produces PCM, and as the deterministic
/// default codec for tests.
pub struct Pcm16Codec;

impl Codec for Pcm16Codec {
    fn name(&self) -> &'static str {
        "pcm16"
    }

    fn create_state(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn CodecState>, CodecError> {
        if sample_rate == 0 {
            return Err(CodecError::Unsupported("sample rate must be positive".to_string()));
        }
        if channels == 0 {
            return Err(CodecError::Unsupported("channel count must be positive".to_string()));
        }
        Ok(Box::new(Pcm16State {
            frame_bytes: usize::from(channels) * 2,
        }))
    }
}

struct Pcm16State {
    frame_bytes: usize,
}

impl CodecState for Pcm16State {
    fn decode(&mut self, packet: &[u8]) -> Result<DecodedFrame, CodecError> {
        if packet.is_empty() {
            return Err(CodecError::Corrupted("empty packet".to_string()));
        }
        if packet.len() % self.frame_bytes != 0 {
            return Err(CodecError::Corrupted(format!(
                "{} bytes is not a whole number of {}-byte frames",
                packet.len(),
                self.frame_bytes
            )));
        }
        Ok(DecodedFrame {
            pcm: packet.to_vec(),
            samples: packet.len() / self.frame_bytes,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_passes_through_whole_frames() {
        let mut state = Pcm16Codec.create_state(16000, 2).unwrap();
        let frame = state.decode(&[1, 0, 2, 0, 3, 0, 4, 0]).unwrap();
        assert_eq!(frame.samples, 2);
        assert_eq!(frame.pcm, vec![1, 0, 2, 0, 3, 0, 4, 0]);
    }

    #[test]
    fn test_pcm16_rejects_partial_frames() {
        let mut state = Pcm16Codec.create_state(16000, 2).unwrap();
        assert!(matches!(state.decode(&[1, 0, 2]), Err(CodecError::Corrupted(_))));
        assert!(state.decode(&[]).is_err());
        // Still usable after a rejected packet
        assert!(state.decode(&[0, 0, 0, 0]).is_ok());
    }

    #[test]
    fn test_pcm16_rejects_zero_channels() {
        assert!(Pcm16Codec.create_state(16000, 0).is_err());
    }

    #[test]
    fn test_codec_kind_parsing() {
        assert_eq!("PCM16".parse::<CodecKind>().unwrap(), CodecKind::Pcm16);
        assert_eq!("opus".parse::<CodecKind>().unwrap(), CodecKind::Opus);
        assert!("mp3".parse::<CodecKind>().is_err());
        assert_eq!(CodecKind::Opus.to_string(), "opus");
    }

    #[cfg(not(feature = "opus"))]
    #[test]
    fn test_opus_requires_feature() {
        assert!(CodecKind::Opus.build().is_err());
        assert_eq!(CodecKind::Pcm16.build().unwrap().name(), "pcm16");
    }
}
