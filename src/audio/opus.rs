//! libopus-backed codec, compiled with the `opus` feature.

use super::codec::{Codec, CodecError, CodecState, DecodedFrame};

/// Opus accepts only these output rates.
pub const OPUS_SAMPLE_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

/// 120 ms at 48 kHz, the longest frame an Opus packet can carry.
const MAX_FRAME_SAMPLES: usize = 5760;

pub struct OpusCodec;

impl Codec for OpusCodec {
    fn name(&self) -> &'static str {
        "opus"
    }

    fn create_state(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn CodecState>, CodecError> {
        if !OPUS_SAMPLE_RATES.contains(&sample_rate) {
            return Err(CodecError::Unsupported(format!(
                "Opus cannot decode at {} Hz",
                sample_rate
            )));
        }
        let layout = match channels {
            1 => opus::Channels::Mono,
            2 => opus::Channels::Stereo,
            n => {
                return Err(CodecError::Unsupported(format!(
                    "Opus decoder supports 1 or 2 channels, got {}",
                    n
                )))
            }
        };
        let decoder = opus::Decoder::new(sample_rate, layout)
            .map_err(|e| CodecError::Internal(e.to_string()))?;

        Ok(Box::new(OpusState {
            decoder,
            channels: usize::from(channels),
            scratch: vec![0i16; MAX_FRAME_SAMPLES * usize::from(channels)],
        }))
    }
}

struct OpusState {
    decoder: opus::Decoder,
    channels: usize,
    scratch: Vec<i16>,
}

impl CodecState for OpusState {
    fn decode(&mut self, packet: &[u8]) -> Result<DecodedFrame, CodecError> {
        if packet.is_empty() {
            return Err(CodecError::Corrupted("empty packet".to_string()));
        }
        let samples = self
            .decoder
            .decode(packet, &mut self.scratch, false)
            .map_err(|e| CodecError::Corrupted(e.to_string()))?;

        let pcm = self.scratch[..samples * self.channels]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();

        Ok(DecodedFrame { pcm, samples })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unsupported_rate() {
        assert!(OpusCodec.create_state(44100, 1).is_err());
        assert!(OpusCodec.create_state(16000, 3).is_err());
    }

    #[test]
    fn test_garbage_packet_is_reported_not_panicking() {
        let mut state = OpusCodec.create_state(16000, 1).unwrap();
        // Whatever libopus decides about these bytes, it must come back as a Result
        let _ = state.decode(&[0xFF; 3]);
        assert!(state.decode(&[]).is_err());
    }
}
