//! # Packet Framer
//!
//! Splits a contiguous byte buffer into consecutive fixed-size packets.
//! Every packet is `chunk_size` bytes long except the last, which carries the
//! remainder. A buffer whose length is an exact multiple yields no short packet.
//!
//! Framing never looks at audio content. Fixed-size spans need not line up with
//! the codec's real packet boundaries, so the engine has to tolerate a codec
//! rejecting a chunk.

use std::iter::FusedIterator;

use crate::error::DecodeError;

/// Frame `buffer` into packets of `chunk_size` bytes.
///
/// The returned iterator borrows the buffer, so reframing with a different
/// chunk size is just another call.
pub fn frame(buffer: &[u8], chunk_size: usize) -> Result<Packets<'_>, DecodeError> {
    if chunk_size == 0 {
        return Err(DecodeError::invalid("chunk size must be a positive integer"));
    }
    Ok(Packets {
        remaining: buffer,
        chunk_size,
    })
}

/// Validate a chunk size received as a JSON number.
///
/// Boundary callers may send floats; only finite positive integers are accepted.
pub fn chunk_size_from_f64(value: f64) -> Result<usize, DecodeError> {
    if !value.is_finite() || value.fract() != 0.0 || value < 1.0 || value > usize::MAX as f64 {
        return Err(DecodeError::invalid(format!(
            "chunk size must be a positive integer, got {}",
            value
        )));
    }
    Ok(value as usize)
}

/// Number of packets `frame` will produce for a buffer of `len` bytes.
pub fn packet_count(len: usize, chunk_size: usize) -> usize {
    if chunk_size == 0 {
        return 0;
    }
    len.div_ceil(chunk_size)
}

/// Lazy, finite sequence of packets over a borrowed buffer.
#[derive(Debug, Clone)]
pub struct Packets<'a> {
    remaining: &'a [u8],
    chunk_size: usize,
}

impl<'a> Iterator for Packets<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        let take = self.chunk_size.min(self.remaining.len());
        let (packet, rest) = self.remaining.split_at(take);
        self.remaining = rest;
        Some(packet)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = packet_count(self.remaining.len(), self.chunk_size);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Packets<'_> {}

impl FusedIterator for Packets<'_> {}
