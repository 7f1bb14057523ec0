//! # Audio Decoding Module
//!
//! Stateful decoding of compressed audio packets into 16-bit linear PCM.
//!
//! ## Key Components:
//! - **Codec**: the narrow decode capability the rest of the module depends on
//! - **Session Registry**: owns decoder sessions and their lifecycle
//! - **Packet Framer**: splits a byte stream into fixed-size packets
//! - **Streaming Engine**: drives codec calls and accumulates PCM
//! - **Container Writer**: persists PCM as a RIFF/WAVE file
//!
//! ## PCM Format:
//! - **Bit Depth**: 16-bit signed, little-endian
//! - **Layout**: interleaved when stereo
//! - **Sample counts**: always per channel

pub mod codec;
pub mod container;
pub mod engine;
pub mod framer;
#[cfg(feature = "opus")]
pub mod opus;
pub mod session;
