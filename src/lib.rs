//! # Opus Decoder Backend
//!
//! Stateful audio decoding behind an HTTP and WebSocket API.
//!
//! ## Application Architecture:
//! - **audio**: codec capability, session registry, packet framer, decode engine, WAV writer
//! - **service**: the boundary operations (base64 in/out, structured results, deadlines)
//! - **config**: application configuration (TOML files + environment variables)
//! - **state**: shared application state and request metrics
//! - **handlers** / **websocket**: HTTP and WebSocket surfaces over the service
//! - **health**: health and metrics endpoints
//! - **middleware**: request logging and per-route metrics
//! - **error**: decoder error kinds and HTTP error responses

pub mod audio;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod service;
pub mod state;
pub mod websocket;
