//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platform convention)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_DECODER__MAX_SESSIONS`, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Environment Variable Shape:
//! Section and field are joined with a double underscore because field names
//! themselves contain single underscores. List values are comma separated:
//! `APP_DECODER__SUPPORTED_SAMPLE_RATES=16000,48000`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::audio::codec::CodecKind;
use crate::audio::engine::SourcePolicy;
use crate::audio::session::SessionLimits;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// The HTTP surface and the decoder core are tuned independently, so each
/// gets its own section in config.toml.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub decoder: DecoderConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Decoder core configuration.
///
/// ## Fields:
/// - `codec`: which codec backs every session (`pcm16`, or `opus` when compiled in)
/// - `supported_sample_rates`: rates accepted by `createSession`
/// - `max_channels`: upper bound for the channel count
/// - `max_sessions`: live session cap; creation beyond it is refused
/// - `default_chunk_size`: packet size used when a caller omits `chunkSize`
/// - `strict_source_decode`: abort whole-source decodes on the first codec failure
/// - `operation_timeout_ms`: deadline for any single boundary operation
/// - `max_payload_bytes`: largest accepted request body and decoded base64 payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub codec: CodecKind,
    pub supported_sample_rates: Vec<u32>,
    pub max_channels: u16,
    pub max_sessions: usize,
    pub default_chunk_size: usize,
    pub strict_source_decode: bool,
    pub operation_timeout_ms: u64,
    pub max_payload_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(), // Localhost only (safe for development)
                port: 8080,
            },
            decoder: DecoderConfig {
                codec: CodecKind::Pcm16,
                supported_sample_rates: vec![8000, 12000, 16000, 24000, 48000],
                max_channels: 2,
                max_sessions: 64,
                default_chunk_size: 40,
                strict_source_decode: false,
                operation_timeout_ms: 30_000,
                max_payload_bytes: 64 * 1024 * 1024,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_DECODER__CODEC=opus`: Switch the codec
    /// - `APP_DECODER__STRICT_SOURCE_DECODE=true`: Abort on first bad packet
    /// - `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("decoder.supported_sample_rates"),
            );

        // Deployment platforms set these without the APP_ prefix
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - At least one positive sample rate is supported
    /// - Every positive limit (channels, sessions, chunk size, timeout, payload) is non-zero
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        let decoder = &self.decoder;
        if decoder.supported_sample_rates.is_empty() {
            return Err(anyhow::anyhow!("At least one supported sample rate is required"));
        }
        if decoder.supported_sample_rates.contains(&0) {
            return Err(anyhow::anyhow!("Supported sample rates must be positive"));
        }
        if decoder.max_channels == 0 {
            return Err(anyhow::anyhow!("Max channels must be greater than 0"));
        }
        if decoder.max_sessions == 0 {
            return Err(anyhow::anyhow!("Max sessions must be greater than 0"));
        }
        if decoder.default_chunk_size == 0 {
            return Err(anyhow::anyhow!("Default chunk size must be greater than 0"));
        }
        if decoder.operation_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Operation timeout must be greater than 0"));
        }
        if decoder.max_payload_bytes == 0 {
            return Err(anyhow::anyhow!("Max payload bytes must be greater than 0"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON change. For example,
    /// `{"decoder": {"strict_source_decode": true}}` flips the source policy
    /// and leaves everything else alone. The result is validated before it is returned.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Server port {} out of range", port))?;
            }
        }

        if let Some(decoder) = partial_config.get("decoder") {
            if let Some(codec) = decoder.get("codec").and_then(|v| v.as_str()) {
                self.decoder.codec = codec.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            }
            if let Some(rates) = decoder.get("supported_sample_rates") {
                self.decoder.supported_sample_rates = serde_json::from_value(rates.clone())?;
            }
            if let Some(channels) = decoder.get("max_channels").and_then(|v| v.as_u64()) {
                self.decoder.max_channels = u16::try_from(channels)
                    .map_err(|_| anyhow::anyhow!("Max channels {} out of range", channels))?;
            }
            if let Some(sessions) = decoder.get("max_sessions").and_then(|v| v.as_u64()) {
                self.decoder.max_sessions = sessions as usize;
            }
            if let Some(chunk) = decoder.get("default_chunk_size").and_then(|v| v.as_u64()) {
                self.decoder.default_chunk_size = chunk as usize;
            }
            if let Some(strict) = decoder.get("strict_source_decode").and_then(|v| v.as_bool()) {
                self.decoder.strict_source_decode = strict;
            }
            if let Some(timeout) = decoder.get("operation_timeout_ms").and_then(|v| v.as_u64()) {
                self.decoder.operation_timeout_ms = timeout;
            }
            if let Some(limit) = decoder.get("max_payload_bytes").and_then(|v| v.as_u64()) {
                self.decoder.max_payload_bytes = limit as usize;
            }
        }

        self.validate()?;
        Ok(())
    }

    /// Registry limits derived from the decoder section.
    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            supported_sample_rates: self.decoder.supported_sample_rates.clone(),
            max_channels: self.decoder.max_channels,
            max_sessions: self.decoder.max_sessions,
        }
    }

    pub fn source_policy(&self) -> SourcePolicy {
        SourcePolicy::from_strict(self.decoder.strict_source_decode)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.decoder.operation_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.decoder.codec, CodecKind::Pcm16);
        assert_eq!(config.source_policy(), SourcePolicy::Lenient);
        assert!(config.validate().is_ok());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.decoder.supported_sample_rates.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.decoder.default_chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.decoder.operation_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    /// Test that runtime configuration updates work correctly.
    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "decoder": {"strict_source_decode": true, "supported_sample_rates": [16000]}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.source_policy(), SourcePolicy::Strict);
        assert_eq!(config.session_limits().supported_sample_rates, vec![16000]);
        // Other fields should remain unchanged
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.decoder.max_sessions, 64);
    }

    #[test]
    fn test_config_update_rejects_invalid_values() {
        let mut config = AppConfig::default();
        assert!(config.update_from_json(r#"{"server": {"port": 70000}}"#).is_err());
        assert!(config.update_from_json(r#"{"decoder": {"codec": "mp3"}}"#).is_err());
        assert!(config.update_from_json(r#"{"decoder": {"max_sessions": 0}}"#).is_err());
    }

    #[test]
    fn test_defaults_render_as_toml() {
        let rendered = toml::to_string_pretty(&AppConfig::default()).unwrap();
        assert!(rendered.contains("[decoder]"));
        assert!(rendered.contains("codec = \"pcm16\""));
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, AppConfig::default());
    }
}
