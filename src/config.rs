//! # Configuration Management
//!
//! This module handles loading and managing application configuration from
//! multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_SERVER_PORT, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! The defaults describe the single fixed ingest profile the server speaks:
//! mono 16-bit PCM at 22500 Hz, flushed every 50 chunks.

use crate::audio::accumulator::AccumulatorConfig;
use crate::audio::flush::PcmProfile;
use crate::audio::session::SessionSettings;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main application configuration that contains all settings.
///
/// Configuration is broken into logical groups (server, audio, buffering,
/// storage, performance) so each subsystem reads only its own section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub buffering: BufferingConfig,
    pub storage: StorageConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address or hostname to bind to; `0.0.0.0` accepts capture
///   clients from any interface
/// - `port`: TCP port the WebSocket endpoint listens on
/// - `keepalive_interval_secs`: seconds between `{"type": "ping"}` messages
///   on each active connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub keepalive_interval_secs: u64,
}

/// Fixed PCM profile declared by flushed WAV artifacts.
///
/// The server does not negotiate formats with clients; these values describe
/// what clients are expected to send and are stamped into every WAV header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

/// Accumulation and flush tuning.
///
/// ## Fields:
/// - `flush_threshold_chunks`: number of append messages collected before a
///   flush fires; the threshold trades artifact granularity against write
///   frequency
/// - `max_chunk_bytes`: upper bound on one decoded chunk; oversized appends
///   are rejected per-message so a single client cannot grow the buffer
///   without bound
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferingConfig {
    pub flush_threshold_chunks: usize,
    pub max_chunk_bytes: usize,
}

/// Artifact storage settings.
///
/// ## Fields:
/// - `output_dir`: root directory for session artifacts; each session writes
///   into its own subdirectory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub output_dir: String,
}

/// Performance tuning configuration.
///
/// ## Fields:
/// - `max_concurrent_sessions`: ceiling on simultaneously connected clients;
///   connections beyond it are refused at upgrade time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),     // Accept capture clients from any interface
                port: 8765,
                keepalive_interval_secs: 10,
            },
            audio: AudioConfig {
                sample_rate: 22500,              // Client capture cadence
                channels: 1,                     // Mono
                bit_depth: 16,                   // 16-bit little-endian PCM
            },
            buffering: BufferingConfig {
                flush_threshold_chunks: 50,      // One artifact pair per 50 appends
                max_chunk_bytes: 1_048_576,      // 1 MiB per decoded chunk
            },
            storage: StorageConfig {
                output_dir: "data".to_string(),
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 16,
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
    /// - `APP_SERVER_HOST=127.0.0.1`: override the bind host
    /// - `APP_BUFFERING_FLUSH_THRESHOLD_CHUNKS=100`: override the threshold
    /// - `HOST` / `PORT`: deployment-platform overrides without the prefix
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml if present
            .add_source(config::File::with_name("config").required(false))
            // 3. Environment variables with APP_ prefix
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject these without the APP_ prefix
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
    /// - Keepalive interval is not 0
    /// - The PCM profile is the one the flush sink can frame (16-bit, at
    ///   least one channel, nonzero sample rate)
    /// - Flush threshold and chunk bound are nonzero
    /// - At least one concurrent session is allowed
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.server.keepalive_interval_secs == 0 {
            return Err(anyhow::anyhow!("Keepalive interval must be greater than 0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rate must be greater than 0"));
        }

        if self.audio.channels == 0 {
            return Err(anyhow::anyhow!("Channel count must be greater than 0"));
        }

        if self.audio.bit_depth != 16 {
            return Err(anyhow::anyhow!(
                "Only 16-bit PCM is supported, got {} bits",
                self.audio.bit_depth
            ));
        }

        if self.buffering.flush_threshold_chunks == 0 {
            return Err(anyhow::anyhow!("Flush threshold must be greater than 0"));
        }

        if self.buffering.max_chunk_bytes == 0 {
            return Err(anyhow::anyhow!("Max chunk size must be greater than 0"));
        }

        if self.storage.output_dir.is_empty() {
            return Err(anyhow::anyhow!("Output directory cannot be empty"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are changed; for example
    /// `{"buffering": {"flush_threshold_chunks": 100}}` touches nothing else.
    /// The updated configuration is re-validated before it is accepted.
    ///
    /// Live sessions keep the settings they were created with; updates apply
    /// to sessions created afterwards.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
            if let Some(interval) = server.get("keepalive_interval_secs").and_then(|v| v.as_u64()) {
                self.server.keepalive_interval_secs = interval;
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(rate) = audio.get("sample_rate").and_then(|v| v.as_u64()) {
                self.audio.sample_rate = rate as u32;
            }
            if let Some(channels) = audio.get("channels").and_then(|v| v.as_u64()) {
                self.audio.channels = channels as u16;
            }
            if let Some(depth) = audio.get("bit_depth").and_then(|v| v.as_u64()) {
                self.audio.bit_depth = depth as u16;
            }
        }

        if let Some(buffering) = partial_config.get("buffering") {
            if let Some(threshold) = buffering
                .get("flush_threshold_chunks")
                .and_then(|v| v.as_u64())
            {
                self.buffering.flush_threshold_chunks = threshold as usize;
            }
            if let Some(max_bytes) = buffering.get("max_chunk_bytes").and_then(|v| v.as_u64()) {
                self.buffering.max_chunk_bytes = max_bytes as usize;
            }
        }

        if let Some(storage) = partial_config.get("storage") {
            if let Some(dir) = storage.get("output_dir").and_then(|v| v.as_str()) {
                self.storage.output_dir = dir.to_string();
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(sessions) = performance
                .get("max_concurrent_sessions")
                .and_then(|v| v.as_u64())
            {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
        }

        self.validate()?;
        Ok(())
    }

    /// Snapshot the session-facing settings for sessions created under this
    /// configuration.
    pub fn to_session_settings(&self) -> SessionSettings {
        SessionSettings {
            output_dir: PathBuf::from(&self.storage.output_dir),
            accumulator: AccumulatorConfig {
                flush_threshold_chunks: self.buffering.flush_threshold_chunks,
            },
            profile: PcmProfile {
                sample_rate: self.audio.sample_rate,
                channels: self.audio.channels,
                bit_depth: self.audio.bit_depth,
            },
            max_chunk_bytes: self.buffering.max_chunk_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8765);
        assert_eq!(config.server.keepalive_interval_secs, 10);
        assert_eq!(config.audio.sample_rate, 22500);
        assert_eq!(config.buffering.flush_threshold_chunks, 50);
        assert!(config.validate().is_ok());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.buffering.flush_threshold_chunks = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.bit_depth = 24;
        assert!(config.validate().is_err());
    }

    /// Test that runtime configuration updates work correctly.
    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"buffering": {"flush_threshold_chunks": 100}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.buffering.flush_threshold_chunks, 100);
        // Other fields should remain unchanged
        assert_eq!(config.server.port, 8765);
        assert_eq!(config.buffering.max_chunk_bytes, 1_048_576);
    }

    /// Updates that fail validation are rejected as a whole.
    #[test]
    fn test_config_update_rejects_invalid_values() {
        let mut config = AppConfig::default();
        let json = r#"{"audio": {"bit_depth": 8}}"#;
        assert!(config.update_from_json(json).is_err());
    }

    /// The session settings snapshot carries the buffering and audio groups.
    #[test]
    fn test_session_settings_snapshot() {
        let config = AppConfig::default();
        let settings = config.to_session_settings();
        assert_eq!(settings.accumulator.flush_threshold_chunks, 50);
        assert_eq!(settings.profile.sample_rate, 22500);
        assert_eq!(settings.max_chunk_bytes, 1_048_576);
        assert_eq!(settings.output_dir, PathBuf::from("data"));
    }
}
