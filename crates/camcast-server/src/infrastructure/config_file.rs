//! Optional TOML configuration file.
//!
//! Every key is optional; anything missing falls back to the built-in default,
//! and command-line flags or `CAMCAST_*` environment variables override the
//! file (see `main.rs`).
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:8080"
//! queue_depth = 4
//! frame_encoding = "binary"        # or "base64-text"
//! handshake_timeout_ms = 5000
//! write_timeout_ms = 5000
//! shutdown_grace_ms = 3000
//! max_consecutive_accept_errors = 32
//!
//! [capture]
//! index = 0
//! width = 640
//! height = 480
//! fps = 30
//! fourcc = "MJPG"
//! frame_interval_ms = 30
//! orientation = "flip-vertical"
//! autostart = false
//!
//! [logging]
//! level = "info"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camcast_core::{CaptureSettings, FrameSourceConfig, Orientation};
use serde::Deserialize;
use thiserror::Error;

use crate::domain::{FrameEncoding, ServerConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level file layout.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server: ServerSection,
    pub capture: CaptureSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub bind_addr: SocketAddr,
    pub queue_depth: usize,
    pub frame_encoding: FrameEncoding,
    pub handshake_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
    pub max_consecutive_accept_errors: u32,
    pub inbound_channel_capacity: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerConfig::default().into()
    }
}

impl From<ServerConfig> for ServerSection {
    fn from(c: ServerConfig) -> Self {
        Self {
            bind_addr: c.bind_addr,
            queue_depth: c.queue_depth,
            frame_encoding: c.frame_encoding,
            handshake_timeout_ms: millis(c.handshake_timeout),
            write_timeout_ms: millis(c.write_timeout),
            shutdown_grace_ms: millis(c.shutdown_grace),
            max_consecutive_accept_errors: c.max_consecutive_accept_errors,
            inbound_channel_capacity: c.inbound_channel_capacity,
        }
    }
}

impl From<ServerSection> for ServerConfig {
    fn from(s: ServerSection) -> Self {
        Self {
            bind_addr: s.bind_addr,
            queue_depth: s.queue_depth,
            frame_encoding: s.frame_encoding,
            handshake_timeout: Duration::from_millis(s.handshake_timeout_ms),
            write_timeout: Duration::from_millis(s.write_timeout_ms),
            shutdown_grace: Duration::from_millis(s.shutdown_grace_ms),
            max_consecutive_accept_errors: s.max_consecutive_accept_errors,
            inbound_channel_capacity: s.inbound_channel_capacity,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureSection {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub fourcc: String,
    pub frame_interval_ms: u64,
    pub orientation: Orientation,
    /// Start streaming as soon as the server is up, without waiting for a
    /// client `start` command.
    pub autostart: bool,
}

impl Default for CaptureSection {
    fn default() -> Self {
        let source = FrameSourceConfig::default();
        Self {
            index: source.capture.index,
            width: source.capture.width,
            height: source.capture.height,
            fps: source.capture.fps,
            fourcc: source.capture.fourcc,
            frame_interval_ms: millis(source.frame_interval),
            orientation: source.orientation,
            autostart: false,
        }
    }
}

impl CaptureSection {
    pub fn to_source_config(&self) -> FrameSourceConfig {
        FrameSourceConfig {
            capture: CaptureSettings {
                index: self.index,
                width: self.width,
                height: self.height,
                fps: self.fps,
                fourcc: self.fourcc.clone(),
            },
            frame_interval: Duration::from_millis(self.frame_interval_ms),
            orientation: self.orientation,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl FileConfig {
    /// Reads and parses `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Parse`]
    /// if it is not valid for this schema.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
