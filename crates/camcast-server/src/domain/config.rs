//! Server configuration types.
//!
//! [`ServerConfig`] is the single source of truth for the broadcast server's
//! runtime settings.  It is a plain struct with no environment or file reads;
//! `main.rs` and [`crate::infrastructure::config_file`] populate it from CLI
//! arguments, environment variables, and an optional TOML file.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How an encoded frame is framed on the WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameEncoding {
    /// One binary message carrying the raw encoded bytes.
    #[default]
    Binary,
    /// One text message carrying the encoded bytes as standard base64.
    /// For clients that can only consume text frames.
    Base64Text,
}

/// Returned when a frame encoding name cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown frame encoding '{0}' (expected binary or base64-text)")]
pub struct ParseFrameEncodingError(String);

impl FromStr for FrameEncoding {
    type Err = ParseFrameEncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binary" => Ok(FrameEncoding::Binary),
            "base64-text" | "base64" | "text" => Ok(FrameEncoding::Base64Text),
            _ => Err(ParseFrameEncodingError(s.to_string())),
        }
    }
}

impl fmt::Display for FrameEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FrameEncoding::Binary => "binary",
            FrameEncoding::Base64Text => "base64-text",
        })
    }
}

/// All runtime configuration for the broadcast server.
///
/// Build this once at startup; the server wraps it in an `Arc` and shares it
/// with every session task.
///
/// # Example
///
/// ```rust
/// use camcast_server::domain::ServerConfig;
///
/// let cfg = ServerConfig::with_port(9000);
/// assert_eq!(cfg.bind_addr.port(), 9000);
/// assert_eq!(cfg.queue_depth, 4);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address and port the WebSocket listener binds to.
    pub bind_addr: SocketAddr,

    /// Capacity of each session's outbound frame queue.
    ///
    /// When a client falls this many frames behind, further frames for that
    /// client are dropped until it catches up (drop-newest).  Other clients
    /// are unaffected.
    pub queue_depth: usize,

    pub frame_encoding: FrameEncoding,

    /// Upper bound on the WebSocket upgrade exchange.  A client that opens a
    /// TCP connection and never completes the handshake is dropped after this.
    pub handshake_timeout: Duration,

    /// Upper bound on a single frame write.  A client whose socket stays
    /// blocked this long is treated as dead and its session is closed.
    pub write_timeout: Duration,

    /// How long [`shutdown`](crate::infrastructure::BroadcastServer::shutdown)
    /// waits for session tasks to send their Close frames and exit.
    pub shutdown_grace: Duration,

    /// The accept loop gives up after this many consecutive accept failures
    /// with no successful accept in between (the listener is considered dead).
    pub max_consecutive_accept_errors: u32,

    /// Buffer size of the channel behind `subscribe()`.  Slow subscribers
    /// skip messages once they fall this far behind.
    pub inbound_channel_capacity: usize,
}

impl ServerConfig {
    /// Default configuration listening on all interfaces at `port`.
    pub fn with_port(port: u16) -> Self {
        let mut cfg = Self::default();
        cfg.bind_addr.set_port(port);
        cfg
    }
}

impl Default for ServerConfig {
    /// | Field                          | Default        |
    /// |--------------------------------|----------------|
    /// | bind_addr                      | `0.0.0.0:8080` |
    /// | queue_depth                    | 4              |
    /// | frame_encoding                 | binary         |
    /// | handshake_timeout              | 5 seconds      |
    /// | write_timeout                  | 5 seconds      |
    /// | shutdown_grace                 | 3 seconds      |
    /// | max_consecutive_accept_errors  | 32             |
    /// | inbound_channel_capacity       | 64             |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            queue_depth: 4,
            frame_encoding: FrameEncoding::Binary,
            handshake_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(3),
            max_consecutive_accept_errors: 32,
            inbound_channel_capacity: 64,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_port_is_8080() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert!(cfg.bind_addr.ip().is_unspecified());
    }

    #[test]
    fn test_with_port_keeps_other_defaults() {
        let cfg = ServerConfig::with_port(9001);
        assert_eq!(cfg.bind_addr.port(), 9001);
        assert_eq!(cfg.queue_depth, ServerConfig::default().queue_depth);
    }

    #[test]
    fn test_default_frame_encoding_is_binary() {
        assert_eq!(ServerConfig::default().frame_encoding, FrameEncoding::Binary);
    }

    #[test]
    fn test_frame_encoding_parse_accepts_aliases() {
        assert_eq!("binary".parse::<FrameEncoding>(), Ok(FrameEncoding::Binary));
        assert_eq!("BASE64".parse::<FrameEncoding>(), Ok(FrameEncoding::Base64Text));
        assert_eq!("text".parse::<FrameEncoding>(), Ok(FrameEncoding::Base64Text));
    }

    #[test]
    fn test_frame_encoding_parse_rejects_unknown() {
        assert!("jpeg".parse::<FrameEncoding>().is_err());
    }

    #[test]
    fn test_frame_encoding_display_matches_serde_name() {
        assert_eq!(FrameEncoding::Base64Text.to_string(), "base64-text");
        assert_eq!(FrameEncoding::Binary.to_string(), "binary");
    }
}
