//! Domain layer for camcast-server.
//!
//! Pure types with no I/O: the server configuration and the control commands
//! understood by the binary.
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `TcpStream`, or `WebSocket` types
//! - File I/O or environment variable reading

pub mod config;
pub mod control;

pub use config::{FrameEncoding, ServerConfig};
pub use control::ControlCommand;
