//! camcast-server library crate.
//!
//! A WebSocket server that pushes every frame produced by a
//! [`camcast_core::FrameSource`] to all connected clients, and relays client
//! messages back to the application.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! FrameSource (capture thread)
//!         │ broadcast(frame)
//!         ▼
//! [camcast-server]
//!   ├── domain/            Pure types: ServerConfig, FrameEncoding, ControlCommand
//!   ├── application/       Message dispatch, start/stop control, base64 framing
//!   └── infrastructure/
//!         ├── ws_server/   Accept loop, broadcast fan-out, shutdown
//!         ├── session/     Per-session reader/writer task and bounded queue
//!         ├── registry/    Live session map
//!         └── config_file/ Optional TOML configuration
//!         │
//!         ▼
//! WebSocket clients (one binary or text message per frame)
//! ```
//!
//! # Layer rules
//!
//! - `domain` does no I/O and uses no async runtime.
//! - `application` depends on `domain` and `camcast-core`.
//! - `infrastructure` depends on all other layers plus `tokio` and
//!   `tokio-tungstenite`.

/// Domain layer: configuration and command types (no I/O).
pub mod domain;

/// Application layer: inbound dispatch and stream control.
pub mod application;

/// Infrastructure layer: WebSocket server, sessions, config file.
pub mod infrastructure;
