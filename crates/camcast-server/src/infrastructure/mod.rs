//! Infrastructure layer for camcast-server.
//!
//! Handles all network and file I/O.
//!
//! # Responsibilities
//!
//! - Binding the TCP listener and running the accept loop
//! - Performing the WebSocket upgrade handshake
//! - Tracking live sessions and fanning frames out to them
//! - Spawning and shutting down per-session Tokio tasks
//! - Reading the optional TOML configuration file
//!
//! # What does NOT belong here?
//!
//! - Interpreting client messages (that is the application layer)
//! - Capturing or encoding frames (that is `camcast-core`)

pub mod config_file;
pub mod registry;
pub mod session;
pub mod ws_server;

pub use config_file::{ConfigError, FileConfig};
pub use registry::SessionRegistry;
pub use session::{Delivery, OutboundFrame, SessionHandle};
pub use ws_server::{
    AcceptLoopExit, BroadcastReport, BroadcastServer, ServerError, ServerStatsSnapshot,
};
