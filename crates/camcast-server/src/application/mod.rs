//! Application layer for camcast-server.
//!
//! Knows *what* to do with inbound messages and outbound frames, but not
//! *how* they travel over the network.
//!
//! # Responsibilities
//!
//! - Dispatching inbound client messages to the registered handler and to
//!   subscribers
//! - Interpreting control commands and driving the frame source
//! - Base64 framing for text-mode frame delivery
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or accepting connections (that is infrastructure)
//! - WebSocket framing (handled by tokio-tungstenite)

pub mod dispatcher;
pub mod encoding;
pub mod stream_control;

pub use dispatcher::{HandlerError, InboundMessage, MessageDispatcher, MessageHandler};
pub use encoding::base64_encode;
pub use stream_control::{apply_command, ControlWorker, StreamControl};
