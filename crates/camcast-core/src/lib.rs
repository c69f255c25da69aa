//! # camcast-core
//!
//! Shared library for camcast containing the frame types, the capture device
//! abstraction, still-image encoders, and the paced [`FrameSource`] that feeds
//! encoded frames to a delivery callback.
//!
//! This crate has no networking code. The WebSocket fan-out lives in
//! `camcast-server`, which plugs [`FrameSource`] into its broadcast path.
//!
//! # Architecture overview
//!
//! ```text
//! DeviceOpener ──open──► CaptureDevice ──grab──► RawFrame
//!                                                  │ Orientation::apply
//!                                                  ▼
//!                                   FrameEncoder::encode ──► Frame ──► DeliveryCallback
//! ```
//!
//! - **`domain`** – Pure value types: [`Frame`], [`RawFrame`], [`Orientation`],
//!   and the session identity / lifecycle types shared with the server.
//! - **`capture`** – The [`CaptureDevice`] and [`DeviceOpener`] traits plus a
//!   synthetic test-pattern camera and a scripted device for tests.
//! - **`encode`** – The [`FrameEncoder`] trait and a PPM still-image encoder.
//! - **`source`** – [`FrameSource`]: the capture thread with start/stop control.

pub mod capture;
pub mod domain;
pub mod encode;
pub mod source;

// Re-export the most-used types at the crate root so callers can write
// `camcast_core::Frame` instead of `camcast_core::domain::frame::Frame`.
pub use capture::{CaptureDevice, CaptureError, CaptureSettings, DeviceOpener};
pub use domain::frame::{Frame, RawFrame};
pub use domain::orientation::Orientation;
pub use domain::session::{InvalidTransition, SessionId, SessionState};
pub use encode::{EncodeError, FrameEncoder};
pub use source::{
    DeliveryCallback, DeliveryError, FrameSource, FrameSourceConfig, SourceError, SourceStats,
};
