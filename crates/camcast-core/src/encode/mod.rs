//! Still-image encoders.
//!
//! The capture loop hands every oriented [`RawFrame`] to a [`FrameEncoder`]
//! and broadcasts whatever bytes come back.  Nothing downstream inspects the
//! format.  JPEG or other codecs plug in by implementing the trait; the crate
//! ships a dependency-free PPM encoder so the pipeline works out of the box.

use thiserror::Error;

use crate::domain::frame::{Frame, RawFrame};

pub mod ppm;

pub use ppm::PpmEncoder;

/// Error type for encoding operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// The raw frame's buffer does not match its dimensions.
    #[error("cannot encode {width}x{height} frame with {len} pixel bytes")]
    InvalidFrame { width: u32, height: u32, len: usize },

    /// The encoder backend failed.
    #[error("encoder failure: {0}")]
    Backend(String),
}

/// Converts raw frames into encoded still images.
#[cfg_attr(test, mockall::automock)]
pub trait FrameEncoder: Send + Sync {
    /// Encodes one frame.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if the frame is malformed or the backend fails.
    /// The capture loop logs the error and skips the frame.
    fn encode(&self, frame: &RawFrame) -> Result<Frame, EncodeError>;
}
