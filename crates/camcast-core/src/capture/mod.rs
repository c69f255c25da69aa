//! Capture device abstraction.
//!
//! The capture loop in [`crate::source`] never talks to camera hardware
//! directly.  It asks a [`DeviceOpener`] for a [`CaptureDevice`] and then calls
//! [`CaptureDevice::grab`] once per iteration.  Real camera backends live
//! outside this crate; two implementations are always compiled:
//!
//! | Module      | Device                | Used by                              |
//! |-------------|-----------------------|--------------------------------------|
//! | `synthetic` | moving test pattern   | the `camcast-server` binary, demos   |
//! | `scripted`  | replays a fixed script| unit and integration tests           |
//!
//! # Ownership
//!
//! A device is owned by the capture thread for its whole lifetime.  Nothing
//! else holds a reference, so the traits only need `Send`, not `Sync`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::frame::RawFrame;

pub mod scripted;
pub mod synthetic;

pub use scripted::{DeviceProbe, ScriptStep, ScriptedOpener};
pub use synthetic::{SyntheticCamera, SyntheticOpener};

/// Error type for capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The device could not be opened.  The capture loop gives up; it does
    /// not retry on its own.
    #[error("failed to open capture device {index}: {reason}")]
    DeviceOpen { index: u32, reason: String },

    /// A grab returned no usable image.  Transient; the loop skips the
    /// iteration.
    #[error("captured frame was empty")]
    EmptyFrame,

    /// The device reported a read failure.  Also treated as transient.
    #[error("frame acquisition failed: {0}")]
    Acquisition(String),

    /// `grab` was called after `release`.
    #[error("capture device has already been released")]
    Released,
}

/// Device configuration supplied at construction.
///
/// Defaults: camera 0, 640x480 MJPG at 30 fps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Index of the capture device (e.g. `/dev/video0` is index 0).
    pub index: u32,
    /// Requested frame width in pixels.
    pub width: u32,
    /// Requested frame height in pixels.
    pub height: u32,
    /// Requested device frame rate.  The frame source paces itself
    /// independently; this is a hint for the driver.
    pub fps: u32,
    /// Four-character pixel format code requested from the driver.
    pub fourcc: String,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            index: 0,
            width: 640,
            height: 480,
            fps: 30,
            fourcc: "MJPG".to_string(),
        }
    }
}

impl CaptureSettings {
    /// Packs [`fourcc`](Self::fourcc) into the little-endian `u32` form that
    /// V4L2 and most capture APIs expect.  Returns `None` unless the code is
    /// exactly four ASCII characters.
    pub fn fourcc_code(&self) -> Option<u32> {
        let bytes = self.fourcc.as_bytes();
        if bytes.len() != 4 || !bytes.iter().all(u8::is_ascii) {
            return None;
        }
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// An open capture device.
pub trait CaptureDevice: Send {
    /// Blocks until the next frame is available and returns it.
    ///
    /// Implementations may return [`RawFrame::empty`] or
    /// [`CaptureError::EmptyFrame`] for a dropped frame; both are skipped.
    fn grab(&mut self) -> Result<RawFrame, CaptureError>;

    /// Releases the underlying device.  Called exactly once by the capture
    /// loop when streaming stops.  Must be idempotent.
    fn release(&mut self);
}

/// Opens capture devices on demand.
///
/// The capture loop opens the device itself (on the capture thread) each time
/// streaming starts, so a stopped stream holds no device handle.
pub trait DeviceOpener: Send + Sync {
    /// Opens the device described by `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::DeviceOpen`] if the device is missing or busy.
    fn open(&self, settings: &CaptureSettings) -> Result<Box<dyn CaptureDevice>, CaptureError>;
}

impl<F> DeviceOpener for F
where
    F: Fn(&CaptureSettings) -> Result<Box<dyn CaptureDevice>, CaptureError> + Send + Sync,
{
    fn open(&self, settings: &CaptureSettings) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        self(settings)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let s = CaptureSettings::default();
        assert_eq!((s.index, s.width, s.height, s.fps), (0, 640, 480, 30));
        assert_eq!(s.fourcc, "MJPG");
    }

    #[test]
    fn test_fourcc_code_packs_little_endian() {
        let s = CaptureSettings::default();
        let expected = u32::from(b'M')
            | u32::from(b'J') << 8
            | u32::from(b'P') << 16
            | u32::from(b'G') << 24;
        assert_eq!(s.fourcc_code(), Some(expected));
    }

    #[test]
    fn test_fourcc_code_rejects_wrong_length() {
        let s = CaptureSettings {
            fourcc: "MJPEG".to_string(),
            ..CaptureSettings::default()
        };
        assert_eq!(s.fourcc_code(), None);
    }

    #[test]
    fn test_closure_can_act_as_device_opener() {
        // Arrange: a closure that always fails
        let opener = |settings: &CaptureSettings| -> Result<Box<dyn CaptureDevice>, CaptureError> {
            Err(CaptureError::DeviceOpen {
                index: settings.index,
                reason: "no such device".to_string(),
            })
        };

        // Act
        let result = opener.open(&CaptureSettings::default());

        // Assert
        assert!(matches!(result, Err(CaptureError::DeviceOpen { index: 0, .. })));
    }
}
