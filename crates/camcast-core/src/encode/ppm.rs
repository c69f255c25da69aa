//! Binary PPM (netpbm `P6`) encoder.
//!
//! # Format
//!
//! ```text
//! P6\n<width> <height>\n255\n<width * height * 3 bytes of RGB>
//! ```
//!
//! Uncompressed, but every browser-side decoder that understands netpbm can
//! show it, and it needs no codec dependency.

use std::io::Write;

use super::{EncodeError, FrameEncoder};
use crate::domain::frame::{Frame, RawFrame};

/// Encodes raw RGB frames as binary PPM images.
#[derive(Debug, Clone, Copy, Default)]
pub struct PpmEncoder;

impl PpmEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl FrameEncoder for PpmEncoder {
    fn encode(&self, frame: &RawFrame) -> Result<Frame, EncodeError> {
        if !frame.is_valid() {
            return Err(EncodeError::InvalidFrame {
                width: frame.width,
                height: frame.height,
                len: frame.pixels.len(),
            });
        }
        let mut out = Vec::with_capacity(frame.pixels.len() + 32);
        write!(out, "P6\n{} {}\n255\n", frame.width, frame.height)
            .map_err(|e| EncodeError::Backend(e.to_string()))?;
        out.extend_from_slice(&frame.pixels);
        Ok(Frame::from(out))
    }
}
