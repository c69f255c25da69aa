//! Frame types.
//!
//! Two representations travel through the pipeline:
//!
//! - [`RawFrame`]: an uncompressed RGB image straight from a capture device.
//!   Owned and mutable so orientation transforms can work in place.
//! - [`Frame`]: one encoded still image.  The bytes are opaque to everything
//!   downstream of the encoder, and the type is cheap to clone because the
//!   buffer is reference counted ([`bytes::Bytes`]).  Every session queue holds
//!   a clone of the same allocation.

use bytes::Bytes;

/// Number of bytes per pixel in a [`RawFrame`] (packed RGB8).
pub const BYTES_PER_PIXEL: usize = 3;

/// One encoded still image, shared read-only by every consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
}

impl Frame {
    /// Wraps an encoded buffer.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Returns the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns a cheap handle to the underlying buffer.
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    /// Length of the encoded payload in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// `true` if the payload has no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<Bytes> for Frame {
    fn from(data: Bytes) -> Self {
        Self { data }
    }
}

impl From<&'static [u8]> for Frame {
    fn from(data: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(data))
    }
}

/// An uncompressed image as produced by a capture device.
///
/// Pixels are packed RGB8, row-major, top row first, with no row padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RawFrame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// A frame with no dimensions and no pixels.
    ///
    /// Devices return this when a grab produced nothing usable; the capture
    /// loop treats it as a glitch and skips the iteration.
    pub fn empty() -> Self {
        Self::new(0, 0, Vec::new())
    }

    /// A frame where every pixel has the same colour.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * BYTES_PER_PIXEL);
        for _ in 0..count {
            pixels.extend_from_slice(&rgb);
        }
        Self::new(width, height, pixels)
    }

    /// Expected buffer length for the declared dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    /// `true` if the frame has non-zero dimensions and a buffer that matches them.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.pixels.len() == self.expected_len()
    }

    /// Byte length of one row.
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    /// Returns the RGB value at `(x, y)`, or `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height || !self.is_valid() {
            return None;
        }
        let offset = y as usize * self.stride() + x as usize * BYTES_PER_PIXEL;
        Some([
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
        ])
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
