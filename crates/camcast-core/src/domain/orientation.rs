//! Fixed orientation transforms applied to every captured frame.
//!
//! Cameras are often mounted upside down or mirrored.  The transform is chosen
//! once at construction and applied in place before encoding, so it costs one
//! pass over the pixel buffer and no allocation.
//!
//! The default is [`Orientation::FlipVertical`] (mirror around the horizontal
//! axis), which matches a camera mounted upside down on the vehicle chassis.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::frame::{RawFrame, BYTES_PER_PIXEL};

/// Orientation transform applied to raw frames before encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Orientation {
    /// Leave the frame untouched.
    Normal,
    /// Swap rows top-to-bottom.
    #[default]
    FlipVertical,
    /// Swap columns left-to-right.
    FlipHorizontal,
    /// Both flips; equivalent to rotating by 180 degrees.
    Rotate180,
}

/// Returned when an orientation name cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown orientation '{0}' (expected normal, flip-vertical, flip-horizontal or rotate-180)")]
pub struct ParseOrientationError(String);

impl Orientation {
    /// Applies the transform in place.
    ///
    /// Invalid frames (see [`RawFrame::is_valid`]) are left untouched.
    pub fn apply(self, frame: &mut RawFrame) {
        if !frame.is_valid() {
            return;
        }
        match self {
            Orientation::Normal => {}
            Orientation::FlipVertical => flip_rows(frame),
            Orientation::FlipHorizontal => flip_columns(frame),
            Orientation::Rotate180 => {
                flip_rows(frame);
                flip_columns(frame);
            }
        }
    }

    /// The kebab-case name used in config files and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::Normal => "normal",
            Orientation::FlipVertical => "flip-vertical",
            Orientation::FlipHorizontal => "flip-horizontal",
            Orientation::Rotate180 => "rotate-180",
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Orientation {
    type Err = ParseOrientationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" | "none" => Ok(Orientation::Normal),
            "flip-vertical" | "vflip" => Ok(Orientation::FlipVertical),
            "flip-horizontal" | "hflip" => Ok(Orientation::FlipHorizontal),
            "rotate-180" | "rotate180" => Ok(Orientation::Rotate180),
            _ => Err(ParseOrientationError(s.to_string())),
        }
    }
}

fn flip_rows(frame: &mut RawFrame) {
    let stride = frame.stride();
    let height = frame.height as usize;
    for top in 0..height / 2 {
        let bottom = height - 1 - top;
        // `split_at_mut` hands out two disjoint mutable slices so the rows can
        // be swapped without a temporary buffer.
        let (upper, lower) = frame.pixels.split_at_mut(bottom * stride);
        upper[top * stride..(top + 1) * stride].swap_with_slice(&mut lower[..stride]);
    }
}

fn flip_columns(frame: &mut RawFrame) {
    let stride = frame.stride();
    let width = frame.width as usize;
    for row in frame.pixels.chunks_exact_mut(stride) {
        for left in 0..width / 2 {
            let right = width - 1 - left;
            for channel in 0..BYTES_PER_PIXEL {
                row.swap(left * BYTES_PER_PIXEL + channel, right * BYTES_PER_PIXEL + channel);
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
