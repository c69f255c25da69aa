//! Synthetic capture device producing a moving test pattern.
//!
//! Lets the server run end to end on machines without a camera.  Each grab
//! returns a diagonal colour gradient shifted by one step, so consecutive
//! frames differ and a viewer can see that the stream is live.

use std::thread;
use std::time::Duration;

use tracing::debug;

use super::{CaptureDevice, CaptureError, CaptureSettings, DeviceOpener};
use crate::domain::frame::{RawFrame, BYTES_PER_PIXEL};

/// A test-pattern camera.
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    tick: u64,
    /// Simulated sensor exposure time per grab.
    exposure: Duration,
    released: bool,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tick: 0,
            exposure: Duration::ZERO,
            released: false,
        }
    }

    /// Makes each grab block for `exposure`, like a real sensor would.
    pub fn with_exposure(mut self, exposure: Duration) -> Self {
        self.exposure = exposure;
        self
    }

    fn render(&self) -> RawFrame {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut pixels = Vec::with_capacity(w * h * BYTES_PER_PIXEL);
        let shift = self.tick as usize;
        for y in 0..h {
            for x in 0..w {
                let r = ((x + shift) * 255 / w.max(1)) as u8;
                let g = ((y + shift) * 255 / h.max(1)) as u8;
                let b = ((x + y + shift) % 256) as u8;
                pixels.extend_from_slice(&[r, g, b]);
            }
        }
        RawFrame::new(self.width, self.height, pixels)
    }
}

impl CaptureDevice for SyntheticCamera {
    fn grab(&mut self) -> Result<RawFrame, CaptureError> {
        if self.released {
            return Err(CaptureError::Released);
        }
        if !self.exposure.is_zero() {
            thread::sleep(self.exposure);
        }
        let frame = self.render();
        self.tick = self.tick.wrapping_add(1);
        Ok(frame)
    }

    fn release(&mut self) {
        if !self.released {
            debug!(frames = self.tick, "synthetic camera released");
            self.released = true;
        }
    }
}

/// Opens [`SyntheticCamera`]s for indices `0..device_count`.
#[derive(Debug, Clone)]
pub struct SyntheticOpener {
    device_count: u32,
}

impl SyntheticOpener {
    pub fn new(device_count: u32) -> Self {
        Self { device_count }
    }
}

impl Default for SyntheticOpener {
    fn default() -> Self {
        Self::new(1)
    }
}

impl DeviceOpener for SyntheticOpener {
    fn open(&self, settings: &CaptureSettings) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        if settings.index >= self.device_count {
            return Err(CaptureError::DeviceOpen {
                index: settings.index,
                reason: format!("only {} synthetic device(s) available", self.device_count),
            });
        }
        if settings.width == 0 || settings.height == 0 {
            return Err(CaptureError::DeviceOpen {
                index: settings.index,
                reason: format!("invalid resolution {}x{}", settings.width, settings.height),
            });
        }
        Ok(Box::new(SyntheticCamera::new(settings.width, settings.height)))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
