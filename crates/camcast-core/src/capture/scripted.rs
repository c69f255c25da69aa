//! Scripted capture device for testing.
//!
//! Allows tests to drive the capture loop through an exact sequence of good
//! frames, empty frames, and acquisition errors without camera hardware.  A
//! shared [`DeviceProbe`] records how often the device was opened, grabbed,
//! and released so tests can assert on the loop's resource handling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{CaptureDevice, CaptureError, CaptureSettings, DeviceOpener};
use crate::domain::frame::RawFrame;

/// One scripted grab result.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Return this frame.
    Frame(RawFrame),
    /// Return [`RawFrame::empty`].
    Empty,
    /// Return [`CaptureError::Acquisition`] with this message.
    Error(String),
}

/// Counters shared between a [`ScriptedOpener`], its devices, and the test.
#[derive(Debug, Default)]
pub struct DeviceProbe {
    opens: AtomicUsize,
    grabs: AtomicUsize,
    releases: AtomicUsize,
}

impl DeviceProbe {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn grabs(&self) -> usize {
        self.grabs.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

/// Opens [`ScriptedDevice`]s that replay the same script.
///
/// Once a device has consumed its script it keeps returning a small valid
/// frame, so a streaming test can run for as long as it needs.
pub struct ScriptedOpener {
    script: Vec<ScriptStep>,
    fail_open: bool,
    probe: Arc<DeviceProbe>,
}

impl ScriptedOpener {
    /// An opener whose devices always return a valid 4x4 frame.
    pub fn new() -> Self {
        Self::with_script(Vec::new())
    }

    pub fn with_script(script: Vec<ScriptStep>) -> Self {
        Self {
            script,
            fail_open: false,
            probe: Arc::new(DeviceProbe::default()),
        }
    }

    /// An opener that always fails with [`CaptureError::DeviceOpen`].
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::new()
        }
    }

    /// Returns the probe shared with every device this opener creates.
    pub fn probe(&self) -> Arc<DeviceProbe> {
        Arc::clone(&self.probe)
    }
}

impl Default for ScriptedOpener {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceOpener for ScriptedOpener {
    fn open(&self, settings: &CaptureSettings) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(CaptureError::DeviceOpen {
                index: settings.index,
                reason: "scripted open failure".to_string(),
            });
        }
        Ok(Box::new(ScriptedDevice {
            steps: self.script.iter().cloned().collect(),
            probe: Arc::clone(&self.probe),
            released: false,
        }))
    }
}

/// A device that replays a [`ScriptStep`] queue.
pub struct ScriptedDevice {
    steps: VecDeque<ScriptStep>,
    probe: Arc<DeviceProbe>,
    released: bool,
}

impl CaptureDevice for ScriptedDevice {
    fn grab(&mut self) -> Result<RawFrame, CaptureError> {
        if self.released {
            return Err(CaptureError::Released);
        }
        self.probe.grabs.fetch_add(1, Ordering::SeqCst);
        match self.steps.pop_front() {
            Some(ScriptStep::Frame(frame)) => Ok(frame),
            Some(ScriptStep::Empty) => Ok(RawFrame::empty()),
            Some(ScriptStep::Error(message)) => Err(CaptureError::Acquisition(message)),
            None => Ok(RawFrame::solid(4, 4, [128, 128, 128])),
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.probe.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}
