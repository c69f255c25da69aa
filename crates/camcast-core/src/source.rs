//! FrameSource: the paced capture loop.
//!
//! A [`FrameSource`] owns one OS thread that opens the capture device, grabs a
//! frame, applies the configured [`Orientation`], encodes it, and hands the
//! result to a [`DeliveryCallback`] (normally the server's `broadcast`).  It
//! then waits for the next tick of a fixed period before grabbing again.
//!
//! # Failure containment
//!
//! | Failure                         | Effect                                   |
//! |---------------------------------|------------------------------------------|
//! | device cannot be opened         | logged; loop exits; no retry             |
//! | empty frame / acquisition error | logged; iteration skipped                |
//! | encoder error                   | logged; iteration skipped                |
//! | callback returns `Err` / panics | logged; loop continues with next frame   |
//!
//! # Start / stop semantics
//!
//! Both calls are idempotent.  [`FrameSource::stop_streaming`] wakes the loop
//! out of its pacing wait and joins the thread, so once it returns the
//! callback will not be invoked again.  The one exception is a stop requested
//! from inside the callback itself: the capture thread cannot join itself, so
//! the request only signals the loop, which exits after the callback returns.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureDevice, CaptureError, CaptureSettings, DeviceOpener};
use crate::domain::frame::Frame;
use crate::domain::orientation::Orientation;
use crate::encode::FrameEncoder;

/// Callback that receives every encoded frame.
pub type DeliveryCallback = Arc<dyn Fn(Frame) -> Result<(), DeliveryError> + Send + Sync>;

/// Error a [`DeliveryCallback`] may return.  The loop logs it and continues.
#[derive(Debug, Error)]
#[error("frame delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Error type for frame source control operations.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The OS refused to create the capture thread.
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Construction-time parameters for a [`FrameSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSourceConfig {
    pub capture: CaptureSettings,
    /// Period between consecutive grabs.  Bounds the produced frame rate.
    pub frame_interval: Duration,
    pub orientation: Orientation,
}

impl Default for FrameSourceConfig {
    fn default() -> Self {
        Self {
            capture: CaptureSettings::default(),
            frame_interval: Duration::from_millis(30),
            orientation: Orientation::FlipVertical,
        }
    }
}

/// Snapshot of the frame source counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Frames handed to the callback that returned `Ok`.
    pub frames_delivered: u64,
    /// Iterations skipped because of an empty frame, acquisition error, or
    /// encoder error.
    pub frames_skipped: u64,
    /// Callback invocations that returned `Err` or panicked.
    pub delivery_failures: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    skipped: AtomicU64,
    failures: AtomicU64,
}

/// Streaming flag plus a condition variable so the pacing wait can be cut
/// short by `stop_streaming`.
#[derive(Default)]
struct StreamSignal {
    streaming: Mutex<bool>,
    wake: Condvar,
}

impl StreamSignal {
    fn set(&self, value: bool) {
        *self.streaming.lock() = value;
        self.wake.notify_all();
    }

    fn is_streaming(&self) -> bool {
        *self.streaming.lock()
    }

    /// Waits until `deadline` or until streaming is switched off.
    /// Returns the streaming flag at wake-up.
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut streaming = self.streaming.lock();
        while *streaming {
            if self.wake.wait_until(&mut streaming, deadline).timed_out() {
                break;
            }
        }
        *streaming
    }
}

struct Shared {
    config: FrameSourceConfig,
    opener: Arc<dyn DeviceOpener>,
    encoder: Arc<dyn FrameEncoder>,
    deliver: DeliveryCallback,
    signal: StreamSignal,
    counters: Counters,
    /// Id of the running capture thread, used to detect re-entrant calls from
    /// inside the delivery callback.
    loop_thread: Mutex<Option<ThreadId>>,
}

/// Produces encoded frames at a fixed pace on a dedicated thread.
pub struct FrameSource {
    shared: Arc<Shared>,
    /// Serialises start/stop and owns the capture thread handle.
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FrameSource {
    /// Creates a stopped frame source.
    pub fn new(
        config: FrameSourceConfig,
        opener: Arc<dyn DeviceOpener>,
        encoder: Arc<dyn FrameEncoder>,
        deliver: DeliveryCallback,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                opener,
                encoder,
                deliver,
                signal: StreamSignal::default(),
                counters: Counters::default(),
                loop_thread: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &FrameSourceConfig {
        &self.shared.config
    }

    /// Starts the capture thread.
    ///
    /// Returns `Ok(true)` if a new loop was started and `Ok(false)` if one was
    /// already running (no-op).  A loop that exited on its own (device open
    /// failure) is reaped and replaced, so a later call retries the device.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Spawn`] if the thread cannot be created.
    pub fn start_streaming(&self) -> Result<bool, SourceError> {
        if self.called_from_capture_thread() {
            warn!("start_streaming called from inside the delivery callback; ignored");
            return Ok(false);
        }

        let mut worker = self.worker.lock();

        if let Some(handle) = worker.as_ref() {
            if !handle.is_finished() && self.shared.signal.is_streaming() {
                debug!("frame source already streaming");
                return Ok(false);
            }
        }
        if let Some(stale) = worker.take() {
            // Either finished already or signalled by a re-entrant stop; the
            // join returns promptly in both cases.
            if stale.join().is_err() {
                error!("previous capture thread panicked");
            }
        }

        self.shared.signal.set(true);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("camcast-capture".to_string())
            .spawn(move || capture_loop(shared));

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                info!(
                    camera_index = self.shared.config.capture.index,
                    interval_ms = self.shared.config.frame_interval.as_millis() as u64,
                    "frame source started"
                );
                Ok(true)
            }
            Err(e) => {
                self.shared.signal.set(false);
                Err(SourceError::Spawn(e))
            }
        }
    }

    /// Stops the capture thread and waits for it to exit.
    ///
    /// Idempotent.  After this returns the delivery callback is not invoked
    /// again (unless called from inside that callback; see module docs).
    pub fn stop_streaming(&self) {
        if self.called_from_capture_thread() {
            self.shared.signal.set(false);
            debug!("stop requested from inside the delivery callback; loop will exit");
            return;
        }

        // The flag is cleared under the worker lock so a concurrent
        // `start_streaming` cannot re-arm it between the clear and the join.
        let mut worker = self.worker.lock();
        self.shared.signal.set(false);
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                error!("capture thread panicked");
            }
            info!("frame source stopped");
        }
    }

    /// `true` while the capture loop is running or about to run.
    pub fn is_streaming(&self) -> bool {
        self.shared.signal.is_streaming()
    }

    /// Returns a snapshot of the loop counters.
    pub fn stats(&self) -> SourceStats {
        let c = &self.shared.counters;
        SourceStats {
            frames_delivered: c.delivered.load(Ordering::Relaxed),
            frames_skipped: c.skipped.load(Ordering::Relaxed),
            delivery_failures: c.failures.load(Ordering::Relaxed),
        }
    }

    fn called_from_capture_thread(&self) -> bool {
        *self.shared.loop_thread.lock() == Some(thread::current().id())
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop_streaming();
    }
}

// ── Capture loop ──────────────────────────────────────────────────────────────

fn capture_loop(shared: Arc<Shared>) {
    *shared.loop_thread.lock() = Some(thread::current().id());
    run_capture(&shared);
    *shared.loop_thread.lock() = None;
}

fn run_capture(shared: &Shared) {
    let settings = &shared.config.capture;

    let mut device = match shared.opener.open(settings) {
        Ok(device) => device,
        Err(e) => {
            error!(camera_index = settings.index, "{e}");
            shared.signal.set(false);
            return;
        }
    };

    info!(
        camera_index = settings.index,
        width = settings.width,
        height = settings.height,
        "capture device opened"
    );

    let interval = shared.config.frame_interval;
    let mut next_tick = Instant::now();

    while shared.signal.is_streaming() {
        shared.capture_once(device.as_mut());

        next_tick += interval;
        let now = Instant::now();
        if next_tick < now {
            // Fell behind (slow device or callback); don't burst to catch up.
            next_tick = now;
        }
        if !shared.signal.wait_until(next_tick) {
            break;
        }
    }

    device.release();
    info!(camera_index = settings.index, "capture device released");
}

impl Shared {
    fn capture_once(&self, device: &mut dyn CaptureDevice) {
        let mut raw = match device.grab() {
            Ok(raw) if raw.is_valid() => raw,
            Ok(_) | Err(CaptureError::EmptyFrame) => {
                warn!("empty frame captured, skipping");
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(e) => {
                warn!("{e}; skipping");
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        self.config.orientation.apply(&mut raw);

        let frame = match self.encoder.encode(&raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("failed to encode frame: {e}");
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        // The callback is application code; neither an error nor a panic may
        // take the capture thread down.
        let deliver = &self.deliver;
        match panic::catch_unwind(AssertUnwindSafe(|| deliver(frame))) {
            Ok(Ok(())) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                error!("{e}");
            }
            Err(_) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                error!("frame delivery callback panicked");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
