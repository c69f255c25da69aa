//! Maps client control commands onto the frame source.
//!
//! The binary spawns a [`ControlWorker`] and registers its
//! [`handler`](ControlWorker::handler) as the server's message handler.  A
//! `start` or `stop` from any session toggles streaming for everyone.
//!
//! Commands are queued to one dedicated thread and applied strictly in
//! arrival order, one at a time.  Stopping joins the capture thread, which can
//! take up to one frame interval, so the session reader that received the
//! command only enqueues it and moves on.
//!
//! # Why the indirection through [`StreamControl`]?
//!
//! The worker only needs start/stop/is-streaming.  Going through a trait lets
//! the tests below record commands without spinning up a capture thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use camcast_core::{FrameSource, SourceError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::application::dispatcher::{HandlerError, InboundMessage};
use crate::domain::control::ControlCommand;

/// The subset of [`FrameSource`] a control handler drives.
pub trait StreamControl: Send + Sync {
    fn start(&self) -> Result<bool, SourceError>;
    fn stop(&self);
    fn is_streaming(&self) -> bool;
}

impl StreamControl for FrameSource {
    fn start(&self) -> Result<bool, SourceError> {
        self.start_streaming()
    }

    fn stop(&self) {
        self.stop_streaming();
    }

    fn is_streaming(&self) -> bool {
        FrameSource::is_streaming(self)
    }
}

/// Applies one command.
///
/// # Errors
///
/// Returns [`HandlerError`] if the capture thread cannot be started.
pub fn apply_command(control: &dyn StreamControl, command: ControlCommand) -> Result<(), HandlerError> {
    match command {
        ControlCommand::Start => match control.start() {
            Ok(true) => info!("streaming started by client request"),
            Ok(false) => debug!("start ignored; already streaming"),
            Err(e) => return Err(HandlerError::new(e.to_string())),
        },
        ControlCommand::Stop => {
            if control.is_streaming() {
                control.stop();
                info!("streaming stopped by client request");
            } else {
                debug!("stop ignored; not streaming");
            }
        }
    }
    Ok(())
}

/// Single thread that applies queued [`ControlCommand`]s in order.
///
/// The thread exits once every sender is gone: the worker's own (dropped by
/// [`shutdown`](Self::shutdown)) and every handler built by
/// [`handler`](Self::handler).
pub struct ControlWorker {
    commands: mpsc::UnboundedSender<ControlCommand>,
    thread: JoinHandle<()>,
}

impl ControlWorker {
    /// Spawns the `camcast-control` thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be created.
    pub fn spawn(control: Arc<dyn StreamControl>) -> std::io::Result<Self> {
        let (commands, mut queue) = mpsc::unbounded_channel::<ControlCommand>();
        let thread = thread::Builder::new()
            .name("camcast-control".to_string())
            .spawn(move || {
                while let Some(command) = queue.blocking_recv() {
                    if let Err(e) = apply_command(control.as_ref(), command) {
                        warn!("{e}");
                    }
                }
                debug!("control worker exiting");
            })?;
        Ok(Self { commands, thread })
    }

    /// Builds a message handler that parses payloads as [`ControlCommand`]s
    /// and queues them for this worker.  Unrecognised payloads are logged and
    /// ignored.
    pub fn handler(&self) -> impl Fn(&InboundMessage) -> Result<(), HandlerError> + Send + Sync + 'static {
        let commands = self.commands.clone();
        move |message: &InboundMessage| {
            let Some(command) = ControlCommand::parse(&message.payload) else {
                warn!(
                    session = %message.session_id,
                    "ignoring unrecognised control message ({} bytes)",
                    message.payload.len()
                );
                return Ok(());
            };

            debug!(session = %message.session_id, ?command, "control command received");
            commands
                .send(command)
                .map_err(|_| HandlerError::new("control worker has stopped"))
        }
    }

    /// Drops the worker's sender and waits for queued commands to drain.
    ///
    /// Blocks until every handler from [`handler`](Self::handler) has also
    /// been dropped, so unregister the handler first.
    pub fn shutdown(self) {
        drop(self.commands);
        if self.thread.join().is_err() {
            warn!("control worker panicked");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
