//! Inbound message dispatch.
//!
//! Every text message a client sends is wrapped in an [`InboundMessage`] and
//! passed to [`MessageDispatcher::dispatch`] by that session's reader.  The
//! dispatcher delivers it to:
//!
//! 1. The single registered handler (`on_message`), if any.  Last
//!    registration wins.
//! 2. Every `subscribe()` listener, through a `tokio::sync::broadcast`
//!    channel.
//!
//! The handler runs synchronously on the reader task, so messages from one
//! session reach it in the order they were received.  A handler that returns
//! an error or panics affects only that one message.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use camcast_core::SessionId;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;

/// One message received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Session that sent the message.
    pub session_id: SessionId,
    /// The text payload, verbatim.
    pub payload: String,
}

/// Error returned by (or synthesised for) a failing message handler.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("message handler failed: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// The inbound-message callback.
pub type MessageHandler = Arc<dyn Fn(&InboundMessage) -> Result<(), HandlerError> + Send + Sync>;

/// Holds the registered handler and the subscriber channel.
pub struct MessageDispatcher {
    handler: RwLock<Option<MessageHandler>>,
    listeners: broadcast::Sender<InboundMessage>,
}

impl MessageDispatcher {
    /// Creates a dispatcher with no handler.  `capacity` bounds how far a
    /// subscriber may lag before it starts missing messages.
    pub fn new(capacity: usize) -> Self {
        let (listeners, _) = broadcast::channel(capacity.max(1));
        Self {
            handler: RwLock::new(None),
            listeners,
        }
    }

    /// Installs `handler`, replacing any previous one.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&InboundMessage) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let handler: MessageHandler = Arc::new(handler);
        *self.handler.write() = Some(handler);
    }

    /// Removes the handler.  Messages are still sent to subscribers.
    pub fn clear_handler(&self) {
        *self.handler.write() = None;
    }

    /// Returns a receiver that sees every inbound message from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.listeners.subscribe()
    }

    /// Delivers `message` to the handler and to subscribers.
    ///
    /// Returns `Ok(true)` if a handler ran successfully and `Ok(false)` if no
    /// handler is installed.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] if the handler returned an error or panicked.
    /// Subscribers still receive the message in that case.
    pub fn dispatch(&self, message: InboundMessage) -> Result<bool, HandlerError> {
        // Clone the Arc so the lock is not held while user code runs; the
        // handler may itself call `set_handler`.
        let handler = self.handler.read().clone();

        let outcome = match handler {
            Some(handler) => {
                match panic::catch_unwind(AssertUnwindSafe(|| handler(&message))) {
                    Ok(Ok(())) => Ok(true),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(HandlerError::new("handler panicked")),
                }
            }
            None => Ok(false),
        };

        // `send` only fails when nobody is subscribed.
        let _ = self.listeners.send(message);

        outcome
    }
}

impl Default for MessageDispatcher {
    fn default() -> Self {
        Self::new(64)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
