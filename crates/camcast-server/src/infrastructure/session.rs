//! One client session: handle, lifecycle, and the per-session task.
//!
//! # Shape of a session
//!
//! ```text
//!   broadcast() ──try_send──► [bounded queue] ──► write_loop ──► WebSocket sink
//!                                                                     │
//!   dispatcher ◄── read_loop ◄────────────────────────────── WebSocket stream
//! ```
//!
//! The accept loop spawns [`run_session`] on the server's `TaskTracker`.  After
//! the handshake it runs the reader and writer halves concurrently and waits
//! for both.  Whichever half finishes first calls
//! [`SessionHandle::begin_close`], which cancels the other: the reader stops
//! reading, and the writer sends a Close frame before returning.  A client
//! that closes first therefore still gets its close reply.  The session then
//! leaves the registry and reaches [`SessionState::Closed`].
//!
//! # Backpressure
//!
//! The outbound queue holds `queue_depth` frames.  When it is full,
//! [`SessionHandle::try_deliver`] drops the *new* frame and returns
//! [`Delivery::Dropped`].  The frames already queued are delivered in order,
//! so a client that falls behind sees a gap rather than a stall.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use camcast_core::{SessionId, SessionState};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{accept_async, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::InboundMessage;
use crate::infrastructure::ws_server::{ServerContext, ServerError};

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

// ── Outbound frames ───────────────────────────────────────────────────────────

/// A frame as queued for one session.
///
/// Cloning is cheap: both variants share their payload across every session
/// queue.  The copy into a WebSocket message happens on the session's own
/// writer task, not on the broadcasting thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Binary(Bytes),
    Text(Arc<str>),
}

impl OutboundFrame {
    fn into_message(self) -> WsMessage {
        match self {
            OutboundFrame::Binary(bytes) => WsMessage::Binary(bytes.to_vec()),
            OutboundFrame::Text(text) => WsMessage::Text(text.to_string()),
        }
    }
}

/// Result of offering one frame to one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The frame is in the session's queue.
    Queued,
    /// The queue was full; the frame was discarded for this session only.
    Dropped,
    /// The session is closing or its writer has exited.
    Closed,
}

// ── Session handle ────────────────────────────────────────────────────────────

/// Shared view of one session, held by the registry and by the session task.
pub struct SessionHandle {
    id: SessionId,
    peer: SocketAddr,
    outbound: mpsc::Sender<OutboundFrame>,
    state: Mutex<SessionState>,
    cancel: CancellationToken,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl SessionHandle {
    /// Creates a handle in [`SessionState::Connecting`] and the receiving end
    /// of its outbound queue.
    ///
    /// The session's cancellation token is a child of `shutdown`, so
    /// cancelling the server cancels every session.
    pub fn new(
        peer: SocketAddr,
        queue_depth: usize,
        shutdown: &CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<OutboundFrame>) {
        let (outbound, rx) = mpsc::channel(queue_depth.max(1));
        let handle = Arc::new(Self {
            id: SessionId::new(),
            peer,
            outbound,
            state: Mutex::new(SessionState::Connecting),
            cancel: shutdown.child_token(),
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        });
        (handle, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Moves to `next` if the transition is allowed.  Returns whether the
    /// state changed.
    fn advance(&self, next: SessionState) -> bool {
        let mut state = self.state.lock();
        if *state == next {
            return false;
        }
        match state.transition(next) {
            Ok(s) => {
                *state = s;
                true
            }
            Err(e) => {
                debug!(session = %self.id, "{e}");
                false
            }
        }
    }

    pub fn mark_open(&self) -> bool {
        self.advance(SessionState::Open)
    }

    /// Enters `Closing` and cancels the session's tasks.  The writer sends a
    /// Close frame on its way out.
    pub fn begin_close(&self) -> bool {
        let changed = self.advance(SessionState::Closing);
        self.cancel.cancel();
        changed
    }

    pub fn mark_closed(&self) -> bool {
        self.cancel.cancel();
        self.advance(SessionState::Closed)
    }

    /// Offers `frame` to this session without waiting.
    pub fn try_deliver(&self, frame: OutboundFrame) -> Delivery {
        if self.state().is_closing_or_closed() {
            return Delivery::Closed;
        }
        match self.outbound.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish()
    }
}

// ── Session task ──────────────────────────────────────────────────────────────

/// Runs the complete lifecycle of one accepted connection.
///
/// Errors are logged here and never propagate to the accept loop.
pub(crate) async fn run_session(stream: TcpStream, peer: SocketAddr, ctx: Arc<ServerContext>) {
    let (handle, rx) = SessionHandle::new(peer, ctx.config.queue_depth, &ctx.shutdown);
    let id = handle.id();

    let ws = match handshake(stream, peer, &handle, &ctx).await {
        Ok(Some(ws)) => ws,
        Ok(None) => {
            debug!(session = %id, %peer, "shutdown during handshake");
            handle.mark_closed();
            return;
        }
        Err(e) => {
            warn!(session = %id, "{e}");
            ctx.stats.handshake_failures.fetch_add(1, Ordering::Relaxed);
            handle.mark_closed();
            return;
        }
    };

    handle.mark_open();
    ctx.registry.insert(Arc::clone(&handle));
    ctx.stats.sessions_opened.fetch_add(1, Ordering::Relaxed);
    info!(session = %id, %peer, sessions = ctx.registry.len(), "session open");

    let (sink, source) = ws.split();
    let (read_outcome, write_outcome) = tokio::join!(
        async {
            let r = read_loop(source, &handle, &ctx).await;
            handle.begin_close();
            r
        },
        async {
            let r = write_loop(sink, rx, &handle, &ctx).await;
            handle.begin_close();
            r
        },
    );
    let outcome = read_outcome.and(write_outcome);

    ctx.registry.remove(&id);
    handle.mark_closed();
    ctx.stats.sessions_closed.fetch_add(1, Ordering::Relaxed);

    match outcome {
        Ok(()) => info!(
            session = %id,
            %peer,
            sent = handle.frames_sent(),
            dropped = handle.frames_dropped(),
            "session closed"
        ),
        Err(e) => warn!(session = %id, %peer, "session closed with error: {e}"),
    }
}

/// Performs the WebSocket upgrade, bounded by the handshake timeout.
///
/// Returns `Ok(None)` if the session was cancelled first.
async fn handshake(
    stream: TcpStream,
    peer: SocketAddr,
    handle: &SessionHandle,
    ctx: &ServerContext,
) -> Result<Option<WebSocketStream<TcpStream>>, ServerError> {
    let limit = ctx.config.handshake_timeout;
    tokio::select! {
        _ = handle.cancel_token().cancelled() => Ok(None),
        res = timeout(limit, accept_async(stream)) => match res {
            Ok(Ok(ws)) => Ok(Some(ws)),
            Ok(Err(source)) => Err(ServerError::Handshake { peer, source }),
            Err(_) => Err(ServerError::HandshakeTimeout { peer, timeout: limit }),
        },
    }
}

/// Forwards inbound text messages to the dispatcher until the client goes
/// away or the session is cancelled.
async fn read_loop(
    mut source: WsSource,
    handle: &SessionHandle,
    ctx: &ServerContext,
) -> Result<(), ServerError> {
    let id = handle.id();
    let cancel = handle.cancel_token();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = source.next() => next,
        };
        let Some(next) = next else { break };

        let msg = match next {
            Ok(msg) => msg,
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Protocol(_)) => {
                debug!(session = %id, "client connection closed");
                return Ok(());
            }
            Err(source) => return Err(ServerError::SessionIo { session: id, source }),
        };

        match msg {
            WsMessage::Text(payload) => {
                let inbound = InboundMessage {
                    session_id: id,
                    payload,
                };
                if let Err(e) = ctx.dispatcher.dispatch(inbound) {
                    warn!(session = %id, "{e}");
                }
            }
            WsMessage::Binary(data) => {
                debug!(session = %id, "ignoring binary message ({} bytes)", data.len());
            }
            // tungstenite answers pings itself.
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            WsMessage::Close(frame) => {
                debug!(session = %id, ?frame, "close frame received");
                return Ok(());
            }
        }
    }

    debug!(session = %id, "client stream ended");
    Ok(())
}

/// Drains the outbound queue into the socket.  On cancellation it sends a
/// Close frame and returns.  If the client closed first, that send flushes
/// the close reply tungstenite has already queued.
async fn write_loop(
    mut sink: WsSink,
    mut rx: mpsc::Receiver<OutboundFrame>,
    handle: &SessionHandle,
    ctx: &ServerContext,
) -> Result<(), ServerError> {
    let id = handle.id();
    let cancel = handle.cancel_token();
    let write_timeout = ctx.config.write_timeout;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            frame = rx.recv() => frame,
        };
        let Some(frame) = next else { break };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            res = timeout(write_timeout, sink.send(frame.into_message())) => match res {
                Ok(Ok(())) => {
                    handle.frames_sent.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(source)) => return Err(ServerError::SessionIo { session: id, source }),
                Err(_) => {
                    return Err(ServerError::WriteTimeout {
                        session: id,
                        timeout: write_timeout,
                    })
                }
            },
        }
    }

    let close = WsMessage::Close(Some(CloseFrame {
        code: CloseCode::Away,
        reason: "server closing session".into(),
    }));
    match timeout(write_timeout, sink.send(close)).await {
        Ok(Ok(())) => debug!(session = %id, "close frame sent"),
        Ok(Err(e)) => debug!(session = %id, "close frame not sent: {e}"),
        Err(_) => debug!(session = %id, "close frame timed out"),
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
