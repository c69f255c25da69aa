//! WebSocket broadcast server: accept loop, fan-out, and shutdown.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting connections and spawning one tracked task per session
//!    (see [`run_session`](crate::infrastructure::session)).
//! 3. Fanning each broadcast frame out to every open session without waiting
//!    on any of them.
//! 4. Shutting down: stop accepting, close every session, and wait (bounded)
//!    for their tasks to finish.
//!
//! # Concurrency
//!
//! ```text
//!   FrameSource thread ──► broadcast() ──► registry snapshot ──► try_send × N
//!
//!   accept loop task ──► TaskTracker ──► session task × N
//!                                             │
//!   shutdown() ── cancel ────────────────────-┘ (child tokens)
//! ```
//!
//! [`BroadcastServer::broadcast`] is a plain synchronous function so it can be
//! called straight from the capture thread.  It takes the registry's read
//! lock once to clone the session list, then offers the frame to each session
//! queue with `try_send`.  It never awaits.
//!
//! # Accept errors
//!
//! A failed `accept()` is logged and retried after a short, growing backoff.
//! After `max_consecutive_accept_errors` failures with no success in between,
//! the listener is treated as dead and the loop exits with
//! [`AcceptLoopExit::ListenerFailed`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camcast_core::{Frame, SessionId};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::application::{base64_encode, HandlerError, InboundMessage, MessageDispatcher};
use crate::domain::{FrameEncoding, ServerConfig};
use crate::infrastructure::registry::SessionRegistry;
use crate::infrastructure::session::{run_session, Delivery, OutboundFrame};

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors raised by the broadcast server.
///
/// Only [`ServerError::Bind`] and [`ServerError::AlreadyStarted`] reach a
/// caller.  The others are contained in the accept loop or the session that
/// raised them and surface as log lines.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind WebSocket listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("WebSocket handshake with {peer} failed: {source}")]
    Handshake {
        peer: SocketAddr,
        #[source]
        source: WsError,
    },

    #[error("WebSocket handshake with {peer} timed out after {timeout:?}")]
    HandshakeTimeout { peer: SocketAddr, timeout: Duration },

    #[error("session {session} I/O error: {source}")]
    SessionIo {
        session: SessionId,
        #[source]
        source: WsError,
    },

    #[error("session {session} write stalled for {timeout:?}")]
    WriteTimeout { session: SessionId, timeout: Duration },

    #[error("accept loop already started")]
    AlreadyStarted,

    #[error("accept loop task failed: {0}")]
    AcceptTask(#[from] tokio::task::JoinError),
}

// ── Results and statistics ────────────────────────────────────────────────────

/// Why the accept loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptLoopExit {
    /// [`BroadcastServer::shutdown`] was called.
    Shutdown,
    /// Too many consecutive accept failures.
    ListenerFailed,
}

/// Outcome of one [`BroadcastServer::broadcast`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions whose queue accepted the frame.
    pub delivered: usize,
    /// Sessions whose queue was full.
    pub dropped: usize,
    /// Sessions found closed and removed from the registry.
    pub reaped: usize,
    /// `true` if the frame was empty and nothing was sent.
    pub skipped: bool,
}

#[derive(Debug, Default)]
pub(crate) struct ServerStats {
    pub(crate) connections_accepted: AtomicU64,
    pub(crate) accept_errors: AtomicU64,
    pub(crate) handshake_failures: AtomicU64,
    pub(crate) sessions_opened: AtomicU64,
    pub(crate) sessions_closed: AtomicU64,
    pub(crate) sessions_reaped: AtomicU64,
    pub(crate) frames_broadcast: AtomicU64,
    pub(crate) frames_queued: AtomicU64,
    pub(crate) frames_dropped: AtomicU64,
}

/// Point-in-time copy of the server counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStatsSnapshot {
    pub connections_accepted: u64,
    pub accept_errors: u64,
    pub handshake_failures: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub sessions_reaped: u64,
    pub frames_broadcast: u64,
    pub frames_queued: u64,
    pub frames_dropped: u64,
}

impl ServerStats {
    fn snapshot(&self) -> ServerStatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ServerStatsSnapshot {
            connections_accepted: get(&self.connections_accepted),
            accept_errors: get(&self.accept_errors),
            handshake_failures: get(&self.handshake_failures),
            sessions_opened: get(&self.sessions_opened),
            sessions_closed: get(&self.sessions_closed),
            sessions_reaped: get(&self.sessions_reaped),
            frames_broadcast: get(&self.frames_broadcast),
            frames_queued: get(&self.frames_queued),
            frames_dropped: get(&self.frames_dropped),
        }
    }
}

// ── Shared context ────────────────────────────────────────────────────────────

/// Everything a session task needs, shared through one `Arc`.
pub(crate) struct ServerContext {
    pub(crate) config: ServerConfig,
    pub(crate) registry: SessionRegistry,
    pub(crate) dispatcher: MessageDispatcher,
    pub(crate) shutdown: CancellationToken,
    pub(crate) stats: ServerStats,
}

// ── Server handle ─────────────────────────────────────────────────────────────

struct Inner {
    ctx: Arc<ServerContext>,
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    tracker: TaskTracker,
}

/// Cloneable handle to a bound broadcast server.
///
/// # Example
///
/// ```rust,no_run
/// use camcast_core::Frame;
/// use camcast_server::domain::ServerConfig;
/// use camcast_server::infrastructure::BroadcastServer;
///
/// # async fn run() -> Result<(), camcast_server::infrastructure::ServerError> {
/// let server = BroadcastServer::bind(ServerConfig::with_port(8080)).await?;
/// server.on_message(|msg| {
///     println!("{} says {}", msg.session_id, msg.payload);
///     Ok(())
/// });
/// let accept = server.start()?;
///
/// server.broadcast(&Frame::from(vec![1, 2, 3]));
///
/// server.shutdown().await;
/// let _ = accept.await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BroadcastServer {
    inner: Arc<Inner>,
}

impl BroadcastServer {
    /// Binds the listening socket.  No connections are accepted until
    /// [`start`](Self::start) or [`serve`](Self::serve).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address is in use or cannot be
    /// bound.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let addr = config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        info!("broadcast server listening on {local_addr}");

        let dispatcher = MessageDispatcher::new(config.inbound_channel_capacity);
        let ctx = Arc::new(ServerContext {
            config,
            registry: SessionRegistry::new(),
            dispatcher,
            shutdown: CancellationToken::new(),
            stats: ServerStats::default(),
        });

        Ok(Self {
            inner: Arc::new(Inner {
                ctx,
                local_addr,
                listener: Mutex::new(Some(listener)),
                tracker: TaskTracker::new(),
            }),
        })
    }

    /// The address actually bound.  Useful when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.ctx.config
    }

    /// Spawns the accept loop as a tracked background task.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AlreadyStarted`] on a second call.
    pub fn start(&self) -> Result<JoinHandle<AcceptLoopExit>, ServerError> {
        let listener = self
            .inner
            .listener
            .lock()
            .take()
            .ok_or(ServerError::AlreadyStarted)?;

        let ctx = Arc::clone(&self.inner.ctx);
        let tracker = self.inner.tracker.clone();
        Ok(self
            .inner
            .tracker
            .spawn(accept_loop(listener, ctx, tracker)))
    }

    /// Runs the accept loop until shutdown or listener failure.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AlreadyStarted`] if the loop is already running.
    pub async fn serve(&self) -> Result<AcceptLoopExit, ServerError> {
        Ok(self.start()?.await?)
    }

    /// Offers `frame` to every open session and returns immediately.
    ///
    /// Each session gets the frame as one WebSocket message (binary, or
    /// base64 text depending on [`ServerConfig::frame_encoding`]).  The message
    /// payload is built once and shared.  A full session queue drops the frame
    /// for that session only; a closed session is removed from the registry.
    /// Never fails and never blocks on a client.
    pub fn broadcast(&self, frame: &Frame) -> BroadcastReport {
        let ctx = &self.inner.ctx;
        let mut report = BroadcastReport::default();

        if frame.is_empty() {
            report.skipped = true;
            return report;
        }

        let sessions = ctx.registry.snapshot();
        ctx.stats.frames_broadcast.fetch_add(1, Ordering::Relaxed);
        if sessions.is_empty() {
            return report;
        }

        let outbound = match ctx.config.frame_encoding {
            FrameEncoding::Binary => OutboundFrame::Binary(frame.bytes()),
            FrameEncoding::Base64Text => {
                OutboundFrame::Text(Arc::from(base64_encode(frame.as_bytes())))
            }
        };

        for session in sessions {
            match session.try_deliver(outbound.clone()) {
                Delivery::Queued => report.delivered += 1,
                Delivery::Dropped => {
                    debug!(session = %session.id(), "queue full; frame dropped");
                    report.dropped += 1;
                }
                Delivery::Closed => {
                    session.begin_close();
                    if ctx.registry.remove(&session.id()).is_some() {
                        report.reaped += 1;
                        debug!(session = %session.id(), "reaped closed session");
                    }
                    session.mark_closed();
                }
            }
        }

        ctx.stats
            .frames_queued
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        ctx.stats
            .frames_dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        ctx.stats
            .sessions_reaped
            .fetch_add(report.reaped as u64, Ordering::Relaxed);

        report
    }

    /// Installs the inbound-message handler, replacing any previous one.
    ///
    /// The handler runs on the receiving session's reader task.  An error or
    /// panic is logged and the session keeps reading.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&InboundMessage) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.inner.ctx.dispatcher.set_handler(handler);
    }

    pub fn clear_handler(&self) {
        self.inner.ctx.dispatcher.clear_handler();
    }

    /// Receives every inbound message, independently of the handler.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.inner.ctx.dispatcher.subscribe()
    }

    pub fn session_count(&self) -> usize {
        self.inner.ctx.registry.len()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.inner.ctx.registry.ids()
    }

    /// Closes one session.  Returns `false` if it is not registered.
    pub fn disconnect(&self, id: &SessionId) -> bool {
        match self.inner.ctx.registry.get(id) {
            Some(session) => {
                info!(session = %id, "disconnecting session");
                session.begin_close();
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> ServerStatsSnapshot {
        self.inner.ctx.stats.snapshot()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.ctx.shutdown.is_cancelled()
    }

    /// Stops accepting, closes every session, and waits up to
    /// [`ServerConfig::shutdown_grace`] for all tracked tasks to finish.
    ///
    /// A `broadcast` racing with shutdown completes normally and skips the
    /// sessions already closed.  Calling `shutdown` twice is harmless.
    pub async fn shutdown(&self) {
        let ctx = &self.inner.ctx;
        let open = ctx.registry.len();
        info!(sessions = open, "shutting down broadcast server");

        ctx.shutdown.cancel();
        // Never started: drop the listener so the port is released.
        self.inner.listener.lock().take();

        self.inner.tracker.close();
        if timeout(ctx.config.shutdown_grace, self.inner.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.inner.tracker.len(),
                "session tasks did not finish within {:?}",
                ctx.config.shutdown_grace
            );
        }

        for session in ctx.registry.drain() {
            session.begin_close();
            session.mark_closed();
        }
        info!("broadcast server stopped");
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    tracker: TaskTracker,
) -> AcceptLoopExit {
    let mut errors = AcceptErrors::new(ctx.config.max_consecutive_accept_errors);

    loop {
        let accepted = tokio::select! {
            _ = ctx.shutdown.cancelled() => {
                info!("shutdown requested; accept loop stopping");
                return AcceptLoopExit::Shutdown;
            }
            res = listener.accept() => res,
        };

        match accepted {
            Ok((stream, peer)) => {
                errors.record_success();
                ctx.stats
                    .connections_accepted
                    .fetch_add(1, Ordering::Relaxed);
                debug!(%peer, "connection accepted");

                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%peer, "could not set TCP_NODELAY: {e}");
                }
                tracker.spawn(run_session(stream, peer, Arc::clone(&ctx)));
            }
            Err(source) => {
                ctx.stats.accept_errors.fetch_add(1, Ordering::Relaxed);
                let err = ServerError::Accept(source);

                let delay = match errors.record_failure() {
                    AcceptAction::GiveUp => {
                        error!(
                            "{err}; giving up after {} consecutive failures",
                            errors.consecutive()
                        );
                        return AcceptLoopExit::ListenerFailed;
                    }
                    AcceptAction::Retry(delay) => delay,
                };
                warn!("{err} ({} in a row)", errors.consecutive());

                tokio::select! {
                    _ = ctx.shutdown.cancelled() => return AcceptLoopExit::Shutdown,
                    _ = sleep(delay) => {}
                }
            }
        }
    }
}

/// What the accept loop does after a failed `accept()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptAction {
    Retry(Duration),
    GiveUp,
}

/// Counts consecutive accept failures against a limit.  A limit of `0`
/// retries forever.
#[derive(Debug)]
struct AcceptErrors {
    limit: u32,
    consecutive: u32,
}

impl AcceptErrors {
    fn new(limit: u32) -> Self {
        Self {
            limit,
            consecutive: 0,
        }
    }

    fn consecutive(&self) -> u32 {
        self.consecutive
    }

    fn record_success(&mut self) {
        self.consecutive = 0;
    }

    fn record_failure(&mut self) -> AcceptAction {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.limit > 0 && self.consecutive >= self.limit {
            AcceptAction::GiveUp
        } else {
            AcceptAction::Retry(accept_backoff(self.consecutive))
        }
    }
}

/// Delay after the `n`th consecutive accept failure: 10 ms doubling, capped
/// at one second.
fn accept_backoff(n: u32) -> Duration {
    let shift = n.saturating_sub(1).min(7);
    Duration::from_millis((10u64 << shift).min(1_000))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::session::SessionHandle;

    fn local_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().expect("addr"),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_accept_backoff_doubles_and_caps() {
        assert_eq!(accept_backoff(1), Duration::from_millis(10));
        assert_eq!(accept_backoff(2), Duration::from_millis(20));
        assert_eq!(accept_backoff(4), Duration::from_millis(80));
        assert_eq!(accept_backoff(8), Duration::from_millis(1_000));
        assert_eq!(accept_backoff(1_000), Duration::from_millis(1_000));
    }

    #[test]
    fn test_accept_errors_give_up_at_limit() {
        let mut errors = AcceptErrors::new(3);

        assert_eq!(errors.record_failure(), AcceptAction::Retry(Duration::from_millis(10)));
        assert_eq!(errors.record_failure(), AcceptAction::Retry(Duration::from_millis(20)));
        assert_eq!(errors.record_failure(), AcceptAction::GiveUp);
        assert_eq!(errors.consecutive(), 3);
    }

    #[test]
    fn test_accept_success_resets_failure_count() {
        // Arrange: one failure short of the limit
        let mut errors = AcceptErrors::new(3);
        errors.record_failure();
        errors.record_failure();

        // Act
        errors.record_success();

        // Assert: the limit is counted afresh and backoff restarts at 10 ms
        assert_eq!(errors.consecutive(), 0);
        assert_eq!(errors.record_failure(), AcceptAction::Retry(Duration::from_millis(10)));
        assert_eq!(errors.record_failure(), AcceptAction::Retry(Duration::from_millis(20)));
        assert_eq!(errors.record_failure(), AcceptAction::GiveUp);
    }

    #[test]
    fn test_accept_error_limit_zero_never_gives_up() {
        let mut errors = AcceptErrors::new(0);

        for _ in 0..10_000 {
            assert!(matches!(errors.record_failure(), AcceptAction::Retry(_)));
        }
        assert_eq!(errors.record_failure(), AcceptAction::Retry(Duration::from_millis(1_000)));
    }

    #[tokio::test]
    async fn test_broadcast_with_no_sessions_is_a_no_op() {
        let server = BroadcastServer::bind(local_config()).await.expect("bind");

        let report = server.broadcast(&Frame::from(vec![1, 2, 3]));

        assert_eq!(report, BroadcastReport::default());
        assert_eq!(server.stats().frames_broadcast, 1);
    }

    #[tokio::test]
    async fn test_empty_frame_is_skipped() {
        let server = BroadcastServer::bind(local_config()).await.expect("bind");

        let report = server.broadcast(&Frame::from(Vec::<u8>::new()));

        assert!(report.skipped);
        assert_eq!(server.stats().frames_broadcast, 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaps_closed_session_and_delivers_to_rest() {
        // Arrange: two registered sessions, one of which has lost its writer
        let server = BroadcastServer::bind(local_config()).await.expect("bind");
        let ctx = &server.inner.ctx;
        let peer = "127.0.0.1:1".parse().expect("addr");

        let (alive, mut alive_rx) = SessionHandle::new(peer, 4, &ctx.shutdown);
        let (dead, dead_rx) = SessionHandle::new(peer, 4, &ctx.shutdown);
        alive.mark_open();
        dead.mark_open();
        ctx.registry.insert(Arc::clone(&alive));
        ctx.registry.insert(Arc::clone(&dead));
        drop(dead_rx);

        // Act
        let report = server.broadcast(&Frame::from(vec![9, 9, 9]));

        // Assert
        assert_eq!(report.delivered, 1);
        assert_eq!(report.reaped, 1);
        assert_eq!(server.session_count(), 1);
        assert_eq!(dead.state(), camcast_core::SessionState::Closed);
        assert_eq!(
            alive_rx.try_recv().expect("frame"),
            OutboundFrame::Binary(bytes::Bytes::from_static(&[9, 9, 9]))
        );
    }

    #[tokio::test]
    async fn test_base64_mode_queues_text() {
        let config = ServerConfig {
            frame_encoding: FrameEncoding::Base64Text,
            ..local_config()
        };
        let server = BroadcastServer::bind(config).await.expect("bind");
        let ctx = &server.inner.ctx;
        let (s, mut rx) =
            SessionHandle::new("127.0.0.1:1".parse().expect("addr"), 4, &ctx.shutdown);
        s.mark_open();
        ctx.registry.insert(s);

        server.broadcast(&Frame::from(b"foo".to_vec()));

        assert_eq!(
            rx.try_recv().expect("frame"),
            OutboundFrame::Text(Arc::from("Zm9v"))
        );
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let server = BroadcastServer::bind(local_config()).await.expect("bind");
        let _accept = server.start().expect("first start");

        assert!(matches!(server.start(), Err(ServerError::AlreadyStarted)));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_accept_loop() {
        let server = BroadcastServer::bind(local_config()).await.expect("bind");
        let accept = server.start().expect("start");

        server.shutdown().await;

        assert_eq!(accept.await.expect("join"), AcceptLoopExit::Shutdown);
        assert!(server.is_shutting_down());
    }

    #[tokio::test]
    async fn test_disconnect_unknown_session_returns_false() {
        let server = BroadcastServer::bind(local_config()).await.expect("bind");
        assert!(!server.disconnect(&SessionId::new()));
    }
}
