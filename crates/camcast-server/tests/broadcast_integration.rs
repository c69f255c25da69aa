//! End-to-end tests for the broadcast server using real WebSocket clients.
//!
//! Each test binds a server on `127.0.0.1:0`, connects one or more
//! `tokio-tungstenite` clients, and checks what they receive.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camcast_core::capture::SyntheticOpener;
use camcast_core::encode::PpmEncoder;
use camcast_core::{DeliveryCallback, Frame, FrameSource, FrameSourceConfig};
use camcast_server::application::{HandlerError, InboundMessage};
use camcast_server::domain::{FrameEncoding, ServerConfig};
use camcast_server::infrastructure::{AcceptLoopExit, BroadcastServer, ServerError};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const TIMEOUT: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn test_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".parse().expect("addr"),
        shutdown_grace: Duration::from_secs(2),
        ..ServerConfig::default()
    }
}

async fn boot(config: ServerConfig) -> (BroadcastServer, JoinHandle<AcceptLoopExit>) {
    let server = BroadcastServer::bind(config).await.expect("bind");
    let accept = server.start().expect("start");
    (server, accept)
}

async fn connect(server: &BroadcastServer) -> Client {
    let url = format!("ws://{}", server.local_addr());
    let (ws, _response) = timeout(TIMEOUT, connect_async(url))
        .await
        .expect("connect timed out")
        .expect("connect");
    ws
}

/// Sessions are registered just after the server side of the handshake
/// completes, which can trail the client side slightly.
async fn wait_for_sessions(server: &BroadcastServer, n: usize) {
    timeout(TIMEOUT, async {
        while server.session_count() != n {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("expected {n} sessions, have {}", server.session_count()));
}

/// Next data message within half a second, or `None` if the connection
/// closed, errored, or stayed silent.
async fn try_next_data(client: &mut Client) -> Option<Message> {
    timeout(Duration::from_millis(500), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(msg)) => return Some(msg),
                _ => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Next data message, skipping control frames.
async fn next_data(client: &mut Client) -> Message {
    timeout(TIMEOUT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(msg)) => return msg,
                Some(Err(e)) => panic!("client read error: {e}"),
                None => panic!("stream ended"),
            }
        }
    })
    .await
    .expect("no message within timeout")
}

async fn next_binary(client: &mut Client) -> Vec<u8> {
    match next_data(client).await {
        Message::Binary(data) => data,
        other => panic!("expected binary frame, got {other:?}"),
    }
}

/// Reads until the server closes the connection.
async fn expect_closed(client: &mut Client) {
    timeout(TIMEOUT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("server did not close the connection");
}

// ── Broadcast ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_every_open_session_receives_exact_frame_bytes() {
    // Arrange
    let (server, _accept) = boot(test_config()).await;
    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(connect(&server).await);
    }
    wait_for_sessions(&server, 3).await;
    let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

    // Act
    let report = server.broadcast(&Frame::from(payload.clone()));

    // Assert
    assert_eq!(report.delivered, 3);
    assert_eq!(report.dropped, 0);
    for client in &mut clients {
        assert_eq!(next_binary(client).await, payload);
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_dropped_session_is_reaped_and_others_still_receive() {
    // Arrange: sessions A and B
    let (server, _accept) = boot(test_config()).await;
    let a = connect(&server).await;
    let mut b = connect(&server).await;
    wait_for_sessions(&server, 2).await;

    // Act: A's connection disappears without a close handshake
    drop(a);
    timeout(TIMEOUT, async {
        while server.session_count() > 1 {
            server.broadcast(&Frame::from(vec![0u8; 16]));
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("dropped session was never removed");

    let marker = b"after-drop".to_vec();
    let report = server.broadcast(&Frame::from(marker.clone()));

    // Assert: B still receives, A is gone
    assert_eq!(report.delivered, 1);
    assert_eq!(server.session_count(), 1);
    loop {
        if next_binary(&mut b).await == marker {
            break;
        }
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_base64_text_mode_sends_text_frames() {
    let config = ServerConfig {
        frame_encoding: FrameEncoding::Base64Text,
        ..test_config()
    };
    let (server, _accept) = boot(config).await;
    let mut client = connect(&server).await;
    wait_for_sessions(&server, 1).await;

    server.broadcast(&Frame::from(b"foobar".to_vec()));

    assert_eq!(
        next_data(&mut client).await,
        Message::Text("Zm9vYmFy".to_string())
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_slow_consumer_does_not_block_broadcast() {
    // Arrange: one client never reads, one reads everything
    let config = ServerConfig {
        queue_depth: 2,
        ..test_config()
    };
    let (server, _accept) = boot(config).await;
    let _slow = connect(&server).await;
    let mut fast = connect(&server).await;
    wait_for_sessions(&server, 2).await;
    let big = Frame::from(vec![7u8; 1 << 20]);

    // Act: a burst far larger than the queues
    let started = Instant::now();
    let mut dropped = 0;
    for _ in 0..40 {
        dropped += server.broadcast(&big).dropped;
    }
    let elapsed = started.elapsed();

    // Assert: broadcast returned without waiting on either client
    assert!(elapsed < Duration::from_secs(1), "burst took {elapsed:?}");
    assert!(dropped > 0);
    assert_eq!(server.session_count(), 2);

    // The fast client still gets a later frame once its queue drains.
    let marker = b"marker".to_vec();
    let got_marker = timeout(TIMEOUT, async {
        loop {
            server.broadcast(&Frame::from(marker.clone()));
            if next_binary(&mut fast).await == marker {
                return;
            }
        }
    })
    .await;
    assert!(got_marker.is_ok(), "fast client never received the marker");

    server.shutdown().await;
}

// ── Inbound messages ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stop_message_invokes_handler_exactly_once() {
    // Arrange
    let (server, _accept) = boot(test_config()).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let payloads = Arc::new(Mutex::new(Vec::new()));
    let (c, p) = (Arc::clone(&calls), Arc::clone(&payloads));
    server.on_message(move |msg: &InboundMessage| {
        c.fetch_add(1, Ordering::SeqCst);
        p.lock().push(msg.payload.clone());
        Ok(())
    });
    let _idle = connect(&server).await;
    let mut sender = connect(&server).await;
    wait_for_sessions(&server, 2).await;

    // Act
    sender
        .send(Message::Text("stop".to_string()))
        .await
        .expect("send");

    // Assert
    timeout(TIMEOUT, async {
        while calls.load(Ordering::SeqCst) == 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("handler was not invoked");
    sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*payloads.lock(), vec!["stop".to_string()]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_messages_from_one_session_arrive_in_order() {
    let (server, _accept) = boot(test_config()).await;
    let mut inbound = server.subscribe();
    let mut client = connect(&server).await;
    wait_for_sessions(&server, 1).await;

    for i in 0..20 {
        client
            .send(Message::Text(format!("msg-{i}")))
            .await
            .expect("send");
    }

    for i in 0..20 {
        let msg = timeout(TIMEOUT, inbound.recv())
            .await
            .expect("timeout")
            .expect("recv");
        assert_eq!(msg.payload, format!("msg-{i}"));
        assert_eq!(server.session_ids(), vec![msg.session_id]);
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_handler_panic_keeps_session_alive() {
    // Arrange: handler panics on "boom", counts everything else
    let (server, _accept) = boot(test_config()).await;
    let handled = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&handled);
    server.on_message(move |msg: &InboundMessage| -> Result<(), HandlerError> {
        if msg.payload == "boom" {
            panic!("handler exploded");
        }
        h.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let mut client = connect(&server).await;
    wait_for_sessions(&server, 1).await;

    // Act
    client.send(Message::Text("boom".into())).await.expect("send");
    client.send(Message::Text("ok".into())).await.expect("send");

    // Assert
    timeout(TIMEOUT, async {
        while handled.load(Ordering::SeqCst) == 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("second message never handled");
    assert_eq!(server.session_count(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_binary_inbound_is_ignored() {
    let (server, _accept) = boot(test_config()).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    server.on_message(move |_msg: &InboundMessage| {
        c.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let mut client = connect(&server).await;
    wait_for_sessions(&server, 1).await;

    client
        .send(Message::Binary(vec![1, 2, 3]))
        .await
        .expect("send");
    client.send(Message::Text("x".into())).await.expect("send");

    timeout(TIMEOUT, async {
        while calls.load(Ordering::SeqCst) == 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("text message never handled");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    server.shutdown().await;
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_bind_conflict_returns_bind_error() {
    let (first, _accept) = boot(test_config()).await;
    let config = ServerConfig {
        bind_addr: first.local_addr(),
        ..test_config()
    };

    let result = BroadcastServer::bind(config).await;

    assert!(matches!(result, Err(ServerError::Bind { .. })));
    first.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_closes_only_that_session() {
    let (server, _accept) = boot(test_config()).await;
    let mut a = connect(&server).await;
    let mut b = connect(&server).await;
    wait_for_sessions(&server, 2).await;

    // Session ids are random; close whichever one and check the right
    // client saw it by looking at which one still receives frames.
    let victim = server.session_ids()[0];
    assert!(server.disconnect(&victim));
    wait_for_sessions(&server, 1).await;

    let payload = b"still-here".to_vec();
    assert_eq!(server.broadcast(&Frame::from(payload.clone())).delivered, 1);

    let (from_a, from_b) = tokio::join!(try_next_data(&mut a), try_next_data(&mut b));
    let delivered = [from_a, from_b]
        .into_iter()
        .filter(|m| matches!(m, Some(Message::Binary(d)) if *d == payload))
        .count();
    assert_eq!(delivered, 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_client_close_gets_close_reply() {
    // Arrange
    let (server, _accept) = boot(test_config()).await;
    let mut client = connect(&server).await;
    wait_for_sessions(&server, 1).await;

    // Act: client starts the closing handshake
    client.close(None).await.expect("send close");

    // Assert: the server answers with a Close frame instead of resetting
    let reply = timeout(TIMEOUT, client.next())
        .await
        .expect("no close reply within timeout");
    assert!(
        matches!(reply, Some(Ok(Message::Close(_)))),
        "expected a close reply, got {reply:?}"
    );
    wait_for_sessions(&server, 0).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_sessions_and_stops_accepting() {
    // Arrange
    let (server, accept) = boot(test_config()).await;
    let mut a = connect(&server).await;
    let mut b = connect(&server).await;
    wait_for_sessions(&server, 2).await;

    // Act
    server.shutdown().await;

    // Assert
    assert_eq!(server.session_count(), 0);
    assert_eq!(accept.await.expect("join"), AcceptLoopExit::Shutdown);
    expect_closed(&mut a).await;
    expect_closed(&mut b).await;

    // Broadcasting after shutdown is harmless.
    let report = server.broadcast(&Frame::from(vec![1u8]));
    assert_eq!(report.delivered, 0);

    let stats = server.stats();
    assert_eq!(stats.sessions_opened, 2);
    assert_eq!(stats.sessions_closed, 2);
}

#[tokio::test]
async fn test_client_that_never_handshakes_is_dropped() {
    let config = ServerConfig {
        handshake_timeout: Duration::from_millis(100),
        ..test_config()
    };
    let (server, _accept) = boot(config).await;

    let _raw = TcpStream::connect(server.local_addr()).await.expect("tcp");
    timeout(TIMEOUT, async {
        while server.stats().handshake_failures == 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("handshake never timed out");

    assert_eq!(server.session_count(), 0);
    server.shutdown().await;
}

// ── With a frame source ───────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_frame_source_frames_reach_clients() {
    // Arrange: synthetic camera → PPM → broadcast
    let (server, _accept) = boot(test_config()).await;
    let broadcaster = server.clone();
    let deliver: DeliveryCallback = Arc::new(move |frame: Frame| {
        broadcaster.broadcast(&frame);
        Ok(())
    });
    let mut source_config = FrameSourceConfig::default();
    source_config.capture.width = 16;
    source_config.capture.height = 8;
    source_config.frame_interval = Duration::from_millis(10);
    let source = FrameSource::new(
        source_config,
        Arc::new(SyntheticOpener::default()),
        Arc::new(PpmEncoder::new()),
        deliver,
    );
    let mut client = connect(&server).await;
    wait_for_sessions(&server, 1).await;

    // Act
    assert!(source.start_streaming().expect("start"));
    let frame = next_binary(&mut client).await;
    tokio::task::block_in_place(|| source.stop_streaming());

    // Assert
    assert!(frame.starts_with(b"P6\n16 8\n255\n"));
    assert_eq!(frame.len(), b"P6\n16 8\n255\n".len() + 16 * 8 * 3);
    assert!(!source.is_streaming());

    server.shutdown().await;
}
