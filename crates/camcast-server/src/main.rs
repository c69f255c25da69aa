//! camcast-server: capture frames and broadcast them over WebSocket.
//!
//! Opens a capture device, encodes each frame, and pushes it to every
//! connected WebSocket client.  Clients control streaming by sending `start`
//! or `stop` (plain text, or `{"command": "start"}`).
//!
//! # Usage
//!
//! ```text
//! camcast-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>            TOML configuration file
//!   --port <PORT>              WebSocket listener port [default: 8080]
//!   --bind <IP>                Listener address [default: 0.0.0.0]
//!   --camera-index <N>         Capture device index [default: 0]
//!   --width <PX> --height <PX> Capture resolution [default: 640x480]
//!   --fps <N>                  Requested device frame rate [default: 30]
//!   --frame-interval-ms <MS>   Pacing between grabs [default: 30]
//!   --orientation <O>          normal | flip-vertical | flip-horizontal | rotate-180
//!   --frame-encoding <E>       binary | base64-text
//!   --queue-depth <N>          Per-client outbound queue [default: 4]
//!   --autostart                Stream immediately instead of waiting for `start`
//!   --log-level <FILTER>       Used when RUST_LOG is unset [default: info]
//! ```
//!
//! # Precedence
//!
//! Command-line flag, then `CAMCAST_*` environment variable, then the
//! `--config` file, then the built-in default.
//!
//! | Variable                   | Flag                  |
//! |----------------------------|-----------------------|
//! | `CAMCAST_CONFIG`           | `--config`            |
//! | `CAMCAST_PORT`             | `--port`              |
//! | `CAMCAST_BIND`             | `--bind`              |
//! | `CAMCAST_CAMERA_INDEX`     | `--camera-index`      |
//! | `CAMCAST_WIDTH`            | `--width`             |
//! | `CAMCAST_HEIGHT`           | `--height`            |
//! | `CAMCAST_FPS`              | `--fps`               |
//! | `CAMCAST_FRAME_INTERVAL_MS`| `--frame-interval-ms` |
//! | `CAMCAST_ORIENTATION`      | `--orientation`       |
//! | `CAMCAST_FRAME_ENCODING`   | `--frame-encoding`    |
//! | `CAMCAST_QUEUE_DEPTH`      | `--queue-depth`       |
//! | `CAMCAST_AUTOSTART`        | `--autostart`         |
//! | `CAMCAST_LOG`              | `--log-level`         |
//!
//! # Shutdown
//!
//! Ctrl+C stops the capture thread first (so no frame is produced after
//! that), then closes every session and waits for their tasks.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use camcast_core::capture::SyntheticOpener;
use camcast_core::encode::PpmEncoder;
use camcast_core::{DeliveryCallback, Frame, FrameSource, FrameSourceConfig, Orientation};
use camcast_server::application::{ControlWorker, StreamControl};
use camcast_server::domain::{FrameEncoding, ServerConfig};
use camcast_server::infrastructure::{AcceptLoopExit, BroadcastServer, FileConfig};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Capture frames and broadcast them to WebSocket clients.
///
/// Every option is optional; unset options fall back to the config file and
/// then to built-in defaults.
#[derive(Debug, Parser)]
#[command(
    name = "camcast-server",
    about = "Broadcast live camera frames to WebSocket clients",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "CAMCAST_CONFIG")]
    config: Option<PathBuf>,

    /// TCP port for the WebSocket listener.
    #[arg(long, env = "CAMCAST_PORT")]
    port: Option<u16>,

    /// IP address to bind.  `0.0.0.0` accepts connections on every interface.
    #[arg(long, env = "CAMCAST_BIND")]
    bind: Option<String>,

    #[arg(long, env = "CAMCAST_CAMERA_INDEX")]
    camera_index: Option<u32>,

    #[arg(long, env = "CAMCAST_WIDTH")]
    width: Option<u32>,

    #[arg(long, env = "CAMCAST_HEIGHT")]
    height: Option<u32>,

    /// Frame rate requested from the device.  Actual pacing is set by
    /// `--frame-interval-ms`.
    #[arg(long, env = "CAMCAST_FPS")]
    fps: Option<u32>,

    /// Minimum time between consecutive grabs.
    #[arg(long, env = "CAMCAST_FRAME_INTERVAL_MS")]
    frame_interval_ms: Option<u64>,

    #[arg(long, env = "CAMCAST_ORIENTATION")]
    orientation: Option<Orientation>,

    #[arg(long, env = "CAMCAST_FRAME_ENCODING")]
    frame_encoding: Option<FrameEncoding>,

    /// Frames buffered per client before new frames are dropped for it.
    #[arg(long, env = "CAMCAST_QUEUE_DEPTH")]
    queue_depth: Option<usize>,

    /// Start streaming at boot instead of waiting for a client `start`.
    #[arg(long, env = "CAMCAST_AUTOSTART")]
    autostart: bool,

    /// `tracing` filter used when `RUST_LOG` is unset.
    #[arg(long, env = "CAMCAST_LOG")]
    log_level: Option<String>,
}

/// Fully resolved runtime settings.
#[derive(Debug)]
struct Settings {
    server: ServerConfig,
    source: FrameSourceConfig,
    autostart: bool,
    log_level: String,
}

impl Cli {
    /// Layers the CLI over the config file (if any) over defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// `--bind` is not a valid IP address.
    fn into_settings(self) -> anyhow::Result<Settings> {
        let file = match &self.config {
            Some(path) => FileConfig::load(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?,
            None => FileConfig::default(),
        };

        let autostart = self.autostart || file.capture.autostart;
        let log_level = self.log_level.unwrap_or(file.logging.level);

        let mut server = ServerConfig::from(file.server);
        if let Some(bind) = &self.bind {
            let ip: IpAddr = bind
                .parse()
                .with_context(|| format!("invalid bind address: '{bind}'"))?;
            server.bind_addr = SocketAddr::new(ip, server.bind_addr.port());
        }
        if let Some(port) = self.port {
            server.bind_addr.set_port(port);
        }
        if let Some(encoding) = self.frame_encoding {
            server.frame_encoding = encoding;
        }
        if let Some(depth) = self.queue_depth {
            server.queue_depth = depth;
        }

        let mut source = file.capture.to_source_config();
        if let Some(index) = self.camera_index {
            source.capture.index = index;
        }
        if let Some(width) = self.width {
            source.capture.width = width;
        }
        if let Some(height) = self.height {
            source.capture.height = height;
        }
        if let Some(fps) = self.fps {
            source.capture.fps = fps;
        }
        if let Some(ms) = self.frame_interval_ms {
            source.frame_interval = Duration::from_millis(ms);
        }
        if let Some(orientation) = self.orientation {
            source.orientation = orientation;
        }

        Ok(Settings {
            server,
            source,
            autostart,
            log_level,
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Cli::parse().into_settings()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_level)),
        )
        .init();

    info!(
        "camcast-server starting: listen={}, camera={}, {}x{} every {:?}, encoding={}",
        settings.server.bind_addr,
        settings.source.capture.index,
        settings.source.capture.width,
        settings.source.capture.height,
        settings.source.frame_interval,
        settings.server.frame_encoding,
    );

    let server = BroadcastServer::bind(settings.server)
        .await
        .context("failed to start broadcast server")?;

    // Capture thread → every session queue.
    let broadcaster = server.clone();
    let deliver: DeliveryCallback = Arc::new(move |frame: Frame| {
        broadcaster.broadcast(&frame);
        Ok(())
    });
    let source = Arc::new(FrameSource::new(
        settings.source,
        Arc::new(SyntheticOpener::default()),
        Arc::new(PpmEncoder::new()),
        deliver,
    ));

    let control: Arc<dyn StreamControl> = source.clone();
    let control_worker = ControlWorker::spawn(control).context("failed to spawn control worker")?;
    server.on_message(control_worker.handler());

    let mut accept = server.start()?;

    if settings.autostart {
        source
            .start_streaming()
            .context("failed to start capture thread")?;
    }

    let accept_finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("received Ctrl+C; shutting down"),
                Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
            }
            false
        }
        exit = &mut accept => {
            match exit {
                Ok(AcceptLoopExit::ListenerFailed) => error!("listener failed; shutting down"),
                Ok(AcceptLoopExit::Shutdown) => {}
                Err(e) => error!("accept loop task failed: {e}"),
            }
            true
        }
    };

    // Drops the handler's sender so the control worker can drain and exit.
    server.clear_handler();

    let stopper = Arc::clone(&source);
    tokio::task::spawn_blocking(move || {
        control_worker.shutdown();
        stopper.stop_streaming();
    })
    .await
    .context("capture thread did not stop cleanly")?;

    server.shutdown().await;
    if !accept_finished {
        let _ = accept.await;
    }

    let source_stats = source.stats();
    let server_stats = server.stats();
    info!(
        frames_delivered = source_stats.frames_delivered,
        frames_skipped = source_stats.frames_skipped,
        sessions = server_stats.sessions_opened,
        frames_dropped = server_stats.frames_dropped,
        "camcast-server stopped"
    );
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
