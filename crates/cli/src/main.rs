//! Process entry point (SPEC_FULL.md §2/§6/§9): parses CLI flags, wires
//! the store, line list, and SIP/RTP endpoint together, installs the
//! graceful-then-forced signal handler, and runs until shutdown.

mod logging;

use std::net::{IpAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use whisper_call_engine::line_manager::ManagedLine;
use whisper_call_engine::{bind_listener_socket, Endpoint, LineState, Store};
use whisper_rtp_core::wav::MulawWav;

/// A single-endpoint SIP user agent bridging PBX calls to audio
/// processors over shared memory.
#[derive(Parser, Debug)]
#[command(name = "whisper-sip")]
#[command(about = "SIP/RTP media-bridge voice assistant engine")]
#[command(version)]
struct Args {
    /// Path to the external SQLite store.
    #[arg(long)]
    db: String,

    /// Operate on a single line only (by id). If omitted, every enabled
    /// line in the store is managed.
    #[arg(long = "line-id")]
    line_id: Option<u32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// UDP port the SIP listener binds. 0 (the default) lets the OS pick
    /// one; registration sockets then share whichever port results.
    #[arg(long, default_value_t = 0)]
    sip_port: u16,
}

static ENDPOINT_HANDLE: OnceLock<Weak<Endpoint>> = OnceLock::new();

fn main() {
    let args = Args::parse();
    if let Err(e) = logging::setup(&args.log_level) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(1);
    }

    match run(args) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!(%e, "initialization failed");
            std::process::exit(1);
        }
    }
}

fn run(args: Args) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "starting whisper-sip");

    let store = Arc::new(Store::open(&args.db).context("failed to open external store")?);

    let mut configs = store.get_all_sip_lines().context("failed to load line configuration")?;
    if let Some(line_id) = args.line_id {
        configs.retain(|c| c.line_id == line_id);
        if configs.is_empty() {
            anyhow::bail!("no line with id {line_id} found in the store");
        }
    }
    let lines: Arc<Vec<ManagedLine>> = Arc::new(
        configs
            .into_iter()
            .map(|config| ManagedLine {
                config: parking_lot::Mutex::new(config),
                state: parking_lot::Mutex::new(LineState::new()),
            })
            .collect(),
    );

    let socket = bind_listener_socket(args.sip_port).context("failed to bind SIP listener socket")?;
    let bound_port = socket.local_addr().context("failed to read bound SIP port")?.port();
    let local_ip = discover_local_ip(&lines).context("failed to determine local IP")?;
    info!(port = bound_port, %local_ip, "sip listener bound");

    let silence = load_silence_wav();

    let endpoint = Arc::new(Endpoint::new(socket, bound_port, local_ip, lines, Arc::clone(&store), silence));
    let _ = ENDPOINT_HANDLE.set(Arc::downgrade(&endpoint));
    install_signal_handler();

    let background = Endpoint::spawn_background_threads(&endpoint);
    endpoint.listener_loop();

    join_with_budget(background, SHUTDOWN_JOIN_BUDGET);
    info!("whisper-sip shut down cleanly");
    Ok(())
}

/// Spec §5: "joins threads with a 5 s aggregate timeout; threads that do
/// not join within the budget are abandoned and the process exits."
const SHUTDOWN_JOIN_BUDGET: std::time::Duration = std::time::Duration::from_secs(5);

fn join_with_budget(handles: Vec<std::thread::JoinHandle<()>>, budget: std::time::Duration) {
    let (done_tx, done_rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        for handle in handles {
            let _ = handle.join();
        }
        let _ = done_tx.send(());
    });
    if done_rx.recv_timeout(budget).is_err() {
        warn!("background threads did not join within the shutdown budget, abandoning them");
    }
}

/// Spec §4.2: a real PBX peer is needed to discover which local address
/// the engine should advertise in its Contact/SDP headers. The first
/// configured line's server is used as the probe target; with no lines
/// at all this falls back to the loopback address (a no-op deployment).
fn discover_local_ip(lines: &[ManagedLine]) -> std::io::Result<IpAddr> {
    let Some(first) = lines.first() else {
        return Ok(IpAddr::from([127, 0, 0, 1]));
    };
    let config = first.config.lock().clone();
    let probe = UdpSocket::bind(("0.0.0.0", 0))?;
    probe.connect(config.server_addr())?;
    probe.local_addr().map(|addr| addr.ip())
}

/// Spec §6: `SIP_SILENCE_WAV.wav` next to the executable, falling back to
/// the `SIP_SILENCE_WAV` environment variable. Absence of both is not an
/// error — the streamer falls back to `0xFF` silence.
fn load_silence_wav() -> Option<Arc<MulawWav>> {
    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("SIP_SILENCE_WAV.wav")))
        .filter(|p| p.exists());
    let path = beside_exe.or_else(|| std::env::var_os("SIP_SILENCE_WAV").map(std::path::PathBuf::from));
    let path = path?;
    match MulawWav::load(&path) {
        Ok(wav) => {
            info!(path = %path.display(), "silence WAV loaded");
            Some(Arc::new(wav))
        }
        Err(e) => {
            warn!(path = %path.display(), %e, "failed to load configured silence WAV, falling back to 0xFF");
            None
        }
    }
}

/// Spec §7/§9: the first SIGINT/SIGTERM begins graceful shutdown; a
/// second forces an immediate exit rather than waiting on threads that
/// may be stuck.
fn install_signal_handler() {
    let signalled_once = AtomicBool::new(false);
    let result = ctrlc::set_handler(move || {
        if signalled_once.swap(true, Ordering::SeqCst) {
            warn!("second shutdown signal received, forcing immediate exit");
            std::process::exit(1);
        }
        info!("shutdown signal received, stopping gracefully");
        if let Some(endpoint) = ENDPOINT_HANDLE.get().and_then(Weak::upgrade) {
            endpoint.shutdown();
        }
    });
    if let Err(e) = result {
        warn!(%e, "failed to install signal handler, relying on external process kill for shutdown");
    }
}
