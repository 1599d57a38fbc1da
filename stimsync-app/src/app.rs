use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use stimsync_core::{SyncTrace, decode_batch};
use stimsync_latency::estimate;
use stimsync_screen::{LogSink, ScreenConfig, ScreenDriver};
use stimsync_server::{
    ClosedLoopDriver, ControlClient, ControlListener, OffsetRelay, ServerConfig, StimServer,
    TrackerConfig, TrackerReader,
};
use stimsync_timing::SystemClock;
use tracing::{error, info, warn};

use crate::cli::Command;

pub fn run(command: Command) -> Result<()> {
    match command {
        Command::Server {
            config,
            control_addr,
        } => {
            let mut config = ServerConfig::load(&config)
                .with_context(|| format!("loading server config {}", config.display()))?;
            if let Some(addr) = control_addr {
                config.control_addr = addr;
            }
            run_server(config)
        }
        Command::Screen {
            config,
            name,
            command_addr,
            sync_trace,
        } => {
            let mut config = match config {
                Some(path) => ScreenConfig::load(&path)
                    .with_context(|| format!("loading screen config {}", path.display()))?,
                None => ScreenConfig::default(),
            };
            if let Some(name) = name {
                config.name = name;
            }
            if let Some(addr) = command_addr {
                config.command_addr = addr;
            }
            if sync_trace.is_some() {
                config.sync_trace_path = sync_trace;
            }
            run_screen(config)
        }
        Command::Send {
            addr,
            batch,
            timeout_ms,
        } => {
            let batch = decode_batch(batch.as_bytes()).context("parsing batch")?;
            let mut client = ControlClient::connect(&addr, Duration::from_millis(timeout_ms))
                .with_context(|| format!("connecting to controller at {addr}"))?;
            let report = client.send_batch(&batch).context("sending batch")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Latency {
            display,
            tracker,
            window_size,
            windows,
            json,
        } => {
            let display = read_trace(&display)?;
            let tracker = read_trace(&tracker)?;
            let report = estimate(&display, &tracker, window_size, windows)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{report}");
            }
            Ok(())
        }
    }
}

fn shutdown_flag() -> Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        info!("shutdown signal received");
        flag.store(true, Ordering::SeqCst);
    })
    .context("installing signal handler")?;
    Ok(shutdown)
}

fn read_trace(path: &Path) -> Result<SyncTrace> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("decoding {}", path.display()))
}

fn run_server(config: ServerConfig) -> Result<()> {
    let shutdown = shutdown_flag()?;
    info!(
        platform = std::env::consts::OS,
        screens = config.screens.len(),
        control_addr = %config.control_addr,
        "starting controller"
    );

    let closed_loop = match &config.tracker {
        Some(tracker) => {
            let targets = config
                .screens
                .iter()
                .filter_map(|s| s.offset_addr.as_deref());
            let relay = OffsetRelay::new(targets).context("opening offset relay")?;
            Some(spawn_closed_loop(tracker.clone(), relay, Arc::clone(&shutdown))?)
        }
        None => None,
    };

    let listener = ControlListener::bind(&config.control_addr)
        .with_context(|| format!("binding control address {}", config.control_addr))?;
    let mut server = StimServer::from_config(&config, SystemClock);
    let served = listener.serve(&mut server, &shutdown);

    shutdown.store(true, Ordering::SeqCst);
    if let Some(handle) = closed_loop {
        if handle.join().is_err() {
            error!("closed-loop thread panicked");
        }
    }
    served.context("control listener failed")
}

fn spawn_closed_loop(
    tracker: TrackerConfig,
    relay: OffsetRelay,
    shutdown: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>> {
    let reader = TrackerReader::connect(
        &tracker.addr,
        tracker.layout,
        tracker.max_attempts,
        Duration::from_millis(tracker.read_timeout_ms),
    )?;
    let handle = thread::Builder::new()
        .name("closed-loop".to_string())
        .spawn(move || {
            let mut driver = ClosedLoopDriver::new(reader, relay);
            if let Err(e) = driver.run(&shutdown) {
                warn!(error = %e, "tracker ingestion stopped");
            }
            if let Some(path) = &tracker.sync_trace_path {
                match driver.save_trace(path) {
                    Ok(()) => info!(path = %path.display(), frames = driver.frames(), "tracker trace saved"),
                    Err(e) => error!(error = %e, "cannot save tracker trace"),
                }
            }
        })?;
    Ok(handle)
}

fn run_screen(config: ScreenConfig) -> Result<()> {
    let shutdown = shutdown_flag()?;
    info!(screen = %config.name, id = config.id, fps = config.target_fps, "starting screen");
    let mut driver = ScreenDriver::bind(&config, SystemClock, LogSink::default())
        .with_context(|| format!("starting screen {}", config.name))?;
    if let Some(path) = driver.run(&shutdown).context("writing sync trace")? {
        info!(path = %path.display(), "display trace written");
    }
    Ok(())
}
