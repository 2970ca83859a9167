//! quadlink daemon
//!
//! ## Modes
//!
//! - **robot**: TCP server on the controller side. Streams a sensor envelope
//!   every `robot.telemetry_interval_ms` to every connected monitor and
//!   answers ack requests. Received parameter sets are snapshotted to the
//!   parameter directory.
//! - **monitor**: auto-reconnecting client. Archives received telemetry to
//!   per-field logs (a new log session per connection) and keeps a filtered
//!   rolling window for display.

use quadlink::archive::SensorArchive;
use quadlink::config::{AppConfig, Mode, StorageConfig};
use quadlink::protocol::{ParameterStore, PayloadType, Protocol};
use quadlink::transport::{Client, ConnectionState, Endpoint, Server};
use quadlink::{Error, Result};
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Parse config path from command line arguments.
///
/// Supports:
/// - `quadlink <path>` (positional)
/// - `quadlink --config <path>` (flag-based)
/// - `quadlink -c <path>` (short flag)
///
/// Defaults to `quadlink.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "quadlink.toml".to_string()
}

/// Load the config file, or defaults if it does not exist
fn load_config(path: &str) -> Result<(AppConfig, bool)> {
    if Path::new(path).exists() {
        Ok((AppConfig::from_file(path)?, true))
    } else {
        Ok((AppConfig::default(), false))
    }
}

/// Sleep out the rest of a loop period that began at `start`
fn pace(start: Instant, period: Duration) {
    if let Some(rest) = period.checked_sub(start.elapsed()) {
        thread::sleep(rest);
    }
}

fn run_robot(config: &AppConfig, running: &AtomicBool) -> Result<()> {
    let store = ParameterStore::open(&config.storage.param_dir)?;
    let mut protocol = Protocol::new();
    protocol.parameters = store.load_default()?;

    let server = Server::bind(&config.server_config())?;
    let period = Duration::from_millis(config.robot.telemetry_interval_ms);
    let mut sent: u64 = 0;

    log::info!("Robot link running. Press Ctrl-C to stop.");

    while running.load(Ordering::Relaxed) {
        let tick = Instant::now();

        let mut parameters_received = false;
        server.interact(|frame| {
            let applied = protocol.received_count();
            let reply = protocol.process(frame);
            if protocol.received_count() > applied
                && protocol.last_header().payload_type() == Some(PayloadType::Parameter)
            {
                parameters_received = true;
            }
            reply
        });

        if parameters_received {
            log::info!("Received gait parameters");
            if let Err(e) = store.save_snapshot(&protocol.parameters) {
                log::warn!("Failed to save parameters: {}", e);
            }
        }

        if server.is_connected() {
            protocol.stage_synthetic_sensor();
            server.send(&protocol.collect(PayloadType::Sensor, None));
            sent += 1;
            if sent % 500 == 0 {
                log::debug!(
                    "Sent {} sensor frames to {} monitor(s), received {}",
                    sent,
                    server.connection_count(),
                    protocol.received_count()
                );
            }
        }

        pace(tick, period);
    }

    log::info!("Robot link stopped after {} sensor frames", sent);
    Ok(())
}

fn run_monitor(config: &AppConfig, running: &AtomicBool) -> Result<()> {
    let storage = &config.storage;
    let store = ParameterStore::open(&storage.param_dir)?;
    let mut protocol = Protocol::new();
    protocol.parameters = store.load_default()?;

    let client = Client::connect(config.client_config());
    let mut display = SensorArchive::rolling(storage.display_capacity);

    let poll = Duration::from_millis(config.monitor.poll_interval_ms);
    let status_interval = Duration::from_millis(config.monitor.status_interval_ms);
    let mut last_status: Option<Instant> = None;
    let mut was_open = false;
    let mut session_epoch = client.connection_epoch();
    let mut sensor_frames: u64 = 0;

    log::info!(
        "Monitoring {}. Press Ctrl-C to stop.",
        config.network.server_address
    );

    while running.load(Ordering::Relaxed) {
        let tick = Instant::now();

        if last_status.is_none_or(|at| at.elapsed() >= status_interval) {
            last_status = Some(tick);
            let open = client.state() == ConnectionState::Open;
            let epoch = client.connection_epoch();
            if open && (!was_open || epoch != session_epoch) {
                // New connection, even if the reconnect fell between checks
                session_epoch = epoch;
                start_session(&mut protocol, storage);
                display = SensorArchive::rolling(storage.display_capacity);
                sensor_frames = 0;

                client.send(&protocol.collect(PayloadType::Parameter, Some(PayloadType::State)));
                log::info!("Link up, gait parameters pushed");
            } else if !open && was_open {
                log::warn!("Link down, waiting for reconnect");
            }
            was_open = open;
        }

        if let Some(frame) = client.receive() {
            match protocol.decode(&frame) {
                Ok(Some(PayloadType::Sensor)) => {
                    sensor_frames += 1;
                    if sensor_frames % config.monitor.display_every == 0 {
                        update_display(&protocol, &mut display, storage.filter_size)?;
                    }
                }
                Ok(Some(PayloadType::State)) => {
                    log::info!(
                        "Robot state: basic {:#04x}, gait {}",
                        protocol.state.basic,
                        protocol.state.gait
                    );
                }
                Ok(_) => {}
                Err(e) => log::debug!("Envelope dropped: {}", e),
            }
        }

        pace(tick, poll);
    }

    client.close();
    log::info!(
        "Monitor stopped after {} envelopes",
        protocol.received_count()
    );
    Ok(())
}

/// Open a fresh log session for a new connection
///
/// Without a recording archive telemetry is still decoded and displayed,
/// only the per-field logs are skipped.
fn start_session(protocol: &mut Protocol, storage: &StorageConfig) {
    match SensorArchive::recording(&storage.log_dir, storage.archive_capacity) {
        Ok(archive) => {
            protocol.replace_archive(archive);
        }
        Err(e) => {
            log::warn!(
                "Cannot record to {} ({}), telemetry will not be archived",
                storage.log_dir.display(),
                e
            );
            protocol.take_archive();
        }
    }
}

/// Feed the averaged newest rows of the archive into the display window
fn update_display(protocol: &Protocol, display: &mut SensorArchive, filter_size: usize) -> Result<()> {
    let Some(mut filtered) = protocol.archive().and_then(|a| a.filter(filter_size)) else {
        return Ok(());
    };
    if display.is_full() {
        display.shift();
    }
    display.push(&mut filtered)?;

    if let Some(last) = display.last() {
        log::debug!(
            "imu attitude [{:.1} {:.1} {:.1}] at t={:.2}s",
            last.imu[0][0],
            last.imu[0][1],
            last.imu[0][2],
            last.imu_time
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let config_path = parse_config_path();
    let (config, from_file) = load_config(&config_path)?;

    // RUST_LOG overrides the configured level
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("quadlink v{} starting...", env!("CARGO_PKG_VERSION"));
    if from_file {
        log::info!("Using config: {}", config_path);
    } else {
        log::warn!("{} not found, using defaults", config_path);
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    match config.mode {
        Mode::Robot => run_robot(&config, &running),
        Mode::Monitor => run_monitor(&config, &running),
    }
}
