mod audio;
mod ble;
mod cli;
mod config;
mod control;
mod report;
mod screen;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use audio::capture::AudioAnalyzer;
use ble::discovery::DiscoveryEnd;
use ble::transport::{is_writable, LedWriter, Transport};
use cli::Cli;
use config::{RunConfig, DEFAULT_DEVICE_ID};
use control::run_loop::ControlLoop;
use report::Reporter;
use screen::capture::PrimaryDisplay;
use screen::color::ScreenProbe;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    report::print_header();
    let cli = Cli::parse();
    let reporter = Reporter::new();

    let mut run = match config::find_config(cli.config.clone()) {
        Some(path) => match config::load_config(&path) {
            Some(cfg) => {
                log::info!("Loaded config from {}", path.display());
                RunConfig::from_config(&cfg)
            }
            None => {
                log::warn!("Failed to load config from {}", path.display());
                RunConfig::default()
            }
        },
        None => RunConfig::default(),
    };
    if let Some(replay) = cli.replay() {
        run = run.with_replay(replay).context("Invalid replay string")?;
    }
    apply_overrides(&mut run, &cli);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    reporter.title("Bluetooth");
    let transport = runtime
        .block_on(Transport::open(reporter.nested()))
        .context("Failed to open a Bluetooth adapter")?;

    if cli.scan {
        let snapshot = runtime.block_on(transport.discover(run.scan_duration, run.policy))?;
        let listed = reporter.nested();
        for device in &snapshot.devices {
            listed.ok(format!("{} ({})", device.display_name(), device.id));
        }
        if snapshot.end == DiscoveryEnd::Stopped {
            reporter.warn("Scan interrupted");
        }
        return Ok(());
    }

    let device_id = match run.device_id.clone() {
        Some(id) => id,
        None => {
            reporter.warn(format!("No device configured, using {}", DEFAULT_DEVICE_ID));
            DEFAULT_DEVICE_ID.to_string()
        }
    };

    reporter.pending(format!("Connecting to {}...", device_id));
    let device = match runtime.block_on(transport.connect(&device_id)) {
        Ok(device) => device,
        Err(err) => {
            reporter.error(format!("Failed to connect: {}", err));
            reporter.error("Device unreachable");
            return Ok(());
        }
    };
    reporter.ok("Connected");

    reporter.pending("Looking for services...");
    let services = match runtime.block_on(transport.list_services(&device)) {
        Ok(services) => services,
        Err(err) => {
            reporter.error(format!("Device unreachable: {}", err));
            runtime.block_on(transport.disconnect(&device));
            return Ok(());
        }
    };
    reporter.ok(format!("Found {} service(s)", services.len()));
    let listed = reporter.nested();
    for service in &services {
        listed.ok(format!("Service: {}", service.uuid));
    }

    let endpoint = match runtime.block_on(transport.find_endpoint(
        &device,
        &services,
        run.service.as_deref(),
        run.characteristic.as_deref(),
    )) {
        Some(endpoint) if is_writable(&endpoint.characteristic) => endpoint,
        _ => {
            reporter.error("No writable characteristic found");
            runtime.block_on(transport.disconnect(&device));
            return Ok(());
        }
    };
    reporter.ok("Correct properties!");

    run.device_id = Some(endpoint.device_id.clone());
    run.device_name = endpoint.device_name.clone();
    run.service = Some(endpoint.service_name());
    run.characteristic = Some(endpoint.characteristic_name());
    reporter.ok(format!("Replay with: {}", run.to_replay()));

    reporter.title("Audio");
    let analyzer = match AudioAnalyzer::start(reporter.nested()) {
        Ok(analyzer) => analyzer,
        Err(err) => {
            runtime.block_on(transport.disconnect(&device));
            return Err(err);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    runtime.spawn({
        let running = running.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                running.store(false, Ordering::Release);
            }
        }
    });

    reporter.title("Control");
    let writer = LedWriter::new(
        device.clone(),
        &endpoint,
        runtime.handle().clone(),
        reporter.nested(),
    );
    let probe = ScreenProbe::new(Arc::new(PrimaryDisplay), run.region);
    ControlLoop::new(analyzer, probe, writer, run.loop_settings(), reporter.nested())
        .run(&running);

    runtime.block_on(transport.disconnect(&device));
    reporter.ok("Done");
    Ok(())
}

/// Command-line values win over the file and the replay string.
fn apply_overrides(run: &mut RunConfig, cli: &Cli) {
    if let Some(id) = cli.device_id() {
        run.device_id = Some(id.to_string());
    }
    if let Some(seconds) = cli.scan_seconds {
        run.scan_duration = std::time::Duration::from_secs(seconds);
    }
    if let Some(policy) = cli.policy {
        run.policy = policy;
    }
    if let Some(smoothing) = cli.smoothing {
        run.smoothing = smoothing;
    }
    if let Some(smoothness) = cli.smoothness {
        run.smoothness = smoothness;
    }
    if let Some(audio) = cli.audio {
        run.audio = audio;
    }
    if let Some(color) = cli.color {
        run.color = color;
    }
    if cli.service.is_some() {
        run.service = cli.service.clone();
    }
    if cli.characteristic.is_some() {
        run.characteristic = cli.characteristic.clone();
    }
}
