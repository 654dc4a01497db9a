// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! HomeGuard - Camera and PIR intrusion detection
//!
//! Runs the detection-to-alert engine until Ctrl+C. In demo mode the camera,
//! PIR sensor and classifier are simulated so the whole chain can be watched
//! from the log or the WebSocket status endpoint.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use homeguard::alerts::build_notifier;
use homeguard::core::SystemClock;
use homeguard::detection::{BlockingClassifier, HeuristicModel};
use homeguard::sensors::{LogOutput, SimulatedCamera, SimulatedPir};
use homeguard::{Collaborators, Config, Engine, NAME, VERSION};

/// HomeGuard - Camera and PIR intrusion detection
#[derive(Parser, Debug)]
#[command(name = "homeguard")]
#[command(author = "bad-antics")]
#[command(version = VERSION)]
#[command(about = "Detection-to-alert engine for camera and PIR home security")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// Demo mode with simulated camera, PIR and classifier
    #[arg(long)]
    demo: bool,

    /// Arm the system at startup
    #[arg(long)]
    arm: bool,

    /// Status endpoint port
    #[arg(long)]
    status_port: Option<u16>,

    /// Disable the status endpoint
    #[arg(long)]
    no_status: bool,

    /// Data output directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Seed for the simulated sensors
    #[arg(long, default_value = "42")]
    seed: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Configuration comes first so its log level can seed the filter
    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)
        .with_context(|| format!("loading configuration from {:?}", config_path))?;
    config.apply_env_overrides()?;

    if args.demo {
        config.demo_mode = true;
    }
    if args.arm {
        config.state.start_armed = true;
    }
    if let Some(port) = args.status_port {
        config.streaming.port = port;
    }
    if args.no_status {
        config.streaming.status_enabled = false;
    }
    if let Some(data_dir) = args.data_dir.clone() {
        config.database.path = data_dir.join("alerts.db");
        config.data_dir = data_dir;
    }

    config.validate().context("invalid configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_directive(args.trace, args.debug, &config.log_level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .init();

    info!("🛡️ {} v{} - camera and PIR intrusion detection", NAME, VERSION);
    info!("Configuration loaded from {:?}", config_path);
    info!("Demo mode: {}", config.demo_mode);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config, args.seed))
}

/// `--trace` and `--debug` beat the configured level; `RUST_LOG` beats both
fn log_directive<'a>(trace: bool, debug: bool, configured: &'a str) -> &'a str {
    if trace {
        "trace"
    } else if debug {
        "debug"
    } else {
        configured
    }
}

async fn run(config: Config, seed: u64) -> Result<()> {
    if !config.demo_mode {
        anyhow::bail!(
            "no camera, PIR or model backend is built in; run with --demo or embed the \
             library with your own FrameSource, HardwareTrigger and Classifier"
        );
    }

    let camera = SimulatedCamera::new(
        "demo-camera",
        config.camera.width as usize,
        config.camera.height as usize,
        seed,
    );
    let pir = SimulatedPir::new("demo-pir", camera.presence(), seed.wrapping_add(1));

    let collaborators = Collaborators {
        frame_source: Box::new(camera),
        trigger: Some(Box::new(pir)),
        classifier: Arc::new(BlockingClassifier::new(HeuristicModel::default())),
        output: Arc::new(LogOutput),
        notifier: build_notifier(&config.notify)?,
    };

    let engine = Engine::start(config, collaborators, SystemClock::shared()).await?;
    let controller = engine.controller();

    info!("🚀 {} running, state {}", NAME, controller.current_state());
    info!("   Press Ctrl+C to shutdown");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, cleaning up...");

    let status = controller.status();
    info!(
        "Session: {} detections, {} alerts dispatched, {} suppressed, {} failed",
        status.alerts.total, status.alerts.dispatched, status.alerts.suppressed, status.alerts.failed
    );

    let report = engine.shutdown().await;
    if !report.is_clean() {
        warn!("Unclean shutdown: {:?}", report);
    }

    info!("{} shutdown complete", NAME);
    Ok(())
}
