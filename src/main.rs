//! ==============================================================================
//! main.rs - envlink entry point
//! ==============================================================================
//!
//! purpose:
//!     duty-cycled environmental logger. every cycle it reads the sensor,
//!     brings the network up, syncs the clock, writes the reading to the
//!     time-series store, takes the network down again and sleeps.
//!
//! responsibilities:
//!     - parse flags, load config.toml and .env
//!     - set up tracing
//!     - build the adapters for the configured target (board or host)
//!     - watch for ctrl-c and hand the lifecycle controller a shutdown flag
//!     - map the controller's outcome to the process exit status
//!
//! architecture:
//!
//!     ┌───────────────────────────────────────────────────────────┐
//!     │                 lifecycle controller                      │
//!     │  measure ─► connect ─► transmit ─► disconnect ─► sleep ─┐ │
//!     │     ▲                                                   │ │
//!     │     └───────────────────────────────────────────────────┘ │
//!     └─────┬───────────┬──────────────┬─────────────┬────────────┘
//!           │           │              │             │
//!      ┌────┴───┐  ┌────┴────┐   ┌─────┴─────┐  ┌────┴────┐
//!      │ sensor │  │  link   │   │ telemetry │  │  power  │
//!      └────────┘  └─┬─────┬─┘   └───────────┘  └─────────┘
//!                    │     │
//!               ┌────┴──┐ ┌┴─────┐
//!               │ radio │ │ sntp │
//!               └───────┘ └──────┘
//!
//! exit status:
//!     0 on ctrl-c, RESET_EXIT_CODE when the device resets itself, 1 on a
//!     start-up error.
//!
//! ==============================================================================

mod clock;
mod config;
mod controller;
mod domain;
mod error;
mod hal;
mod indicator;
mod link;
mod ntp;
mod power;
mod radio;
mod sensor;
mod telemetry;

#[cfg(test)]
mod fakes;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use clock::RtcClock;
use config::{DeviceConfig, Target};
use controller::{CyclePolicy, Lifecycle, Series, Shutdown};
use indicator::StatusLed;
use link::{AnyLink, HostLink, WifiLink};
use ntp::SntpClient;
use power::{SystemPower, RESET_EXIT_CODE};
use radio::NmcliRadio;
use sensor::AnySensor;
use telemetry::{HttpStore, TelemetrySink};

/// Program writes sensor measurement data to the specified influx database.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// config file (default: config/config.toml, then ../config/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// database name
    #[arg(short, long)]
    database: Option<String>,

    /// session; used as the series name
    #[arg(short, long)]
    session: Option<String>,

    /// run identifier, written as the `run` tag
    #[arg(short, long)]
    run: Option<String>,

    /// sampling rate in seconds (sleep between cycles)
    #[arg(short = 't', long = "sampling-rate")]
    sampling_rate: Option<u64>,

    /// be loud and noisy
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // step 1: load configuration
    let path = args.config.clone().or_else(DeviceConfig::locate);
    let mut config = match &path {
        Some(path) => DeviceConfig::load(path)?,
        None => DeviceConfig::default(),
    };
    config.apply_env();
    apply_args(&mut config, &args);

    // step 2: logging
    let level = if args.verbose { "debug".to_string() } else { config.logging.level.clone() };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .init();

    match &path {
        Some(path) => info!("[CONFIG] loaded from {}", path.display()),
        None => warn!("[CONFIG] no config file found - using defaults"),
    }
    config.validate()?;
    config.log_summary();

    // step 3: shared handles
    let clock = RtcClock::new(config.time.utc_offset_seconds);
    let led = StatusLed::new(
        hal::open_pin(config.led.gpio_pin).context("status led")?,
        config.led.enabled,
        Duration::from_millis(config.led.pulse_ms),
    );
    led.set(true);

    // step 4: adapters
    let sensor = AnySensor::from_config(&config.sensor).context("sensor")?;
    let link = build_link(&config, clock.clone(), led.clone())?;
    let sink = TelemetrySink::new(HttpStore::new(&config.telemetry)?, led.clone());
    let power = SystemPower::new(config.power.on_fault, config.sleep.wake_command.clone());

    // step 5: interrupt watcher
    let (interrupt, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.send(true).ok();
        }
    });

    // step 6: run
    let mut lifecycle = Lifecycle::new(
        sensor,
        link,
        sink,
        power,
        clock,
        led.clone(),
        CyclePolicy::from_config(&config),
        series(&config, &args),
        shutdown,
    );

    match lifecycle.run().await {
        Shutdown::Interrupted => {
            led.set(false);
            info!("program stopped by keyboard interrupt [CTRL+C] by user");
            Ok(())
        }
        Shutdown::Reset(fault) => {
            // only reached if the power backend returned from reset
            error!("reset requested: {}", fault);
            std::process::exit(RESET_EXIT_CODE);
        }
    }
}

fn apply_args(config: &mut DeviceConfig, args: &Args) {
    if let Some(db) = &args.database {
        config.telemetry.database = db.clone();
    }
    if let Some(session) = &args.session {
        config.telemetry.measurement = session.clone();
    }
    if let Some(secs) = args.sampling_rate {
        config.sleep.duration_seconds = secs;
    }
    if args.verbose {
        config.logging.level = "debug".to_string();
    }
}

/// Series name and tags. On the host target every run is tagged, with the
/// start time as the default identifier.
fn series(config: &DeviceConfig, args: &Args) -> Series {
    let mut tags = vec![(config.telemetry.tag_key.clone(), config.telemetry.tag_value.clone())];
    let run = match (&args.run, config.target) {
        (Some(run), _) => Some(run.clone()),
        (None, Target::Host) => Some(chrono::Local::now().format("%Y%m%d%H%M").to_string()),
        (None, Target::Board) => None,
    };
    if let Some(run) = run {
        info!("run: {}", run);
        tags.push(("run".to_string(), run));
    }
    Series { name: config.telemetry.measurement.clone(), tags }
}

fn build_link(config: &DeviceConfig, clock: RtcClock, led: StatusLed) -> Result<AnyLink> {
    let time = SntpClient::new(&config.time);
    Ok(match config.target {
        Target::Board => AnyLink::Wifi(WifiLink::new(
            NmcliRadio::new(config.link.interface.clone()),
            time,
            clock,
            led,
            hal::open_pin(config.link.aux_pin).context("aux pin")?,
            config.wifi.clone(),
            &config.link,
        )),
        Target::Host => AnyLink::Host(HostLink::new(
            time,
            clock,
            &config.telemetry.host,
            config.telemetry.port,
        )),
    })
}
