//! ==============================================================================
//! controller.rs - lifecycle controller
//! ==============================================================================
//!
//! purpose:
//!     runs the device duty cycle forever:
//!
//!     Idle -> Measuring -> Connecting -> Transmitting -> Disconnecting
//!          -> Sleeping -> Measuring ...
//!
//!     any phase can end in Resetting. the controller never tries to repair
//!     state in-process after a link or i/o fault; it blinks, flushes and
//!     hands over to PowerControl::reset.
//!
//! fault policy (see error.rs):
//!     - Sensor: retried inside measure_with_retry (bounded); once the
//!       attempts run out the cycle is skipped and the device sleeps
//!     - TelemetryUnreachable / TelemetryRejected: logged, cycle continues
//!     - Link / TimeSync / Io: reset
//!
//! the user interrupt is checked before every cycle and raced against the
//! sleep phase; it is the only clean way out of run().
//!
//! ==============================================================================

use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::clock::RtcClock;
use crate::config::{DeviceConfig, SleepMode};
use crate::domain::{LinkState, Measurement};
use crate::error::{Fault, Recovery};
use crate::indicator::{Blink, StatusLed};
use crate::link::Link;
use crate::power::PowerControl;
use crate::sensor::{measure_with_retry, SensorReader};
use crate::telemetry::{TelemetrySink, TelemetryStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Measuring,
    Connecting,
    Transmitting,
    Disconnecting,
    Sleeping,
    Resetting,
}

/// Why run() returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shutdown {
    Interrupted,
    Reset(Fault),
}

/// Per-cycle timing, fixed for the process lifetime.
#[derive(Debug, Clone)]
pub struct CyclePolicy {
    pub retry_backoff: Duration,
    pub max_sensor_attempts: u32,
    pub sleep_mode: SleepMode,
    pub sleep: Duration,
}

impl CyclePolicy {
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            retry_backoff: config.sensor.retry_backoff(),
            max_sensor_attempts: config.sensor.max_attempts,
            sleep_mode: config.sleep.mode,
            sleep: Duration::from_secs(config.sleep.duration_seconds),
        }
    }
}

/// Series name and tag set every point of this process is written with.
#[derive(Debug, Clone)]
pub struct Series {
    pub name: String,
    pub tags: Vec<(String, String)>,
}

pub struct Lifecycle<S, L, T, P> {
    sensor: S,
    link: L,
    sink: TelemetrySink<T>,
    power: P,
    clock: RtcClock,
    led: StatusLed,
    policy: CyclePolicy,
    series: Series,
    shutdown: watch::Receiver<bool>,
    phase: Phase,
    cycles: u64,
}

impl<S, L, T, P> Lifecycle<S, L, T, P>
where
    S: SensorReader,
    L: Link,
    T: TelemetryStore,
    P: PowerControl,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sensor: S,
        link: L,
        sink: TelemetrySink<T>,
        power: P,
        clock: RtcClock,
        led: StatusLed,
        policy: CyclePolicy,
        series: Series,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            sensor,
            link,
            sink,
            power,
            clock,
            led,
            policy,
            series,
            shutdown,
            phase: Phase::Idle,
            cycles: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Loop until interrupted or reset.
    pub async fn run(&mut self) -> Shutdown {
        info!("[CONTROLLER] starting duty cycle, sleep {:?} ({:?})", self.policy.sleep, self.policy.sleep_mode);
        loop {
            if let Some(shutdown) = self.run_once().await {
                info!("[CONTROLLER] leaving duty cycle in {:?} after {} cycles", self.phase(), self.cycles);
                return shutdown;
            }
        }
    }

    /// One measure/connect/transmit/disconnect/sleep pass.
    pub async fn run_once(&mut self) -> Option<Shutdown> {
        if self.interrupted() {
            info!("[CONTROLLER] keyboard interrupt");
            return Some(Shutdown::Interrupted);
        }

        if let Err(fault) = self.cycle().await {
            return Some(self.reset(fault).await);
        }

        self.enter(Phase::Sleeping);
        let mode = self.policy.sleep_mode;
        let duration = self.policy.sleep;
        let woke = tokio::select! {
            result = self.power.suspend(mode, duration) => Some(result),
            _ = wait_for_interrupt(&mut self.shutdown) => None,
        };
        match woke {
            Some(Ok(())) => None,
            Some(Err(fault)) => Some(self.reset(fault).await),
            None => {
                info!("[CONTROLLER] keyboard interrupt during sleep");
                Some(Shutdown::Interrupted)
            }
        }
    }

    /// Everything up to the sleep. Err means the device must reset.
    pub async fn cycle(&mut self) -> Result<(), Fault> {
        self.cycles += 1;

        self.enter(Phase::Measuring);
        let measured = measure_with_retry(
            &mut self.sensor,
            self.policy.retry_backoff,
            self.policy.max_sensor_attempts,
        )
        .await;
        let measurement = match measured {
            Ok(m) => m,
            Err(fault) if fault.recovery() == Recovery::Retry => {
                // no reading, so no reason to bring the radio up
                warn!("[CONTROLLER] cycle {} skipped, sensor gave up: {}", self.cycles, fault);
                self.led.show(Blink::SensorFailed).await;
                return Ok(());
            }
            Err(fault) => return Err(fault),
        };
        match measurement.humidity {
            Some(h) => info!("[CONTROLLER] temperature: {} humidity: {}", measurement.temperature, h),
            None => info!("[CONTROLLER] temperature: {}", measurement.temperature),
        }

        self.enter(Phase::Connecting);
        self.link.connect().await?;

        self.enter(Phase::Transmitting);
        let sent = self.transmit(&measurement).await;

        self.enter(Phase::Disconnecting);
        self.link.disconnect().await;

        match sent {
            Ok(n) => info!("[CONTROLLER] cycle {} done, {} points written", self.cycles, n),
            Err(fault) if fault.recovery() == Recovery::Continue => {
                warn!("[CONTROLLER] cycle {} done without data: {}", self.cycles, fault)
            }
            Err(fault) => return Err(fault),
        }
        Ok(())
    }

    async fn transmit(&mut self, measurement: &Measurement) -> Result<usize, Fault> {
        if self.link.status() != LinkState::Connected {
            return Err(Fault::Link(format!("refusing to transmit while {}", self.link.status())));
        }
        // one timestamp for every field of this cycle
        let timestamp_ns = self
            .clock
            .unix_nanos()
            .ok_or_else(|| Fault::TimeSync("clock was never synchronized".to_string()))?;
        self.sink
            .transmit(&self.series.name, &self.series.tags, &measurement.fields(), timestamp_ns)
            .await
    }

    async fn reset(&mut self, fault: Fault) -> Shutdown {
        self.enter(Phase::Resetting);
        error!("[CONTROLLER] resetting device due to {}", fault);
        self.led.show(Blink::Fatal).await;
        self.power.reset(&fault);
        Shutdown::Reset(fault)
    }

    fn interrupted(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!("[CONTROLLER] {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }
}

/// resolves once the flag turns true; never if the sender is gone
async fn wait_for_interrupt(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
