//! In-crate fake hardware for tests: each fake hands out a shared handle so
//! a test can inspect what happened after moving the fake into its owner.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::SleepMode;
use crate::domain::{ClockSample, Measurement};
use crate::error::Fault;
use crate::hal::PinDriver;
use crate::indicator::StatusLed;
use crate::ntp::TimeSource;
use crate::power::PowerControl;
use crate::radio::{Radio, RadioStatus};
use crate::sensor::SensorReader;
use crate::telemetry::{TelemetryStore, READY_STATUS};

/// shared counter
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicU32>);

impl Counter {
    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// shared append-only log
#[derive(Clone)]
pub struct Recorded<T>(Arc<Mutex<Vec<T>>>);

impl<T> Default for Recorded<T> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }
}

impl<T: Clone> Recorded<T> {
    pub fn push(&self, item: T) {
        self.0.lock().unwrap().push(item);
    }

    pub fn get(&self) -> Vec<T> {
        self.0.lock().unwrap().clone()
    }
}

impl Recorded<String> {
    pub fn lines(&self) -> Vec<String> {
        self.get()
    }
}

/// status led with the indicator turned off, so tests do not wait on blinks
pub fn test_led() -> StatusLed {
    StatusLed::new(Box::new(RecordingPin::default()), false, Duration::from_millis(1))
}

/// enabled status led with a 1 ms pulse, plus the pin it drives
pub fn recording_led() -> (StatusLed, RecordingPin) {
    let pin = RecordingPin::default();
    let led = StatusLed::new(Box::new(pin.clone()), true, Duration::from_millis(1));
    (led, pin)
}

/// true if the levels are `count` on/off pulses and nothing else
pub fn is_pulses(levels: &[bool], count: usize) -> bool {
    levels.len() == 2 * count && levels.chunks(2).all(|p| p == [true, false])
}

// ==============================================================================
// pins
// ==============================================================================

#[derive(Clone, Default)]
pub struct RecordingPin {
    levels: Recorded<bool>,
    parked: Counter,
}

impl RecordingPin {
    pub fn levels(&self) -> Vec<bool> {
        self.levels.get()
    }

    pub fn parked(&self) -> u32 {
        self.parked.get()
    }
}

impl PinDriver for RecordingPin {
    fn write(&mut self, level: bool) -> anyhow::Result<()> {
        self.levels.push(level);
        Ok(())
    }

    fn park_input_pull_down(&mut self) -> anyhow::Result<()> {
        self.parked.bump();
        Ok(())
    }
}

// ==============================================================================
// radio
// ==============================================================================

#[derive(Clone, Default)]
pub struct RadioLog(Recorded<&'static str>);

impl RadioLog {
    pub fn count(&self, call: &str) -> usize {
        self.0.get().iter().filter(|c| **c == call).count()
    }

    pub fn status_polls(&self) -> usize {
        self.count("status")
    }
}

pub struct FakeRadio {
    log: RadioLog,
    /// status after the n-th poll since the last join
    settles_at: Option<(u32, RadioStatus)>,
    polls: u32,
    joined: bool,
    country_rejected: bool,
}

impl FakeRadio {
    pub fn up_after(polls: u32) -> Self {
        Self::new(Some((polls, RadioStatus::Up)))
    }

    pub fn fails_after(polls: u32, code: i8) -> Self {
        Self::new(Some((polls, RadioStatus::Failed(code))))
    }

    pub fn never_up() -> Self {
        Self::new(None)
    }

    fn new(settles_at: Option<(u32, RadioStatus)>) -> Self {
        Self { log: RadioLog::default(), settles_at, polls: 0, joined: false, country_rejected: false }
    }

    /// regulatory domain call fails
    pub fn rejecting_country(mut self) -> Self {
        self.country_rejected = true;
        self
    }

    pub fn log(&self) -> RadioLog {
        self.log.clone()
    }
}

impl Radio for FakeRadio {
    async fn set_country(&mut self, _country: &str) -> Result<(), Fault> {
        self.log.0.push("set_country");
        if self.country_rejected {
            return Err(Fault::Link("iw failed".into()));
        }
        Ok(())
    }

    async fn activate(&mut self) -> Result<(), Fault> {
        self.log.0.push("activate");
        Ok(())
    }

    async fn join(&mut self, _ssid: &str, _password: &str) -> Result<(), Fault> {
        self.log.0.push("join");
        self.joined = true;
        self.polls = 0;
        Ok(())
    }

    async fn status(&mut self) -> Result<RadioStatus, Fault> {
        self.log.0.push("status");
        if !self.joined {
            return Ok(RadioStatus::Idle);
        }
        self.polls += 1;
        Ok(match self.settles_at {
            Some((n, status)) if self.polls >= n => status,
            _ => RadioStatus::Joining,
        })
    }

    async fn address(&mut self) -> Result<Option<IpAddr>, Fault> {
        Ok(self.joined.then(|| IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50))))
    }

    async fn disconnect(&mut self) -> Result<(), Fault> {
        self.log.0.push("disconnect");
        if !self.joined {
            return Err(Fault::Link("not active".into()));
        }
        self.joined = false;
        Ok(())
    }

    async fn power_down(&mut self) -> Result<(), Fault> {
        self.log.0.push("power_down");
        self.joined = false;
        Ok(())
    }
}

// ==============================================================================
// time
// ==============================================================================

pub struct FakeTime {
    result: Result<ClockSample, Fault>,
    calls: Counter,
}

impl FakeTime {
    pub fn ok() -> Self {
        let sample = ClockSample { year: 2024, month: 1, day: 1, hour: 12, minute: 0, second: 0 };
        Self { result: Ok(sample), calls: Counter::default() }
    }

    pub fn failing() -> Self {
        Self { result: Err(Fault::TimeSync("no answer".into())), calls: Counter::default() }
    }

    pub fn calls(&self) -> Counter {
        self.calls.clone()
    }
}

impl TimeSource for FakeTime {
    async fn now(&mut self) -> Result<ClockSample, Fault> {
        self.calls.bump();
        self.result.clone()
    }
}

// ==============================================================================
// sensor
// ==============================================================================

/// plays back scripted results, repeating the last one
pub struct FakeSensor {
    script: VecDeque<Result<Measurement, Fault>>,
    reads: Counter,
}

impl FakeSensor {
    pub fn new(script: Vec<Result<Measurement, Fault>>) -> Self {
        Self { script: script.into(), reads: Counter::default() }
    }

    pub fn reads(&self) -> Counter {
        self.reads.clone()
    }
}

impl SensorReader for FakeSensor {
    async fn measure(&mut self) -> Result<Measurement, Fault> {
        self.reads.bump();
        match self.script.len() {
            0 => Err(Fault::Io("script exhausted".into())),
            1 => self.script[0].clone(),
            _ => self.script.pop_front().unwrap_or_else(|| Err(Fault::Io("script exhausted".into()))),
        }
    }
}

// ==============================================================================
// store
// ==============================================================================

pub struct FakeStore {
    ping: Result<u16, Fault>,
    write_statuses: VecDeque<u16>,
    writes: Recorded<String>,
}

impl FakeStore {
    pub fn ready() -> Self {
        Self::ping_status(Ok(READY_STATUS))
    }

    pub fn ping_status(ping: Result<u16, Fault>) -> Self {
        Self { ping, write_statuses: VecDeque::new(), writes: Recorded::default() }
    }

    /// statuses for successive writes; 204 once they run out
    pub fn with_write_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.write_statuses = statuses.into();
        self
    }

    pub fn writes(&self) -> Recorded<String> {
        self.writes.clone()
    }
}

impl TelemetryStore for FakeStore {
    async fn ping(&mut self) -> Result<u16, Fault> {
        self.ping.clone()
    }

    async fn write(&mut self, body: String) -> Result<u16, Fault> {
        self.writes.push(body);
        Ok(self.write_statuses.pop_front().unwrap_or(204))
    }
}

// ==============================================================================
// power
// ==============================================================================

/// sleeps for real (tests use short durations); reset is only recorded
#[derive(Default)]
pub struct FakePower {
    suspends: Recorded<(SleepMode, Duration)>,
    resets: Recorded<Fault>,
}

impl FakePower {
    pub fn suspends(&self) -> Recorded<(SleepMode, Duration)> {
        self.suspends.clone()
    }

    pub fn resets(&self) -> Recorded<Fault> {
        self.resets.clone()
    }
}

impl PowerControl for FakePower {
    async fn suspend(&mut self, mode: SleepMode, duration: Duration) -> Result<(), Fault> {
        self.suspends.push((mode, duration));
        tokio::time::sleep(duration).await;
        Ok(())
    }

    fn reset(&mut self, fault: &Fault) {
        self.resets.push(fault.clone());
    }
}
