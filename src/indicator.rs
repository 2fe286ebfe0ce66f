//! Status led and the blink patterns the operator reads device state from.
//!
//! Every pattern is cosmetic: a disabled led skips the pulses and their
//! delays entirely, and pin errors are logged and swallowed.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use crate::hal::PinDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blink {
    /// one pulse per radio status code once associated
    Connected(u8),
    Disconnected,
    /// sensor never gave a reading this cycle
    SensorFailed,
    /// liveness probe failed, nothing written
    Unreachable,
    /// store rejected at least one write
    Rejected,
    /// about to reset
    Fatal,
}

impl Blink {
    /// (half period, pulse count) for a given base pulse length
    fn timing(self, pulse: Duration) -> (Duration, u32) {
        let fast = pulse * 2 / 5;
        match self {
            Self::Connected(n) => (pulse, u32::from(n)),
            Self::Disconnected => (pulse, 3),
            Self::SensorFailed => (pulse * 2, 2),
            Self::Unreachable => (fast, 10),
            Self::Rejected => (fast, 5),
            Self::Fatal => (fast / 2, 20),
        }
    }
}

#[derive(Clone)]
pub struct StatusLed {
    pin: Arc<Mutex<Box<dyn PinDriver>>>,
    enabled: bool,
    pulse: Duration,
}

impl StatusLed {
    pub fn new(pin: Box<dyn PinDriver>, enabled: bool, pulse: Duration) -> Self {
        Self { pin: Arc::new(Mutex::new(pin)), enabled, pulse }
    }

    pub fn set(&self, on: bool) {
        if !self.enabled {
            return;
        }
        if let Ok(mut pin) = self.pin.lock() {
            if let Err(e) = pin.write(on) {
                debug!("status led write failed: {:#}", e);
            }
        }
    }

    pub async fn show(&self, blink: Blink) {
        if !self.enabled {
            return;
        }
        let (half, count) = blink.timing(self.pulse);
        for _ in 0..count {
            self.set(true);
            tokio::time::sleep(half).await;
            self.set(false);
            tokio::time::sleep(half).await;
        }
    }
}
