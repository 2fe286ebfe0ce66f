//! Fault taxonomy for one measurement cycle and the recovery each one gets.

use std::fmt;

/// What the lifecycle controller does with a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Read again after a short backoff; once the attempts run out the
    /// cycle is skipped.
    Retry,
    /// Log it, finish the cycle, sleep as usual.
    Continue,
    /// Blink, flush, restart the device.
    Restart,
}

/// Component operation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Sensor read did not stabilize (checksum, CRC not ready, driver hiccup)
    Sensor(String),
    /// Association or status polling failed
    Link(String),
    /// Time authority timed out or answered with garbage
    TimeSync(String),
    /// Liveness probe did not report ready; nothing was written
    TelemetryUnreachable(String),
    /// Store answered the write with an error
    TelemetryRejected(String),
    /// Anything unclassified from the lower layers
    Io(String),
}

impl Fault {
    pub fn recovery(&self) -> Recovery {
        match self {
            Self::Sensor(_) => Recovery::Retry,
            Self::TelemetryUnreachable(_) | Self::TelemetryRejected(_) => Recovery::Continue,
            Self::Link(_) | Self::TimeSync(_) | Self::Io(_) => Recovery::Restart,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(m) => write!(f, "sensor fault: {}", m),
            Self::Link(m) => write!(f, "link fault: {}", m),
            Self::TimeSync(m) => write!(f, "time sync fault: {}", m),
            Self::TelemetryUnreachable(m) => write!(f, "telemetry unreachable: {}", m),
            Self::TelemetryRejected(m) => write!(f, "telemetry rejected: {}", m),
            Self::Io(m) => write!(f, "i/o fault: {}", m),
        }
    }
}

impl std::error::Error for Fault {}

impl From<std::io::Error> for Fault {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
