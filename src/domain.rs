//! ==============================================================================
//! domain.rs - values that flow through one measurement cycle
//! ==============================================================================
//!
//! purpose:
//!     plain data types shared by the sensor, link, clock and telemetry
//!     modules. nothing here does i/o.
//!
//! relationships:
//!     - produced by: sensor.rs (Measurement), ntp.rs (ClockSample)
//!     - owned by: link.rs (LinkState)
//!     - consumed by: telemetry.rs (SeriesPoint, line protocol)
//!
//! ==============================================================================

use std::fmt;

/// one reading from the sensor, consumed immediately by the telemetry sink
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// temperature in celsius
    pub temperature: f64,
    /// relative humidity (0-100%), absent on single-value sensors
    pub humidity: Option<f64>,
}

impl Measurement {
    pub fn dual(temperature: f64, humidity: f64) -> Self {
        Self { temperature, humidity: Some(humidity) }
    }

    pub fn temperature_only(temperature: f64) -> Self {
        Self { temperature, humidity: None }
    }

    /// field name/value pairs in write order (humidity first, as the store
    /// has always received them)
    pub fn fields(&self) -> Vec<(&'static str, f64)> {
        let mut fields = Vec::with_capacity(2);
        if let Some(h) = self.humidity {
            fields.push(("humidity", h));
        }
        fields.push(("temperature", self.temperature));
        fields
    }
}

/// wireless association state, owned by the network link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// wall-clock time as written to the local real-time clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl fmt::Display for ClockSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// one tagged, timestamped field value for the time-series store
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint<'a> {
    pub series: &'a str,
    pub tags: &'a [(String, String)],
    pub field: &'a str,
    pub value: f64,
    pub timestamp_ns: i64,
}

impl SeriesPoint<'_> {
    /// render as `series,tag=value field=value timestamp`
    pub fn to_line(&self) -> String {
        let mut line = escape(self.series, &[',', ' ']);
        for (key, value) in self.tags {
            line.push(',');
            line.push_str(&escape(key, &[',', '=', ' ']));
            line.push('=');
            line.push_str(&escape(value, &[',', '=', ' ']));
        }
        // {:?} keeps the decimal point on whole numbers (45.0, not 45),
        // otherwise the store would type the field as an integer
        line.push_str(&format!(
            " {}={:?} {}",
            escape(self.field, &[',', '=', ' ']),
            self.value,
            self.timestamp_ns
        ));
        line
    }
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
