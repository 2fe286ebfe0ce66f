//! ==============================================================================
//! config.rs - device configuration loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `config.toml`.
//!     loads configuration from file or falls back to defaults, then lets
//!     the environment (`.env` via dotenvy) override credentials.
//!
//! structure:
//!     - target: board (radio managed here) or host (os owns the network)
//!     - WifiConfig: ssid, password, regulatory country code
//!     - SensorConfig: sensor kind, pin, one-wire directory, retry policy
//!     - TelemetryConfig: store endpoint, database, series name and tag
//!     - TimeConfig: time authority and timezone offset
//!     - LinkConfig: interface, status poll budget, aux pin
//!     - SleepConfig: duration and light/deep mode
//!     - LedConfig: status indicator
//!     - PowerConfig: what a reset means on this target
//!
//! the config is immutable once loaded; main.rs hands pieces of it to each
//! component by reference or clone.
//!
//! ==============================================================================

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DeviceConfig {
    pub target: Target,
    pub wifi: WifiConfig,
    pub sensor: SensorConfig,
    pub telemetry: TelemetryConfig,
    pub time: TimeConfig,
    pub link: LinkConfig,
    pub sleep: SleepConfig,
    pub led: LedConfig,
    pub power: PowerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// radio is joined and powered down every cycle
    #[default]
    Board,
    /// general-purpose host, network stays up
    Host,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WifiConfig {
    pub ssid: String,
    pub password: String,
    pub country: String,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self { ssid: String::new(), password: String::new(), country: "DE".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Dht22,
    Ds18b20,
    Simulated,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SensorConfig {
    pub kind: SensorKind,
    /// BCM pin number of the dht22 data line
    pub gpio_pin: u8,
    pub w1_devices_dir: PathBuf,
    pub settle_ms: u64,
    pub retry_backoff_ms: u64,
    pub max_attempts: u32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            kind: SensorKind::Dht22,
            gpio_pin: 4,
            w1_devices_dir: PathBuf::from("/sys/bus/w1/devices"),
            settle_ms: 1000,
            retry_backoff_ms: 200,
            max_attempts: 50,
        }
    }
}

impl SensorConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub measurement: String,
    pub tag_key: String,
    pub tag_value: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8086,
            database: "sensordata".to_string(),
            measurement: "env".to_string(),
            tag_key: "device".to_string(),
            tag_value: "pico".to_string(),
            username: None,
            password: None,
            timeout_ms: 5000,
        }
    }
}

impl TelemetryConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimeConfig {
    pub ntp_host: String,
    pub ntp_port: u16,
    pub timeout_ms: u64,
    /// timezone plus daylight-saving offset applied to the clock sample
    pub utc_offset_seconds: i64,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            ntp_host: "pool.ntp.org".to_string(),
            ntp_port: 123,
            timeout_ms: 1000,
            utc_offset_seconds: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LinkConfig {
    pub interface: String,
    pub max_polls: u32,
    pub poll_interval_ms: u64,
    /// pin that must be parked as a pulled-down input after radio deinit
    pub aux_pin: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self { interface: "wlan0".to_string(), max_polls: 30, poll_interval_ms: 1000, aux_pin: 23 }
    }
}

impl LinkConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SleepMode {
    #[default]
    Light,
    Deep,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SleepConfig {
    pub duration_seconds: u64,
    pub mode: SleepMode,
    /// rtc alarm tool used for deep sleep
    pub wake_command: String,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self { duration_seconds: 600, mode: SleepMode::Light, wake_command: "rtcwake".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LedConfig {
    pub enabled: bool,
    pub gpio_pin: u8,
    pub pulse_ms: u64,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self { enabled: true, gpio_pin: 25, pulse_ms: 250 }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResetAction {
    /// exit non-zero and let the service manager start us again
    #[default]
    Exit,
    /// reboot the whole machine
    Reboot,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PowerConfig {
    pub on_fault: ResetAction,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl DeviceConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file {}", path.as_ref().display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse config")
    }

    /// First config file found in the default search order.
    ///
    /// Runs before logging is set up, so the caller reports the outcome.
    pub fn locate() -> Option<PathBuf> {
        [
            PathBuf::from("config").join("config.toml"),
            PathBuf::from("..").join("config").join("config.toml"),
        ]
        .into_iter()
        .find(|path| path.exists())
    }

    /// Override credentials and endpoints from the process environment.
    ///
    /// `.env` is read first if present; real environment variables win.
    pub fn apply_env(&mut self) {
        dotenvy::dotenv().ok();
        self.apply_vars(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("WIFI_SSID") {
            self.wifi.ssid = v;
        }
        if let Some(v) = var("WIFI_PASSWORD") {
            self.wifi.password = v;
        }
        if let Some(v) = var("INFLUX_HOST") {
            self.telemetry.host = v;
        }
        if let Some(port) = var("INFLUX_PORT").and_then(|v| v.parse().ok()) {
            self.telemetry.port = port;
        }
        if let Some(v) = var("INFLUX_USER") {
            self.telemetry.username = Some(v);
        }
        if let Some(v) = var("INFLUX_PASSWORD") {
            self.telemetry.password = Some(v);
        }
        if let Some(pin) = var("SENSOR_PIN").and_then(|v| v.parse().ok()) {
            self.sensor.gpio_pin = pin;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.link.max_polls == 0 {
            bail!("link.max_polls must be at least 1");
        }
        if self.sensor.max_attempts == 0 {
            bail!("sensor.max_attempts must be at least 1");
        }
        if self.target == Target::Board && self.wifi.ssid.is_empty() {
            bail!("wifi.ssid is required on the board target");
        }
        if self.telemetry.database.is_empty() {
            bail!("telemetry.database must not be empty");
        }
        Ok(())
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        info!(
            target_kind = ?self.target,
            sensor = ?self.sensor.kind,
            pin = self.sensor.gpio_pin,
            store = %self.telemetry.base_url(),
            database = %self.telemetry.database,
            series = %self.telemetry.measurement,
            sleep_s = self.sleep.duration_seconds,
            sleep_mode = ?self.sleep.mode,
            led = self.led.enabled,
            "device configuration"
        );
    }
}
