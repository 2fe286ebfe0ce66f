//! ==============================================================================
//! sensor.rs - temperature/humidity readers
//! ==============================================================================
//!
//! purpose:
//!     one blocking read per call, returning a Measurement or a SensorFault
//!     that the caller retries. three backends:
//!     - dht22: dual value, via python's adafruit driver in a subprocess
//!     - ds18b20: temperature only, via the kernel one-wire sysfs file
//!     - simulated: fixed values for machines without a sensor
//!
//! why subprocess to python?:
//!     dht22 sensors require precise bit-banging timing (~microseconds).
//!     pure rust in userspace is unreliable due to lack of real-time guarantees.
//!     adafruit_dht handles this correctly with timing compensation.
//!
//! ==============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{SensorConfig, SensorKind};
use crate::domain::Measurement;
use crate::error::Fault;

pub trait SensorReader {
    async fn measure(&mut self) -> Result<Measurement, Fault>;
}

/// Read until the sensor answers, sleeping `backoff` between attempts.
///
/// Only SensorFaults are retried; anything else is returned at once. Gives up
/// with the last SensorFault after `max_attempts`.
pub async fn measure_with_retry<S: SensorReader>(
    sensor: &mut S,
    backoff: Duration,
    max_attempts: u32,
) -> Result<Measurement, Fault> {
    let mut attempt = 1;
    loop {
        match sensor.measure().await {
            Ok(m) => return Ok(m),
            Err(Fault::Sensor(reason)) if attempt < max_attempts => {
                debug!("[SENSOR] attempt {} failed: {}, retrying", attempt, reason);
                attempt += 1;
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Applies a settling delay before the first read after power-up.
pub struct Settling<S> {
    inner: S,
    settle: Option<Duration>,
}

impl<S> Settling<S> {
    pub fn new(inner: S, settle: Duration) -> Self {
        Self { inner, settle: Some(settle) }
    }
}

impl<S: SensorReader> SensorReader for Settling<S> {
    async fn measure(&mut self) -> Result<Measurement, Fault> {
        if let Some(settle) = self.settle.take() {
            debug!("[SENSOR] settling for {:?}", settle);
            tokio::time::sleep(settle).await;
        }
        self.inner.measure().await
    }
}

// ==============================================================================
// dht22 - python driver subprocess
// ==============================================================================

pub struct Dht22 {
    pin: u8,
}

impl Dht22 {
    pub fn new(pin: u8) -> Self {
        Self { pin }
    }
}

impl SensorReader for Dht22 {
    async fn measure(&mut self) -> Result<Measurement, Fault> {
        // Python one-liner to read DHT22 and output JSON
        let script = format!(
            r#"
import sys
try:
    import adafruit_dht
    import board
    import json

    dht = adafruit_dht.DHT22(board.D{})
    try:
        t, h = dht.temperature, dht.humidity
        if t is not None and h is not None:
            print(json.dumps({{"t": t, "h": h}}))
        else:
            print("null")
    finally:
        dht.exit()
except Exception as e:
    # Print ONLY the error message to stderr (no traceback with paths)
    print(str(e), file=sys.stderr)
    sys.exit(1)
"#,
            self.pin
        );

        let output = Command::new("python3").arg("-c").arg(&script).output().await?;

        // adafruit_dht raises on checksum errors; those are transient
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Fault::Sensor(format!("dht22 driver: {}", stderr.trim())));
        }

        parse_dht_json(String::from_utf8_lossy(&output.stdout).trim())
    }
}

fn parse_dht_json(stdout: &str) -> Result<Measurement, Fault> {
    if stdout == "null" || stdout.is_empty() {
        return Err(Fault::Sensor("sensor returned no data".to_string()));
    }
    let parsed: serde_json::Value = serde_json::from_str(stdout)
        .map_err(|e| Fault::Sensor(format!("json parse error: {} (got: {})", e, stdout)))?;

    let t = parsed["t"].as_f64().ok_or_else(|| Fault::Sensor("missing temperature".to_string()))?;
    let h = parsed["h"].as_f64().ok_or_else(|| Fault::Sensor("missing humidity".to_string()))?;
    Ok(Measurement::dual(t, h))
}

// ==============================================================================
// ds18b20 - one-wire sysfs
// ==============================================================================

pub struct Ds18b20 {
    device_file: PathBuf,
}

impl Ds18b20 {
    /// first `28-*` device below the one-wire bus directory
    pub fn discover(devices_dir: &Path) -> anyhow::Result<Self> {
        let mut found: Vec<PathBuf> = std::fs::read_dir(devices_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("28"))
            })
            .collect();
        found.sort();
        let dir = found
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("no ds18b20 below {}", devices_dir.display()))?;
        Ok(Self { device_file: dir.join("w1_slave") })
    }
}

impl SensorReader for Ds18b20 {
    async fn measure(&mut self) -> Result<Measurement, Fault> {
        let raw = tokio::fs::read_to_string(&self.device_file).await?;
        parse_w1_slave(&raw).map(Measurement::temperature_only)
    }
}

/// `w1_slave` holds two lines; the first ends in YES when the crc matched,
/// the second carries `t=<millidegrees>`
fn parse_w1_slave(raw: &str) -> Result<f64, Fault> {
    let mut lines = raw.lines();
    let crc_line = lines.next().unwrap_or_default();
    if !crc_line.trim_end().ends_with("YES") {
        return Err(Fault::Sensor("one-wire crc not ready".to_string()));
    }
    let data_line = lines.next().unwrap_or_default();
    let (_, value) = data_line
        .split_once("t=")
        .ok_or_else(|| Fault::Sensor("one-wire reading has no t= field".to_string()))?;
    let milli: f64 = value
        .trim()
        .parse()
        .map_err(|_| Fault::Sensor(format!("bad one-wire value {:?}", value.trim())))?;
    Ok(milli / 1000.0)
}

// ==============================================================================
// simulated - no hardware
// ==============================================================================

pub struct Simulated {
    temperature: f64,
    humidity: f64,
}

impl Default for Simulated {
    fn default() -> Self {
        Self { temperature: 25.0, humidity: 50.0 }
    }
}

impl SensorReader for Simulated {
    async fn measure(&mut self) -> Result<Measurement, Fault> {
        Ok(Measurement::dual(self.temperature, self.humidity))
    }
}

// ==============================================================================
// selection by config
// ==============================================================================

pub enum AnySensor {
    Dht22(Settling<Dht22>),
    Ds18b20(Settling<Ds18b20>),
    Simulated(Simulated),
}

impl AnySensor {
    pub fn from_config(config: &SensorConfig) -> anyhow::Result<Self> {
        Ok(match config.kind {
            SensorKind::Dht22 => Self::Dht22(Settling::new(Dht22::new(config.gpio_pin), config.settle())),
            SensorKind::Ds18b20 => {
                Self::Ds18b20(Settling::new(Ds18b20::discover(&config.w1_devices_dir)?, config.settle()))
            }
            SensorKind::Simulated => {
                warn!("[SENSOR] using simulated sensor (no hardware access)");
                Self::Simulated(Simulated::default())
            }
        })
    }
}

impl SensorReader for AnySensor {
    async fn measure(&mut self) -> Result<Measurement, Fault> {
        match self {
            Self::Dht22(s) => s.measure().await,
            Self::Ds18b20(s) => s.measure().await,
            Self::Simulated(s) => s.measure().await,
        }
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeSensor;
    use std::time::Instant;

    const W1_OK: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n72 01 4b 46 7f ff 0e 10 57 t=23125\n";
    const W1_BAD_CRC: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=00 NO\n72 01 4b 46 7f ff 0e 10 57 t=85000\n";

    #[tokio::test]
    async fn test_checksum_failures_then_success() {
        let mut sensor = FakeSensor::new(vec![
            Err(Fault::Sensor("checksum".into())),
            Err(Fault::Sensor("checksum".into())),
            Ok(Measurement::dual(21.5, 45.0)),
        ]);
        let reads = sensor.reads();
        let backoff = Duration::from_millis(20);

        let started = Instant::now();
        let m = measure_with_retry(&mut sensor, backoff, 10).await.unwrap();

        assert_eq!(m, Measurement::dual(21.5, 45.0));
        assert_eq!(reads.get(), 3);
        assert!(started.elapsed() >= 2 * backoff);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let mut sensor = FakeSensor::new(vec![Err(Fault::Sensor("checksum".into())); 5]);
        let reads = sensor.reads();

        let result = measure_with_retry(&mut sensor, Duration::from_millis(1), 3).await;

        assert!(matches!(result, Err(Fault::Sensor(_))));
        assert_eq!(reads.get(), 3);
    }

    #[tokio::test]
    async fn test_io_faults_are_not_retried() {
        let mut sensor = FakeSensor::new(vec![Err(Fault::Io("eio".into())), Ok(Measurement::temperature_only(1.0))]);
        let reads = sensor.reads();

        let result = measure_with_retry(&mut sensor, Duration::from_millis(1), 10).await;

        assert_eq!(result, Err(Fault::Io("eio".into())));
        assert_eq!(reads.get(), 1);
    }

    #[tokio::test]
    async fn test_settling_delay_only_before_first_read() {
        let mut sensor = Settling::new(Simulated::default(), Duration::from_millis(30));

        let started = Instant::now();
        sensor.measure().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));

        let started = Instant::now();
        sensor.measure().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(30));
    }

    #[test]
    fn test_parse_w1_slave() {
        assert_eq!(parse_w1_slave(W1_OK), Ok(23.125));
        assert!(matches!(parse_w1_slave(W1_BAD_CRC), Err(Fault::Sensor(_))));
        assert!(matches!(parse_w1_slave(""), Err(Fault::Sensor(_))));
        assert!(matches!(parse_w1_slave("aa : crc=57 YES\naa t=oops\n"), Err(Fault::Sensor(_))));
    }

    #[test]
    fn test_parse_dht_json() {
        assert_eq!(parse_dht_json(r#"{"t": 21.5, "h": 45.0}"#), Ok(Measurement::dual(21.5, 45.0)));
        assert!(matches!(parse_dht_json("null"), Err(Fault::Sensor(_))));
        assert!(matches!(parse_dht_json(r#"{"t": 21.5}"#), Err(Fault::Sensor(_))));
    }

    #[tokio::test]
    async fn test_ds18b20_discovery_and_read() {
        let dir = std::env::temp_dir().join(format!("envlink-w1-{}", std::process::id()));
        let device = dir.join("28-0316a2795bff");
        std::fs::create_dir_all(&device).unwrap();
        std::fs::create_dir_all(dir.join("w1_bus_master1")).unwrap();
        std::fs::write(device.join("w1_slave"), W1_OK).unwrap();

        let mut sensor = Ds18b20::discover(&dir).unwrap();
        let m = sensor.measure().await.unwrap();
        assert_eq!(m, Measurement::temperature_only(23.125));

        std::fs::remove_dir_all(&dir).ok();
    }
}
