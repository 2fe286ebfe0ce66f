//! ==============================================================================
//! telemetry.rs - time-series store client and sink
//! ==============================================================================
//!
//! purpose:
//!     forwards one cycle's fields to the store as line-protocol points.
//!
//! protocol:
//!     GET  /ping            -> 204 when the store accepts writes
//!     POST /write?db=<name> -> body `series,tag=value field=value ts_ns`
//!
//! policy:
//!     no ping, no write: an unreachable store is reported and the cycle
//!     moves on. once the ping succeeded, every field is written on its own
//!     even if an earlier one was rejected, and all of them carry the same
//!     timestamp.
//!
//! ==============================================================================

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::TelemetryConfig;
use crate::domain::SeriesPoint;
use crate::error::Fault;
use crate::indicator::{Blink, StatusLed};

/// liveness probe status meaning "ready to accept writes"
pub const READY_STATUS: u16 = 204;

pub trait TelemetryStore {
    /// status code of the liveness endpoint
    async fn ping(&mut self) -> Result<u16, Fault>;
    /// status code of one line-protocol write
    async fn write(&mut self, body: String) -> Result<u16, Fault>;
}

// ==============================================================================
// http store
// ==============================================================================

pub struct HttpStore {
    client: reqwest::Client,
    ping_url: String,
    write_url: String,
    query: Vec<(&'static str, String)>,
}

impl HttpStore {
    pub fn new(config: &TelemetryConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        let mut query = vec![("db", config.database.clone())];
        if let Some(user) = &config.username {
            query.push(("u", user.clone()));
        }
        if let Some(password) = &config.password {
            query.push(("p", password.clone()));
        }

        let base = config.base_url();
        Ok(Self {
            client,
            ping_url: format!("{}/ping", base),
            write_url: format!("{}/write", base),
            query,
        })
    }
}

impl TelemetryStore for HttpStore {
    async fn ping(&mut self) -> Result<u16, Fault> {
        let response = self
            .client
            .get(&self.ping_url)
            .send()
            .await
            .map_err(|e| Fault::TelemetryUnreachable(e.to_string()))?;
        Ok(response.status().as_u16())
    }

    async fn write(&mut self, body: String) -> Result<u16, Fault> {
        let response = self
            .client
            .post(&self.write_url)
            .query(&self.query)
            .body(body)
            .send()
            .await
            .map_err(|e| Fault::TelemetryRejected(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            debug!("[TELEMETRY] store said {}: {}", status, text.trim());
        }
        Ok(status.as_u16())
    }
}

// ==============================================================================
// sink
// ==============================================================================

pub struct TelemetrySink<S> {
    store: S,
    led: StatusLed,
}

impl<S: TelemetryStore> TelemetrySink<S> {
    pub fn new(store: S, led: StatusLed) -> Self {
        Self { store, led }
    }

    /// Write every field as its own point; returns how many were accepted.
    pub async fn transmit(
        &mut self,
        series: &str,
        tags: &[(String, String)],
        fields: &[(&str, f64)],
        timestamp_ns: i64,
    ) -> Result<usize, Fault> {
        match self.store.ping().await {
            Ok(READY_STATUS) => {}
            Ok(status) => {
                return self
                    .unreachable(Fault::TelemetryUnreachable(format!("ping answered {}", status)))
                    .await
            }
            Err(Fault::TelemetryUnreachable(reason)) => {
                return self.unreachable(Fault::TelemetryUnreachable(reason)).await
            }
            Err(e) => return self.unreachable(Fault::TelemetryUnreachable(e.to_string())).await,
        }

        let mut accepted = 0;
        let mut rejected = Vec::new();
        for &(field, value) in fields {
            let point = SeriesPoint { series, tags, field, value, timestamp_ns };
            match self.store.write(point.to_line()).await {
                Ok(status) if (200..300).contains(&status) => {
                    info!("[TELEMETRY] wrote {}={} (status {})", field, value, status);
                    accepted += 1;
                }
                Ok(status) => rejected.push(format!("{}: status {}", field, status)),
                Err(e) => rejected.push(format!("{}: {}", field, e)),
            }
        }

        if rejected.is_empty() {
            Ok(accepted)
        } else {
            self.led.show(Blink::Rejected).await;
            Err(Fault::TelemetryRejected(rejected.join(", ")))
        }
    }

    async fn unreachable(&mut self, fault: Fault) -> Result<usize, Fault> {
        warn!("[TELEMETRY] database not available: {}", fault);
        self.led.show(Blink::Unreachable).await;
        Err(fault)
    }
}
