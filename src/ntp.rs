//! SNTP time source
//!
//! One 48-byte client request per query. Resolving the server, sending and
//! reading the answer share one short timeout.
//! Only the transmit timestamp seconds are used; sub-second precision does
//! not matter for a clock that is resynchronized every cycle.

use chrono::{DateTime, Datelike, Timelike};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, info};

use crate::config::TimeConfig;
use crate::domain::ClockSample;
use crate::error::Fault;

/// NTP epoch offset (1900-01-01 to 1970-01-01 in seconds)
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;
const PACKET_LEN: usize = 48;
/// byte offset of the transmit timestamp seconds field
const TRANSMIT_SECS_AT: usize = 40;

pub trait TimeSource {
    async fn now(&mut self) -> Result<ClockSample, Fault>;
}

/// SNTP client for time synchronization
pub struct SntpClient {
    host: String,
    port: u16,
    timeout: Duration,
    utc_offset_seconds: i64,
}

impl SntpClient {
    pub fn new(config: &TimeConfig) -> Self {
        Self {
            host: config.ntp_host.clone(),
            port: config.ntp_port,
            timeout: Duration::from_millis(config.timeout_ms),
            utc_offset_seconds: config.utc_offset_seconds,
        }
    }

    /// resolve, send and receive, all under one timeout
    async fn query(&self) -> Result<u32, Fault> {
        tokio::time::timeout(self.timeout, self.exchange())
            .await
            .map_err(|_| Fault::TimeSync(format!("no answer from {} within {:?}", self.host, self.timeout)))?
    }

    async fn exchange(&self) -> Result<u32, Fault> {
        let server = lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| Fault::TimeSync(format!("cannot resolve {}: {}", self.host, e)))?
            .next()
            .ok_or_else(|| Fault::TimeSync(format!("no address for {}", self.host)))?;

        let bind = if server.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(server).await?;

        // NTP request: LI=0, VN=3, Mode=3 (Client)
        let mut request = [0u8; PACKET_LEN];
        request[0] = 0x1B;
        socket.send(&request).await?;
        debug!("Sent NTP request to {}", server);

        let mut response = [0u8; PACKET_LEN];
        let len = socket.recv(&mut response).await?;

        parse_transmit_secs(&response[..len])
    }
}

impl TimeSource for SntpClient {
    async fn now(&mut self) -> Result<ClockSample, Fault> {
        let ntp_secs = self.query().await?;
        let sample = sample_from_ntp(ntp_secs, self.utc_offset_seconds)?;
        info!("SNTP sync successful: {}", sample);
        Ok(sample)
    }
}

fn parse_transmit_secs(packet: &[u8]) -> Result<u32, Fault> {
    if packet.len() < PACKET_LEN {
        return Err(Fault::TimeSync(format!("short response ({} bytes)", packet.len())));
    }
    let mut secs = [0u8; 4];
    secs.copy_from_slice(&packet[TRANSMIT_SECS_AT..TRANSMIT_SECS_AT + 4]);
    match u32::from_be_bytes(secs) {
        0 => Err(Fault::TimeSync("response carries no transmit time".to_string())),
        s => Ok(s),
    }
}

/// convert NTP seconds to a local wall-clock sample
pub fn sample_from_ntp(ntp_secs: u32, utc_offset_seconds: i64) -> Result<ClockSample, Fault> {
    let local = i64::from(ntp_secs) - NTP_UNIX_OFFSET + utc_offset_seconds;
    let dt = DateTime::from_timestamp(local, 0)
        .ok_or_else(|| Fault::TimeSync(format!("time {} out of range", local)))?;
    Ok(ClockSample {
        year: dt.year(),
        month: dt.month(),
        day: dt.day(),
        hour: dt.hour(),
        minute: dt.minute(),
        second: dt.second(),
    })
}
