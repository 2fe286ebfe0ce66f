//! ==============================================================================
//! radio.rs - wireless radio driver
//! ==============================================================================
//!
//! purpose:
//!     the low-level radio operations the network link sequences: regulatory
//!     domain, power, join, status, address, teardown.
//!
//! why subprocess?:
//!     on a linux board the radio belongs to NetworkManager and the kernel
//!     rfkill switch. driving `nmcli`, `iw` and `rfkill` keeps us out of
//!     netlink and works on any distro image that ships them.
//!
//! relationships:
//!     - used by: link.rs (WifiLink)
//!
//! ==============================================================================

use std::net::IpAddr;
use tokio::process::Command;
use tracing::debug;

use crate::error::Fault;

/// Radio association status, numbered like the pico's cyw43 driver codes:
/// negative is a hard failure, 3 means an address was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioStatus {
    Idle,
    Joining,
    NoAddress,
    Up,
    Failed(i8),
}

impl RadioStatus {
    pub fn code(self) -> i8 {
        match self {
            Self::Idle => 0,
            Self::Joining => 1,
            Self::NoAddress => 2,
            Self::Up => 3,
            Self::Failed(code) => code,
        }
    }

    /// polling can stop: either up or failed for good
    pub fn is_settled(self) -> bool {
        let code = self.code();
        code < 0 || code >= 3
    }
}

pub trait Radio {
    async fn set_country(&mut self, country: &str) -> Result<(), Fault>;
    async fn activate(&mut self) -> Result<(), Fault>;
    /// start joining; returns before association completes
    async fn join(&mut self, ssid: &str, password: &str) -> Result<(), Fault>;
    async fn status(&mut self) -> Result<RadioStatus, Fault>;
    async fn address(&mut self) -> Result<Option<IpAddr>, Fault>;
    async fn disconnect(&mut self) -> Result<(), Fault>;
    /// deactivate and deinitialize the radio
    async fn power_down(&mut self) -> Result<(), Fault>;
}

pub struct NmcliRadio {
    interface: String,
}

impl NmcliRadio {
    pub fn new(interface: impl Into<String>) -> Self {
        Self { interface: interface.into() }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<String, Fault> {
        debug!("[RADIO] {} {}", program, args.join(" "));
        let output = Command::new(program).args(args).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Fault::Link(format!("{} failed: {}", program, stderr.trim())));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Radio for NmcliRadio {
    async fn set_country(&mut self, country: &str) -> Result<(), Fault> {
        self.run("iw", &["reg", "set", country]).await.map(drop)
    }

    async fn activate(&mut self) -> Result<(), Fault> {
        self.run("rfkill", &["unblock", "wifi"]).await?;
        self.run("nmcli", &["radio", "wifi", "on"]).await.map(drop)
    }

    async fn join(&mut self, ssid: &str, password: &str) -> Result<(), Fault> {
        let mut args = vec!["--wait", "0", "device", "wifi", "connect", ssid];
        if !password.is_empty() {
            args.extend(["password", password]);
        }
        args.extend(["ifname", self.interface.as_str()]);
        self.run("nmcli", &args).await.map(drop)
    }

    async fn status(&mut self) -> Result<RadioStatus, Fault> {
        let out = self
            .run("nmcli", &["-t", "-f", "GENERAL.STATE", "device", "show", &self.interface])
            .await?;
        parse_device_state(&out)
            .ok_or_else(|| Fault::Link(format!("unexpected nmcli state output: {}", out.trim())))
    }

    async fn address(&mut self) -> Result<Option<IpAddr>, Fault> {
        let out = self
            .run("nmcli", &["-t", "-f", "IP4.ADDRESS", "device", "show", &self.interface])
            .await?;
        Ok(parse_ipv4_address(&out))
    }

    async fn disconnect(&mut self) -> Result<(), Fault> {
        self.run("nmcli", &["device", "disconnect", &self.interface]).await.map(drop)
    }

    async fn power_down(&mut self) -> Result<(), Fault> {
        self.run("nmcli", &["radio", "wifi", "off"]).await?;
        self.run("rfkill", &["block", "wifi"]).await.map(drop)
    }
}

/// map `GENERAL.STATE:100 (connected)` onto a radio status
fn parse_device_state(out: &str) -> Option<RadioStatus> {
    let value = out.lines().find_map(|l| l.trim().strip_prefix("GENERAL.STATE:"))?;
    let code: u16 = value.split_whitespace().next()?.parse().ok()?;
    Some(match code {
        100 => RadioStatus::Up,
        70..=90 => RadioStatus::NoAddress,
        40..=60 => RadioStatus::Joining,
        120 => RadioStatus::Failed(-1),
        _ => RadioStatus::Idle,
    })
}

/// first address from `IP4.ADDRESS[1]:192.168.1.5/24`
fn parse_ipv4_address(out: &str) -> Option<IpAddr> {
    out.lines()
        .filter(|l| l.starts_with("IP4.ADDRESS"))
        .find_map(|l| {
            let (_, value) = l.split_once(':')?;
            value.split('/').next()?.trim().parse().ok()
        })
}
