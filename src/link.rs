//! ==============================================================================
//! link.rs - network link state handling
//! ==============================================================================
//!
//! purpose:
//!     owns the LinkState and sequences the radio through one
//!     connect/disconnect per cycle. a successful connect always ends with a
//!     time sync written to the local clock; a connect that cannot sync time
//!     fails as a whole.
//!
//! relationships:
//!     - used by: controller.rs (connect before transmit, disconnect after)
//!     - uses: radio.rs (association), ntp.rs (time), clock.rs (rtc)
//!     - uses: indicator.rs (poll toggle, connected/disconnected blinks)
//!     - uses: hal.rs (aux pin parked after radio deinit)
//!
//! ==============================================================================

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::clock::RtcClock;
use crate::config::{LinkConfig, WifiConfig};
use crate::domain::LinkState;
use crate::error::Fault;
use crate::hal::PinDriver;
use crate::indicator::{Blink, StatusLed};
use crate::ntp::{SntpClient, TimeSource};
use crate::radio::{NmcliRadio, Radio, RadioStatus};

pub trait Link {
    /// bring the link up and sync the clock; no-op when already connected
    async fn connect(&mut self) -> Result<IpAddr, Fault>;
    /// tear the link down; safe to call when already down
    async fn disconnect(&mut self);
    fn status(&self) -> LinkState;
}

// ==============================================================================
// wifi link - radio joined and powered down every cycle
// ==============================================================================

pub struct WifiLink<R, T> {
    radio: R,
    time: T,
    clock: RtcClock,
    led: StatusLed,
    aux_pin: Box<dyn PinDriver>,
    wifi: WifiConfig,
    max_polls: u32,
    poll_interval: Duration,
    state: LinkState,
    address: Option<IpAddr>,
    country_set: bool,
}

impl<R: Radio, T: TimeSource> WifiLink<R, T> {
    pub fn new(
        radio: R,
        time: T,
        clock: RtcClock,
        led: StatusLed,
        aux_pin: Box<dyn PinDriver>,
        wifi: WifiConfig,
        link: &LinkConfig,
    ) -> Self {
        Self {
            radio,
            time,
            clock,
            led,
            aux_pin,
            wifi,
            max_polls: link.max_polls,
            poll_interval: link.poll_interval(),
            state: LinkState::Disconnected,
            address: None,
            country_set: false,
        }
    }

    /// country code (once), association, then time sync
    async fn bring_up(&mut self) -> Result<IpAddr, Fault> {
        if !self.country_set {
            self.radio.set_country(&self.wifi.country).await?;
            self.country_set = true;
        }
        let address = self.associate().await?;
        sync_clock(&mut self.time, &self.clock).await?;
        Ok(address)
    }

    async fn associate(&mut self) -> Result<IpAddr, Fault> {
        self.radio.activate().await?;
        self.radio.join(&self.wifi.ssid, &self.wifi.password).await?;
        info!("[LINK] establishing wifi connection to {}", self.wifi.ssid);

        let half = self.poll_interval / 2;
        let mut status = RadioStatus::Idle;
        let mut polls = 0;
        while polls < self.max_polls {
            status = self.radio.status().await?;
            polls += 1;
            debug!("[LINK] poll {}/{}: status {}", polls, self.max_polls, status.code());
            if status.is_settled() {
                break;
            }
            self.led.set(true);
            tokio::time::sleep(half).await;
            self.led.set(false);
            tokio::time::sleep(self.poll_interval - half).await;
        }

        if status != RadioStatus::Up {
            return Err(Fault::Link(format!(
                "wifi connection failed after {} polls (status {})",
                polls,
                status.code()
            )));
        }

        let address = self
            .radio
            .address()
            .await?
            .ok_or_else(|| Fault::Link("associated but no address assigned".to_string()))?;
        self.led.show(Blink::Connected(status.code() as u8)).await;
        info!("[LINK] wifi connection established, address {}", address);
        Ok(address)
    }
}

impl<R: Radio, T: TimeSource> Link for WifiLink<R, T> {
    async fn connect(&mut self) -> Result<IpAddr, Fault> {
        if self.state == LinkState::Connected && self.clock.is_set() {
            if let (Some(address), Ok(RadioStatus::Up)) = (self.address, self.radio.status().await) {
                debug!("[LINK] already connected");
                return Ok(address);
            }
        }

        self.state = LinkState::Connecting;
        match self.bring_up().await {
            Ok(address) => {
                self.state = LinkState::Connected;
                self.address = Some(address);
                Ok(address)
            }
            Err(e) => {
                self.state = LinkState::Failed;
                self.address = None;
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.radio.disconnect().await {
            debug!("[LINK] disconnect: {}", e);
        }
        if let Err(e) = self.radio.power_down().await {
            warn!("[LINK] radio power down failed: {}", e);
        }
        // without this the following light sleep can hang forever
        if let Err(e) = self.aux_pin.park_input_pull_down() {
            warn!("[LINK] parking aux pin failed: {:#}", e);
        }
        self.led.show(Blink::Disconnected).await;

        self.state = LinkState::Disconnected;
        self.address = None;
        info!("[LINK] wifi disconnected");
    }

    fn status(&self) -> LinkState {
        self.state
    }
}

async fn sync_clock<T: TimeSource>(time: &mut T, clock: &RtcClock) -> Result<(), Fault> {
    let sample = time.now().await?;
    clock.set(sample);
    info!("[LINK] clock set to {}", sample);
    Ok(())
}

// ==============================================================================
// host link - operating system owns the network
// ==============================================================================

/// upper bound for the system resolver on the host target
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Link for a general-purpose host: nothing to join or power down, but the
/// route to the store must exist and the clock is still synced per cycle.
pub struct HostLink<T> {
    time: T,
    clock: RtcClock,
    peer: String,
    state: LinkState,
    address: Option<IpAddr>,
}

impl<T: TimeSource> HostLink<T> {
    pub fn new(time: T, clock: RtcClock, peer_host: &str, peer_port: u16) -> Self {
        Self {
            time,
            clock,
            peer: format!("{}:{}", peer_host, peer_port),
            state: LinkState::Disconnected,
            address: None,
        }
    }

    /// local address of the route towards the store; sends nothing
    async fn route_address(&self) -> Result<IpAddr, Fault> {
        let peer: SocketAddr = tokio::time::timeout(RESOLVE_TIMEOUT, tokio::net::lookup_host(self.peer.as_str()))
            .await
            .map_err(|_| Fault::Link(format!("resolving {} timed out", self.peer)))?
            .map_err(|e| Fault::Link(format!("cannot resolve {}: {}", self.peer, e)))?
            .next()
            .ok_or_else(|| Fault::Link(format!("no address for {}", self.peer)))?;
        let bind: SocketAddr = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }
            .parse()
            .map_err(|_| Fault::Io("bad bind address".to_string()))?;
        let socket = UdpSocket::bind(bind).await?;
        socket
            .connect(peer)
            .await
            .map_err(|e| Fault::Link(format!("no route to {}: {}", self.peer, e)))?;
        Ok(socket.local_addr()?.ip())
    }
}

impl<T: TimeSource> Link for HostLink<T> {
    async fn connect(&mut self) -> Result<IpAddr, Fault> {
        if let (LinkState::Connected, Some(address)) = (self.state, self.address) {
            return Ok(address);
        }

        self.state = LinkState::Connecting;
        let result = match self.route_address().await {
            Ok(address) => sync_clock(&mut self.time, &self.clock).await.map(|_| address),
            Err(e) => Err(e),
        };
        match result {
            Ok(address) => {
                self.state = LinkState::Connected;
                self.address = Some(address);
                info!("[LINK] host network up, address {}", address);
                Ok(address)
            }
            Err(e) => {
                self.state = LinkState::Failed;
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) {
        self.state = LinkState::Disconnected;
        self.address = None;
        debug!("[LINK] host link released");
    }

    fn status(&self) -> LinkState {
        self.state
    }
}

// ==============================================================================
// deployment target selection
// ==============================================================================

pub enum AnyLink {
    Wifi(WifiLink<NmcliRadio, SntpClient>),
    Host(HostLink<SntpClient>),
}

impl Link for AnyLink {
    async fn connect(&mut self) -> Result<IpAddr, Fault> {
        match self {
            Self::Wifi(link) => link.connect().await,
            Self::Host(link) => link.connect().await,
        }
    }

    async fn disconnect(&mut self) {
        match self {
            Self::Wifi(link) => link.disconnect().await,
            Self::Host(link) => link.disconnect().await,
        }
    }

    fn status(&self) -> LinkState {
        match self {
            Self::Wifi(link) => link.status(),
            Self::Host(link) => link.status(),
        }
    }
}
