//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     single-pin gpio access for the status led and the aux pin that has to
//!     be parked after the radio is deinitialized. abstracts away the
//!     difference between running on a real Raspberry Pi (using `rppal`) and
//!     a development machine (using mocks).
//!
//! relationships:
//!     - used by: indicator.rs (status led), link.rs (aux pin)
//!     - uses: rppal (on feature="hardware")
//!
//! ==============================================================================

use anyhow::Result;

pub trait PinDriver: Send {
    /// drive the pin as an output
    fn write(&mut self, level: bool) -> Result<()>;
    /// reconfigure the pin as an input with the pull-down enabled
    fn park_input_pull_down(&mut self) -> Result<()>;
}

/// open a gpio pin on whatever backend this build targets
pub fn open_pin(pin: u8) -> Result<Box<dyn PinDriver>> {
    Ok(Box::new(Pin::new(pin)?))
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For WSL / Non-Hardware Build)
// ==============================================================================================
#[cfg(not(feature = "hardware"))]
pub struct Pin {
    pin: u8,
}

#[cfg(not(feature = "hardware"))]
impl Pin {
    pub fn new(pin: u8) -> Result<Self> {
        tracing::debug!("[MOCK GPIO] Using mock pin {}", pin);
        Ok(Self { pin })
    }
}

#[cfg(not(feature = "hardware"))]
impl PinDriver for Pin {
    fn write(&mut self, level: bool) -> Result<()> {
        tracing::trace!("[MOCK GPIO] Pin {} write {}", self.pin, level);
        Ok(())
    }

    fn park_input_pull_down(&mut self) -> Result<()> {
        tracing::debug!("[MOCK GPIO] Pin {} set to input/pull-down", self.pin);
        Ok(())
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
#[cfg(feature = "hardware")]
pub struct Pin {
    pin: u8,
    gpio: rppal::gpio::Gpio,
}

#[cfg(feature = "hardware")]
impl Pin {
    pub fn new(pin: u8) -> Result<Self> {
        tracing::info!("Using REAL HARDWARE pin {} (rppal)", pin);
        Ok(Self { pin, gpio: rppal::gpio::Gpio::new()? })
    }
}

#[cfg(feature = "hardware")]
impl PinDriver for Pin {
    fn write(&mut self, level: bool) -> Result<()> {
        let mut p = self.gpio.get(self.pin)?.into_output();
        // CRITICAL: Prevent GPIO from resetting when dropped
        // Without this, the led turns off as soon as this function returns
        p.set_reset_on_drop(false);
        if level { p.set_high(); } else { p.set_low(); }
        Ok(())
    }

    fn park_input_pull_down(&mut self) -> Result<()> {
        let mut p = self.gpio.get(self.pin)?.into_input_pulldown();
        p.set_reset_on_drop(false);
        Ok(())
    }
}
