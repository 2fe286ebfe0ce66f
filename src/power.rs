//! Low-power suspension between cycles, and the device reset.

use std::io::Write;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::{ResetAction, SleepMode};
use crate::error::Fault;

/// Exit status asking the service manager for a restart (EX_TEMPFAIL).
pub const RESET_EXIT_CODE: i32 = 75;

pub trait PowerControl {
    async fn suspend(&mut self, mode: SleepMode, duration: Duration) -> Result<(), Fault>;
    /// Restart the device. The system implementation does not return.
    fn reset(&mut self, fault: &Fault);
}

pub struct SystemPower {
    on_fault: ResetAction,
    wake_command: String,
}

impl SystemPower {
    pub fn new(on_fault: ResetAction, wake_command: impl Into<String>) -> Self {
        Self { on_fault, wake_command: wake_command.into() }
    }
}

impl PowerControl for SystemPower {
    async fn suspend(&mut self, mode: SleepMode, duration: Duration) -> Result<(), Fault> {
        match mode {
            SleepMode::Light => {
                info!("[POWER] sleeping for {}s", duration.as_secs());
                tokio::time::sleep(duration).await;
            }
            SleepMode::Deep => {
                info!("[POWER] suspending to ram for {}s", duration.as_secs());
                let secs = duration.as_secs().max(1).to_string();
                // rtcwake blocks until the rtc alarm wakes the machine again
                let status = Command::new(&self.wake_command)
                    .args(["-m", "mem", "-s", &secs])
                    .kill_on_drop(true)
                    .status()
                    .await;
                match status {
                    Ok(s) if s.success() => {}
                    Ok(s) => {
                        warn!("[POWER] {} exited with {}, falling back to plain sleep", self.wake_command, s);
                        tokio::time::sleep(duration).await;
                    }
                    Err(e) => {
                        warn!("[POWER] {} unavailable ({}), falling back to plain sleep", self.wake_command, e);
                        tokio::time::sleep(duration).await;
                    }
                }
            }
        }
        Ok(())
    }

    fn reset(&mut self, fault: &Fault) {
        std::io::stdout().flush().ok();
        std::io::stderr().flush().ok();

        if self.on_fault == ResetAction::Reboot {
            warn!("[POWER] rebooting after: {}", fault);
            if let Err(e) = std::process::Command::new("systemctl").arg("reboot").status() {
                warn!("[POWER] reboot failed: {}", e);
            }
        }
        std::process::exit(RESET_EXIT_CODE);
    }
}
