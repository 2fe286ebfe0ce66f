//! Local real-time clock, set from the time source once per connection.
//!
//! The clock keeps local wall time (timezone offset applied) like the board's
//! hardware RTC does, and runs forward from the moment it was set on the
//! monotonic clock. Store timestamps are derived back to UTC.

use chrono::NaiveDate;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::domain::ClockSample;

#[derive(Clone)]
pub struct RtcClock {
    set_at: Arc<Mutex<Option<(ClockSample, Instant)>>>,
    utc_offset_seconds: i64,
}

impl RtcClock {
    pub fn new(utc_offset_seconds: i64) -> Self {
        Self { set_at: Arc::new(Mutex::new(None)), utc_offset_seconds }
    }

    pub fn set(&self, sample: ClockSample) {
        if let Ok(mut slot) = self.set_at.lock() {
            *slot = Some((sample, Instant::now()));
        }
    }

    pub fn is_set(&self) -> bool {
        self.read().is_some()
    }

    fn read(&self) -> Option<(ClockSample, Instant)> {
        self.set_at.lock().ok().and_then(|slot| *slot)
    }

    /// nanoseconds since the unix epoch, UTC; `None` until the first sync
    pub fn unix_nanos(&self) -> Option<i64> {
        let (sample, at) = self.read()?;
        let local = NaiveDate::from_ymd_opt(sample.year, sample.month, sample.day)?
            .and_hms_opt(sample.hour, sample.minute, sample.second)?
            .and_utc()
            .timestamp();
        let secs = local - self.utc_offset_seconds;
        let elapsed = i64::try_from(at.elapsed().as_nanos()).ok()?;
        secs.checked_mul(1_000_000_000)?.checked_add(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_unset_clock_has_no_time() {
        let clock = RtcClock::new(0);
        assert!(!clock.is_set());
        assert_eq!(clock.unix_nanos(), None);
    }

    #[test]
    fn test_timestamps_are_utc_and_advance() {
        let clock = RtcClock::new(7200);
        // 02:00 local at +2h is midnight UTC, 2024-01-01
        clock.set(ClockSample { year: 2024, month: 1, day: 1, hour: 2, minute: 0, second: 0 });

        let first = clock.unix_nanos().unwrap();
        assert!(first >= 1_704_067_200_000_000_000);
        assert!(first < 1_704_067_201_000_000_000);

        std::thread::sleep(Duration::from_millis(2));
        assert!(clock.unix_nanos().unwrap() > first);
    }

    #[test]
    fn test_clones_share_the_clock() {
        let clock = RtcClock::new(0);
        let other = clock.clone();
        clock.set(ClockSample { year: 2024, month: 6, day: 1, hour: 0, minute: 0, second: 0 });
        assert!(other.is_set());
    }
}
