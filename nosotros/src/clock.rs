use crate::ports::Clock;
use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::warn;

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of `last_accessed` stamps. Strictly increasing within a process so
/// two touches in the same millisecond still have a defined order.
#[derive(Debug, Default)]
pub struct AccessClock {
    last: AtomicI64,
}

impl AccessClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&self) -> i64 {
        self.tick_from(shared::now_millis())
    }

    fn tick_from(&self, now: i64) -> i64 {
        let prev = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(now.max(prev + 1))
            })
            .unwrap_or_else(|prev| prev);
        now.max(prev + 1)
    }
}

/// Time zone the calendar day is computed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceZone {
    Named(Tz),
    /// The device's local zone; only used when the named zone is unusable.
    DeviceLocal,
}

impl ReferenceZone {
    pub fn parse(name: &str) -> Self {
        match name.parse::<Tz>() {
            Ok(tz) => ReferenceZone::Named(tz),
            Err(e) => {
                warn!(zone = name, error = %e, "Unknown reference time zone, using local day");
                ReferenceZone::DeviceLocal
            }
        }
    }

    /// Calendar day of `now` in this zone as `YYYY-MM-DD`.
    pub fn day_key(&self, now: DateTime<Utc>) -> String {
        match self {
            ReferenceZone::Named(tz) => now.with_timezone(tz).format("%Y-%m-%d").to_string(),
            ReferenceZone::DeviceLocal => now.with_timezone(&Local).format("%Y-%m-%d").to_string(),
        }
    }
}
