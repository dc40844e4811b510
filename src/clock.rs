//! Clock port.
//!
//! View URL expiry and upload timing read the current time through this
//! trait so tests can move time explicitly.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

use crate::errors::lock_or_recover;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock_or_recover(&self.now, "clock advance");
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *lock_or_recover(&self.now, "clock set") = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock_or_recover(&self.now, "clock read")
    }
}
