//! Injectable time source for day-boundary decisions
//!
//! Rain resets, log rotation and log cleanup all depend on the local
//! calendar date. They read it through [`Clock`] so tests can move time
//! across midnight deterministically.
use chrono::{Offset, TimeZone};
use std::fmt;
#[cfg(test)]
use std::sync::Mutex;
use time::{OffsetDateTime, UtcOffset};

pub trait Clock: Send + Sync {
    /// Current wall-clock time in the station's local offset
    fn now(&self) -> OffsetDateTime;
}

/// How the station turns an instant into local time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalZone {
    /// Same offset all year round
    Fixed(UtcOffset),
    /// IANA zone; the offset follows daylight saving
    Named(chrono_tz::Tz),
    /// Whatever the host's zone says at each instant
    Host,
}

impl LocalZone {
    /// UTC offset in force at `instant`
    pub fn offset_at(&self, instant: OffsetDateTime) -> UtcOffset {
        match self {
            LocalZone::Fixed(offset) => *offset,
            LocalZone::Named(tz) => zone_offset(tz, instant),
            LocalZone::Host => zone_offset(&chrono::Local, instant),
        }
    }

    /// `instant` expressed in local time
    pub fn localize(&self, instant: OffsetDateTime) -> OffsetDateTime {
        instant.to_offset(self.offset_at(instant))
    }
}

impl fmt::Display for LocalZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalZone::Fixed(offset) => write!(f, "fixed offset {}", offset),
            LocalZone::Named(tz) => write!(f, "{}", tz.name()),
            LocalZone::Host => write!(f, "host time zone"),
        }
    }
}

fn zone_offset<Z: TimeZone>(zone: &Z, instant: OffsetDateTime) -> UtcOffset {
    let Some(utc) = chrono::DateTime::from_timestamp(instant.unix_timestamp(), instant.nanosecond())
    else {
        return UtcOffset::UTC;
    };
    let seconds = zone
        .offset_from_utc_datetime(&utc.naive_utc())
        .fix()
        .local_minus_utc();
    UtcOffset::from_whole_seconds(seconds).unwrap_or(UtcOffset::UTC)
}

/// Wall clock in the station's zone
///
/// The offset is looked up again on every call, so dates roll over at the
/// real local midnight on both sides of a daylight-saving change.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    zone: LocalZone,
}

impl SystemClock {
    pub fn new(zone: LocalZone) -> Self {
        Self { zone }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        self.zone.localize(OffsetDateTime::now_utc())
    }
}

/// Clock that only moves when told to
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: OffsetDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: time::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
