use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;

/// Server-side stamp applied to every access event at publish time. The
/// caller's clock is never trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    /// `%Y-%m-%d`, what the attendance API expects in `attendance_date`.
    pub date: String,
    /// `%H:%M:%S`, what the attendance API expects in `attendance_time`.
    pub time: String,
    /// Calendar day, keys the spillover file.
    pub day: NaiveDate,
}

pub trait TimeSource: Send + Sync {
    fn stamp(&self) -> Stamp;
    /// Wall clock in the configured zone, for scheduling decisions.
    fn now_local(&self) -> NaiveDateTime;
}

/// Stamps in one explicit, configured timezone, so every process of the
/// relay agrees on what "today" means regardless of the host zone.
#[derive(Debug, Clone, Copy)]
pub struct ZonedClock {
    tz: Tz,
}

impl ZonedClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl TimeSource for ZonedClock {
    fn stamp(&self) -> Stamp {
        stamp_from(self.now_local())
    }

    fn now_local(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.tz).naive_local()
    }
}

/// Frozen clock for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl TimeSource for FixedClock {
    fn stamp(&self) -> Stamp {
        stamp_from(self.0)
    }

    fn now_local(&self) -> NaiveDateTime {
        self.0
    }
}

fn stamp_from(now: NaiveDateTime) -> Stamp {
    Stamp {
        date: now.format("%Y-%m-%d").to_string(),
        time: now.format("%H:%M:%S").to_string(),
        day: now.date(),
    }
}

/// Envconfig wrapper for an IANA timezone name.
#[derive(Debug, Clone, Copy)]
pub struct EnvTimezone(pub Tz);

impl FromStr for EnvTimezone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Tz>().map(EnvTimezone).map_err(|e| e.to_string())
    }
}
