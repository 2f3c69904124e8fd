//! Calendar arithmetic for timed log rotation.
//!
//! Each mode maps a UTC timestamp onto an integer bucket; the file
//! transport starts a new part whenever the bucket changes. Weekly buckets
//! are anchored on Monday.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Timelike, Utc};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RotateMode {
    #[default]
    None,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl FromStr for RotateMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            _ => Err(()),
        }
    }
}

/// Tracks which calendar bucket the current log part belongs to.
#[derive(Debug)]
pub(crate) struct Rotater {
    mode: RotateMode,
    current: i64,
}

impl Rotater {
    pub(crate) fn new(mode: RotateMode, now: DateTime<Utc>) -> Self {
        Self {
            mode,
            current: bucket(mode, now),
        }
    }

    /// True when `now` falls into a new bucket; advances to that bucket.
    pub(crate) fn update(&mut self, now: DateTime<Utc>) -> bool {
        let value = bucket(self.mode, now);
        if value == self.current {
            return false;
        }
        self.current = value;
        true
    }
}

fn bucket(mode: RotateMode, now: DateTime<Utc>) -> i64 {
    let days = i64::from(now.num_days_from_ce());
    match mode {
        RotateMode::None => 0,
        RotateMode::Hourly => days * 24 + i64::from(now.hour()),
        RotateMode::Daily => days,
        RotateMode::Weekly => days - i64::from(now.weekday().num_days_from_monday()),
        RotateMode::Monthly => i64::from(now.year()) * 12 + i64::from(now.month()),
    }
}
