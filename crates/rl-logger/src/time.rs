// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// UTC wall-clock time. `sub_second` counts 100ns ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub sub_second: u32,
}

impl Timestamp {
    pub fn from_datetime(time: &DateTime<Utc>) -> Self {
        Self {
            year: u16::try_from(time.year()).unwrap_or_default(),
            month: time.month() as u8,
            day: time.day() as u8,
            hour: time.hour() as u8,
            minute: time.minute() as u8,
            second: time.second() as u8,
            // Leap seconds report nanoseconds past one second.
            sub_second: (time.nanosecond() % 1_000_000_000) / 100,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:07}Z",
            self.year, self.month, self.day, self.hour, self.minute, self.second, self.sub_second
        )
    }
}

pub trait TimeProvider: Send + Sync {
    fn gmt_now(&self) -> Timestamp;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClockTimeProvider;

impl TimeProvider for ClockTimeProvider {
    fn gmt_now(&self) -> Timestamp {
        Timestamp::from_datetime(&Utc::now())
    }
}

/// Current time of an optional provider, or the zero timestamp.
pub fn now_or_default(provider: Option<&dyn TimeProvider>) -> Timestamp {
    provider.map(TimeProvider::gmt_now).unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64, nanos: u32) -> Timestamp {
        Timestamp::from_datetime(&Utc.timestamp_opt(secs, nanos).unwrap())
    }

    #[test]
    fn test_epoch() {
        let ts = at(0, 0);
        assert_eq!((ts.year, ts.month, ts.day), (1970, 1, 1));
        assert_eq!(ts.to_string(), "1970-01-01T00:00:00.0000000Z");
    }

    #[test]
    fn test_leap_day() {
        // 2024-02-29T12:34:56.789Z
        let ts = at(1_709_210_096, 789_000_000);
        assert_eq!((ts.year, ts.month, ts.day), (2024, 2, 29));
        assert_eq!((ts.hour, ts.minute, ts.second), (12, 34, 56));
        assert_eq!(ts.sub_second, 7_890_000);
    }

    #[test]
    fn test_ordering() {
        let earlier = at(0, 1_000);
        let later = at(2, 0);
        assert!(earlier < later);
        assert_eq!(now_or_default(None), Timestamp::default());
    }

    #[test]
    fn test_clock_reads_current_year() {
        let now = Utc::now();
        let ts = ClockTimeProvider.gmt_now();
        assert!(i32::from(ts.year) >= now.year());
        assert!(ts.sub_second < 10_000_000);
    }
}
