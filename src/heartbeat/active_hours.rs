//! Active-hours windows for heartbeat ticks.
//!
//! A window is `start`..`end` in `HH:MM` wall-clock time. `end` may be
//! `24:00`, windows may wrap past midnight (`22:00`..`06:00`) and a window
//! whose start equals its end is always active.

use chrono::{DateTime, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Which clock an active-hours window is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timezone {
    #[default]
    Local,
    Utc,
}

/// The part of the day an agent's heartbeat may run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveHours {
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub timezone: Timezone,
}

impl ActiveHours {
    pub fn new(start: impl Into<String>, end: impl Into<String>, timezone: Timezone) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            timezone,
        }
    }

    /// Whether `now` falls inside the window.
    ///
    /// A malformed window never silences an agent: it is treated as always
    /// active and logged.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        let (Some(start), Some(end)) = (parse_hhmm(&self.start), parse_hhmm(&self.end)) else {
            tracing::warn!(
                start = %self.start,
                end = %self.end,
                "Ignoring malformed active hours window"
            );
            return true;
        };
        let minute = match self.timezone {
            Timezone::Utc => minute_of_day(now.hour(), now.minute()),
            Timezone::Local => {
                let local = now.with_timezone(&Local);
                minute_of_day(local.hour(), local.minute())
            }
        };
        window_contains(start, end, minute)
    }
}

fn minute_of_day(hour: u32, minute: u32) -> u32 {
    hour * 60 + minute
}

/// Parse `HH:MM` into minutes since midnight. `24:00` is allowed.
pub fn parse_hhmm(value: &str) -> Option<u32> {
    let (h, m) = value.trim().split_once(':')?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return None;
    }
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    match (hour, minute) {
        (24, 0) => Some(24 * 60),
        (0..=23, 0..=59) => Some(minute_of_day(hour, minute)),
        _ => None,
    }
}

/// Half-open `[start, end)` containment with midnight wrap-around.
pub fn window_contains(start: u32, end: u32, minute: u32) -> bool {
    if start == end {
        return true;
    }
    if start < end {
        minute >= start && minute < end
    } else {
        minute >= start || minute < end
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_parse_hhmm() {
        assert_eq!(parse_hhmm("00:00"), Some(0));
        assert_eq!(parse_hhmm("9:30"), Some(570));
        assert_eq!(parse_hhmm("23:59"), Some(1439));
        assert_eq!(parse_hhmm("24:00"), Some(1440));
        assert_eq!(parse_hhmm("24:01"), None);
        assert_eq!(parse_hhmm("12:60"), None);
        assert_eq!(parse_hhmm("noon"), None);
        assert_eq!(parse_hhmm("12:5"), None);
    }

    #[test]
    fn test_daytime_window() {
        let (start, end) = (9 * 60, 17 * 60);
        assert!(!window_contains(start, end, 8 * 60 + 59));
        assert!(window_contains(start, end, 9 * 60));
        assert!(window_contains(start, end, 16 * 60 + 59));
        assert!(!window_contains(start, end, 17 * 60));
    }

    #[test]
    fn test_window_wrapping_midnight() {
        let (start, end) = (22 * 60, 6 * 60);
        assert!(window_contains(start, end, 23 * 60));
        assert!(window_contains(start, end, 0));
        assert!(window_contains(start, end, 5 * 60 + 59));
        assert!(!window_contains(start, end, 12 * 60));
    }

    #[test]
    fn test_equal_bounds_always_active() {
        assert!(window_contains(480, 480, 0));
        assert!(window_contains(480, 480, 1439));
    }

    #[test]
    fn test_end_of_day_bound() {
        assert!(window_contains(18 * 60, 24 * 60, 23 * 60 + 59));
        assert!(!window_contains(18 * 60, 24 * 60, 0));
    }

    #[test]
    fn test_is_active_in_utc() {
        let hours = ActiveHours::new("08:00", "20:00", Timezone::Utc);
        let noon = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let night = Utc.with_ymd_and_hms(2025, 3, 1, 23, 0, 0).unwrap();
        assert!(hours.is_active(noon));
        assert!(!hours.is_active(night));
    }

    #[test]
    fn test_malformed_window_is_active() {
        let hours = ActiveHours::new("later", "20:00", Timezone::Utc);
        assert!(hours.is_active(Utc::now()));
    }

    #[test]
    fn test_timezone_defaults_to_local() {
        let hours: ActiveHours =
            serde_json::from_str(r#"{"start": "08:00", "end": "18:00"}"#).unwrap();
        assert_eq!(hours.timezone, Timezone::Local);
    }
}
