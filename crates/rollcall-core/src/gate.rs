//! Time-of-day eligibility window for attendance capture.

use chrono::NaiveTime;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum WindowError {
    #[error("window start {start} is after window end {end}")]
    Inverted { start: NaiveTime, end: NaiveTime },
    #[error("invalid time of day '{0}' (expected HH:MM or HH:MM:SS)")]
    InvalidTime(String),
}

/// True iff `start <= now <= end`.
pub fn is_open(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    start <= now && now <= end
}

/// Parse `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime, WindowError> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| WindowError::InvalidTime(value.to_string()))
}

/// Inclusive daily interval during which attendance may be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, WindowError> {
        if start > end {
            return Err(WindowError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }

    pub fn is_open(&self, now: NaiveTime) -> bool {
        is_open(now, self.start, self.end)
    }
}

impl Default for TimeWindow {
    /// 09:00 to 12:30.
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(12, 30, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}–{}", self.start.format("%H:%M:%S"), self.end.format("%H:%M:%S"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let window = TimeWindow::default();
        assert!(window.is_open(t(9, 0, 0)));
        assert!(window.is_open(t(12, 30, 0)));
    }

    #[test]
    fn test_outside_bounds_closed() {
        let window = TimeWindow::default();
        assert!(!window.is_open(t(8, 59, 59)));
        assert!(!window.is_open(t(12, 30, 1)));
        assert!(!window.is_open(t(13, 0, 0)));
    }

    #[test]
    fn test_free_function_matches_window() {
        assert!(is_open(t(10, 15, 0), t(9, 0, 0), t(12, 30, 0)));
        assert!(!is_open(t(0, 0, 0), t(9, 0, 0), t(12, 30, 0)));
    }

    #[test]
    fn test_inverted_window_rejected() {
        let err = TimeWindow::new(t(13, 0, 0), t(9, 0, 0)).unwrap_err();
        assert!(matches!(err, WindowError::Inverted { .. }));
    }

    #[test]
    fn test_single_instant_window() {
        let window = TimeWindow::new(t(9, 0, 0), t(9, 0, 0)).unwrap();
        assert!(window.is_open(t(9, 0, 0)));
        assert!(!window.is_open(t(9, 0, 1)));
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(parse_time_of_day("09:00").unwrap(), t(9, 0, 0));
        assert_eq!(parse_time_of_day(" 12:30:15 ").unwrap(), t(12, 30, 15));
        assert!(matches!(
            parse_time_of_day("half past nine"),
            Err(WindowError::InvalidTime(_))
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(TimeWindow::default().to_string(), "09:00:00–12:30:00");
    }
}
