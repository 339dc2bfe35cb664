//! Time-bounded validity of grants and the clock they are evaluated against

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AuthzError, Result};

/// Opaque validity predicate attached to a grant
///
/// The engine only ever asks whether the life cycle holds at a given
/// instant; what it encodes is up to the hosting application.
pub trait LifeCycle: fmt::Debug + Send + Sync {
    /// Whether the grant is in force at `now`
    fn is_valid_at(&self, now: DateTime<Utc>) -> Result<bool>;
}

/// Source of the current instant
pub trait Clock: fmt::Debug + Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// Validity window with optional open ends
///
/// Valid for `not_before <= now < not_after`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn between(not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Self {
        Self {
            not_before: Some(not_before),
            not_after: Some(not_after),
        }
    }

    pub fn starting(not_before: DateTime<Utc>) -> Self {
        Self {
            not_before: Some(not_before),
            not_after: None,
        }
    }

    pub fn until(not_after: DateTime<Utc>) -> Self {
        Self {
            not_before: None,
            not_after: Some(not_after),
        }
    }
}

impl LifeCycle for TimeWindow {
    fn is_valid_at(&self, now: DateTime<Utc>) -> Result<bool> {
        if let (Some(start), Some(end)) = (self.not_before, self.not_after) {
            if start > end {
                return Err(AuthzError::LifeCycleEvaluation {
                    reason: format!("window starts at {} after it ends at {}", start, end),
                });
            }
        }

        let started = self.not_before.map_or(true, |start| start <= now);
        let ended = self.not_after.map_or(false, |end| end <= now);
        Ok(started && !ended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_window_bounds() {
        let window = TimeWindow::between(at(9), at(17));
        assert!(!window.is_valid_at(at(8)).unwrap());
        assert!(window.is_valid_at(at(9)).unwrap());
        assert!(window.is_valid_at(at(16)).unwrap());
        assert!(!window.is_valid_at(at(17)).unwrap());
    }

    #[test]
    fn test_open_ended_windows() {
        assert!(TimeWindow::starting(at(9)).is_valid_at(at(23)).unwrap());
        assert!(!TimeWindow::starting(at(9)).is_valid_at(at(1)).unwrap());
        assert!(TimeWindow::until(at(9)).is_valid_at(at(1)).unwrap());
        assert!(!TimeWindow::until(at(9)).is_valid_at(at(10)).unwrap());
    }

    #[test]
    fn test_inverted_window_is_an_error() {
        let window = TimeWindow::between(at(17), at(9));
        assert!(matches!(
            window.is_valid_at(at(12)),
            Err(AuthzError::LifeCycleEvaluation { .. })
        ));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(at(9));
        assert_eq!(clock.now(), at(9));
        clock.advance(Duration::hours(2));
        assert_eq!(clock.now(), at(11));
        clock.set(at(1));
        assert_eq!(clock.now(), at(1));
    }
}
