use chrono::{DateTime, Duration, Utc};

use crate::event::Event;

/// Decides whether a classified event is recent enough to notify about.
///
/// Two bounds are combined:
/// * the watermark: with a previous `last_checked`, only events after it are
///   accepted. `watermark_grace` is subtracted first because the source only
///   reports minute-resolution dates, so an event can be stamped slightly
///   before the check that first sees it. Identity dedup absorbs the overlap.
/// * a trailing `max_age` cap, which bounds the backlog imported on first
///   run or after downtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    max_age: Duration,
    watermark_grace: Duration,
}

impl TimeWindow {
    pub fn new(max_age: Duration, watermark_grace: Duration) -> Self {
        Self {
            max_age,
            watermark_grace,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn in_window(
        &self,
        event: &Event,
        last_checked: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        self.accepts(event.occurred_at, last_checked, now)
    }

    pub fn accepts(
        &self,
        occurred_at: DateTime<Utc>,
        last_checked: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if occurred_at < now - self.max_age {
            return false;
        }

        match last_checked {
            Some(watermark) => occurred_at > watermark - self.watermark_grace,
            None => true,
        }
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self {
            max_age: Duration::minutes(10),
            watermark_grace: Duration::minutes(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_first_run_uses_trailing_window() {
        let window = TimeWindow::new(Duration::minutes(10), Duration::zero());

        assert!(window.accepts(now(), None, now()));
        assert!(window.accepts(now() - Duration::minutes(10), None, now()));
        assert!(!window.accepts(now() - Duration::minutes(11), None, now()));
    }

    #[test]
    fn test_watermark_is_strict_without_grace() {
        let window = TimeWindow::new(Duration::minutes(30), Duration::zero());
        let watermark = Some(now() - Duration::minutes(5));

        assert!(window.accepts(now() - Duration::minutes(4), watermark, now()));
        assert!(!window.accepts(now() - Duration::minutes(5), watermark, now()));
        assert!(!window.accepts(now() - Duration::minutes(6), watermark, now()));
    }

    #[test]
    fn test_watermark_grace_absorbs_minute_truncation() {
        let window = TimeWindow::new(Duration::minutes(30), Duration::minutes(2));
        let watermark = Some(Utc.with_ymd_and_hms(2026, 10, 16, 11, 55, 30).unwrap());
        // Reported as 11:55 although it happened after the 11:55:30 check.
        let truncated = Utc.with_ymd_and_hms(2026, 10, 16, 11, 55, 0).unwrap();

        assert!(window.accepts(truncated, watermark, now()));
        assert!(!window.accepts(
            Utc.with_ymd_and_hms(2026, 10, 16, 11, 53, 0).unwrap(),
            watermark,
            now()
        ));
    }

    #[test]
    fn test_old_events_are_dropped_even_after_old_watermark() {
        let window = TimeWindow::new(Duration::minutes(10), Duration::minutes(2));
        let watermark = Some(now() - Duration::days(3));

        assert!(!window.accepts(now() - Duration::hours(1), watermark, now()));
        assert!(window.accepts(now() - Duration::minutes(1), watermark, now()));
    }

    #[test]
    fn test_future_events_are_accepted() {
        let window = TimeWindow::default();
        assert!(window.accepts(now() + Duration::minutes(3), Some(now()), now()));
    }
}
