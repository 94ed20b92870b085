//! Daily send limiter — caps dispatches per sequence per UTC day.

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct DayCount {
    day: NaiveDate,
    sent: u32,
}

#[derive(Debug, Default)]
pub struct DailySendLimiter {
    counters: DashMap<Uuid, DayCount>,
}

impl DailySendLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes one send slot for `sequence_id` on `now`'s UTC day. Returns
    /// `false` once `limit` slots have been taken that day.
    pub fn try_acquire(&self, sequence_id: Uuid, limit: u32, now: DateTime<Utc>) -> bool {
        let day = now.date_naive();
        let mut count = self
            .counters
            .entry(sequence_id)
            .or_insert(DayCount { day, sent: 0 });
        if count.day != day {
            count.day = day;
            count.sent = 0;
        }
        if count.sent >= limit {
            return false;
        }
        count.sent += 1;
        true
    }

    pub fn sent_today(&self, sequence_id: Uuid, now: DateTime<Utc>) -> u32 {
        self.counters
            .get(&sequence_id)
            .filter(|c| c.day == now.date_naive())
            .map(|c| c.sent)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_limit_per_sequence() {
        let limiter = DailySendLimiter::new();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(limiter.try_acquire(a, 2, now));
        assert!(limiter.try_acquire(a, 2, now));
        assert!(!limiter.try_acquire(a, 2, now));
        assert!(limiter.try_acquire(b, 2, now));
        assert_eq!(limiter.sent_today(a, now), 2);
        assert_eq!(limiter.sent_today(b, now), 1);
    }

    #[test]
    fn test_resets_on_next_utc_day() {
        let limiter = DailySendLimiter::new();
        let late = Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 0).unwrap();
        let id = Uuid::new_v4();

        assert!(limiter.try_acquire(id, 1, late));
        assert!(!limiter.try_acquire(id, 1, late));

        let next_day = late + Duration::minutes(2);
        assert_eq!(limiter.sent_today(id, next_day), 0);
        assert!(limiter.try_acquire(id, 1, next_day));
    }
}
