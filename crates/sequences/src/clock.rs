//! Scheduling clock — computes when the next step of an enrollment may fire.
//!
//! All arithmetic is done in UTC; the send window hours are interpreted as
//! UTC hours. The sequence's `timezone` is carried as a label only.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Timelike, Utc, Weekday};

use outreach_core::{OutreachError, OutreachResult};

use crate::types::SendWindow;

/// Source of "now" for the engine. Swapped for [`ManualTime`] in tests.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTime;

impl TimeSource for SystemTime {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven time for deterministic tests and simulations.
#[derive(Debug)]
pub struct ManualTime {
    now: parking_lot::Mutex<DateTime<Utc>>,
}

impl ManualTime {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: parking_lot::Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

fn at_hour(date: chrono::NaiveDate, hour: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or_default();
    DateTime::<Utc>::from_naive_utc_and_offset(date.and_time(time), Utc)
}

fn out_of_range(now: DateTime<Utc>, delay_days: u32, delay_hours: u32) -> OutreachError {
    OutreachError::InvalidState(format!(
        "delay of {}d {}h from {} is outside the representable time range",
        delay_days, delay_hours, now
    ))
}

/// Computes the next send timestamp for a step.
///
/// `window` must satisfy `start_hour < end_hour <= 23`. The result is never
/// before `now`, its hour lies in `[start_hour, end_hour)`, and with
/// `skip_weekends` it never falls on Saturday or Sunday. Fails with
/// `InvalidState` when the result cannot be represented.
pub fn next_run_time(
    now: DateTime<Utc>,
    delay_days: u32,
    delay_hours: u32,
    window: SendWindow,
    skip_weekends: bool,
) -> OutreachResult<DateTime<Utc>> {
    debug_assert!(window.start_hour < window.end_hour);
    let overflow = || out_of_range(now, delay_days, delay_hours);

    let delay = Duration::days(i64::from(delay_days)) + Duration::hours(i64::from(delay_hours));
    let mut candidate = now.checked_add_signed(delay).ok_or_else(overflow)?;

    if candidate.hour() < window.start_hour {
        candidate = at_hour(candidate.date_naive(), window.start_hour);
    } else if candidate.hour() >= window.end_hour {
        let next_day = candidate.date_naive().succ_opt().ok_or_else(overflow)?;
        candidate = at_hour(next_day, window.start_hour);
    }

    if skip_weekends {
        let skip = match candidate.weekday() {
            Weekday::Sat => 2,
            Weekday::Sun => 1,
            _ => 0,
        };
        candidate = candidate
            .checked_add_signed(Duration::days(skip))
            .ok_or_else(overflow)?;
    }

    Ok(candidate)
}

/// Earliest in-window time on the day after `now`.
pub fn next_day_opening(
    now: DateTime<Utc>,
    window: SendWindow,
    skip_weekends: bool,
) -> OutreachResult<DateTime<Utc>> {
    let tomorrow = now
        .date_naive()
        .succ_opt()
        .ok_or_else(|| out_of_range(now, 1, 0))?;
    next_run_time(at_hour(tomorrow, 0), 0, 0, window, skip_weekends)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const WINDOW: SendWindow = SendWindow {
        start_hour: 9,
        end_hour: 17,
    };

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    // 2024-01-01 is a Monday.

    #[test]
    fn test_in_window_no_delay_is_now() {
        let now = utc(2024, 1, 2, 10, 30);
        assert_eq!(next_run_time(now, 0, 0, WINDOW, true).unwrap(), now);
    }

    #[test]
    fn test_zero_delay_at_window_start() {
        let now = utc(2024, 1, 2, 9, 0);
        assert_eq!(next_run_time(now, 0, 0, WINDOW, true).unwrap(), now);
    }

    #[test]
    fn test_zero_delay_at_window_end_rolls_to_next_day() {
        let now = utc(2024, 1, 2, 17, 0);
        assert_eq!(next_run_time(now, 0, 0, WINDOW, true).unwrap(), utc(2024, 1, 3, 9, 0));
    }

    #[test]
    fn test_before_window_clamps_same_day() {
        let now = utc(2024, 1, 2, 6, 45);
        assert_eq!(next_run_time(now, 0, 0, WINDOW, true).unwrap(), utc(2024, 1, 2, 9, 0));
    }

    #[test]
    fn test_delay_landing_on_window_end() {
        // 13:00 + 4h = 17:00, which is outside the window.
        let now = utc(2024, 1, 2, 13, 0);
        assert_eq!(next_run_time(now, 0, 4, WINDOW, true).unwrap(), utc(2024, 1, 3, 9, 0));
    }

    #[test]
    fn test_day_delay_keeps_time_of_day() {
        let now = utc(2024, 1, 2, 11, 15);
        assert_eq!(next_run_time(now, 2, 0, WINDOW, true).unwrap(), utc(2024, 1, 4, 11, 15));
    }

    #[test]
    fn test_delay_landing_on_saturday() {
        // Thursday + 2 days = Saturday 10:00 -> Monday 10:00.
        let now = utc(2024, 1, 4, 10, 0);
        assert_eq!(next_run_time(now, 2, 0, WINDOW, true).unwrap(), utc(2024, 1, 8, 10, 0));
    }

    #[test]
    fn test_delay_landing_on_sunday() {
        let now = utc(2024, 1, 5, 10, 0);
        assert_eq!(next_run_time(now, 2, 0, WINDOW, true).unwrap(), utc(2024, 1, 8, 10, 0));
    }

    #[test]
    fn test_friday_evening_clamp_rolls_to_monday() {
        let now = utc(2024, 1, 5, 18, 0);
        assert_eq!(next_run_time(now, 0, 0, WINDOW, true).unwrap(), utc(2024, 1, 8, 9, 0));
    }

    #[test]
    fn test_weekend_allowed_when_not_skipping() {
        let now = utc(2024, 1, 5, 18, 0);
        assert_eq!(next_run_time(now, 0, 0, WINDOW, false).unwrap(), utc(2024, 1, 6, 9, 0));
    }

    #[test]
    fn test_next_day_opening() {
        let now = utc(2024, 1, 2, 10, 0);
        assert_eq!(next_day_opening(now, WINDOW, true).unwrap(), utc(2024, 1, 3, 9, 0));
        let friday = utc(2024, 1, 5, 10, 0);
        assert_eq!(next_day_opening(friday, WINDOW, true).unwrap(), utc(2024, 1, 8, 9, 0));
    }

    #[test]
    fn test_properties_over_two_weeks() {
        let windows = [
            WINDOW,
            SendWindow { start_hour: 0, end_hour: 1 },
            SendWindow { start_hour: 8, end_hour: 23 },
        ];
        let start = utc(2024, 1, 1, 0, 0);
        for window in windows {
            for skip in [true, false] {
                for step in 0..(14 * 24 * 2) {
                    let now = start + Duration::minutes(30 * step);
                    for (days, hours) in [(0, 0), (0, 5), (1, 23), (3, 12), (6, 0)] {
                        let next = next_run_time(now, days, hours, window, skip).unwrap();
                        assert!(next >= now, "{next} < {now}");
                        assert!(next.hour() >= window.start_hour && next.hour() < window.end_hour);
                        if skip {
                            assert!(!matches!(next.weekday(), Weekday::Sat | Weekday::Sun));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_out_of_range_delay_is_an_error() {
        let end_of_time = DateTime::<Utc>::MAX_UTC - Duration::days(3);
        assert!(matches!(
            next_run_time(end_of_time, 10, 0, WINDOW, true),
            Err(OutreachError::InvalidState(_))
        ));
        assert!(next_run_time(utc(2024, 1, 2, 10, 0), u32::MAX, 23, WINDOW, true).is_err());
        assert!(next_day_opening(DateTime::<Utc>::MAX_UTC, WINDOW, true).is_err());
    }

    #[test]
    fn test_manual_time() {
        let time = ManualTime::new(utc(2024, 1, 2, 9, 0));
        time.advance(Duration::hours(2));
        assert_eq!(time.now(), utc(2024, 1, 2, 11, 0));
        time.set(utc(2024, 2, 1, 0, 0));
        assert_eq!(time.now(), utc(2024, 2, 1, 0, 0));
    }
}
