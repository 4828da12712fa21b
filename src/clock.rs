use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Source of the current wall-clock time in the feed's zone.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Tz>;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    pub timezone: Tz,
}

impl SystemClock {
    pub fn new(timezone: Tz) -> Self {
        SystemClock { timezone }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.timezone)
    }
}

/// A clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Tz>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Tz> {
        self.0
    }
}

/// Attach `timezone` to a local time. Times skipped by a DST jump have no
/// instant and yield `None`; repeated times take the earlier instant.
pub fn localize(timezone: Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    timezone.from_local_datetime(&local).earliest()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use chrono_tz::Europe::Paris;

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn spring_forward_gap_has_no_instant() {
        assert!(localize(Paris, local(2024, 3, 31, 2, 30)).is_none());
    }

    #[test]
    fn fall_back_overlap_takes_the_earlier_instant() {
        let instant = localize(Paris, local(2024, 10, 27, 2, 30)).unwrap();
        // Still on summer time (UTC+2).
        assert_eq!(instant.naive_utc(), local(2024, 10, 27, 0, 30));
    }

    #[test]
    fn fixed_clock_does_not_move() {
        let at = localize(Paris, local(2024, 1, 8, 23, 50)).unwrap();
        let clock = FixedClock(at);
        assert_eq!(clock.now(), at);
        assert_eq!(clock.now(), at);
    }
}
