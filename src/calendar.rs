//! Which service patterns run on a given date.

use std::collections::HashSet;

use chrono::{Datelike, NaiveDate, Weekday};

use crate::models::ExceptionKind;
use crate::store::ScheduleStore;

/// Service ids active on `date`.
///
/// The weekly calendar is evaluated first; the date's exceptions are applied
/// afterwards, so an exception always wins over the base pattern.
pub fn active_services(store: &ScheduleStore, date: NaiveDate, weekday: Weekday) -> HashSet<&str> {
    let mut active: HashSet<&str> = store
        .calendars()
        .iter()
        .filter(|cal| cal.covers(date) && cal.runs_on_weekday(weekday))
        .map(|cal| cal.service_id.as_str())
        .collect();

    for exception in store.exceptions_on(date) {
        match exception.kind {
            ExceptionKind::Added => {
                active.insert(exception.service_id.as_str());
            }
            ExceptionKind::Removed => {
                active.remove(exception.service_id.as_str());
            }
        }
    }

    active
}

/// [`active_services`] with the weekday taken from the date itself.
pub fn active_services_on(store: &ScheduleStore, date: NaiveDate) -> HashSet<&str> {
    active_services(store, date, date.weekday())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceCalendar;
    use crate::store::testing::{date, exception};
    use crate::store::{ScheduleStore, ScheduleTables};

    fn mon_wed_fri() -> ServiceCalendar {
        ServiceCalendar {
            service_id: "MWF".into(),
            days: [true, false, true, false, true, false, false],
            start_date: date(2024, 1, 1),
            end_date: date(2024, 1, 31),
        }
    }

    fn store_with(exceptions: Vec<crate::models::ServiceException>) -> ScheduleStore {
        ScheduleStore::from_tables(ScheduleTables {
            calendars: vec![mon_wed_fri()],
            exceptions,
            ..Default::default()
        })
    }

    #[test]
    fn weekday_flags_and_range_decide_the_base_set() {
        let store = store_with(vec![]);
        // 2024-01-08 is a Monday, 2024-01-09 a Tuesday.
        assert!(active_services_on(&store, date(2024, 1, 8)).contains("MWF"));
        assert!(!active_services_on(&store, date(2024, 1, 9)).contains("MWF"));
        // Monday outside the range.
        assert!(!active_services_on(&store, date(2024, 2, 5)).contains("MWF"));
    }

    #[test]
    fn added_exception_enables_an_off_day() {
        let tuesday = date(2024, 1, 9);
        let store = store_with(vec![exception("MWF", tuesday, ExceptionKind::Added)]);
        assert!(active_services(&store, tuesday, Weekday::Tue).contains("MWF"));
    }

    #[test]
    fn removed_exception_disables_a_running_day() {
        let monday = date(2024, 1, 8);
        let store = store_with(vec![exception("MWF", monday, ExceptionKind::Removed)]);
        assert!(!active_services(&store, monday, Weekday::Mon).contains("MWF"));
        // Only that Monday.
        assert!(active_services_on(&store, date(2024, 1, 15)).contains("MWF"));
    }

    #[test]
    fn exception_only_services_need_no_calendar_row() {
        let holiday = date(2024, 7, 4);
        let store = store_with(vec![exception("HOLIDAY", holiday, ExceptionKind::Added)]);
        let active = active_services_on(&store, holiday);
        assert!(active.contains("HOLIDAY"));
        assert!(!active.contains("MWF"));
    }

    #[test]
    fn empty_calendar_means_no_service() {
        let store = ScheduleStore::default();
        assert!(active_services_on(&store, date(2024, 1, 8)).is_empty());
    }
}
