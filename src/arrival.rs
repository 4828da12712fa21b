//! Scheduled arrival of a known departure at a later stop.

use chrono::{DateTime, Duration, NaiveDate};
use chrono_tz::Tz;

use crate::calendar::active_services_on;
use crate::clock::localize;
use crate::models::{Direction, ServiceTime, StopTimeEvent};
use crate::store::ScheduleStore;

/// How far a scheduled departure may sit from the one asked about and still
/// count as the same trip.
pub const MATCH_WINDOW_SECS: i64 = 120;

struct Match<'a> {
    delta: i64,
    origin: &'a StopTimeEvent,
    service_date: NaiveDate,
}

/// Arrival time at `to_stop_id` of the trip leaving `from_stop_id` at
/// `departure_time` in `direction`.
///
/// Trips are matched on their scheduled departure within two minutes, on the
/// service day of the departure or the one before (for trips running past
/// midnight). The closest match wins, ties going to the lowest trip id;
/// `trip_hint` restricts matching to one trip. `None` when nothing matches or
/// the matched trip never reaches `to_stop_id` after `from_stop_id`.
pub fn arrival_time(
    store: &ScheduleStore,
    from_stop_id: &str,
    to_stop_id: &str,
    departure_time: DateTime<Tz>,
    direction: Direction,
    trip_hint: Option<&str>,
) -> Option<DateTime<Tz>> {
    let tz = departure_time.timezone();
    let departure_date = departure_time.date_naive();
    let service_dates = [departure_date.pred_opt(), Some(departure_date)];

    let mut best: Option<Match<'_>> = None;
    for service_date in service_dates.into_iter().flatten() {
        let active = active_services_on(store, service_date);
        for origin in store.events_at_stop(from_stop_id) {
            if trip_hint.is_some_and(|hint| hint != origin.trip_id) {
                continue;
            }
            let Some(trip) = store.trip(&origin.trip_id) else {
                continue;
            };
            if trip.direction != direction || !active.contains(trip.service_id.as_str()) {
                continue;
            }
            let Some(scheduled) = instant(tz, &origin.departure_time, service_date) else {
                continue;
            };
            let delta = (scheduled - departure_time).num_seconds().abs();
            if delta > MATCH_WINDOW_SECS {
                continue;
            }
            let closer = match &best {
                None => true,
                Some(current) => {
                    (delta, origin.trip_id.as_str()) < (current.delta, current.origin.trip_id.as_str())
                }
            };
            if closer {
                best = Some(Match {
                    delta,
                    origin,
                    service_date,
                });
            }
        }
    }

    let Match {
        origin,
        service_date,
        ..
    } = best?;
    let destination = store
        .trip_events(&origin.trip_id)
        .find(|e| e.stop_id == to_stop_id && e.stop_sequence > origin.stop_sequence)?;
    instant(tz, &destination.arrival_time, service_date)
}

fn instant(tz: Tz, clock_time: &str, service_date: NaiveDate) -> Option<DateTime<Tz>> {
    let local = ServiceTime::parse(clock_time)?.on(service_date)?;
    localize(tz, local)
}

/// Trip duration between two stops, if [`arrival_time`] finds one.
pub fn travel_time(
    store: &ScheduleStore,
    from_stop_id: &str,
    to_stop_id: &str,
    departure_time: DateTime<Tz>,
    direction: Direction,
) -> Option<Duration> {
    let arrival = arrival_time(store, from_stop_id, to_stop_id, departure_time, direction, None)?;
    Some(arrival - departure_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceCalendar;
    use crate::store::testing::{daily, date, event, stop, trip};
    use crate::store::ScheduleTables;
    use chrono_tz::Europe::Paris;

    fn at(d: NaiveDate, h: u32, m: u32) -> DateTime<Tz> {
        localize(Paris, d.and_hms_opt(h, m, 0).unwrap()).unwrap()
    }

    fn overnight_store() -> ScheduleStore {
        ScheduleStore::from_tables(ScheduleTables {
            stops: vec![stop("S1", "Origin"), stop("S2", "Terminus"), stop("S3", "Elsewhere")],
            trips: vec![trip("T1", "MON", Direction::Outbound)],
            stop_times: vec![
                event("T1", "S1", "23:58:00", 1),
                event("T1", "S2", "24:10:00", 2),
            ],
            calendars: vec![ServiceCalendar {
                service_id: "MON".into(),
                days: [true, false, false, false, false, false, false],
                start_date: date(2024, 1, 1),
                end_date: date(2024, 12, 31),
            }],
            ..Default::default()
        })
    }

    #[test]
    fn arrival_past_midnight_lands_on_the_next_day() {
        let store = overnight_store();
        let departure = at(date(2024, 1, 8), 23, 58);
        let arrival = arrival_time(&store, "S1", "S2", departure, Direction::Outbound, None);
        assert_eq!(arrival, Some(at(date(2024, 1, 9), 0, 10)));
        assert_eq!(
            travel_time(&store, "S1", "S2", departure, Direction::Outbound),
            Some(Duration::minutes(12))
        );
    }

    #[test]
    fn departure_slightly_off_schedule_still_matches() {
        let store = overnight_store();
        let departure = at(date(2024, 1, 9), 0, 0);
        // Two minutes after 23:58 on the Monday service day.
        let arrival = arrival_time(&store, "S1", "S2", departure, Direction::Outbound, None);
        assert_eq!(arrival, Some(at(date(2024, 1, 9), 0, 10)));

        let too_late = at(date(2024, 1, 9), 0, 1);
        assert_eq!(arrival_time(&store, "S1", "S2", too_late, Direction::Outbound, None), None);
    }

    #[test]
    fn destination_outside_the_trip_is_absent() {
        let store = overnight_store();
        let departure = at(date(2024, 1, 8), 23, 58);
        assert_eq!(arrival_time(&store, "S1", "S3", departure, Direction::Outbound, None), None);
        // Travelling backwards along the trip is not an arrival either.
        assert_eq!(arrival_time(&store, "S2", "S1", departure, Direction::Outbound, None), None);
    }

    #[test]
    fn wrong_direction_or_inactive_day_is_absent() {
        let store = overnight_store();
        let monday = at(date(2024, 1, 8), 23, 58);
        assert_eq!(arrival_time(&store, "S1", "S2", monday, Direction::Inbound, None), None);
        let tuesday = at(date(2024, 1, 9), 23, 58);
        assert_eq!(arrival_time(&store, "S1", "S2", tuesday, Direction::Outbound, None), None);
    }

    fn twin_trips() -> ScheduleStore {
        ScheduleStore::from_tables(ScheduleTables {
            stops: vec![stop("A", "A"), stop("B", "B")],
            trips: vec![
                trip("T2", "ALL", Direction::Inbound),
                trip("T1", "ALL", Direction::Inbound),
                trip("T3", "ALL", Direction::Inbound),
            ],
            stop_times: vec![
                event("T2", "A", "10:00:00", 1),
                event("T2", "B", "10:20:00", 2),
                event("T1", "A", "10:00:00", 1),
                event("T1", "B", "10:25:00", 2),
                event("T3", "A", "10:01:00", 1),
                event("T3", "B", "10:15:00", 2),
            ],
            calendars: vec![daily("ALL")],
            ..Default::default()
        })
    }

    #[test]
    fn equal_candidates_resolve_to_the_lowest_trip_id() {
        let store = twin_trips();
        let departure = at(date(2024, 6, 3), 10, 0);
        let arrival = arrival_time(&store, "A", "B", departure, Direction::Inbound, None);
        assert_eq!(arrival, Some(at(date(2024, 6, 3), 10, 25)));
    }

    #[test]
    fn closest_departure_beats_trip_order() {
        let store = twin_trips();
        let departure = at(date(2024, 6, 3), 10, 1);
        let arrival = arrival_time(&store, "A", "B", departure, Direction::Inbound, None);
        assert_eq!(arrival, Some(at(date(2024, 6, 3), 10, 15)));
    }

    #[test]
    fn trip_hint_picks_the_named_trip() {
        let store = twin_trips();
        let departure = at(date(2024, 6, 3), 10, 0);
        let arrival = arrival_time(&store, "A", "B", departure, Direction::Inbound, Some("T2"));
        assert_eq!(arrival, Some(at(date(2024, 6, 3), 10, 20)));
        assert_eq!(
            arrival_time(&store, "A", "B", departure, Direction::Inbound, Some("T9")),
            None
        );
    }
}
