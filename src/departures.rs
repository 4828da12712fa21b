//! Next scheduled departures from a stop.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;

use crate::calendar::active_services_on;
use crate::clock::localize;
use crate::models::{Direction, ServiceTime, StopTimeEvent};
use crate::store::ScheduleStore;

/// Service-day hour before which the following day's trips still count as
/// tonight's late service.
pub const OWL_SERVICE_END_HOUR: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct Departure {
    pub trip_id: String,
    pub route_id: String,
    /// Whole minutes from the current wall clock.
    pub minutes_until: i64,
    pub scheduled_departure: DateTime<Tz>,
    pub direction: Direction,
    /// Name of the trip's last stop.
    pub destination: String,
}

struct Candidate<'a> {
    event: &'a StopTimeEvent,
    route_id: &'a str,
    at: DateTime<Tz>,
}

/// Up to `count` departures from `stop_id` in `direction`, earliest first.
///
/// `reference_time` is read as a clock time: if it is earlier in the day than
/// `now`, it means that time tomorrow. Past-midnight trips of the service day
/// before the target date and early-morning trips of the day after it are
/// always considered. Nothing found is an empty list.
pub fn next_departures(
    store: &ScheduleStore,
    now: DateTime<Tz>,
    stop_id: &str,
    direction: Direction,
    reference_time: DateTime<Tz>,
    count: usize,
) -> Vec<Departure> {
    let tz = now.timezone();
    let reference = reference_time.with_timezone(&tz).time();
    let today = now.date_naive();
    let target = if reference < now.time() {
        match today.succ_opt() {
            Some(tomorrow) => tomorrow,
            None => return Vec::new(),
        }
    } else {
        today
    };

    let mut candidates = Vec::new();
    let not_before = target.and_time(reference);
    // Trips of the previous service day still running past midnight.
    if let Some(previous_day) = target.pred_opt() {
        collect(store, tz, stop_id, direction, previous_day, &mut candidates, |local| {
            local >= not_before
        });
    }
    collect(store, tz, stop_id, direction, target, &mut candidates, |local| {
        local >= not_before
    });

    if let Some(next_day) = target.succ_opt() {
        if let Some(owl_end) = next_day.and_hms_opt(OWL_SERVICE_END_HOUR, 0, 0) {
            collect(store, tz, stop_id, direction, next_day, &mut candidates, |local| {
                local < owl_end
            });
        }
    }

    // One trip can be reached from both service days only if the feed repeats
    // it; keep the first sighting.
    let mut seen = HashSet::new();
    candidates.retain(|c| seen.insert((c.event.trip_id.as_str(), c.at)));
    candidates.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.event.trip_id.cmp(&b.event.trip_id)));
    candidates.truncate(count);

    candidates
        .into_iter()
        .map(|c| Departure {
            trip_id: c.event.trip_id.clone(),
            route_id: c.route_id.to_string(),
            minutes_until: c.at.signed_duration_since(now).num_minutes(),
            scheduled_departure: c.at,
            direction,
            destination: destination_name(store, &c.event.trip_id),
        })
        .collect()
}

fn collect<'a>(
    store: &'a ScheduleStore,
    tz: Tz,
    stop_id: &str,
    direction: Direction,
    service_date: NaiveDate,
    out: &mut Vec<Candidate<'a>>,
    keep: impl Fn(NaiveDateTime) -> bool,
) {
    let active = active_services_on(store, service_date);
    if active.is_empty() {
        return;
    }

    for event in store.events_at_stop(stop_id) {
        let Some(trip) = store.trip(&event.trip_id) else {
            continue;
        };
        if trip.direction != direction || !active.contains(trip.service_id.as_str()) {
            continue;
        }
        let Some(local) = ServiceTime::parse(&event.departure_time).and_then(|t| t.on(service_date))
        else {
            continue;
        };
        if !keep(local) {
            continue;
        }
        if let Some(at) = localize(tz, local) {
            out.push(Candidate {
                event,
                route_id: &trip.route_id,
                at,
            });
        }
    }
}

/// Display name of the trip's terminus, falling back to its stop id.
pub fn destination_name(store: &ScheduleStore, trip_id: &str) -> String {
    match store.terminus(trip_id) {
        Some(last) => store
            .stop(&last.stop_id)
            .map(|stop| stop.stop_name.clone())
            .unwrap_or_else(|| last.stop_id.clone()),
        None => String::new(),
    }
}
