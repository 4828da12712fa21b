//! In-memory schedule tables forming one immutable snapshot.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::{info, warn};
use serde::Serialize;

use crate::error::{ArchiveError, FeedError};
use crate::models::{ServiceCalendar, ServiceException, Stop, StopTimeEvent, Trip};
use crate::table::{parse_table, FromRow};

pub const STOPS_FILE: &str = "stops.txt";
pub const TRIPS_FILE: &str = "trips.txt";
pub const STOP_TIMES_FILE: &str = "stop_times.txt";
pub const CALENDAR_FILE: &str = "calendar.txt";
pub const CALENDAR_DATES_FILE: &str = "calendar_dates.txt";

/// Raw table rows before indexing.
#[derive(Debug, Default)]
pub struct ScheduleTables {
    pub stops: Vec<Stop>,
    pub trips: Vec<Trip>,
    pub stop_times: Vec<StopTimeEvent>,
    pub calendars: Vec<ServiceCalendar>,
    pub exceptions: Vec<ServiceException>,
}

/// Rows skipped while parsing, per table.
#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct DroppedRows {
    pub stops: usize,
    pub trips: usize,
    pub stop_times: usize,
    pub calendar: usize,
    pub calendar_dates: usize,
}

impl DroppedRows {
    pub fn total(&self) -> usize {
        self.stops + self.trips + self.stop_times + self.calendar + self.calendar_dates
    }
}

#[derive(Debug, Default)]
pub struct ScheduleStore {
    stops: HashMap<String, Stop>,
    trips: HashMap<String, Trip>,
    stop_times: Vec<StopTimeEvent>,
    /// stop_id -> indices into `stop_times`
    by_stop: HashMap<String, Vec<usize>>,
    /// trip_id -> indices into `stop_times`, ordered by stop_sequence
    by_trip: HashMap<String, Vec<usize>>,
    calendars: Vec<ServiceCalendar>,
    exceptions_by_date: HashMap<NaiveDate, Vec<ServiceException>>,
    dropped: DroppedRows,
}

impl ScheduleStore {
    pub fn from_tables(tables: ScheduleTables) -> Self {
        let stops = tables
            .stops
            .into_iter()
            .map(|stop| (stop.stop_id.clone(), stop))
            .collect();
        let trips = tables
            .trips
            .into_iter()
            .map(|trip| (trip.trip_id.clone(), trip))
            .collect();

        let mut by_stop: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_trip: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, event) in tables.stop_times.iter().enumerate() {
            by_stop.entry(event.stop_id.clone()).or_default().push(i);
            by_trip.entry(event.trip_id.clone()).or_default().push(i);
        }
        let stop_times = tables.stop_times;
        for indices in by_trip.values_mut() {
            indices.sort_by_key(|&i| stop_times[i].stop_sequence);
        }

        let mut exceptions_by_date: HashMap<NaiveDate, Vec<ServiceException>> = HashMap::new();
        for exception in tables.exceptions {
            exceptions_by_date
                .entry(exception.date)
                .or_default()
                .push(exception);
        }

        ScheduleStore {
            stops,
            trips,
            stop_times,
            by_stop,
            by_trip,
            calendars: tables.calendars,
            exceptions_by_date,
            dropped: DroppedRows::default(),
        }
    }

    /// Parse the table files in `dir` into a store.
    ///
    /// Stops, trips and stop times are required. A missing or header-broken
    /// calendar counts as "no base service", and calendar dates are optional.
    pub fn load_from_dir(dir: &Path) -> Result<Self, FeedError> {
        let mut dropped = DroppedRows::default();

        let stops = load_required::<Stop>(dir, STOPS_FILE, &mut dropped.stops)?;
        let trips = load_required::<Trip>(dir, TRIPS_FILE, &mut dropped.trips)?;
        let stop_times =
            load_required::<StopTimeEvent>(dir, STOP_TIMES_FILE, &mut dropped.stop_times)?;
        let calendars =
            load_optional::<ServiceCalendar>(dir, CALENDAR_FILE, &mut dropped.calendar)?;
        let exceptions =
            load_optional::<ServiceException>(dir, CALENDAR_DATES_FILE, &mut dropped.calendar_dates)?;

        let mut store = ScheduleStore::from_tables(ScheduleTables {
            stops,
            trips,
            stop_times,
            calendars,
            exceptions,
        });
        store.dropped = dropped;
        Ok(store)
    }

    pub fn is_empty(&self) -> bool {
        self.stop_times.is_empty() || self.trips.is_empty()
    }

    pub fn stop(&self, stop_id: &str) -> Option<&Stop> {
        self.stops.get(stop_id)
    }

    pub fn trip(&self, trip_id: &str) -> Option<&Trip> {
        self.trips.get(trip_id)
    }

    pub fn events_at_stop<'a>(&'a self, stop_id: &str) -> impl Iterator<Item = &'a StopTimeEvent> + 'a {
        self.by_stop
            .get(stop_id)
            .into_iter()
            .flatten()
            .map(|&i| &self.stop_times[i])
    }

    /// Events of one trip in traversal order.
    pub fn trip_events<'a>(&'a self, trip_id: &str) -> impl Iterator<Item = &'a StopTimeEvent> + 'a {
        self.by_trip
            .get(trip_id)
            .into_iter()
            .flatten()
            .map(|&i| &self.stop_times[i])
    }

    /// The event with the highest sequence number of the trip.
    pub fn terminus(&self, trip_id: &str) -> Option<&StopTimeEvent> {
        let &last = self.by_trip.get(trip_id)?.last()?;
        Some(&self.stop_times[last])
    }

    pub fn calendars(&self) -> &[ServiceCalendar] {
        &self.calendars
    }

    pub fn exceptions_on(&self, date: NaiveDate) -> &[ServiceException] {
        self.exceptions_by_date
            .get(&date)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            stops: self.stops.len(),
            trips: self.trips.len(),
            stop_times: self.stop_times.len(),
            calendars: self.calendars.len(),
            exceptions: self.exceptions_by_date.values().map(Vec::len).sum(),
            dropped: self.dropped,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct StoreStats {
    pub stops: usize,
    pub trips: usize,
    pub stop_times: usize,
    pub calendars: usize,
    pub exceptions: usize,
    pub dropped: DroppedRows,
}

// ============================================================================
// Table loading
// ============================================================================

/// Path of `name` at the top of `dir`, or one directory down for archives
/// that wrap their tables in a folder.
fn locate_table(dir: &Path, name: &str) -> io::Result<Option<PathBuf>> {
    let direct = dir.join(name);
    if direct.is_file() {
        return Ok(Some(direct));
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            let nested = path.join(name);
            if nested.is_file() {
                return Ok(Some(nested));
            }
        }
    }
    Ok(None)
}

fn read_table(dir: &Path, name: &str) -> io::Result<Option<String>> {
    match locate_table(dir, name)? {
        Some(path) => {
            let bytes = fs::read(path)?;
            Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
        }
        None => Ok(None),
    }
}

fn load_required<T: FromRow>(
    dir: &Path,
    name: &'static str,
    dropped: &mut usize,
) -> Result<Vec<T>, FeedError> {
    let text = read_table(dir, name)?.ok_or(ArchiveError::MissingTable(name))?;
    let parsed = parse_table::<T>(&text).map_err(|source| ArchiveError::Table {
        table: name,
        source,
    })?;
    report(name, parsed.rows.len(), parsed.dropped);
    *dropped = parsed.dropped;
    Ok(parsed.rows)
}

fn load_optional<T: FromRow>(
    dir: &Path,
    name: &'static str,
    dropped: &mut usize,
) -> Result<Vec<T>, FeedError> {
    let Some(text) = read_table(dir, name)? else {
        info!("No {} in feed, treating it as empty", name);
        return Ok(Vec::new());
    };
    match parse_table::<T>(&text) {
        Ok(parsed) => {
            report(name, parsed.rows.len(), parsed.dropped);
            *dropped = parsed.dropped;
            Ok(parsed.rows)
        }
        Err(e) => {
            warn!("Ignoring unusable {}: {}", name, e);
            Ok(Vec::new())
        }
    }
}

fn report(name: &str, rows: usize, dropped: usize) {
    info!("Parsed {} rows from {}", rows, name);
    if dropped > 0 {
        warn!("Skipped {} malformed rows in {}", dropped, name);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::models::{Direction, ExceptionKind};

    pub fn stop(id: &str, name: &str) -> Stop {
        Stop {
            stop_id: id.into(),
            stop_name: name.into(),
        }
    }

    pub fn trip(id: &str, service: &str, direction: Direction) -> Trip {
        Trip {
            trip_id: id.into(),
            route_id: "R1".into(),
            service_id: service.into(),
            direction,
        }
    }

    pub fn event(trip: &str, stop: &str, time: &str, seq: u32) -> StopTimeEvent {
        StopTimeEvent {
            trip_id: trip.into(),
            stop_id: stop.into(),
            arrival_time: time.into(),
            departure_time: time.into(),
            stop_sequence: seq,
        }
    }

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Service running every day of 2024.
    pub fn daily(service: &str) -> ServiceCalendar {
        ServiceCalendar {
            service_id: service.into(),
            days: [true; 7],
            start_date: date(2024, 1, 1),
            end_date: date(2024, 12, 31),
        }
    }

    pub fn exception(service: &str, on: NaiveDate, kind: ExceptionKind) -> ServiceException {
        ServiceException {
            service_id: service.into(),
            date: on,
            kind,
        }
    }
}
