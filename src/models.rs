// Schedule rows as loaded from the static feed tables.

use chrono::{Duration, NaiveDate, NaiveDateTime, Weekday};
use serde::{Serialize, Serializer};

use crate::table::{FromRow, Row};

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stop {
    pub stop_id: String,
    pub stop_name: String,
}

/// Running direction of a trip (`direction_id` 0 or 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Outbound,
    Inbound,
}

impl Direction {
    pub fn id(self) -> u8 {
        match self {
            Direction::Outbound => 0,
            Direction::Inbound => 1,
        }
    }
}

impl TryFrom<u8> for Direction {
    type Error = u8;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Direction::Outbound),
            1 => Ok(Direction::Inbound),
            other => Err(other),
        }
    }
}

impl Serialize for Direction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trip {
    pub trip_id: String,
    pub route_id: String,
    pub service_id: String,
    pub direction: Direction,
}

/// One scheduled visit of a trip to a stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopTimeEvent {
    pub trip_id: String,
    pub stop_id: String,
    pub arrival_time: String, // may exceed 24:00:00
    pub departure_time: String,
    pub stop_sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCalendar {
    pub service_id: String,
    pub days: [bool; 7], // mon, tue, wed, thu, fri, sat, sun
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl ServiceCalendar {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    pub fn runs_on_weekday(&self, weekday: Weekday) -> bool {
        self.days[weekday.num_days_from_monday() as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceException {
    pub service_id: String,
    pub date: NaiveDate,
    pub kind: ExceptionKind,
}

// ============================================================================
// Service clock times
// ============================================================================

/// Clock time relative to the start of a service day. `25:10:00` is 01:10 on
/// the following calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceTime {
    seconds: u32,
}

impl ServiceTime {
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.trim().split(':');
        let hours: u32 = parts.next()?.parse().ok()?;
        let minutes: u32 = parts.next()?.parse().ok()?;
        let seconds: u32 = parts.next()?.parse().ok()?;
        if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
            return None;
        }
        let seconds = hours.checked_mul(3600)?.checked_add(minutes * 60 + seconds)?;
        Some(ServiceTime { seconds })
    }

    #[cfg(test)]
    pub fn from_hms(hours: u32, minutes: u32, seconds: u32) -> Self {
        ServiceTime {
            seconds: hours * 3600 + minutes * 60 + seconds,
        }
    }

    #[cfg(test)]
    pub fn hours(self) -> u32 {
        self.seconds / 3600
    }

    /// Absolute local time on `service_date`, rolling hours ≥ 24 into the
    /// following days.
    pub fn on(self, service_date: NaiveDate) -> Option<NaiveDateTime> {
        let midnight = service_date.and_hms_opt(0, 0, 0)?;
        midnight.checked_add_signed(Duration::seconds(self.seconds as i64))
    }
}

// ============================================================================
// Row conversions
// ============================================================================

fn parse_feed_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y%m%d").ok()
}

fn parse_flag(row: &Row<'_>, column: &str) -> Option<bool> {
    match row.get(column)? {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

impl FromRow for Stop {
    const REQUIRED: &'static [&'static str] = &["stop_id", "stop_name"];

    fn from_row(row: &Row<'_>) -> Option<Self> {
        Some(Stop {
            stop_id: row.non_empty("stop_id")?.to_string(),
            stop_name: row.get("stop_name")?.to_string(),
        })
    }
}

impl FromRow for Trip {
    const REQUIRED: &'static [&'static str] =
        &["route_id", "service_id", "trip_id", "direction_id"];

    fn from_row(row: &Row<'_>) -> Option<Self> {
        let direction = Direction::try_from(row.parse::<u8>("direction_id")?).ok()?;
        Some(Trip {
            trip_id: row.non_empty("trip_id")?.to_string(),
            route_id: row.get("route_id")?.to_string(),
            service_id: row.non_empty("service_id")?.to_string(),
            direction,
        })
    }
}

impl FromRow for StopTimeEvent {
    const REQUIRED: &'static [&'static str] =
        &["trip_id", "stop_id", "departure_time", "stop_sequence"];

    fn from_row(row: &Row<'_>) -> Option<Self> {
        let departure = row.non_empty("departure_time");
        let arrival = row.non_empty("arrival_time");
        // Either time may stand in for the other; a row with neither is useless.
        let departure_time = departure.or(arrival)?.to_string();
        let arrival_time = arrival.or(departure)?.to_string();
        Some(StopTimeEvent {
            trip_id: row.non_empty("trip_id")?.to_string(),
            stop_id: row.non_empty("stop_id")?.to_string(),
            arrival_time,
            departure_time,
            stop_sequence: row.parse("stop_sequence")?,
        })
    }
}

impl FromRow for ServiceCalendar {
    const REQUIRED: &'static [&'static str] = &[
        "service_id",
        "monday",
        "tuesday",
        "wednesday",
        "thursday",
        "friday",
        "saturday",
        "sunday",
        "start_date",
        "end_date",
    ];

    fn from_row(row: &Row<'_>) -> Option<Self> {
        let mut days = [false; 7];
        for (slot, column) in days.iter_mut().zip(&Self::REQUIRED[1..8]) {
            *slot = parse_flag(row, column)?;
        }
        Some(ServiceCalendar {
            service_id: row.non_empty("service_id")?.to_string(),
            days,
            start_date: parse_feed_date(row.get("start_date")?)?,
            end_date: parse_feed_date(row.get("end_date")?)?,
        })
    }
}

impl FromRow for ServiceException {
    const REQUIRED: &'static [&'static str] = &["service_id", "date", "exception_type"];

    fn from_row(row: &Row<'_>) -> Option<Self> {
        let kind = match row.parse::<u8>("exception_type")? {
            1 => ExceptionKind::Added,
            2 => ExceptionKind::Removed,
            _ => return None,
        };
        Some(ServiceException {
            service_id: row.non_empty("service_id")?.to_string(),
            date: parse_feed_date(row.get("date")?)?,
            kind,
        })
    }
}
