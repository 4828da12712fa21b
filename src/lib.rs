//! Static transit schedule engine: downloads a zipped schedule feed, extracts
//! it safely, and answers next-departure and arrival-time queries from an
//! in-memory snapshot.

pub mod archive;
pub mod arrival;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod departures;
pub mod engine;
pub mod error;
pub mod feed;
pub mod inflate;
pub mod models;
pub mod path_safety;
pub mod store;
pub mod table;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use departures::Departure;
pub use engine::{RefreshOutcome, ScheduleEngine, Snapshot, SnapshotStats};
pub use error::{ArchiveError, FeedError, SecurityViolation, TableError};
pub use feed::{FeedSource, HttpFeedSource};
pub use models::Direction;
pub use store::{ScheduleStore, StoreStats};
