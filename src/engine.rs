//! The feed cache: one published schedule snapshot, refreshed on demand.
//!
//! Queries read whatever snapshot is current and never wait on a refresh.
//! Refreshes are serialized; a new snapshot replaces the old one in a single
//! swap, and a failed refresh leaves the previous snapshot in place.

use std::io;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::arrival;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::departures::{self, Departure};
use crate::error::FeedError;
use crate::feed::{self, FeedSource};
use crate::models::Direction;
use crate::store::{ScheduleStore, StoreStats};

/// An immutable, fully built schedule and when it was fetched.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub store: ScheduleStore,
    pub fetched_at: Option<DateTime<Tz>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    AlreadyFresh,
    Refreshed(StoreStats),
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotStats {
    pub loaded: bool,
    pub fetched_at: Option<DateTime<Tz>>,
    pub fresh: bool,
    #[serde(flatten)]
    pub store: StoreStats,
}

pub struct ScheduleEngine<S> {
    config: Config,
    source: S,
    clock: Arc<dyn Clock>,
    snapshot: RwLock<Arc<Snapshot>>,
    refresh_lock: Mutex<()>,
}

impl<S: FeedSource> ScheduleEngine<S> {
    pub fn new(config: Config, source: S) -> Self {
        let clock = Arc::new(SystemClock::new(config.timezone));
        Self::with_clock(config, source, clock)
    }

    pub fn with_clock(config: Config, source: S, clock: Arc<dyn Clock>) -> Self {
        ScheduleEngine {
            config,
            source,
            clock,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn now(&self) -> DateTime<Tz> {
        self.clock.now()
    }

    /// The snapshot current at the time of the call.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the published snapshot.
    pub fn publish(&self, store: ScheduleStore) {
        let snapshot = Arc::new(Snapshot {
            store,
            fetched_at: Some(self.clock.now()),
        });
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    fn is_fresh(&self, snapshot: &Snapshot) -> bool {
        let Some(fetched_at) = snapshot.fetched_at else {
            return false;
        };
        if snapshot.store.is_empty() {
            return false;
        }
        match Duration::from_std(self.config.freshness) {
            Ok(window) => self.clock.now().signed_duration_since(fetched_at) < window,
            Err(_) => true,
        }
    }

    /// Reload the feed unless the current snapshot is non-empty and younger
    /// than the freshness window. Concurrent callers wait for one another, so
    /// a burst of calls on a stale cache fetches once.
    pub async fn ensure_fresh(&self) -> Result<RefreshOutcome, FeedError> {
        let _guard = self.refresh_lock.lock().await;
        if self.is_fresh(&self.snapshot()) {
            debug!("Static schedule is fresh, skipping refresh");
            return Ok(RefreshOutcome::AlreadyFresh);
        }
        self.reload().await.map(RefreshOutcome::Refreshed)
    }

    /// Reload the feed regardless of age.
    pub async fn refresh(&self) -> Result<StoreStats, FeedError> {
        let _guard = self.refresh_lock.lock().await;
        self.reload().await
    }

    async fn reload(&self) -> Result<StoreStats, FeedError> {
        info!("Refreshing static schedule...");
        let result = self.fetch_and_build().await;
        match &result {
            Ok(stats) => info!(
                "Static schedule loaded: {} stops, {} trips, {} stop times",
                stats.stops, stats.trips, stats.stop_times
            ),
            Err(e) => warn!("Static schedule refresh failed, keeping previous data: {}", e),
        }
        result
    }

    async fn fetch_and_build(&self) -> Result<StoreStats, FeedError> {
        let archive = self.source.fetch().await?;
        let scratch_root = self.config.scratch_root.clone();
        let store = tokio::task::spawn_blocking(move || feed::load_archive(&scratch_root, &archive))
            .await
            .map_err(|e| FeedError::Io(io::Error::other(e)))??;

        let stats = store.stats();
        self.publish(store);
        Ok(stats)
    }

    /// Next departures from a stop; `reference_time` defaults to now.
    pub fn next_departures(
        &self,
        stop_id: &str,
        direction: Direction,
        reference_time: Option<DateTime<Tz>>,
        count: usize,
    ) -> Vec<Departure> {
        let snapshot = self.snapshot();
        let now = self.clock.now();
        departures::next_departures(
            &snapshot.store,
            now,
            stop_id,
            direction,
            reference_time.unwrap_or(now),
            count,
        )
    }

    pub fn arrival_time(
        &self,
        from_stop_id: &str,
        to_stop_id: &str,
        departure_time: DateTime<Tz>,
        direction: Direction,
    ) -> Option<DateTime<Tz>> {
        self.arrival(from_stop_id, to_stop_id, departure_time, direction, None)
    }

    /// Like [`Self::arrival_time`], restricted to one trip.
    pub fn arrival_time_for_trip(
        &self,
        from_stop_id: &str,
        to_stop_id: &str,
        departure_time: DateTime<Tz>,
        direction: Direction,
        trip_id: &str,
    ) -> Option<DateTime<Tz>> {
        self.arrival(from_stop_id, to_stop_id, departure_time, direction, Some(trip_id))
    }

    fn arrival(
        &self,
        from_stop_id: &str,
        to_stop_id: &str,
        departure_time: DateTime<Tz>,
        direction: Direction,
        trip_hint: Option<&str>,
    ) -> Option<DateTime<Tz>> {
        let snapshot = self.snapshot();
        arrival::arrival_time(
            &snapshot.store,
            from_stop_id,
            to_stop_id,
            departure_time.with_timezone(&self.config.timezone),
            direction,
            trip_hint,
        )
    }

    pub fn stats(&self) -> SnapshotStats {
        let snapshot = self.snapshot();
        SnapshotStats {
            loaded: !snapshot.store.is_empty(),
            fetched_at: snapshot.fetched_at,
            fresh: self.is_fresh(&snapshot),
            store: snapshot.store.stats(),
        }
    }
}
