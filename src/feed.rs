// Fetching the static feed and turning the downloaded archive into a store.

use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use log::{debug, info, warn};

use crate::archive::scan_entries;
use crate::error::FeedError;
use crate::path_safety::{safe_destination, validate_entry_name};
use crate::store::ScheduleStore;

/// Largest archive accepted from the network.
pub const MAX_DOWNLOAD_SIZE: u64 = 200 * 1024 * 1024;

const ARCHIVE_FILE: &str = "feed.zip";
const TABLES_DIR: &str = "tables";

// ============================================================================
// Sources
// ============================================================================

/// Where archive bytes come from.
pub trait FeedSource: Send + Sync {
    fn fetch(&self) -> impl Future<Output = Result<Bytes, FeedError>> + Send;
}

/// Downloads the archive over HTTP(S).
pub struct HttpFeedSource {
    client: reqwest::Client,
    url: String,
}

impl HttpFeedSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpFeedSource {
            client,
            url: url.into(),
        })
    }
}

impl FeedSource for HttpFeedSource {
    async fn fetch(&self) -> Result<Bytes, FeedError> {
        info!("Downloading static feed from {}", self.url);
        let response = self.client.get(&self.url).send().await?;

        if !response.status().is_success() {
            return Err(FeedError::Network(format!(
                "Feed download failed with HTTP {}",
                response.status()
            )));
        }
        if let Some(length) = response.content_length() {
            if length > MAX_DOWNLOAD_SIZE {
                return Err(FeedError::Network(format!(
                    "Feed download too large: {} bytes (max {})",
                    length, MAX_DOWNLOAD_SIZE
                )));
            }
        }

        let bytes = response.bytes().await?;
        if bytes.len() as u64 > MAX_DOWNLOAD_SIZE {
            return Err(FeedError::Network(format!(
                "Feed download too large: {} bytes (max {})",
                bytes.len(),
                MAX_DOWNLOAD_SIZE
            )));
        }
        info!("Downloaded static feed: {} KB", bytes.len() / 1024);
        Ok(bytes)
    }
}

// ============================================================================
// Scratch space
// ============================================================================

/// A private working directory, removed with everything in it on drop.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn create(root: &Path) -> io::Result<Self> {
        static NEXT: AtomicU64 = AtomicU64::new(0);

        fs::create_dir_all(root)?;
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let name = format!(
            "refresh-{}-{}-{}",
            std::process::id(),
            nanos,
            NEXT.fetch_add(1, Ordering::Relaxed)
        );
        let path = root.join(name);
        fs::create_dir(&path)?;
        debug!("Created scratch directory {}", path.display());
        Ok(ScratchDir { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            warn!("Failed to remove scratch directory {}: {}", self.path.display(), e);
        }
    }
}

// ============================================================================
// Extraction
// ============================================================================

/// Writes every file entry of `archive` under `dest`, returning how many were
/// written. All names are vetted before the first write, so one hostile entry
/// leaves `dest` untouched.
pub fn extract_archive(archive: &[u8], dest: &Path) -> Result<usize, FeedError> {
    let entries = scan_entries(archive);
    for entry in &entries {
        validate_entry_name(&entry.name)?;
    }

    for entry in &entries {
        let target = safe_destination(dest, &entry.name)?;
        let contents = entry.contents()?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, &contents)?;
        debug!("Extracted {} ({} bytes)", entry.name, contents.len());
    }

    Ok(entries.len())
}

/// Full refresh pipeline for one downloaded archive: scratch copy, extraction,
/// table loading. Blocking; the scratch directory is gone when this returns.
pub fn load_archive(scratch_root: &Path, archive: &[u8]) -> Result<ScheduleStore, FeedError> {
    let scratch = ScratchDir::create(scratch_root)?;
    fs::write(scratch.path().join(ARCHIVE_FILE), archive)?;

    let tables = scratch.path().join(TABLES_DIR);
    fs::create_dir(&tables)?;
    let written = extract_archive(archive, &tables)?;
    info!("Extracted {} files from feed archive", written);

    ScheduleStore::load_from_dir(&tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::testing::{build_zip, ZipEntrySpec};
    use crate::error::{ArchiveError, SecurityViolation};

    fn temp_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("nvt_feed_{}_{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).unwrap();
        root
    }

    fn minimal_feed() -> Vec<u8> {
        build_zip(&[
            ZipEntrySpec::stored("stops.txt", b"stop_id,stop_name\nS1,Origin\nS2,Terminus\n"),
            ZipEntrySpec::stored(
                "trips.txt",
                b"route_id,service_id,trip_id,direction_id\nR1,WK,T1,0\n",
            ),
            ZipEntrySpec::stored(
                "stop_times.txt",
                b"trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
                  T1,08:00:00,08:00:00,S1,1\nT1,08:12:00,08:12:00,S2,2\n",
            ),
            ZipEntrySpec::stored(
                "calendar.txt",
                b"service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
                  WK,1,1,1,1,1,0,0,20240101,20241231\n",
            ),
        ])
    }

    #[test]
    fn archive_loads_into_a_store_and_leaves_no_scratch_behind() {
        let root = temp_root("load");
        let store = load_archive(&root, &minimal_feed()).unwrap();

        let stats = store.stats();
        assert_eq!(stats.stops, 2);
        assert_eq!(stats.trips, 1);
        assert_eq!(stats.stop_times, 2);
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn traversal_entry_is_rejected_before_anything_is_written() {
        let root = temp_root("slip");
        let dest = root.join("out");
        fs::create_dir(&dest).unwrap();
        let zip = build_zip(&[
            ZipEntrySpec::stored("stops.txt", b"stop_id,stop_name\n"),
            ZipEntrySpec::stored("../../etc/passwd", b"root:x:0:0\n"),
        ]);

        let err = extract_archive(&zip, &dest).unwrap_err();
        assert!(matches!(
            err,
            FeedError::SecurityViolation(SecurityViolation::UnsafeName(_))
        ));
        assert_eq!(fs::read_dir(&dest).unwrap().count(), 0);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn failed_load_still_cleans_up() {
        let root = temp_root("missing");
        let zip = build_zip(&[ZipEntrySpec::stored("stops.txt", b"stop_id,stop_name\nS1,A\n")]);

        let err = load_archive(&root, &zip).unwrap_err();
        assert!(matches!(
            err,
            FeedError::CorruptArchive(ArchiveError::MissingTable(_))
        ));
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn nested_entries_create_their_directories() {
        let root = temp_root("nested");
        let zip = build_zip(&[ZipEntrySpec::stored("gtfs/stops.txt", b"stop_id,stop_name\n")]);
        assert_eq!(extract_archive(&zip, &root).unwrap(), 1);
        assert!(root.join("gtfs").join("stops.txt").is_file());
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn scratch_dirs_are_unique_and_removed_on_drop() {
        let root = temp_root("scratch");
        let a = ScratchDir::create(&root).unwrap();
        let b = ScratchDir::create(&root).unwrap();
        assert_ne!(a.path(), b.path());
        fs::write(a.path().join("x"), b"x").unwrap();
        let kept = a.path().to_path_buf();
        drop(a);
        assert!(!kept.exists());
        drop(b);
        fs::remove_dir_all(&root).unwrap();
    }
}
