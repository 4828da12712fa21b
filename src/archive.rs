//! Zip container reader.
//!
//! Entries are found by scanning for local file headers rather than walking the
//! central directory, so a truncated download still yields the entries that
//! arrived intact.

use std::borrow::Cow;

use crate::error::{ArchiveError, FeedError};
use crate::inflate;

const LOCAL_HEADER_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
const LOCAL_HEADER_LEN: usize = 30;
/// General purpose flag bit 3: sizes follow the payload instead of the header.
const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Other(u16),
}

impl From<u16> for CompressionMethod {
    fn from(raw: u16) -> Self {
        match raw {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            other => CompressionMethod::Other(other),
        }
    }
}

/// One file entry, borrowing its payload from the archive buffer.
#[derive(Debug, Clone)]
pub struct ArchiveEntry<'a> {
    pub name: String,
    pub method: CompressionMethod,
    pub flags: u16,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub payload: &'a [u8],
}

impl<'a> ArchiveEntry<'a> {
    /// Decoded file contents; stored entries are passed through untouched.
    pub fn contents(&self) -> Result<Cow<'a, [u8]>, FeedError> {
        if self.flags & FLAG_DATA_DESCRIPTOR != 0 && self.uncompressed_size == 0 {
            return Err(ArchiveError::DataDescriptor(self.name.clone()).into());
        }

        match self.method {
            CompressionMethod::Stored => {
                if self.compressed_size != self.uncompressed_size {
                    return Err(ArchiveError::StoredSizeMismatch {
                        name: self.name.clone(),
                        compressed: self.compressed_size,
                        uncompressed: self.uncompressed_size,
                    }
                    .into());
                }
                Ok(Cow::Borrowed(self.payload))
            }
            CompressionMethod::Deflate => {
                inflate::inflate(self.payload, self.uncompressed_size).map(Cow::Owned)
            }
            CompressionMethod::Other(method) => Err(ArchiveError::UnsupportedMethod {
                name: self.name.clone(),
                method,
            }
            .into()),
        }
    }
}

/// Brute-force scan of `buf` for file entries.
///
/// Directory markers (names ending in `/`) are skipped. Scanning stops quietly
/// at the first header whose name or payload would run past the buffer.
pub fn scan_entries(buf: &[u8]) -> Vec<ArchiveEntry<'_>> {
    let mut entries = Vec::new();
    let mut pos = 0;

    while pos + LOCAL_HEADER_LEN <= buf.len() {
        if buf[pos..pos + 4] != LOCAL_HEADER_SIGNATURE {
            pos += 1;
            continue;
        }

        let header = &buf[pos..pos + LOCAL_HEADER_LEN];
        let flags = read_u16(header, 6);
        let method = read_u16(header, 8);
        let compressed_size = read_u32(header, 18) as u64;
        let uncompressed_size = read_u32(header, 22) as u64;
        let name_len = read_u16(header, 26) as usize;
        let extra_len = read_u16(header, 28) as usize;

        let name_start = pos + LOCAL_HEADER_LEN;
        let data_start = name_start + name_len + extra_len;
        let data_end = match data_start.checked_add(compressed_size as usize) {
            Some(end) if end <= buf.len() => end,
            _ => break,
        };

        let name = String::from_utf8_lossy(&buf[name_start..name_start + name_len]).into_owned();
        if !name.ends_with('/') {
            entries.push(ArchiveEntry {
                name,
                method: CompressionMethod::from(method),
                flags,
                compressed_size,
                uncompressed_size,
                payload: &buf[data_start..data_end],
            });
        }
        pos = data_end;
    }

    entries
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Builds zip archives in memory for tests elsewhere in the crate.
#[cfg(test)]
pub(crate) mod testing {
    pub struct ZipEntrySpec<'a> {
        pub name: &'a str,
        pub method: u16,
        pub uncompressed_size: u32,
        pub payload: &'a [u8],
    }

    impl<'a> ZipEntrySpec<'a> {
        pub fn stored(name: &'a str, payload: &'a [u8]) -> Self {
            ZipEntrySpec {
                name,
                method: 0,
                uncompressed_size: payload.len() as u32,
                payload,
            }
        }
    }

    /// Local headers only, followed by a stub central directory record the
    /// scanner must ignore.
    pub fn build_zip(entries: &[ZipEntrySpec<'_>]) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in entries {
            out.extend_from_slice(&[0x50, 0x4b, 0x03, 0x04]);
            out.extend_from_slice(&20u16.to_le_bytes()); // version needed
            out.extend_from_slice(&0u16.to_le_bytes()); // flags
            out.extend_from_slice(&entry.method.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes()); // mod time + date
            out.extend_from_slice(&0u32.to_le_bytes()); // crc32, not checked
            out.extend_from_slice(&(entry.payload.len() as u32).to_le_bytes());
            out.extend_from_slice(&entry.uncompressed_size.to_le_bytes());
            out.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes()); // extra length
            out.extend_from_slice(entry.name.as_bytes());
            out.extend_from_slice(entry.payload);
        }
        out.extend_from_slice(&[0x50, 0x4b, 0x01, 0x02, 0, 0, 0, 0]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{build_zip, ZipEntrySpec};
    use super::*;
    use crate::error::SecurityViolation;

    #[test]
    fn stored_entry_round_trips_byte_for_byte() {
        let payload = b"stop_id,stop_name\nS1,\"Gare, Centre\"\n\x00\xff";
        let zip = build_zip(&[ZipEntrySpec::stored("stops.txt", payload)]);

        let entries = scan_entries(&zip);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "stops.txt");
        assert_eq!(entries[0].method, CompressionMethod::Stored);
        assert_eq!(entries[0].contents().unwrap().as_ref(), payload);
    }

    #[test]
    fn directory_markers_are_skipped() {
        let zip = build_zip(&[
            ZipEntrySpec::stored("gtfs/", b""),
            ZipEntrySpec::stored("gtfs/trips.txt", b"trip_id\n"),
        ]);
        let names: Vec<_> = scan_entries(&zip).into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["gtfs/trips.txt".to_string()]);
    }

    #[test]
    fn leading_garbage_is_skipped_by_the_scan() {
        let mut zip = b"garbage PK\x03 not a header".to_vec();
        zip.extend(build_zip(&[ZipEntrySpec::stored("a.txt", b"abc")]));
        let entries = scan_entries(&zip);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload, b"abc");
    }

    #[test]
    fn truncated_archive_yields_the_complete_prefix() {
        let zip = build_zip(&[
            ZipEntrySpec::stored("a.txt", b"first entry"),
            ZipEntrySpec::stored("b.txt", b"second entry that will be cut"),
        ]);
        // Cut inside the second payload.
        let cut = zip.len() - 20;
        let entries = scan_entries(&zip[..cut]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.txt");
    }

    #[test]
    fn header_with_absurd_sizes_stops_the_scan() {
        let mut zip = build_zip(&[ZipEntrySpec::stored("a.txt", b"abc")]);
        // Compressed size field of the first header.
        zip[18..22].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(scan_entries(&zip).is_empty());
    }

    #[test]
    fn unsupported_method_is_named_in_the_error() {
        let zip = build_zip(&[ZipEntrySpec {
            name: "stops.txt",
            method: 14,
            uncompressed_size: 3,
            payload: b"abc",
        }]);
        let entries = scan_entries(&zip);
        match entries[0].contents() {
            Err(FeedError::CorruptArchive(ArchiveError::UnsupportedMethod { method, name })) => {
                assert_eq!(method, 14);
                assert_eq!(name, "stops.txt");
            }
            other => panic!("expected unsupported method, got {:?}", other),
        }
    }

    #[test]
    fn deflated_entry_with_bomb_ratio_is_refused() {
        let payload = vec![0u8; 100];
        let zip = build_zip(&[ZipEntrySpec {
            name: "stop_times.txt",
            method: 8,
            uncompressed_size: 1_000_000,
            payload: &payload,
        }]);
        let entries = scan_entries(&zip);
        assert!(matches!(
            entries[0].contents(),
            Err(FeedError::SecurityViolation(SecurityViolation::RatioExceeded { .. }))
        ));
    }

    #[test]
    fn stored_entry_with_disagreeing_sizes_is_corrupt() {
        let zip = build_zip(&[ZipEntrySpec {
            name: "a.txt",
            method: 0,
            uncompressed_size: 10,
            payload: b"abc",
        }]);
        assert!(matches!(
            scan_entries(&zip)[0].contents(),
            Err(FeedError::CorruptArchive(ArchiveError::StoredSizeMismatch { .. }))
        ));
    }
}
