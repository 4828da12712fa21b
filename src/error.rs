use thiserror::Error;

// ============================================================================
// Error Handling
// ============================================================================

/// Failure of a feed refresh. Queries never produce these.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Corrupt archive: {0}")]
    CorruptArchive(#[from] ArchiveError),

    #[error("Security violation: {0}")]
    SecurityViolation(#[from] SecurityViolation),

    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
}

impl FeedError {
    /// Only transport failures are worth retrying; a bad archive stays bad.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::Network(_))
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        FeedError::Network(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("unsupported compression method {method} for entry {name:?}")]
    UnsupportedMethod { name: String, method: u16 },

    #[error("entry declares an invalid uncompressed size of {0} bytes")]
    InvalidDeclaredSize(u64),

    #[error("size mismatch: declared {expected} bytes, produced {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("stored entry {name:?} has compressed size {compressed} but uncompressed size {uncompressed}")]
    StoredSizeMismatch {
        name: String,
        compressed: u64,
        uncompressed: u64,
    },

    #[error("entry {0:?} relies on a trailing data descriptor")]
    DataDescriptor(String),

    #[error("malformed deflate stream: {0}")]
    Deflate(&'static str),

    #[error("required table {0} not found in archive")]
    MissingTable(&'static str),

    #[error("table {table} is unusable: {source}")]
    Table {
        table: &'static str,
        #[source]
        source: TableError,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityViolation {
    #[error("entry declares {declared} bytes, above the {limit} byte ceiling")]
    EntryTooLarge { declared: u64, limit: u64 },

    #[error("compression ratio of {declared} / {compressed} bytes exceeds {limit}:1")]
    RatioExceeded {
        declared: u64,
        compressed: u64,
        limit: u64,
    },

    #[error("unsafe entry name {0:?}")]
    UnsafeName(String),

    #[error("entry {0:?} resolves outside the extraction root")]
    PathEscape(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("unreadable header: {0}")]
    Header(String),

    #[error("missing required column {0:?}")]
    MissingColumn(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_errors_are_retryable() {
        assert!(FeedError::Network("timed out".into()).is_retryable());
        assert!(!FeedError::from(ArchiveError::MissingTable("stops.txt")).is_retryable());
        assert!(!FeedError::from(SecurityViolation::UnsafeName("../x".into())).is_retryable());
    }

    #[test]
    fn unsupported_method_names_the_method() {
        let err = ArchiveError::UnsupportedMethod {
            name: "stops.txt".into(),
            method: 12,
        };
        assert!(err.to_string().contains("12"));
    }
}
