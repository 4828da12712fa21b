use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;

pub const DEFAULT_FEED_URL: &str = "https://transport.data.gouv.fr/resources/83024/download";
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Paris;
pub const FRESHNESS_WINDOW_SECS: u64 = 24 * 3600;
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Runtime settings for one engine instance.
#[derive(Debug, Clone)]
pub struct Config {
    pub feed_url: String,
    /// Zone in which the feed's clock times and service dates are expressed.
    pub timezone: Tz,
    pub freshness: Duration,
    pub request_timeout: Duration,
    /// Parent of the per-refresh scratch directories.
    pub scratch_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            feed_url: DEFAULT_FEED_URL.to_string(),
            timezone: DEFAULT_TIMEZONE,
            freshness: Duration::from_secs(FRESHNESS_WINDOW_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            scratch_root: default_scratch_root(),
        }
    }
}

impl Config {
    pub fn with_timezone_name(mut self, name: &str) -> std::result::Result<Self, String> {
        self.timezone = name
            .parse::<Tz>()
            .map_err(|e| format!("Unknown timezone {:?}: {}", name, e))?;
        Ok(self)
    }
}

fn default_scratch_root() -> PathBuf {
    let mut path = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
    path.push("nvt_schedule");
    path
}
