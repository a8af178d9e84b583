//! Console configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use domain::ItemFilter;

/// Console configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `QUERY_PREVIEW_ITEMS`: items seeded into the preview store (default: `10`)
/// - `QUERY_WRITES`: items written in the background after startup (default: `5`)
/// - `QUERY_WRITE_INTERVAL_MS`: delay between background writes (default: `500`)
/// - `QUERY_NEWEST_FIRST`: list newest items first (default: `false`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub log_level: String,
    pub preview_items: usize,
    pub writes: usize,
    pub write_interval: Duration,
    pub newest_first: bool,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup. Values that fail to
    /// parse fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            preview_items: parsed(&lookup, "QUERY_PREVIEW_ITEMS").unwrap_or(defaults.preview_items),
            writes: parsed(&lookup, "QUERY_WRITES").unwrap_or(defaults.writes),
            write_interval: parsed(&lookup, "QUERY_WRITE_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.write_interval),
            newest_first: parsed(&lookup, "QUERY_NEWEST_FIRST").unwrap_or(defaults.newest_first),
        }
    }

    /// The item filter the console lists with.
    pub fn filter(&self) -> ItemFilter {
        if self.newest_first {
            ItemFilter::all().newest_first()
        } else {
            ItemFilter::all()
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            preview_items: 10,
            writes: 5,
            write_interval: Duration::from_millis(500),
            newest_first: false,
        }
    }
}
