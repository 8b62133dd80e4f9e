//! Configuration for the sync engine and the terminal front end.
//!
//! Both structs deserialize from JSON with every field optional, and can be
//! overridden from `TASKERS_*` environment variables.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::filter::FilterSelector;
use crate::reconcile::InsertPolicy;

pub const CONFIG_FILE: &str = "taskers_config.json";

/// Engine settings.
///
/// | Setting               | Default              |
/// |-----------------------|----------------------|
/// | `insert_policy`       | `assigned_to_viewer` |
/// | `default_filter`      | `all`                |
/// | `retry_backoff_ms`    | 2000                 |
/// | `max_buffered_events` | 1024                 |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Which live inserts the list accepts.
    pub insert_policy: InsertPolicy,
    /// Filter a new session starts with.
    pub default_filter: FilterSelector,
    /// Delay before retrying a failed snapshot load or subscription.
    pub retry_backoff_ms: u64,
    /// Events held while a snapshot is loading before the view restarts.
    pub max_buffered_events: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            insert_policy: InsertPolicy::default(),
            default_filter: FilterSelector::default(),
            retry_backoff_ms: 2_000,
            max_buffered_events: 1_024,
        }
    }
}

impl SyncConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Settings of the terminal front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// JSON file the bundled store is loaded from and saved to.
    pub store_file: PathBuf,
    /// Email of the user the session starts as.
    pub viewer_email: String,
    pub log_file: PathBuf,
    pub sync: SyncConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_file: PathBuf::from("taskers_store.json"),
            viewer_email: "me@example.com".to_string(),
            log_file: PathBuf::from("taskers.log"),
            sync: SyncConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reads `path` if it exists, otherwise returns the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `TASKERS_*` overrides looked up through `lookup`. Values that
    /// fail to parse are logged and ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(viewer) = lookup("TASKERS_VIEWER") {
            self.viewer_email = viewer;
        }
        if let Some(path) = lookup("TASKERS_STORE_FILE") {
            self.store_file = PathBuf::from(path);
        }
        if let Some(path) = lookup("TASKERS_LOG_FILE") {
            self.log_file = PathBuf::from(path);
        }
        override_parsed(&lookup, "TASKERS_FILTER", &mut self.sync.default_filter);
        override_parsed(&lookup, "TASKERS_INSERT_POLICY", &mut self.sync.insert_policy);
        override_parsed(&lookup, "TASKERS_RETRY_BACKOFF_MS", &mut self.sync.retry_backoff_ms);
        override_parsed(
            &lookup,
            "TASKERS_MAX_BUFFERED_EVENTS",
            &mut self.sync.max_buffered_events,
        );
        self
    }
}

fn override_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(err) => warn!(key, value = %raw, error = %err, "ignoring malformed override"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{ "viewer_email": "ada@example.com", "sync": { "insert_policy": "active_filter" } }"#,
        )
        .unwrap();
        assert_eq!(config.viewer_email, "ada@example.com");
        assert_eq!(config.sync.insert_policy, InsertPolicy::ActiveFilter);
        assert_eq!(config.sync.retry_backoff_ms, 2_000);
        assert_eq!(config.store_file, PathBuf::from("taskers_store.json"));
    }

    #[test]
    fn overrides_apply_and_bad_values_are_ignored() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("TASKERS_VIEWER", "grace@example.com"),
            ("TASKERS_FILTER", "due_today"),
            ("TASKERS_RETRY_BACKOFF_MS", "250"),
            ("TASKERS_MAX_BUFFERED_EVENTS", "lots"),
        ]);
        let config =
            AppConfig::default().with_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.viewer_email, "grace@example.com");
        assert_eq!(config.sync.default_filter, FilterSelector::DueToday);
        assert_eq!(config.sync.retry_backoff(), Duration::from_millis(250));
        assert_eq!(config.sync.max_buffered_events, 1_024);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, AppConfig::default());
    }
}
