//! Connection configuration.
//!
//! Besides the builder methods, a configuration can be parsed from an
//! ADO-style connection string:
//!
//! ```text
//! data source=Simple.db;password=000000000000000000;cache size=0;journal mode=Truncate
//! ```

use crate::error::{Error, Result};
use crate::storage::journal::JournalMode;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default number of pages a connection cache retains.
pub const DEFAULT_CACHE_SIZE: usize = 2000;

/// Default time a lock request waits before failing with `Busy`.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct ConnectionConfig {
    /// Database file.
    pub path: PathBuf,
    /// Page cipher key; `None` stores pages in the clear.
    pub key: Option<Vec<u8>>,
    /// Pages retained by the connection cache; 0 disables retention.
    pub cache_size: usize,
    pub journal_mode: JournalMode,
    /// Bound on every lock wait.
    pub busy_timeout: Duration,
    /// Extra attempts for transient IO failures.
    pub io_retries: u32,
    /// Create (and initialize) the database file when it does not exist.
    pub create_if_missing: bool,
}

impl ConnectionConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key: None,
            cache_size: DEFAULT_CACHE_SIZE,
            journal_mode: JournalMode::default(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            io_retries: 3,
            create_if_missing: true,
        }
    }

    pub fn with_key(mut self, key: impl AsRef<[u8]>) -> Self {
        self.key = Some(key.as_ref().to_vec());
        self
    }

    pub fn with_cache_size(mut self, pages: usize) -> Self {
        self.cache_size = pages;
        self
    }

    pub fn with_journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_io_retries(mut self, retries: u32) -> Self {
        self.io_retries = retries;
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("path", &self.path)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("cache_size", &self.cache_size)
            .field("journal_mode", &self.journal_mode)
            .field("busy_timeout", &self.busy_timeout)
            .field("io_retries", &self.io_retries)
            .field("create_if_missing", &self.create_if_missing)
            .finish()
    }
}

impl FromStr for ConnectionConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut path = None;
        let mut settings = Vec::new();

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("expected key=value, got '{part}'")))?;
            let key = key.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_lowercase();
            let value = value.trim();
            if key == "data source" {
                path = Some(PathBuf::from(value));
            } else {
                settings.push((key, value));
            }
        }

        let path = path.ok_or_else(|| Error::Config("missing 'data source'".into()))?;
        let mut config = ConnectionConfig::new(path);
        for (key, value) in settings {
            match key.as_str() {
                "password" => {
                    config.key = (!value.is_empty()).then(|| value.as_bytes().to_vec());
                }
                "cache size" => config.cache_size = parse_number(&key, value)?,
                "journal mode" => config.journal_mode = value.parse()?,
                "busy timeout" => {
                    config.busy_timeout = Duration::from_millis(parse_number(&key, value)?)
                }
                "io retries" => config.io_retries = parse_number(&key, value)?,
                "fail if missing" => {
                    config.create_if_missing = !value.eq_ignore_ascii_case("true")
                }
                other => return Err(Error::Config(format!("unknown setting '{other}'"))),
            }
        }
        Ok(config)
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("'{key}' expects a number, got '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::new("a.db");
        assert_eq!(config.cache_size, DEFAULT_CACHE_SIZE);
        assert_eq!(config.journal_mode, JournalMode::Delete);
        assert!(config.key.is_none());
        assert!(config.create_if_missing);
    }

    #[test]
    fn test_parse_connection_string() -> Result<()> {
        let config: ConnectionConfig =
            "data source=Simple.db;password=000000000000000000".parse()?;
        assert_eq!(config.path, PathBuf::from("Simple.db"));
        assert_eq!(config.key.as_deref(), Some(&b"000000000000000000"[..]));
        Ok(())
    }

    #[test]
    fn test_parse_settings_case_and_spacing() -> Result<()> {
        let config: ConnectionConfig =
            "Data Source = x.db ; Cache  Size=0; Journal Mode=Truncate; busy timeout=250;".parse()?;
        assert_eq!(config.cache_size, 0);
        assert_eq!(config.journal_mode, JournalMode::Truncate);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        Ok(())
    }

    #[test]
    fn test_parse_rejects_wal_and_unknown_keys() {
        assert!(matches!(
            "data source=x.db;journal mode=Wal".parse::<ConnectionConfig>(),
            Err(Error::Config(_))
        ));
        assert!("data source=x.db;pooling=true".parse::<ConnectionConfig>().is_err());
        assert!("password=1".parse::<ConnectionConfig>().is_err());
        assert!("data source=x.db;cache size=lots".parse::<ConnectionConfig>().is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = ConnectionConfig::new("a.db").with_key("hunter2");
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
