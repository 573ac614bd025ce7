use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::storage::{Backoff, RetryPolicy, WriteStrategy};

/// Where the store lives and how writers treat contention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database: PathBuf,
    pub busy_timeout_ms: u64,
    pub strategy: WriteStrategy,
    pub retry: RetryPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("crawler.db"),
            busy_timeout_ms: 5_000,
            strategy: WriteStrategy::PerCall,
            retry: RetryPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Default settings against a specific store file
    pub fn at(database: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(crate::Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if let Backoff::Jittered { base_ms, max_ms } = self.retry.backoff {
            if base_ms > max_ms {
                return Err(crate::Error::Config(format!(
                    "jittered backoff base_ms ({}) exceeds max_ms ({})",
                    base_ms, max_ms
                )));
            }
        }
        if self.database.as_os_str().is_empty() {
            return Err(crate::Error::Config("database path is empty".into()));
        }
        Ok(())
    }
}

/// Config file picked up when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "crawlstore.toml";

/// Read and validate a config file. An absent file is `Ok(None)`.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<StoreConfig>> {
    let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };

    let config: StoreConfig =
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    config.validate()?;
    Ok(Some(config))
}

impl StoreConfig {
    /// Write these settings as TOML; an existing file is kept unless `force`
    pub fn save(&self, path: &Path, force: bool) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(force)
            .create_new(!force)
            .open(path)
            .with_context(|| format!("writing {} (use --force to overwrite)", path.display()))?;
        file.write_all(contents.as_bytes())?;
        Ok(())
    }

    /// Make sure the directory the store file goes into exists
    pub fn create_database_dir(&self) -> anyhow::Result<()> {
        match self.database.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display())),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RetryOn;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.database, PathBuf::from("crawler.db"));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.strategy, WriteStrategy::PerCall);
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: StoreConfig = toml::from_str(
            r#"
            database = "data/peers.db"
            strategy = "serialized"

            [retry]
            max_attempts = 5
            retry_on = "busy_only"
            backoff = { kind = "jittered", base_ms = 10, max_ms = 200 }
            "#,
        )
        .unwrap();

        assert_eq!(config.database, PathBuf::from("data/peers.db"));
        assert_eq!(config.strategy, WriteStrategy::Serialized);
        assert_eq!(config.busy_timeout_ms, 5_000);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.retry_on, RetryOn::BusyOnly);
        assert_eq!(config.retry.backoff, Backoff::Jittered { base_ms: 10, max_ms: 200 });
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = StoreConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = StoreConfig::default();
        config.retry.backoff = Backoff::Jittered { base_ms: 100, max_ms: 10 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_and_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawlstore.toml");
        assert!(load_config(Some(&path)).unwrap().is_none());

        let mut config = StoreConfig::at(dir.path().join("crawler.db"));
        config.retry.backoff = Backoff::Linear { step_ms: 25 };
        config.save(&path, false).unwrap();
        assert!(config.save(&path, false).is_err());

        let loaded = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(loaded, config);

        config.busy_timeout_ms = 250;
        config.save(&path, true).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap().unwrap().busy_timeout_ms, 250);
    }

    #[test]
    fn test_create_database_dir_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("crawler.db");
        StoreConfig::at(&db).create_database_dir().unwrap();
        assert!(db.parent().unwrap().is_dir());

        // Bare file name: nothing to create
        StoreConfig::at("crawler.db").create_database_dir().unwrap();
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawlstore.toml");
        std::fs::write(&path, "[retry]\nmax_attempts = 0\n").unwrap();
        assert!(load_config(Some(&path)).is_err());

        std::fs::write(&path, "strategy = 7\n").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("parsing"));
    }
}
