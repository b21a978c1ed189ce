//! mongo_mirror basic configuration, express in toml.
//!
//! Basic configuration file example:
//! ```toml
//! [src]
//! # source db url, need to be a replica set if the change feed is wanted.
//! url = "mongodb://localhost:27017"
//!
//! [dst]
//! # target db url, don't need to be a replica set.
//! url = "mongodb://localhost:27018"
//!
//! [sync]
//! db = "training"
//! batch_size = 1000
//! collection_concurrent = 4
//!
//! [validate]
//! unique_field = "_id"
//!
//! [log]
//! path = "/var/log/mongo_mirror/mirror.log"
//! ```
use crate::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Global mongo mirror configuration.
#[derive(Deserialize, Debug, Clone)]
pub struct MirrorConfig {
    src: Src,
    dst: Dst,
    sync: SyncConf,
    #[serde(default)]
    validate: ValidateConf,
    #[serde(default)]
    log: Log,
}

impl MirrorConfig {
    /// create a configuration with default sync settings.
    pub fn new(src_url: String, dst_url: String, db: String) -> Self {
        MirrorConfig {
            src: Src { url: src_url },
            dst: Dst { url: dst_url },
            sync: SyncConf::new(db),
            validate: ValidateConf::default(),
            log: Log::default(),
        }
    }

    /// parse configuration from toml text.
    pub fn from_toml_str(data: &str) -> Result<Self> {
        Ok(toml::from_str(data)?)
    }

    /// read and parse configuration file at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_toml_str(&data)
    }

    /// get source mongodb url.
    pub fn get_src_url(&self) -> &str {
        &self.src.url
    }

    /// get destination mongodb url.
    pub fn get_dst_url(&self) -> &str {
        &self.dst.url
    }

    /// get sync detail configuration.
    pub fn get_sync(&self) -> &SyncConf {
        &self.sync
    }

    /// get mutable sync detail configuration, used by command line overrides.
    pub fn get_sync_mut(&mut self) -> &mut SyncConf {
        &mut self.sync
    }

    /// get validation configuration.
    pub fn get_validate(&self) -> &ValidateConf {
        &self.validate
    }

    /// get log file path, None means log to stdout.
    pub fn get_log_path(&self) -> Option<&str> {
        self.log.path.as_deref()
    }
}

/// Source database configuration.
#[derive(Deserialize, Debug, Clone)]
pub struct Src {
    /// Source database url, begins with 'mongodb://'
    url: String,
}

/// Target database configuration.
#[derive(Deserialize, Debug, Clone)]
pub struct Dst {
    /// Target database url.  Which begins with 'mongodb://'
    url: String,
}

/// Detail sync config, it indicates which database to mirror and how.
#[derive(Deserialize, Debug, Clone)]
pub struct SyncConf {
    /// database name
    db: String,
    /// how many documents are written to target in one insert call.
    #[serde(default = "default_batch_size")]
    batch_size: usize,
    /// how many collections will be copied concurrently.
    #[serde(default = "default_collection_concurrent")]
    collection_concurrent: usize,
    /// how many times one batch insert is attempted.
    #[serde(default = "default_insert_attempts")]
    insert_attempts: usize,
    /// delay between two batch insert attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    retry_delay_ms: u64,
    /// copy existing documents of capped collections too.
    #[serde(default = "default_true")]
    backfill_capped: bool,
    /// create source views on target.
    #[serde(default = "default_true")]
    copy_views: bool,
    /// follow the source change feed, it's subscribed before bulk copy starts.
    #[serde(default = "default_true")]
    change_feed: bool,
    /// how long one change feed wait lasts before checking shutdown, in milliseconds.
    #[serde(default = "default_feed_poll_ms")]
    feed_poll_ms: u64,
}

impl SyncConf {
    /// create sync config for `db` with default values.
    pub fn new(db: String) -> Self {
        SyncConf {
            db,
            batch_size: default_batch_size(),
            collection_concurrent: default_collection_concurrent(),
            insert_attempts: default_insert_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            backfill_capped: true,
            copy_views: true,
            change_feed: true,
            feed_poll_ms: default_feed_poll_ms(),
        }
    }

    /// database to mirror.
    pub fn get_db(&self) -> &str {
        &self.db
    }

    /// documents per insert call, at least 1.
    pub fn get_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    /// collections copied at the same time, at least 1.
    pub fn get_collection_concurrent(&self) -> usize {
        self.collection_concurrent.max(1)
    }

    /// attempts per insert call, at least 1.
    pub fn get_insert_attempts(&self) -> usize {
        self.insert_attempts.max(1)
    }

    /// delay between two insert attempts.
    pub fn get_retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// whether capped collections get their existing documents.
    pub fn backfill_capped(&self) -> bool {
        self.backfill_capped
    }

    /// whether views are created on target.
    pub fn copy_views(&self) -> bool {
        self.copy_views
    }

    /// whether the change feed runs.
    pub fn change_feed(&self) -> bool {
        self.change_feed
    }

    /// how long one change feed wait lasts.
    pub fn get_feed_poll(&self) -> Duration {
        Duration::from_millis(self.feed_poll_ms)
    }

    /// set database to mirror.
    pub fn set_db(&mut self, db: String) {
        self.db = db;
    }

    /// set documents per insert call.
    pub fn set_batch_size(&mut self, batch_size: usize) {
        self.batch_size = batch_size;
    }

    /// set collections copied at the same time.
    pub fn set_collection_concurrent(&mut self, concurrent: usize) {
        self.collection_concurrent = concurrent;
    }

    /// set delay between two insert attempts, kept in milliseconds.
    pub fn set_retry_delay(&mut self, delay: Duration) {
        self.retry_delay_ms = delay.as_millis() as u64;
    }

    /// set whether capped collections get their existing documents.
    pub fn set_backfill_capped(&mut self, backfill: bool) {
        self.backfill_capped = backfill;
    }

    /// enable or disable the change feed.
    pub fn set_change_feed(&mut self, enabled: bool) {
        self.change_feed = enabled;
    }
}

/// Validation config, run after bulk copy.
#[derive(Deserialize, Debug, Clone)]
pub struct ValidateConf {
    /// run validation after bulk copy.
    #[serde(default = "default_true")]
    enabled: bool,
    /// field used by duplicate check.
    #[serde(default = "default_unique_field")]
    unique_field: String,
}

impl Default for ValidateConf {
    fn default() -> Self {
        ValidateConf {
            enabled: true,
            unique_field: default_unique_field(),
        }
    }
}

impl ValidateConf {
    /// whether validation runs after bulk copy.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// field checked for duplicated values.
    pub fn get_unique_field(&self) -> &str {
        &self.unique_field
    }

    /// enable or disable validation.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

/// Logger config.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Log {
    /// log file path, daily rotated.  Logs go to the console when it's missing.
    path: Option<String>,
}

fn default_batch_size() -> usize {
    1000
}

fn default_collection_concurrent() -> usize {
    4
}

fn default_insert_attempts() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_feed_poll_ms() -> u64 {
    1000
}

fn default_unique_field() -> String {
    crate::ID_KEY.to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let conf = MirrorConfig::from_toml_str(
            r#"
            [src]
            url = "mongodb://localhost:27017"
            [dst]
            url = "mongodb://localhost:27018"
            [sync]
            db = "training"
            "#,
        )
        .unwrap();

        assert_eq!(conf.get_src_url(), "mongodb://localhost:27017");
        assert_eq!(conf.get_dst_url(), "mongodb://localhost:27018");
        let sync = conf.get_sync();
        assert_eq!(sync.get_db(), "training");
        assert_eq!(sync.get_batch_size(), 1000);
        assert_eq!(sync.get_collection_concurrent(), 4);
        assert_eq!(sync.get_insert_attempts(), 3);
        assert_eq!(sync.get_retry_delay(), Duration::from_secs(2));
        assert!(sync.backfill_capped());
        assert!(sync.change_feed());
        assert!(conf.get_validate().enabled());
        assert_eq!(conf.get_validate().get_unique_field(), "_id");
        assert_eq!(conf.get_log_path(), None);
    }

    #[test]
    fn test_parse_full_config() {
        let conf = MirrorConfig::from_toml_str(
            r#"
            [src]
            url = "mongodb://a"
            [dst]
            url = "mongodb://b"
            [sync]
            db = "bb"
            batch_size = 50
            collection_concurrent = 2
            insert_attempts = 5
            retry_delay_ms = 10
            backfill_capped = false
            change_feed = false
            [validate]
            enabled = false
            unique_field = "code"
            [log]
            path = "/tmp/mirror.log"
            "#,
        )
        .unwrap();

        let sync = conf.get_sync();
        assert_eq!(sync.get_batch_size(), 50);
        assert_eq!(sync.get_collection_concurrent(), 2);
        assert_eq!(sync.get_insert_attempts(), 5);
        assert_eq!(sync.get_retry_delay(), Duration::from_millis(10));
        assert!(!sync.backfill_capped());
        assert!(!sync.change_feed());
        assert!(!conf.get_validate().enabled());
        assert_eq!(conf.get_validate().get_unique_field(), "code");
        assert_eq!(conf.get_log_path(), Some("/tmp/mirror.log"));
    }

    #[test]
    fn test_setters_and_lower_bounds() {
        let mut conf = MirrorConfig::new(
            "mongodb://a".to_string(),
            "mongodb://b".to_string(),
            "aa".to_string(),
        );
        let sync = conf.get_sync_mut();
        sync.set_db("bb".to_string());
        sync.set_batch_size(0);
        sync.set_collection_concurrent(0);
        sync.set_retry_delay(Duration::from_millis(1500));
        sync.set_backfill_capped(false);
        sync.set_change_feed(false);

        let sync = conf.get_sync();
        assert_eq!(sync.get_db(), "bb");
        assert_eq!(sync.get_batch_size(), 1);
        assert_eq!(sync.get_collection_concurrent(), 1);
        assert_eq!(sync.get_retry_delay(), Duration::from_millis(1500));
        assert!(!sync.backfill_capped());
        assert!(!sync.change_feed());
        assert!(sync.copy_views());

        let mut validate = ValidateConf::default();
        validate.set_enabled(false);
        assert!(!validate.enabled());
    }

    #[test]
    fn test_missing_db_is_an_error() {
        let res = MirrorConfig::from_toml_str(
            r#"
            [src]
            url = "mongodb://a"
            [dst]
            url = "mongodb://b"
            [sync]
            "#,
        );
        assert!(res.is_err());
    }
}
