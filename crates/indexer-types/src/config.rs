//! Configuration loading for the event indexer.
//!
//! Layered: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/event-indexer/config.toml.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::TypesError;
use crate::event::DEFAULT_WORKER_CODE;

const APP_NAME: &str = "event-indexer";

/// Worker loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Worker codes served; empty means only the default code
    #[serde(default)]
    pub codes: Vec<String>,

    /// Idle period between claim attempts (ms)
    #[serde(default = "default_worker_period_ms")]
    pub period_ms: u64,

    /// Number of worker loops the daemon starts
    #[serde(default = "default_worker_count")]
    pub count: usize,
}

fn default_worker_period_ms() -> u64 {
    1000
}

fn default_worker_count() -> usize {
    1
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            codes: Vec::new(),
            period_ms: default_worker_period_ms(),
            count: default_worker_count(),
        }
    }
}

impl WorkerSettings {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// Codes this worker claims, with the default code filled in.
    pub fn effective_codes(&self) -> Vec<String> {
        if self.codes.is_empty() {
            vec![DEFAULT_WORKER_CODE.to_string()]
        } else {
            self.codes.clone()
        }
    }
}

/// Coordinator loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSettings {
    /// Maximum events promoted to READY and not yet finished
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Tick period (ms)
    #[serde(default = "default_coordinator_period_ms")]
    pub period_ms: u64,
}

fn default_queue_capacity() -> usize {
    200
}

fn default_coordinator_period_ms() -> u64 {
    1000
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            period_ms: default_coordinator_period_ms(),
        }
    }
}

impl CoordinatorSettings {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Retry policy configuration.
///
/// Retriable failures use a fixed delay; fatal-retriable failures back off
/// exponentially from `fatal_initial_backoff_ms` up to `fatal_max_backoff_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_retry_count")]
    pub count: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,

    #[serde(default = "default_fatal_retry_count")]
    pub fatal_count: u32,

    #[serde(default = "default_fatal_initial_backoff_ms")]
    pub fatal_initial_backoff_ms: u64,

    #[serde(default = "default_fatal_max_backoff_ms")]
    pub fatal_max_backoff_ms: u64,
}

fn default_retry_count() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_fatal_retry_count() -> u32 {
    10
}

fn default_fatal_initial_backoff_ms() -> u64 {
    1000
}

fn default_fatal_max_backoff_ms() -> u64 {
    60_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            count: default_retry_count(),
            delay_ms: default_retry_delay_ms(),
            fatal_count: default_fatal_retry_count(),
            fatal_initial_backoff_ms: default_fatal_initial_backoff_ms(),
            fatal_max_backoff_ms: default_fatal_max_backoff_ms(),
        }
    }
}

impl RetrySettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn fatal_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.fatal_initial_backoff_ms)
    }

    pub fn fatal_max_backoff(&self) -> Duration {
        Duration::from_millis(self.fatal_max_backoff_ms)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the RocksDB event store
    #[serde(default = "default_event_db_path")]
    pub event_db_path: String,

    /// Path to the Tantivy search index
    #[serde(default = "default_search_index_path")]
    pub search_index_path: String,

    /// Directory of type rule YAML files
    #[serde(default = "default_type_rules_dir")]
    pub type_rules_dir: String,

    /// Root of the local-directory source
    #[serde(default = "default_source_root")]
    pub source_root: String,

    /// Parent directory for worker temp directories
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,

    /// Maximum subobjects per object before it is rejected
    #[serde(default = "default_max_subobjects")]
    pub max_subobjects: usize,

    #[serde(default)]
    pub worker: WorkerSettings,

    #[serde(default)]
    pub coordinator: CoordinatorSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn data_dir(name: &str) -> String {
    ProjectDirs::from("", "", APP_NAME)
        .map(|p| p.data_local_dir().join(name))
        .unwrap_or_else(|| PathBuf::from(".").join(name))
        .to_string_lossy()
        .to_string()
}

fn default_event_db_path() -> String {
    data_dir("events")
}

fn default_search_index_path() -> String {
    data_dir("search-index")
}

fn default_type_rules_dir() -> String {
    data_dir("type-rules")
}

fn default_source_root() -> String {
    data_dir("source")
}

fn default_temp_dir() -> String {
    std::env::temp_dir()
        .join(APP_NAME)
        .to_string_lossy()
        .to_string()
}

fn default_max_subobjects() -> usize {
    50_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            event_db_path: default_event_db_path(),
            search_index_path: default_search_index_path(),
            type_rules_dir: default_type_rules_dir(),
            source_root: default_source_root(),
            temp_dir: default_temp_dir(),
            max_subobjects: default_max_subobjects(),
            worker: WorkerSettings::default(),
            coordinator: CoordinatorSettings::default(),
            retry: RetrySettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/event-indexer/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (INDEXER_*, nested with `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, TypesError> {
        let config_dir = ProjectDirs::from("", "", APP_NAME)
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let default_config_path = config_dir.join("config");

        let retry = RetrySettings::default();
        let mut builder = Config::builder()
            .set_default("event_db_path", default_event_db_path())
            .and_then(|b| b.set_default("search_index_path", default_search_index_path()))
            .and_then(|b| b.set_default("type_rules_dir", default_type_rules_dir()))
            .and_then(|b| b.set_default("source_root", default_source_root()))
            .and_then(|b| b.set_default("temp_dir", default_temp_dir()))
            .and_then(|b| b.set_default("max_subobjects", default_max_subobjects() as i64))
            .and_then(|b| b.set_default("log_level", default_log_level()))
            .and_then(|b| b.set_default("worker.period_ms", default_worker_period_ms() as i64))
            .and_then(|b| b.set_default("worker.count", default_worker_count() as i64))
            .and_then(|b| {
                b.set_default("coordinator.queue_capacity", default_queue_capacity() as i64)
            })
            .and_then(|b| {
                b.set_default("coordinator.period_ms", default_coordinator_period_ms() as i64)
            })
            .and_then(|b| b.set_default("retry.count", retry.count as i64))
            .and_then(|b| b.set_default("retry.delay_ms", retry.delay_ms as i64))
            .and_then(|b| b.set_default("retry.fatal_count", retry.fatal_count as i64))
            .and_then(|b| {
                b.set_default(
                    "retry.fatal_initial_backoff_ms",
                    retry.fatal_initial_backoff_ms as i64,
                )
            })
            .and_then(|b| {
                b.set_default("retry.fatal_max_backoff_ms", retry.fatal_max_backoff_ms as i64)
            })
            .map_err(|e| TypesError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // INDEXER_EVENT_DB_PATH, INDEXER_WORKER__CODES=a,b, INDEXER_RETRY__COUNT, ...
        builder = builder.add_source(
            Environment::with_prefix("INDEXER")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("worker.codes")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| TypesError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| TypesError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), TypesError> {
        let fail = |msg: String| Err(TypesError::Config(msg));
        if self.max_subobjects == 0 {
            return fail("max_subobjects must be > 0".to_string());
        }
        if self.worker.period_ms == 0 {
            return fail("worker.period_ms must be > 0".to_string());
        }
        if self.coordinator.queue_capacity == 0 {
            return fail("coordinator.queue_capacity must be > 0".to_string());
        }
        if self.coordinator.period_ms == 0 {
            return fail("coordinator.period_ms must be > 0".to_string());
        }
        if self.retry.fatal_initial_backoff_ms > self.retry.fatal_max_backoff_ms {
            return fail(format!(
                "retry.fatal_initial_backoff_ms ({}) exceeds retry.fatal_max_backoff_ms ({})",
                self.retry.fatal_initial_backoff_ms, self.retry.fatal_max_backoff_ms
            ));
        }
        if let Some(code) = self.worker.codes.iter().find(|c| c.trim().is_empty()) {
            return fail(format!("worker.codes contains a blank code: {:?}", code));
        }
        Ok(())
    }

    pub fn expanded_event_db_path(&self) -> PathBuf {
        expand_home(&self.event_db_path)
    }

    pub fn expanded_search_index_path(&self) -> PathBuf {
        expand_home(&self.search_index_path)
    }

    pub fn expanded_type_rules_dir(&self) -> PathBuf {
        expand_home(&self.type_rules_dir)
    }

    pub fn expanded_source_root(&self) -> PathBuf {
        expand_home(&self.source_root)
    }

    pub fn expanded_temp_dir(&self) -> PathBuf {
        expand_home(&self.temp_dir)
    }
}

/// Expand a leading `~/` to the user's home directory
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.coordinator.queue_capacity, 200);
        assert_eq!(settings.retry.count, 5);
        assert_eq!(settings.log_level, "info");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_effective_codes_default() {
        let worker = WorkerSettings::default();
        assert_eq!(worker.effective_codes(), vec!["default".to_string()]);

        let worker = WorkerSettings {
            codes: vec!["big".to_string()],
            ..Default::default()
        };
        assert_eq!(worker.effective_codes(), vec!["big".to_string()]);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("indexer.toml");
        std::fs::write(
            &path,
            "max_subobjects = 7\n[worker]\ncodes = [\"a\", \"b\"]\n[retry]\ncount = 2\n",
        )
        .unwrap();

        let settings = Settings::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(settings.max_subobjects, 7);
        assert_eq!(settings.worker.codes, vec!["a", "b"]);
        assert_eq!(settings.retry.count, 2);
        assert_eq!(settings.retry.delay_ms, 1000);
    }

    #[test]
    fn test_validation_rejects_bad_ranges() {
        let mut settings = Settings::default();
        settings.max_subobjects = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.retry.fatal_initial_backoff_ms = 10_000;
        settings.retry.fatal_max_backoff_ms = 100;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.worker.codes = vec![" ".to_string()];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        assert_eq!(expand_home("rel/path"), PathBuf::from("rel/path"));
    }
}
