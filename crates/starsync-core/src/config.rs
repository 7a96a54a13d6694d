use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::entity::{EntityKind, SizeClass};
use crate::fingerprint::{DEFAULT_WIDTH, MAX_WIDTH, MIN_WIDTH};
use crate::SyncError;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for SyncError {
    fn from(e: ConfigError) -> Self {
        SyncError::Config(e.to_string())
    }
}

/// Main configuration for an import run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Emit a throughput line every this many records read
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub batching: BatchingConfig,

    #[serde(default)]
    pub fingerprint: FingerprintConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            dispatch: DispatchConfig::default(),
            batching: BatchingConfig::default(),
            fingerprint: FingerprintConfig::default(),
            logging: LoggingConfig::default(),
            progress_interval: default_progress_interval(),
        }
    }
}

/// Remote store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub username: Option<String>,

    /// Never written back out; supply via file or STARSYNC_PASSWORD
    #[serde(default, skip_serializing)]
    pub password: Option<SecretString>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Rows per page during a full refresh
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Filter values per request during a partial refresh
    #[serde(default = "default_filter_chunk")]
    pub filter_chunk: usize,

    /// Request the packed/columnar list encoding
    #[serde(default = "default_true")]
    pub packed: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            username: None,
            password: None,
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
            filter_chunk: default_filter_chunk(),
            packed: true,
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Write dispatcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Attempts after the first for a busy/locked store
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Producer blocks while queued jobs exceed workers * factor
    #[serde(default = "default_backpressure_factor")]
    pub backpressure_factor: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            backpressure_factor: default_backpressure_factor(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl DispatchConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_queue_depth(&self) -> usize {
        self.workers.max(1) * self.backpressure_factor.max(1)
    }
}

/// Batch size thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    #[serde(default = "default_threshold")]
    pub default_threshold: usize,

    /// Large hash-identified tables (systems, bodies, listings)
    #[serde(default = "default_large_threshold")]
    pub large_threshold: usize,

    #[serde(default = "default_threshold")]
    pub join_threshold: usize,

    /// Per-entity overrides keyed by entity name (e.g. `station_export`)
    #[serde(default)]
    pub overrides: BTreeMap<String, usize>,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            default_threshold: default_threshold(),
            large_threshold: default_large_threshold(),
            join_threshold: default_threshold(),
            overrides: BTreeMap::new(),
        }
    }
}

impl BatchingConfig {
    pub fn threshold(&self, kind: EntityKind) -> usize {
        if let Some(n) = self.overrides.get(kind.as_str()) {
            return (*n).max(1);
        }
        let n = match kind.size_class() {
            SizeClass::Small => self.default_threshold,
            SizeClass::Large => self.large_threshold,
            SizeClass::Join => self.join_threshold,
        };
        n.max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintConfig {
    /// Hex characters kept from the digest
    #[serde(default = "default_fingerprint_width")]
    pub width: usize,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            width: default_fingerprint_width(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000/api".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_page_size() -> usize {
    5_000
}
fn default_filter_chunk() -> usize {
    500
}
fn default_true() -> bool {
    true
}
fn default_workers() -> usize {
    2
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_delay_ms() -> u64 {
    500
}
fn default_backpressure_factor() -> usize {
    2
}
fn default_poll_interval_ms() -> u64 {
    50
}
fn default_threshold() -> usize {
    1_000
}
fn default_large_threshold() -> usize {
    8_000
}
fn default_fingerprint_width() -> usize {
    DEFAULT_WIDTH
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}
fn default_progress_interval() -> u64 {
    100_000
}

/// Configuration manager with layered sources
pub struct ConfigManager {
    config: SyncConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (.env file included)
    /// 2. Config file (explicit path, ./.starsync.toml, ~/.starsync/config.toml)
    /// 3. Defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_dotenv();

        let (config, config_path) = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.display().to_string()));
                }
                (Self::read_toml_file(path)?, Some(path.to_path_buf()))
            }
            None => Self::load_config_file()?,
        };

        let config = Self::apply_env_overrides(config, |key| std::env::var(key).ok());
        Self::validate_config(&config)?;

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Where the configuration came from and the settings that matter most
    /// when reading a run's log.
    pub fn summary_lines(&self) -> Vec<String> {
        let source = match &self.config_path {
            Some(path) => format!("Config file: {}", path.display()),
            None => "No config file found, using defaults".to_string(),
        };
        vec![
            source,
            format!(
                "Store: {} ({} workers, fingerprint width {})",
                self.config.store.base_url, self.config.dispatch.workers, self.config.fingerprint.width
            ),
        ]
    }

    /// Emit `summary_lines`; call once a subscriber is installed.
    pub fn log_summary(&self) {
        for line in self.summary_lines() {
            info!("{}", line);
        }
    }

    /// Wrap an already-built configuration.
    pub fn from_config(config: SyncConfig) -> Result<Self, ConfigError> {
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: None,
        })
    }

    fn load_dotenv() {
        if Path::new(".env").exists() {
            if let Err(e) = dotenv::from_filename(".env") {
                warn!("Failed to load .env file: {}", e);
            }
        }
    }

    fn load_config_file() -> Result<(SyncConfig, Option<PathBuf>), ConfigError> {
        let local_config = Path::new(".starsync.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".starsync").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        Ok((SyncConfig::default(), None))
    }

    pub fn read_toml_file(path: &Path) -> Result<SyncConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn apply_env_overrides(
        mut config: SyncConfig,
        var: impl Fn(&str) -> Option<String>,
    ) -> SyncConfig {
        let parsed = |key: &str| var(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(url) = var("STARSYNC_BASE_URL") {
            config.store.base_url = url;
        }
        if let Some(user) = var("STARSYNC_USERNAME") {
            config.store.username = Some(user);
        }
        if let Some(password) = var("STARSYNC_PASSWORD") {
            config.store.password = Some(SecretString::from(password));
        }
        if let Some(n) = parsed("STARSYNC_PAGE_SIZE") {
            config.store.page_size = n as usize;
        }
        if let Some(n) = parsed("STARSYNC_WORKERS") {
            config.dispatch.workers = n as usize;
        }
        if let Some(n) = parsed("STARSYNC_MAX_RETRIES") {
            config.dispatch.max_retries = n as u32;
        }
        if let Some(n) = parsed("STARSYNC_FINGERPRINT_WIDTH") {
            config.fingerprint.width = n as usize;
        }
        if let Some(level) = var("STARSYNC_LOG_LEVEL") {
            config.logging.level = level;
        }
        config
    }

    pub fn validate_config(config: &SyncConfig) -> Result<(), ConfigError> {
        if !(1..=8).contains(&config.dispatch.workers) {
            return Err(ConfigError::ValidationError(format!(
                "dispatch.workers must be between 1 and 8, got {}",
                config.dispatch.workers
            )));
        }
        if !(MIN_WIDTH..=MAX_WIDTH).contains(&config.fingerprint.width) {
            return Err(ConfigError::ValidationError(format!(
                "fingerprint.width must be between {} and {}, got {}",
                MIN_WIDTH, MAX_WIDTH, config.fingerprint.width
            )));
        }
        if config.store.page_size == 0 || config.store.filter_chunk == 0 {
            return Err(ConfigError::ValidationError(
                "store.page_size and store.filter_chunk must be positive".to_string(),
            ));
        }
        if url_scheme(&config.store.base_url).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "store.base_url must be an http(s) URL, got {}",
                config.store.base_url
            )));
        }
        for key in config.batching.overrides.keys() {
            if key.parse::<EntityKind>().is_err() {
                return Err(ConfigError::ValidationError(format!(
                    "batching.overrides: unknown entity {}",
                    key
                )));
            }
        }
        match config.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    other
                )))
            }
        }
        match config.logging.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}. Must be one of: pretty, json",
                    other
                )))
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SyncConfig {
        &mut self.config
    }

    pub fn into_config(self) -> SyncConfig {
        self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Create a default config file
    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let config = SyncConfig::default();
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::ReadError(e.to_string()))?;
            }
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        Ok(())
    }
}

fn url_scheme(url: &str) -> Option<&str> {
    let (scheme, rest) = url.split_once("://")?;
    (matches!(scheme, "http" | "https") && !rest.is_empty()).then_some(scheme)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.dispatch.workers, 2);
        assert_eq!(config.fingerprint.width, 16);
        assert!(ConfigManager::validate_config(&config).is_ok());
    }

    #[test]
    fn thresholds_follow_size_class_and_overrides() {
        let mut batching = BatchingConfig::default();
        assert_eq!(batching.threshold(EntityKind::Body), 8_000);
        assert_eq!(batching.threshold(EntityKind::Station), 1_000);
        assert_eq!(batching.threshold(EntityKind::StationExport), 1_000);
        batching.overrides.insert("station_export".into(), 50);
        assert_eq!(batching.threshold(EntityKind::StationExport), 50);
        batching.overrides.insert("station".into(), 0);
        assert_eq!(batching.threshold(EntityKind::Station), 1);
    }

    #[test]
    fn test_config_validation() {
        let mut bad = SyncConfig::default();
        bad.dispatch.workers = 0;
        assert!(ConfigManager::validate_config(&bad).is_err());

        let mut bad = SyncConfig::default();
        bad.fingerprint.width = 4;
        assert!(ConfigManager::validate_config(&bad).is_err());

        let mut bad = SyncConfig::default();
        bad.batching.overrides.insert("warp_drive".into(), 5);
        assert!(ConfigManager::validate_config(&bad).is_err());

        let mut bad = SyncConfig::default();
        bad.store.base_url = "localhost".into();
        assert!(ConfigManager::validate_config(&bad).is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("STARSYNC_BASE_URL", "https://store.example/api"),
            ("STARSYNC_PASSWORD", "hunter2"),
            ("STARSYNC_WORKERS", "1"),
            ("STARSYNC_FINGERPRINT_WIDTH", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let config = ConfigManager::apply_env_overrides(SyncConfig::default(), |k| {
            env.get(k).map(|v| v.to_string())
        });
        assert_eq!(config.store.base_url, "https://store.example/api");
        assert_eq!(config.dispatch.workers, 1);
        assert_eq!(config.fingerprint.width, 16);
        assert_eq!(
            config.store.password.as_ref().map(|p| p.expose_secret().to_string()),
            Some("hunter2".to_string())
        );
    }
}
