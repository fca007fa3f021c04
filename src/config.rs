use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

/// Base name of the configuration files (`dbtoolkit.toml`, `dbtoolkit.prod.toml`)
const CONFIG_FILE_STEM: &str = "dbtoolkit";

/// Environment type for configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Get environment from string
    pub fn from_str(env: &str) -> Self {
        match env.to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    /// Get environment name as string
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "dev",
            Environment::Production => "prod",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    #[serde(default)]
    pub environment: Environment,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Bound on a single connect attempt
    #[serde(default = "default_connection_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    /// Bound on a single driver call issued through the toolkit
    #[serde(default = "default_query_timeout")]
    pub query_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// A lock held longer than this is treated as abandoned
    #[serde(default = "default_max_lock_age")]
    pub max_lock_age_seconds: u64,

    #[serde(default = "default_lock_timeout")]
    pub default_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_schema_ttl")]
    pub schema_ttl_seconds: u64,

    #[serde(default = "default_query_ttl")]
    pub query_ttl_seconds: u64,

    #[serde(default = "default_query_max_entries")]
    pub query_max_entries: usize,

    /// Results with more rows than this are never cached
    #[serde(default = "default_query_max_rows")]
    pub query_max_rows: usize,

    #[serde(default = "default_true")]
    pub query_cache_enabled: bool,

    /// Bound on remembered statements across all connections
    #[serde(default = "default_statement_max_entries")]
    pub statement_max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_history_interval")]
    pub history_base_interval_seconds: u64,

    #[serde(default = "default_idle_multiplier")]
    pub history_idle_multiplier: f64,

    /// Trailing window without activity after which the system counts as idle
    #[serde(default = "default_activity_window")]
    pub activity_window_seconds: u64,

    #[serde(default = "default_history_backoff")]
    pub history_error_backoff_seconds: u64,

    #[serde(default = "default_job_interval")]
    pub job_base_interval_seconds: u64,

    #[serde(default = "default_job_min_interval")]
    pub job_min_interval_seconds: u64,

    #[serde(default = "default_job_max_interval")]
    pub job_max_interval_seconds: u64,

    /// Poll interval when no job is scheduled at all
    #[serde(default = "default_job_idle_interval")]
    pub job_idle_interval_seconds: u64,

    #[serde(default = "default_job_backoff")]
    pub job_error_backoff_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_true() -> bool {
    true
}
fn default_connection_timeout() -> u64 {
    10
}
fn default_query_timeout() -> u64 {
    30
}
fn default_max_lock_age() -> u64 {
    30
}
fn default_lock_timeout() -> u64 {
    10
}
fn default_schema_ttl() -> u64 {
    300
}
fn default_query_ttl() -> u64 {
    600
}
fn default_query_max_entries() -> usize {
    1000
}
fn default_query_max_rows() -> usize {
    1000
}
fn default_statement_max_entries() -> usize {
    1000
}
fn default_history_interval() -> u64 {
    4 * 60 * 60
}
fn default_idle_multiplier() -> f64 {
    1.5
}
fn default_activity_window() -> u64 {
    300
}
fn default_history_backoff() -> u64 {
    60
}
fn default_job_interval() -> u64 {
    60
}
fn default_job_min_interval() -> u64 {
    300
}
fn default_job_max_interval() -> u64 {
    1800
}
fn default_job_idle_interval() -> u64 {
    1800
}
fn default_job_backoff() -> u64 {
    300
}
fn default_retention_days() -> u32 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_connection_timeout(),
            auto_reconnect: true,
            query_timeout_seconds: default_query_timeout(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            max_lock_age_seconds: default_max_lock_age(),
            default_timeout_seconds: default_lock_timeout(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            schema_ttl_seconds: default_schema_ttl(),
            query_ttl_seconds: default_query_ttl(),
            query_max_entries: default_query_max_entries(),
            query_max_rows: default_query_max_rows(),
            query_cache_enabled: true,
            statement_max_entries: default_statement_max_entries(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            history_base_interval_seconds: default_history_interval(),
            history_idle_multiplier: default_idle_multiplier(),
            activity_window_seconds: default_activity_window(),
            history_error_backoff_seconds: default_history_backoff(),
            job_base_interval_seconds: default_job_interval(),
            job_min_interval_seconds: default_job_min_interval(),
            job_max_interval_seconds: default_job_max_interval(),
            job_idle_interval_seconds: default_job_idle_interval(),
            job_error_backoff_seconds: default_job_backoff(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LockConfig {
    pub fn max_lock_age(&self) -> Duration {
        Duration::from_secs(self.max_lock_age_seconds)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }
}

impl CoreConfig {
    /// Load configuration from the current directory
    pub fn load() -> Result<Self> {
        Self::load_with_base_dir(".")
    }

    /// Load `dbtoolkit.toml` from a base directory, merge the environment
    /// specific file on top, then apply `DBTOOLKIT_*` overrides.
    pub fn load_with_base_dir<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.as_ref();
        let env = Self::detect_environment();

        let base_config_path = base_dir.join(format!("{}.toml", CONFIG_FILE_STEM));
        let mut merged_value = if base_config_path.exists() {
            Self::load_toml_value(&base_config_path)?
        } else {
            toml::Value::Table(toml::map::Map::new())
        };

        let env_config_path = base_dir.join(format!("{}.{}.toml", CONFIG_FILE_STEM, env.as_str()));
        if env_config_path.exists() {
            log::debug!(
                "Loading environment-specific config from: {}",
                env_config_path.display()
            );
            let env_value = Self::load_toml_value(&env_config_path)?;
            merged_value = serde_toml_merge::merge(merged_value, env_value).map_err(|e| {
                Error::config(format!("Failed to merge configuration files: {}", e))
            })?;
        }

        let mut config: CoreConfig = merged_value.try_into().map_err(|e| {
            Error::config(format!("Failed to deserialize merged configuration: {}", e))
        })?;

        config.environment = env;
        config.apply_env_overrides()?;
        config.validate()?;

        log::info!(
            "Configuration loaded (environment: {})",
            config.environment.as_str()
        );

        Ok(config)
    }

    /// Load configuration from a single TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = fs::read_to_string(path_ref).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}",
                path_ref.display(),
                e
            ))
        })?;

        let config: CoreConfig = toml::from_str(&content).map_err(|e| {
            Error::config(format!(
                "Failed to parse config file '{}': {}. Check TOML syntax.",
                path_ref.display(),
                e
            ))
        })?;
        config.validate()?;

        log::debug!("Loaded configuration from: {}", path_ref.display());
        Ok(config)
    }

    fn load_toml_value<P: AsRef<Path>>(path: P) -> Result<toml::Value> {
        let path_ref = path.as_ref();
        let content = fs::read_to_string(path_ref).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}",
                path_ref.display(),
                e
            ))
        })?;

        toml::from_str(&content).map_err(|e| {
            Error::config(format!(
                "Failed to parse config file '{}': {}. Check TOML syntax.",
                path_ref.display(),
                e
            ))
        })
    }

    /// Detect current environment from `DBTOOLKIT_ENV`
    pub fn detect_environment() -> Environment {
        env::var("DBTOOLKIT_ENV")
            .map(|env| Environment::from_str(&env))
            .unwrap_or_default()
    }

    /// Validate value ranges that would otherwise break the core at runtime
    pub fn validate(&self) -> Result<()> {
        if self.connection.timeout_seconds == 0 {
            return Err(Error::config("connection.timeout_seconds cannot be 0"));
        }
        if self.connection.query_timeout_seconds == 0 {
            return Err(Error::config("connection.query_timeout_seconds cannot be 0"));
        }
        if self.lock.max_lock_age_seconds == 0 {
            return Err(Error::config("lock.max_lock_age_seconds cannot be 0"));
        }
        if self.cache.query_max_entries == 0 {
            return Err(Error::config("cache.query_max_entries cannot be 0"));
        }
        if self.scheduler.history_idle_multiplier < 1.0 {
            return Err(Error::config(
                "scheduler.history_idle_multiplier must be at least 1.0",
            ));
        }
        if self.scheduler.job_min_interval_seconds > self.scheduler.job_max_interval_seconds {
            return Err(Error::config(format!(
                "scheduler.job_min_interval_seconds ({}) exceeds job_max_interval_seconds ({})",
                self.scheduler.job_min_interval_seconds, self.scheduler.job_max_interval_seconds
            )));
        }
        if self.history.retention_days == 0 {
            return Err(Error::config("history.retention_days cannot be 0"));
        }
        Ok(())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(timeout) = env::var("DBTOOLKIT_CONNECTION_TIMEOUT") {
            self.connection.timeout_seconds = parse_env("DBTOOLKIT_CONNECTION_TIMEOUT", &timeout)?;
        }
        if let Ok(reconnect) = env::var("DBTOOLKIT_AUTO_RECONNECT") {
            self.connection.auto_reconnect = parse_env("DBTOOLKIT_AUTO_RECONNECT", &reconnect)?;
        }
        if let Ok(age) = env::var("DBTOOLKIT_MAX_LOCK_AGE") {
            self.lock.max_lock_age_seconds = parse_env("DBTOOLKIT_MAX_LOCK_AGE", &age)?;
        }
        if let Ok(size) = env::var("DBTOOLKIT_QUERY_CACHE_SIZE") {
            self.cache.query_max_entries = parse_env("DBTOOLKIT_QUERY_CACHE_SIZE", &size)?;
        }
        if let Ok(days) = env::var("DBTOOLKIT_HISTORY_RETENTION_DAYS") {
            self.history.retention_days = parse_env("DBTOOLKIT_HISTORY_RETENTION_DAYS", &days)?;
        }
        if let Ok(level) = env::var("DBTOOLKIT_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Seed for the runtime settings store
    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            connection_timeout_seconds: self.connection.timeout_seconds,
            auto_reconnect: self.connection.auto_reconnect,
            query_history_retention_days: self.history.retention_days,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::config(format!("Invalid value for {}: '{}'", name, raw)))
}

/// Install `env_logger` with the configured default filter.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(config: &LoggingConfig) {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.level.as_str()),
    )
    .try_init();
}

/// User-editable settings owned by the external settings store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    pub connection_timeout_seconds: u64,
    pub auto_reconnect: bool,
    pub query_history_retention_days: u32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        CoreConfig::default().runtime_settings()
    }
}

impl RuntimeSettings {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }
}

/// Read-only view onto the external settings store
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn current(&self) -> Result<RuntimeSettings>;
}

/// In-memory settings source, updatable at runtime
#[derive(Debug, Default)]
pub struct StaticSettings {
    settings: RwLock<RuntimeSettings>,
}

impl StaticSettings {
    pub fn new(settings: RuntimeSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut RuntimeSettings),
    {
        let mut settings = self
            .settings
            .write()
            .map_err(|_| Error::internal("Settings lock poisoned"))?;
        f(&mut settings);
        Ok(())
    }
}

#[async_trait]
impl SettingsSource for StaticSettings {
    async fn current(&self) -> Result<RuntimeSettings> {
        self.settings
            .read()
            .map(|s| s.clone())
            .map_err(|_| Error::internal("Settings lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = CoreConfig::default();
        assert_eq!(config.connection.timeout_seconds, 10);
        assert!(config.connection.auto_reconnect);
        assert_eq!(config.lock.max_lock_age(), Duration::from_secs(30));
        assert_eq!(config.cache.query_max_entries, 1000);
        assert_eq!(config.scheduler.history_base_interval_seconds, 14400);
        assert_eq!(config.scheduler.job_min_interval_seconds, 300);
        assert_eq!(config.scheduler.job_max_interval_seconds, 1800);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[connection]\ntimeout_seconds = 5\n\n[cache]\nquery_max_entries = 50\n"
        )
        .unwrap();

        let config = CoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.connection.timeout_seconds, 5);
        assert!(config.connection.auto_reconnect);
        assert_eq!(config.cache.query_max_entries, 50);
        assert_eq!(config.cache.query_ttl_seconds, 600);
    }

    #[test]
    fn test_load_with_base_dir_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreConfig::load_with_base_dir(dir.path()).unwrap();
        assert_eq!(config.lock.max_lock_age_seconds, 30);
    }

    #[test]
    fn test_validate_rejects_inverted_band() {
        let mut config = CoreConfig::default();
        config.scheduler.job_min_interval_seconds = 2000;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_static_settings_update() {
        let settings = StaticSettings::new(RuntimeSettings::default());
        settings.update(|s| s.auto_reconnect = false).unwrap();
        let current = settings.current().await.unwrap();
        assert!(!current.auto_reconnect);
        assert_eq!(current.connection_timeout(), Duration::from_secs(10));
    }
}
