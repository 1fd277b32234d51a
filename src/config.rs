//! Configuration module
//!
//! `AppConfig` is read from a TOML file. Every section and field has a
//! default, so a partial (or empty) file is valid.
//!
//! ```toml
//! [store]
//! backend = "database"
//! workers = 10
//!
//! [database]
//! url = "sqlite://./users.db?mode=rwc"
//!
//! [pipeline.fault_injection]
//! delivery_failure_rate = 0.0
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::{FaultInjection, PipelineSettings, ReceiverSettings};
use crate::application::pipeline::ConsumerSettings;
use crate::infrastructure::DatabaseConfig;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "USER_PIPELINE_CONFIG";

/// Upper bound for every configured duration (one year).
const MAX_DURATION_SECS: u64 = 86_400 * 365;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Default config location: `<config dir>/user-pipeline/config.toml`,
/// unless `USER_PIPELINE_CONFIG` points elsewhere.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("user-pipeline")
        .join("config.toml")
}

// ── Sections ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Database,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Database => f.write_str("database"),
        }
    }
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "database" | "db" => Ok(Self::Database),
            other => Err(ConfigError::invalid(
                "store.backend",
                format!("unknown backend '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub backend: StoreBackend,
    /// Admission pool size of the memory store.
    pub workers: usize,
    /// Deadline for every synchronous store/cache call.
    pub operation_timeout_ms: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            workers: 10,
            operation_timeout_ms: 5000,
        }
    }
}

impl StoreSection {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite://./users.db?mode=rwc".to_string(),
            max_connections: 10,
        }
    }
}

impl From<&DatabaseSection> for DatabaseConfig {
    fn from(section: &DatabaseSection) -> Self {
        Self {
            url: section.url.clone(),
            max_connections: section.max_connections,
            ..DatabaseConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// TTL of point and list entries.
    pub ttl_secs: u64,
    /// TTL of `result:*` entries.
    pub result_ttl_secs: u64,
    /// How long a wait-for-push caller blocks.
    pub subscribe_timeout_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            result_ttl_secs: 600,
            subscribe_timeout_secs: 10,
        }
    }
}

impl CacheSection {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_secs(self.subscribe_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSection {
    pub consume_backoff_secs: u64,
    pub max_delivery_attempts: u32,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            consume_backoff_secs: 5,
            max_delivery_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultInjectionSection {
    /// Probability in `[0, 1]` that the mailing stage's first delivery
    /// attempt fails. Test use only.
    pub delivery_failure_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub fault_injection: FaultInjectionSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    pub enabled: bool,
    pub listen: String,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "0.0.0.0:9100".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 30,
        }
    }
}

// ── AppConfig ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreSection,
    pub database: DatabaseSection,
    pub cache: CacheSection,
    pub broker: BrokerSection,
    pub pipeline: PipelineSection,
    pub metrics: MetricsSection,
    pub logging: LoggingSection,
    pub server: ServerSection,
}

impl AppConfig {
    /// Read and validate the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = text.parse()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.workers == 0 {
            return Err(ConfigError::invalid("store.workers", "must be at least 1"));
        }
        if self.store.operation_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "store.operation_timeout_ms",
                "must be positive",
            ));
        }
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::invalid("cache.ttl_secs", "must be positive"));
        }
        if self.cache.result_ttl_secs == 0 {
            return Err(ConfigError::invalid("cache.result_ttl_secs", "must be positive"));
        }
        let bounded = [
            ("store.operation_timeout_ms", self.store.operation_timeout_ms / 1000),
            ("cache.ttl_secs", self.cache.ttl_secs),
            ("cache.result_ttl_secs", self.cache.result_ttl_secs),
            ("cache.subscribe_timeout_secs", self.cache.subscribe_timeout_secs),
            ("broker.consume_backoff_secs", self.broker.consume_backoff_secs),
            ("server.shutdown_timeout_secs", self.server.shutdown_timeout_secs),
        ];
        for (field, secs) in bounded {
            if secs > MAX_DURATION_SECS {
                return Err(ConfigError::invalid(
                    field,
                    format!("must not exceed {} seconds", MAX_DURATION_SECS),
                ));
            }
        }
        if self.broker.max_delivery_attempts == 0 {
            return Err(ConfigError::invalid(
                "broker.max_delivery_attempts",
                "must be at least 1",
            ));
        }
        let rate = self.pipeline.fault_injection.delivery_failure_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(ConfigError::invalid(
                "pipeline.fault_injection.delivery_failure_rate",
                format!("{} is outside [0, 1]", rate),
            ));
        }
        if self.store.backend == StoreBackend::Database && self.database.url.trim().is_empty() {
            return Err(ConfigError::invalid("database.url", "must not be empty"));
        }
        if self.metrics.enabled {
            self.metrics_listen()?;
        }
        Ok(())
    }

    pub fn metrics_listen(&self) -> Result<SocketAddr, ConfigError> {
        self.metrics
            .listen
            .parse()
            .map_err(|e| ConfigError::invalid("metrics.listen", format!("{}", e)))
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            consumer: ConsumerSettings {
                backoff: Duration::from_secs(self.broker.consume_backoff_secs),
                max_delivery_attempts: self.broker.max_delivery_attempts,
            },
            operation_timeout: self.store.operation_timeout(),
            result_ttl: self.cache.result_ttl(),
            fault_injection: FaultInjection::new(self.pipeline.fault_injection.delivery_failure_rate),
        }
    }

    pub fn receiver_settings(&self) -> ReceiverSettings {
        ReceiverSettings {
            operation_timeout: self.store.operation_timeout(),
        }
    }
}

impl FromStr for AppConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: AppConfig = "".parse().unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.workers, 10);
        assert_eq!(config.cache.ttl(), Duration::from_secs(60));
        assert_eq!(config.cache.result_ttl(), Duration::from_secs(600));
        assert_eq!(config.broker.consume_backoff_secs, 5);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: AppConfig = r#"
            [store]
            backend = "database"

            [pipeline.fault_injection]
            delivery_failure_rate = 0.25
        "#
        .parse()
        .unwrap();
        assert_eq!(config.store.backend, StoreBackend::Database);
        assert_eq!(config.store.workers, 10);
        assert_eq!(config.pipeline_settings().fault_injection.rate(), 0.25);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = "[store]\nworkers = 0".parse::<AppConfig>().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "store.workers", .. }));

        let err = "[cache]\nttl_secs = 0".parse::<AppConfig>().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "cache.ttl_secs", .. }));

        let err = "[cache]\nresult_ttl_secs = 9223372036854775807"
            .parse::<AppConfig>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "cache.result_ttl_secs", .. }));

        let err = "[store]\noperation_timeout_ms = 9223372036854775807"
            .parse::<AppConfig>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "store.operation_timeout_ms", .. }));

        let err = "[pipeline.fault_injection]\ndelivery_failure_rate = 1.5"
            .parse::<AppConfig>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = "[metrics]\nlisten = \"nowhere\"".parse::<AppConfig>().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "metrics.listen", .. }));
    }

    #[test]
    fn unknown_backend_is_a_parse_error() {
        let err = "[store]\nbackend = \"redis\"".parse::<AppConfig>().unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!("redis".parse::<StoreBackend>().is_err());
        assert_eq!("DB".parse::<StoreBackend>().unwrap(), StoreBackend::Database);
    }

    #[test]
    fn save_then_load() {
        let dir = std::env::temp_dir().join(format!("user-pipeline-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.toml");
        let mut config = AppConfig::default();
        config.store.workers = 3;
        config.save(&path).unwrap();

        assert_eq!(AppConfig::load(&path).unwrap(), config);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = AppConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
