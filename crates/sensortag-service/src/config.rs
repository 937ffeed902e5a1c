//! Reporter configuration.
//!
//! Database credentials come from the environment (`DB`, `DB_USER`,
//! `DB_PASS`, `DB_HOST`). Everything else has defaults and can be tuned in
//! an optional TOML file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sensortag_core::{NameFilter, ReconnectPolicy, RetryConfig, SupervisorConfig};
use sensortag_store::{DEFAULT_DATABASE, DEFAULT_PORT, InfluxConfig, Protocol};

/// Values read from the process environment.
#[derive(Clone, PartialEq, Eq)]
pub struct Environment {
    /// Database name (`DB`).
    pub database: String,
    /// `DB_USER`
    pub user: String,
    /// `DB_PASS`
    pub password: String,
    /// `DB_HOST`
    pub host: String,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("database", &self.database)
            .field("user", &self.user)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl Environment {
    /// Read from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let database = get("DB").unwrap_or_else(|| DEFAULT_DATABASE.to_string());
        let user = get("DB_USER").ok_or(ConfigError::MissingVariable("DB_USER"))?;
        let password = get("DB_PASS").ok_or(ConfigError::MissingVariable("DB_PASS"))?;
        let host = get("DB_HOST").unwrap_or_else(|| "localhost".to_string());

        Ok(Self {
            database,
            user,
            password,
            host,
        })
    }
}

/// Tunables file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub discovery: DiscoveryConfig,
    pub startup: StartupConfig,
    pub database: DatabaseConfig,
}

impl Config {
    /// Load configuration from the default path, or defaults if it does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.session.validate());
        errors.extend(self.discovery.validate());
        errors.extend(self.startup.validate());
        errors.extend(self.database.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        let session = &self.session;
        SupervisorConfig::default()
            .connect_timeout(Duration::from_millis(session.connect_timeout_ms))
            .settle(Duration::from_millis(session.settle_ms))
            .margin(Duration::from_millis(session.margin_ms))
            .disconnect_timeout(Duration::from_millis(session.disconnect_timeout_ms))
            .shutdown_timeout(Duration::from_millis(session.shutdown_timeout_ms))
            .reconnect(session.reconnect)
    }

    /// Fixed-delay retries for database creation.
    pub fn startup_retry(&self) -> RetryConfig {
        RetryConfig::fixed(
            self.startup.database_retries,
            Duration::from_millis(self.startup.retry_delay_ms),
        )
    }

    pub fn influx_config(&self, env: &Environment) -> InfluxConfig {
        InfluxConfig::new(&env.database, &env.user, &env.password)
            .host(&env.host)
            .port(self.database.port)
            .protocol(self.database.protocol)
            .timeout(Duration::from_secs(self.database.timeout_secs))
    }
}

/// `[session]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub connect_timeout_ms: u64,
    /// Pause between connecting and the first capture operation.
    pub settle_ms: u64,
    pub margin_ms: u64,
    pub disconnect_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            settle_ms: 1_500,
            margin_ms: 2_000,
            disconnect_timeout_ms: 5_000,
            shutdown_timeout_ms: 10_000,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Upper bound for the settle pause (1 minute).
pub const MAX_SETTLE_MS: u64 = 60_000;

impl SessionConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for (field, value) in [
            ("session.connect_timeout_ms", self.connect_timeout_ms),
            ("session.disconnect_timeout_ms", self.disconnect_timeout_ms),
            ("session.shutdown_timeout_ms", self.shutdown_timeout_ms),
        ] {
            if value == 0 {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: "timeout cannot be 0".to_string(),
                });
            }
        }

        if self.settle_ms > MAX_SETTLE_MS {
            errors.push(ValidationError {
                field: "session.settle_ms".to_string(),
                message: format!(
                    "settle pause {} is too long (maximum {} ms)",
                    self.settle_ms, MAX_SETTLE_MS
                ),
            });
        }

        errors
    }
}

/// `[discovery]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Pause between two discovery requests.
    pub pause_ms: u64,
    /// Admit devices whose name contains this text instead of SensorTags only.
    pub name_filter: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            pause_ms: 250,
            name_filter: None,
        }
    }
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(filter) = &self.name_filter
            && filter.trim().is_empty()
        {
            errors.push(ValidationError {
                field: "discovery.name_filter".to_string(),
                message: "name filter cannot be empty (omit it instead)".to_string(),
            });
        }

        errors
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }

    pub fn name_filter(&self) -> NameFilter {
        match &self.name_filter {
            Some(text) => NameFilter::Contains(text.clone()),
            None => NameFilter::SensorTag,
        }
    }
}

/// `[startup]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    /// Retries after the first failed `CREATE DATABASE`.
    pub database_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            database_retries: 5,
            retry_delay_ms: 2_000,
        }
    }
}

impl StartupConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.database_retries > 0 && self.retry_delay_ms == 0 {
            errors.push(ValidationError {
                field: "startup.retry_delay_ms".to_string(),
                message: "retry delay cannot be 0 when retries are enabled".to_string(),
            });
        }

        errors
    }
}

/// `[database]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub port: u16,
    pub protocol: Protocol,
    /// Timeout for a single HTTP request, in seconds.
    pub timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            protocol: Protocol::Http,
            timeout_secs: 10,
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.port == 0 {
            errors.push(ValidationError {
                field: "database.port".to_string(),
                message: "port cannot be 0".to_string(),
            });
        }
        if self.timeout_secs == 0 {
            errors.push(ValidationError {
                field: "database.timeout_secs".to_string(),
                message: "timeout cannot be 0".to_string(),
            });
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} variable must be set")]
    MissingVariable(&'static str),
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `session.settle_ms`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sensortag")
        .join("report.toml")
}
