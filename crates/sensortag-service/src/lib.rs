//! SensorTag reporter service.
//!
//! Discovers CC2650 SensorTags, keeps each one configured and streaming,
//! and writes every reading to InfluxDB.
//!
//! # Environment
//!
//! | Variable | Default | |
//! |----------|---------|-|
//! | `DB` | `st_report` | Database name |
//! | `DB_USER` | | Required |
//! | `DB_PASS` | | Required |
//! | `DB_HOST` | `localhost` | InfluxDB host |
//!
//! # Configuration
//!
//! Optional tunables are read from `~/.config/sensortag/report.toml` or the
//! file given with `--config`:
//!
//! ```toml
//! [session]
//! connect_timeout_ms = 30000
//! settle_ms = 1500
//! margin_ms = 2000
//! reconnect = "rediscover"   # or "same-handle"
//!
//! [discovery]
//! pause_ms = 250
//!
//! [startup]
//! database_retries = 5
//! retry_delay_ms = 2000
//!
//! [database]
//! port = 8086
//! protocol = "http"
//! ```
//!
//! # Exit codes
//!
//! - `1`: a required variable is missing or the configuration is invalid
//! - `2`: the database could not be created

pub mod config;
pub mod reporter;

pub use config::{Config, ConfigError, Environment, ValidationError};
pub use reporter::{EXIT_CONFIG, EXIT_DATABASE, Reporter, StartupError, shutdown_signal};
