//! InfluxDB connection settings.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default InfluxDB HTTP port.
pub const DEFAULT_PORT: u16 = 8086;

/// Default database name.
pub const DEFAULT_DATABASE: &str = "st_report";

/// Transport used to reach InfluxDB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "http"),
            Protocol::Https => write!(f, "https"),
        }
    }
}

/// Where and as whom to write.
#[derive(Clone, PartialEq, Eq)]
pub struct InfluxConfig {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Timeout for a single HTTP request.
    pub timeout: Duration,
}

// The password never appears in logs.
impl fmt::Debug for InfluxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfluxConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl InfluxConfig {
    /// Settings for `localhost:8086` over http.
    pub fn new(database: &str, username: &str, password: &str) -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            protocol: Protocol::Http,
            database: database.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `<protocol>://<host>:<port>`, validated.
    pub fn base_url(&self) -> Result<String> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(Error::InvalidConfig("host must not be empty".to_string()));
        }
        if host.contains("://") || host.contains('/') {
            return Err(Error::InvalidConfig(format!(
                "host must be a bare hostname or address, got: {}",
                host
            )));
        }
        if self.port == 0 {
            return Err(Error::InvalidConfig("port must not be 0".to_string()));
        }
        if self.database.is_empty() {
            return Err(Error::InvalidConfig("database must not be empty".to_string()));
        }
        Ok(format!("{}://{}:{}", self.protocol, host, self.port))
    }
}
