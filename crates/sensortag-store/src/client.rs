//! HTTP client for the InfluxDB 1.x API.

use async_trait::async_trait;
use reqwest::{Client, Response};
use tracing::{debug, info};

use sensortag_core::{Sample, SinkError, TelemetrySink};

use crate::config::InfluxConfig;
use crate::error::{Error, Result};
use crate::line;

/// Writes samples to an InfluxDB 1.x server.
#[derive(Debug, Clone)]
pub struct InfluxSink {
    client: Client,
    config: InfluxConfig,
    base_url: String,
}

impl InfluxSink {
    /// Create a sink. Nothing is sent until the first request.
    pub fn new(config: InfluxConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Self::with_client(config, client)
    }

    /// Create a sink with a custom reqwest Client.
    pub fn with_client(config: InfluxConfig, client: Client) -> Result<Self> {
        let base_url = config.base_url()?;
        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Database that samples are written to.
    pub fn database(&self) -> &str {
        &self.config.database
    }

    /// Run `CREATE DATABASE`. InfluxDB treats an existing database as success.
    pub async fn create_database(&self, name: &str) -> Result<()> {
        let url = format!("{}/query", self.base_url);
        let statement = format!("CREATE DATABASE \"{}\"", name.replace('"', "\\\""));
        debug!("{}", statement);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .form(&[("q", statement.as_str())])
            .send()
            .await
            .map_err(|source| Error::NotReachable {
                url: url.clone(),
                source,
            })?;
        check(response).await?;

        info!(database = %name, "Database ready");
        Ok(())
    }

    /// Write one sample.
    pub async fn write_sample(&self, sample: &Sample) -> Result<()> {
        self.write_lines(line::encode(sample)?).await
    }

    async fn write_lines(&self, body: String) -> Result<()> {
        let url = format!("{}/write", self.base_url);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .query(&[("db", self.config.database.as_str()), ("precision", "ms")])
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|source| Error::NotReachable { url, source })?;
        check(response).await
    }
}

async fn check(response: Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Response {
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

#[async_trait]
impl TelemetrySink for InfluxSink {
    async fn ensure_database(&self, name: &str) -> std::result::Result<(), SinkError> {
        self.create_database(name).await.map_err(SinkError::from)
    }

    async fn write(&self, sample: &Sample) -> std::result::Result<(), SinkError> {
        self.write_sample(sample).await.map_err(SinkError::from)
    }
}
