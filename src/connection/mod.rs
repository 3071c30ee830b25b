//! Connection management for MongoDB
//!
//! Builds a driver client from [`ConnectionConfig`], retrying the initial
//! ping with a linear backoff, and hands out database handles wrapped as
//! [`MongoDataSource`]s.

use std::time::{Duration, Instant};

use bson::doc;
use mongodb::{Client, Database, options::ClientOptions};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::datasource::MongoDataSource;
use crate::error::{ConnectionError, Result};

/// MongoDB connection manager
pub struct ConnectionManager {
    client: Option<Client>,
    config: ConnectionConfig,
}

/// Health check result
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub response_time_ms: u64,
}

impl ConnectionManager {
    /// Create a new connection manager
    ///
    /// # Arguments
    /// * `config` - Connection configuration, including the URI
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            client: None,
            config,
        }
    }

    /// Establish connection to MongoDB
    ///
    /// The driver connects lazily; a ping makes sure the server is actually
    /// reachable before any run starts.
    pub async fn connect(&mut self) -> Result<()> {
        self.config.validate_uri()?;
        let options = self.client_options().await?;
        let client = self.connect_with_retry(options).await?;
        self.client = Some(client);
        info!("Connected to {}", redact(&self.config.uri));
        Ok(())
    }

    /// Close the client and release pooled connections
    pub async fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            client.shutdown().await;
            debug!("Disconnected");
        }
    }

    pub async fn health_check(&self) -> Result<HealthStatus> {
        let client = self.client()?;
        let start = Instant::now();
        let is_healthy = ping(client).await.is_ok();
        Ok(HealthStatus {
            is_healthy,
            response_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    pub fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| ConnectionError::NotConnected.into())
    }

    pub fn database(&self, name: &str) -> Result<Database> {
        Ok(self.client()?.database(name))
    }

    /// Database handle as a data source for export, import and schema runs.
    pub fn data_source(&self, name: &str) -> Result<MongoDataSource> {
        Ok(MongoDataSource::new(self.database(name)?))
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn client_options(&self) -> Result<ClientOptions> {
        let mut options = ClientOptions::parse(&self.config.uri)
            .await
            .map_err(|e| ConnectionError::InvalidUri(format!("{}: {e}", redact(&self.config.uri))))?;
        let timeout = Duration::from_secs(self.config.timeout);
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);
        options.app_name.get_or_insert_with(|| "mongoport".to_string());
        Ok(options)
    }

    async fn connect_with_retry(&self, options: ClientOptions) -> Result<Client> {
        let client = Client::with_options(options)
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        let attempts = self.config.retry_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match ping(&client).await {
                Ok(()) => return Ok(client),
                Err(e) => {
                    warn!("Ping attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                    }
                }
            }
        }
        Err(ConnectionError::ConnectionFailed(last_error).into())
    }
}

async fn ping(client: &Client) -> std::result::Result<(), mongodb::error::Error> {
    client
        .database("admin")
        .run_command(doc! { "ping": 1 })
        .await
        .map(|_| ())
}

/// Hide credentials in a connection string for logging.
pub fn redact(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    let host_start = rest.find('/').unwrap_or(rest.len());
    match rest[..host_start].rfind('@') {
        Some(at) => format!("{scheme}://***@{}", &rest[at + 1..]),
        None => uri.to_string(),
    }
}
