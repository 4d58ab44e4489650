//! HTTP client for the printer host's connection and printer endpoints.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;

const API_KEY_HEADER: &str = "X-Api-Key";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StatusError {
    /// DNS, refused connection, timeout or a body that could not be read.
    #[error("Request failed: {0}")]
    Network(String),
    #[error("Unexpected HTTP status {0}")]
    HttpStatus(u16),
    /// A 200 response whose payload lacks the expected fields.
    #[error("Unparseable response: {0}")]
    Unparseable(String),
    #[error("Client setup failed: {0}")]
    Setup(String),
}

impl StatusError {
    pub fn is_unparseable(&self) -> bool {
        matches!(self, StatusError::Unparseable(_))
    }
}

/// Serial link state as reported by `GET /api/connection`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Disconnecting,
    Operational,
    Other(String),
}

impl ConnectionState {
    /// The printer endpoint is only meaningful once the link has settled.
    pub fn allows_status_poll(&self) -> bool {
        !matches!(
            self,
            ConnectionState::Closed | ConnectionState::Connecting | ConnectionState::Disconnecting
        )
    }
}

impl From<&str> for ConnectionState {
    fn from(state: &str) -> Self {
        match state {
            "Closed" => ConnectionState::Closed,
            "Connecting" => ConnectionState::Connecting,
            "Disconnecting" => ConnectionState::Disconnecting,
            "Operational" => ConnectionState::Operational,
            other => ConnectionState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Closed => f.write_str("Closed"),
            ConnectionState::Connecting => f.write_str("Connecting"),
            ConnectionState::Disconnecting => f.write_str("Disconnecting"),
            ConnectionState::Operational => f.write_str("Operational"),
            ConnectionState::Other(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub port: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct HeaterReading {
    pub actual: f64,
    pub target: f64,
}

/// Snapshot of `GET /api/printer`. Transient, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PrinterTelemetry {
    pub printing: bool,
    pub paused: bool,
    pub extruder: HeaterReading,
    pub bed: HeaterReading,
}

#[derive(Debug, Deserialize)]
struct ConnectionResponse {
    current: CurrentConnection,
}

#[derive(Debug, Deserialize)]
struct CurrentConnection {
    state: String,
    #[serde(default)]
    port: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PrinterResponse {
    state: PrinterStateBlock,
    temperature: TemperatureBlock,
}

#[derive(Debug, Deserialize)]
struct PrinterStateBlock {
    flags: PrinterFlags,
}

#[derive(Debug, Deserialize)]
struct PrinterFlags {
    printing: bool,
    paused: bool,
}

#[derive(Debug, Deserialize)]
struct TemperatureBlock {
    tool0: HeaterReading,
    bed: HeaterReading,
}

#[derive(Debug, Serialize)]
struct ConnectRequest<'a> {
    command: &'a str,
    port: &'a str,
    baudrate: u32,
}

/// The three host API operations the supervisor needs.
#[async_trait]
pub trait PrinterApi: Send + Sync {
    async fn connection_status(&self) -> Result<ConnectionStatus, StatusError>;
    async fn printer_telemetry(&self) -> Result<PrinterTelemetry, StatusError>;
    /// Succeeds only on HTTP 204.
    async fn request_connect(&self, port: &str, baud_rate: u32) -> Result<(), StatusError>;
}

/// reqwest-backed `PrinterApi`. Every request carries the API key header and
/// is bounded by the configured timeout.
#[derive(Debug, Clone)]
pub struct PrinterStatusClient {
    client: reqwest::Client,
    connection_url: Url,
    printer_url: Url,
    api_key: String,
    timeout: Duration,
}

impl PrinterStatusClient {
    pub fn new(url_base: &str, api_key: &str, timeout: Duration) -> Result<Self, StatusError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| StatusError::Setup(e.to_string()))?;
        Self::with_http_client(url_base, api_key, timeout, client)
    }

    /// Use a preconfigured reqwest client. `timeout` bounds every request
    /// regardless of how the client was built.
    pub fn with_http_client(
        url_base: &str,
        api_key: &str,
        timeout: Duration,
        client: reqwest::Client,
    ) -> Result<Self, StatusError> {
        let mut base = url_base.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base).map_err(|e| StatusError::Setup(format!("{}: {}", url_base, e)))?;
        let connection_url = base
            .join("api/connection")
            .map_err(|e| StatusError::Setup(e.to_string()))?;
        let printer_url = base
            .join("api/printer")
            .map_err(|e| StatusError::Setup(e.to_string()))?;
        Ok(Self {
            client,
            connection_url,
            printer_url,
            api_key: api_key.to_string(),
            timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, StatusError> {
        let timeout = config
            .request_timeout()
            .map_err(|e| StatusError::Setup(e.to_string()))?;
        Self::new(&config.octoprint.url_base, &config.octoprint.api_key, timeout)
    }

    pub fn connection_url(&self) -> &Url {
        &self.connection_url
    }

    pub fn printer_url(&self) -> &Url {
        &self.printer_url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &Url) -> Result<T, StatusError> {
        let resp = self
            .client
            .get(url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| StatusError::Network(e.to_string()))?;

        tracing::debug!(url = %url, status = resp.status().as_u16(), "GET");
        if resp.status() != StatusCode::OK {
            return Err(StatusError::HttpStatus(resp.status().as_u16()));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| StatusError::Network(e.to_string()))?;
        serde_json::from_slice::<T>(&body).map_err(|e| StatusError::Unparseable(e.to_string()))
    }
}

#[async_trait]
impl PrinterApi for PrinterStatusClient {
    async fn connection_status(&self) -> Result<ConnectionStatus, StatusError> {
        let resp: ConnectionResponse = self.get_json(&self.connection_url).await?;
        Ok(ConnectionStatus {
            state: ConnectionState::from(resp.current.state.as_str()),
            port: resp.current.port,
        })
    }

    async fn printer_telemetry(&self) -> Result<PrinterTelemetry, StatusError> {
        let resp: PrinterResponse = self.get_json(&self.printer_url).await?;
        Ok(PrinterTelemetry {
            printing: resp.state.flags.printing,
            paused: resp.state.flags.paused,
            extruder: resp.temperature.tool0,
            bed: resp.temperature.bed,
        })
    }

    async fn request_connect(&self, port: &str, baud_rate: u32) -> Result<(), StatusError> {
        let body = ConnectRequest {
            command: "connect",
            port,
            baudrate: baud_rate,
        };
        let resp = self
            .client
            .post(self.connection_url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| StatusError::Network(e.to_string()))?;

        tracing::debug!(url = %self.connection_url, status = resp.status().as_u16(), "POST connect");
        if resp.status() == StatusCode::NO_CONTENT {
            Ok(())
        } else {
            Err(StatusError::HttpStatus(resp.status().as_u16()))
        }
    }
}
