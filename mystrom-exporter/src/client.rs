//! HTTP client for myStrom devices.
//!
//! One scrape issues exactly one `GET /report` against the device and decodes
//! the switch report. Failures come back as a [`FetchError`] whose variant
//! says what went wrong, so callers never have to inspect message text.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Measurements reported by a myStrom switch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceReport {
    /// Current power consumption in watts.
    pub power: f64,

    /// Average power over the last measuring interval in watts.
    ///
    /// Missing on old firmware.
    #[serde(rename = "Ws", default)]
    pub average_power: Option<f64>,

    /// Relay state (`true` = switched on).
    pub relay: bool,

    /// Device temperature in degrees celsius.
    ///
    /// Missing on devices without a sensor.
    #[serde(default)]
    pub temperature: Option<f64>,
}

/// Category of a failed device fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    /// The connection could not be established.
    Socket,
    /// A request deadline was exceeded.
    Timeout,
    /// The device answered with something that is not a report.
    Parse,
    /// Anything else (bad status code, request build failure, ...).
    Other,
}

/// A failed device fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unable to connect with target: {0}")]
    Socket(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("invalid device response: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            Self::Socket(_) => FetchErrorKind::Socket,
            Self::Timeout(_) => FetchErrorKind::Timeout,
            Self::Parse(_) => FetchErrorKind::Parse,
            Self::Other(_) => FetchErrorKind::Other,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        let message = error_chain(&err);

        // A connect timeout reports both flags; the deadline wins.
        if err.is_timeout() {
            Self::Timeout(message)
        } else if err.is_connect() {
            Self::Socket(message)
        } else if err.is_decode() || err.is_body() {
            Self::Parse(message)
        } else {
            Self::Other(message)
        }
    }
}

/// Render an error together with its sources.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Fetches the current report of a device.
pub trait DeviceClient: Send + Sync + 'static {
    /// Query the device at `target` (`host` or `host:port`) once.
    fn fetch(&self, target: &str) -> impl Future<Output = Result<DeviceReport, FetchError>> + Send;
}

/// [`DeviceClient`] talking to the device's local REST API.
#[derive(Debug, Clone)]
pub struct HttpDeviceClient {
    client: reqwest::Client,
}

impl HttpDeviceClient {
    /// Create a client whose requests are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self { client })
    }
}

impl DeviceClient for HttpDeviceClient {
    async fn fetch(&self, target: &str) -> Result<DeviceReport, FetchError> {
        let url = report_url(target);
        tracing::debug!(%url, "Fetching device report");

        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body = response.bytes().await?;

        serde_json::from_slice(&body).map_err(|e| FetchError::Parse(e.to_string()))
    }
}

/// URL of the report endpoint for `target`.
fn report_url(target: &str) -> String {
    let target = target.trim_end_matches('/');
    if target.starts_with("http://") || target.starts_with("https://") {
        format!("{}/report", target)
    } else {
        format!("http://{}/report", target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_url() {
        assert_eq!(report_url("10.0.0.5"), "http://10.0.0.5/report");
        assert_eq!(report_url("10.0.0.5:8080"), "http://10.0.0.5:8080/report");
        assert_eq!(report_url("http://plug.lan/"), "http://plug.lan/report");
    }

    #[test]
    fn test_decode_full_report() {
        let json = r#"{"power": 12.5, "Ws": 11.98, "relay": true, "temperature": 22.31}"#;
        let report: DeviceReport = serde_json::from_str(json).unwrap();

        assert_eq!(report.power, 12.5);
        assert_eq!(report.average_power, Some(11.98));
        assert!(report.relay);
        assert_eq!(report.temperature, Some(22.31));
    }

    #[test]
    fn test_decode_old_firmware_report() {
        let json = r#"{"power": 0, "relay": false}"#;
        let report: DeviceReport = serde_json::from_str(json).unwrap();

        assert_eq!(report.power, 0.0);
        assert!(!report.relay);
        assert!(report.average_power.is_none());
        assert!(report.temperature.is_none());
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let result: Result<DeviceReport, _> = serde_json::from_str(r#"{"temperature": 20}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_fetch_error_kind() {
        assert_eq!(
            FetchError::Socket("refused".into()).kind(),
            FetchErrorKind::Socket
        );
        assert_eq!(
            FetchError::Timeout("deadline".into()).kind(),
            FetchErrorKind::Timeout
        );
        assert_eq!(FetchError::Parse("eof".into()).kind(), FetchErrorKind::Parse);
        assert_eq!(FetchError::Other("500".into()).kind(), FetchErrorKind::Other);
    }

    #[tokio::test]
    async fn test_fetch_connection_refused_is_socket_error() {
        // Grab a free port, then close it so nothing listens there
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpDeviceClient::new(Duration::from_secs(2)).unwrap();
        let err = client.fetch(&addr.to_string()).await.unwrap_err();

        assert_eq!(err.kind(), FetchErrorKind::Socket);
    }
}
