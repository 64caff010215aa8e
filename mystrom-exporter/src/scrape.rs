//! Per-request scrape orchestration.

use std::fmt;
use std::time::Instant;

use prometheus_client::registry::Registry;
use thiserror::Error;
use tracing::{info, warn};

use crate::client::{DeviceClient, FetchError, FetchErrorKind};
use crate::metrics::SharedMetrics;
use crate::registry;

/// Outcome of one scrape, as recorded in the request counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScrapeStatus {
    Ok,
    SocketError,
    Timeout,
    ParseError,
}

impl ScrapeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::SocketError => "socket-error",
            Self::Timeout => "timeout",
            Self::ParseError => "parse-error",
        }
    }
}

impl fmt::Display for ScrapeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<FetchErrorKind> for ScrapeStatus {
    fn from(kind: FetchErrorKind) -> Self {
        match kind {
            FetchErrorKind::Socket => Self::SocketError,
            FetchErrorKind::Timeout => Self::Timeout,
            FetchErrorKind::Parse | FetchErrorKind::Other => Self::ParseError,
        }
    }
}

/// A failed scrape.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// No target was given; the device was not contacted.
    #[error("'target' parameter must be specified")]
    BadRequest,

    /// The device could not be fetched.
    #[error("failed to scrape target '{target}': {source}")]
    Fetch {
        target: String,
        #[source]
        source: FetchError,
    },
}

impl ScrapeError {
    /// Counter status of this failure, if the device was contacted.
    pub fn status(&self) -> Option<ScrapeStatus> {
        match self {
            Self::BadRequest => None,
            Self::Fetch { source, .. } => Some(source.kind().into()),
        }
    }
}

/// Runs scrapes against devices and keeps the request counters up to date.
#[derive(Debug)]
pub struct Scraper<C> {
    client: C,
    metrics: SharedMetrics,
}

impl<C: DeviceClient> Scraper<C> {
    pub fn new(client: C, metrics: SharedMetrics) -> Self {
        Self { client, metrics }
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Scrape `target` once and return a registry with its measurements.
    pub async fn scrape(&self, target: &str) -> Result<Registry, ScrapeError> {
        if target.is_empty() {
            return Err(ScrapeError::BadRequest);
        }

        info!(device = target, "Got scrape request");

        let start = Instant::now();
        let result = self.client.fetch(target).await;
        let elapsed = start.elapsed().as_secs_f64();

        match result {
            Ok(report) => {
                self.metrics.record_duration(target, elapsed);
                self.metrics.record_request(target, ScrapeStatus::Ok);
                Ok(registry::build(&report))
            }
            Err(source) => {
                let status = ScrapeStatus::from(source.kind());
                self.metrics.record_request(target, status);
                warn!(device = target, %status, error = %source, "Scrape failed");
                Err(ScrapeError::Fetch {
                    target: target.to_string(),
                    source,
                })
            }
        }
    }
}
