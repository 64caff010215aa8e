//! Prometheus multi-target exporter for myStrom devices.
//!
//! On every scrape of the device path the exporter queries one myStrom
//! switch over HTTP and answers with a fresh registry holding its
//! measurements. Optionally it listens for the UDP broadcasts the devices
//! send and publishes them as a Prometheus HTTP service-discovery manifest.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   HTTP Server   │────>│     Scraper     │────>│  DeviceClient   │
//! │ (/device, ...)  │     │   (counters)    │     │  (GET /report)  │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//!          │
//!          │ /discover, /device_by_mac/{mac}
//!          v
//! ┌─────────────────┐     ┌─────────────────┐
//! │   DeviceTable   │<────│    Discovery    │<──── UDP broadcast :7979
//! │    (RwLock)     │     │    Listener     │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! mystrom-exporter --discovery.enabled --web.listen-address :9452
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod client;
pub mod config;
pub mod discovery;
pub mod http;
pub mod metrics;
pub mod registry;
pub mod scrape;

pub use client::{DeviceClient, DeviceReport, FetchError, FetchErrorKind, HttpDeviceClient};
pub use config::ExporterConfig;
pub use discovery::{DeviceTable, DiscoveryListener, SharedDeviceTable};
pub use http::{DiscoveryRoutes, HttpServer, create_router};
pub use metrics::{ExporterMetrics, SharedMetrics};
pub use scrape::{ScrapeError, ScrapeStatus, Scraper};
