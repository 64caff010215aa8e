//! Exporter self metrics served on the metrics path.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::{SystemTime, UNIX_EPOCH};

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use crate::registry::{register_build_info, render};
use crate::scrape::ScrapeStatus;

#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
struct RequestLabels {
    target: String,
    status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
struct TargetLabels {
    target: String,
}

/// Process-wide counters, created once at startup and shared by `Arc`.
#[derive(Debug)]
pub struct ExporterMetrics {
    registry: Registry,
    requests: Family<RequestLabels, Counter>,
    durations: Family<TargetLabels, Counter<f64, AtomicU64>>,
    discovered_devices: Gauge,
    process: ProcessMetrics,
}

/// Create a shareable metrics handle.
pub type SharedMetrics = Arc<ExporterMetrics>;

impl ExporterMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests = Family::<RequestLabels, Counter>::default();
        registry.register(
            "mystrom_exporter_requests",
            "Number of mystrom requests by status and target",
            requests.clone(),
        );

        let durations = Family::<TargetLabels, Counter<f64, AtomicU64>>::default();
        registry.register(
            "mystrom_exporter_request_duration_seconds",
            "Total duration of mystrom successful requests by target in seconds",
            durations.clone(),
        );

        let discovered_devices = Gauge::default();
        registry.register(
            "mystrom_exporter_discovered_devices",
            "Number of devices currently known to the discovery table",
            discovered_devices.clone(),
        );

        register_build_info(&mut registry);
        let process = ProcessMetrics::register(&mut registry);

        Self {
            registry,
            requests,
            durations,
            discovered_devices,
            process,
        }
    }

    /// Count one scrape of `target` that ended with `status`.
    pub fn record_request(&self, target: &str, status: ScrapeStatus) {
        self.requests
            .get_or_create(&RequestLabels {
                target: target.to_string(),
                status: status.as_str().to_string(),
            })
            .inc();
    }

    /// Add the wall-clock time of a successful scrape of `target`.
    pub fn record_duration(&self, target: &str, seconds: f64) {
        self.durations
            .get_or_create(&TargetLabels {
                target: target.to_string(),
            })
            .inc_by(seconds);
    }

    /// Current request count for `(target, status)`.
    pub fn request_count(&self, target: &str, status: ScrapeStatus) -> u64 {
        self.requests
            .get(&RequestLabels {
                target: target.to_string(),
                status: status.as_str().to_string(),
            })
            .map_or(0, |counter| counter.get())
    }

    /// Accumulated successful scrape time for `target` in seconds.
    pub fn duration_total(&self, target: &str) -> f64 {
        self.durations
            .get(&TargetLabels {
                target: target.to_string(),
            })
            .map_or(0.0, |counter| counter.get())
    }

    pub fn set_discovered_devices(&self, count: usize) {
        self.discovered_devices
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Refresh process metrics and render everything in OpenMetrics text format.
    pub fn render(&self) -> Result<String, std::fmt::Error> {
        self.process.refresh();
        render(&self.registry)
    }
}

impl Default for ExporterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Resource usage of the exporter process.
#[derive(Debug)]
struct ProcessMetrics {
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    resident_memory: Gauge,
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    virtual_memory: Gauge,
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    open_fds: Gauge,
}

impl ProcessMetrics {
    fn register(registry: &mut Registry) -> Self {
        let start_time = Gauge::<f64, AtomicU64>::default();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        start_time.set(now);
        registry.register(
            "process_start_time_seconds",
            "Start time of the process since unix epoch in seconds",
            start_time,
        );

        let metrics = Self {
            resident_memory: Gauge::default(),
            virtual_memory: Gauge::default(),
            open_fds: Gauge::default(),
        };

        #[cfg(target_os = "linux")]
        {
            registry.register(
                "process_resident_memory_bytes",
                "Resident memory size in bytes",
                metrics.resident_memory.clone(),
            );
            registry.register(
                "process_virtual_memory_bytes",
                "Virtual memory size in bytes",
                metrics.virtual_memory.clone(),
            );
            registry.register(
                "process_open_fds",
                "Number of open file descriptors",
                metrics.open_fds.clone(),
            );
        }

        metrics
    }

    #[cfg(target_os = "linux")]
    fn refresh(&self) {
        let Ok(me) = procfs::process::Process::myself() else {
            tracing::warn!("Failed to read /proc/self");
            return;
        };

        if let Ok(status) = me.status() {
            if let Some(kib) = status.vmrss {
                self.resident_memory.set(kib_to_bytes(kib));
            }
            if let Some(kib) = status.vmsize {
                self.virtual_memory.set(kib_to_bytes(kib));
            }
        }

        if let Ok(count) = me.fd_count() {
            self.open_fds.set(i64::try_from(count).unwrap_or(i64::MAX));
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn refresh(&self) {}
}

#[cfg(target_os = "linux")]
fn kib_to_bytes(kib: u64) -> i64 {
    i64::try_from(kib.saturating_mul(1024)).unwrap_or(i64::MAX)
}
