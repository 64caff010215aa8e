//! Per-scrape metric registries built from a device report.
//!
//! Every scrape gets its own [`Registry`], so concurrent scrapes of different
//! targets never share metric state.

use std::sync::atomic::AtomicU64;

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::info::Info;
use prometheus_client::registry::Registry;

use crate::client::DeviceReport;

/// Content type of the OpenMetrics text exposition.
pub const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Build a fresh registry holding the measurements of one device report.
pub fn build(report: &DeviceReport) -> Registry {
    let mut registry = Registry::default();

    let relay: Gauge = Gauge::default();
    relay.set(i64::from(report.relay));
    registry.register(
        "mystrom_relay",
        "Relay state of the switch (1 = on, 0 = off)",
        relay,
    );

    registry.register(
        "mystrom_power",
        "Current power consumption in watts",
        float_gauge(report.power),
    );

    if let Some(average) = report.average_power {
        registry.register(
            "mystrom_average_power",
            "Average power consumption over the last measuring interval in watts",
            float_gauge(average),
        );
    }

    if let Some(temperature) = report.temperature {
        registry.register(
            "mystrom_temperature",
            "Device temperature in degrees celsius",
            float_gauge(temperature),
        );
    }

    register_build_info(&mut registry);
    registry
}

fn float_gauge(value: f64) -> Gauge<f64, AtomicU64> {
    let gauge = Gauge::<f64, AtomicU64>::default();
    gauge.set(value);
    gauge
}

/// Register `mystrom_exporter_build_info` (constant 1, labelled with build metadata).
pub fn register_build_info(registry: &mut Registry) {
    let labels = vec![
        ("version".to_string(), env!("CARGO_PKG_VERSION").to_string()),
        (
            "revision".to_string(),
            option_env!("MYSTROM_EXPORTER_REVISION")
                .unwrap_or("unknown")
                .to_string(),
        ),
        ("os".to_string(), std::env::consts::OS.to_string()),
        ("arch".to_string(), std::env::consts::ARCH.to_string()),
    ];

    registry.register(
        "mystrom_exporter_build",
        "A metric with a constant '1' value labeled by build information",
        Info::new(labels),
    );
}

/// Render a registry in OpenMetrics text format.
pub fn render(registry: &Registry) -> Result<String, std::fmt::Error> {
    let mut body = String::new();
    encode(&mut body, registry)?;
    Ok(body)
}
