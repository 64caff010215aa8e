//! HTTP server for the exporter and device endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::client::DeviceClient;
use crate::config::WebConfig;
use crate::discovery::{SharedDeviceTable, manifest};
use crate::registry;
use crate::scrape::{ScrapeError, Scraper};

/// Discovery data served by `/discover` and `/device_by_mac/{mac}`.
#[derive(Debug, Clone)]
pub struct DiscoveryRoutes {
    pub table: SharedDeviceTable,
    /// Address published as the scrape target in manifests.
    pub exporter_address: String,
}

/// Application state shared across handlers.
struct AppState<C> {
    scraper: Arc<Scraper<C>>,
    discovery: Option<Arc<DiscoveryRoutes>>,
    landing_page: Arc<str>,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            scraper: self.scraper.clone(),
            discovery: self.discovery.clone(),
            landing_page: self.landing_page.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeviceQuery {
    #[serde(default)]
    target: Option<String>,
}

/// Create the HTTP router.
///
/// Discovery routes are only mounted when `discovery` is given.
pub fn create_router<C: DeviceClient>(
    scraper: Arc<Scraper<C>>,
    discovery: Option<DiscoveryRoutes>,
    web: &WebConfig,
) -> Router {
    let has_discovery = discovery.is_some();
    let state = AppState {
        scraper,
        discovery: discovery.map(Arc::new),
        landing_page: landing_page(&web.metrics_path, &web.device_path).into(),
    };

    let mut router = Router::new()
        .route("/", get(landing_handler::<C>))
        .route("/health", get(health_handler))
        .route(&web.metrics_path, get(metrics_handler::<C>))
        .route(&web.device_path, get(device_handler::<C>));

    if has_discovery {
        router = router
            .route("/device_by_mac/:macaddr", get(device_by_mac_handler::<C>))
            .route("/discover", get(discover_handler::<C>));
    }

    router.layer(CorsLayer::permissive()).with_state(state)
}

impl IntoResponse for ScrapeError {
    fn into_response(self) -> Response {
        let status = match self {
            ScrapeError::BadRequest => StatusCode::BAD_REQUEST,
            ScrapeError::Fetch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Scrape `target` and answer with its metrics.
async fn scrape_response<C: DeviceClient>(state: &AppState<C>, target: &str) -> Response {
    let registry = match state.scraper.scrape(target).await {
        Ok(registry) => registry,
        Err(e) => return e.into_response(),
    };

    match registry::render(&registry) {
        Ok(body) => (StatusCode::OK, [(CONTENT_TYPE, registry::CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!(device = target, error = %e, "Failed to encode device metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Handler for the device path (`?target=<address>`).
async fn device_handler<C: DeviceClient>(
    State(state): State<AppState<C>>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    let target = query.target.unwrap_or_default();
    scrape_response(&state, &target).await
}

/// Handler for `/device_by_mac/{macaddr}`.
async fn device_by_mac_handler<C: DeviceClient>(
    State(state): State<AppState<C>>,
    Path(macaddr): Path<String>,
) -> Response {
    let target = state
        .discovery
        .as_ref()
        .and_then(|d| d.table.lookup(&macaddr));

    match target {
        Some(ip) => scrape_response(&state, &ip.to_string()).await,
        None => (
            StatusCode::NOT_FOUND,
            format!("no device discovered with mac address '{}'", macaddr),
        )
            .into_response(),
    }
}

/// Handler for `/discover`.
async fn discover_handler<C: DeviceClient>(State(state): State<AppState<C>>) -> Response {
    let Some(discovery) = state.discovery.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    info!(devices = discovery.table.len(), "Got discover request");

    match manifest::build(&discovery.table, &discovery.exporter_address) {
        Ok(body) => (StatusCode::OK, [(CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to build discovery manifest");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Handler for the exporter's own metrics.
async fn metrics_handler<C: DeviceClient>(State(state): State<AppState<C>>) -> Response {
    let metrics = state.scraper.metrics();
    if let Some(discovery) = &state.discovery {
        metrics.set_discovered_devices(discovery.table.len());
    }

    match metrics.render() {
        Ok(body) => (StatusCode::OK, [(CONTENT_TYPE, registry::CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode exporter metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

async fn landing_handler<C: DeviceClient>(State(state): State<AppState<C>>) -> Html<String> {
    Html(state.landing_page.to_string())
}

fn landing_page(metrics_path: &str, device_path: &str) -> String {
    format!(
        r#"<html>
<head>
	<title>myStrom switch report Exporter</title>
	<style>
		label{{
		display:inline-block;
		width:75px;
		}}
		form label {{
		margin: 10px;
		}}
		form input {{
		margin: 10px;
		}}
	</style>
</head>
<body>
<h1>myStrom Exporter</h1>
<form action="{device_path}">
	<label>Target:</label> <input type="text" name="target" placeholder="X.X.X.X" value="1.2.3.4"><br>
	<input type="submit" value="Submit">
</form>
<p><a href='{metrics_path}'>Metrics</a></p>
</body>
</html>"#
    )
}

/// HTTP server bound to its listen address.
pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    /// Bind `listen_addr` for `router`.
    ///
    /// Fails when the address is unavailable, so callers can abort before
    /// anything else starts.
    pub async fn bind(router: Router, listen_addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", listen_addr, e))?;

        Ok(Self { router, listener })
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "HTTP server listening");
        }

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                // Wait for shutdown signal
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DeviceReport, FetchError};
    use crate::discovery::DeviceTable;
    use crate::discovery::packet::decode_datagram;
    use crate::metrics::ExporterMetrics;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    struct StaticClient;

    impl DeviceClient for StaticClient {
        async fn fetch(&self, target: &str) -> Result<DeviceReport, FetchError> {
            match target {
                "10.0.0.5" => Ok(DeviceReport {
                    power: 7.25,
                    average_power: Some(7.0),
                    relay: true,
                    temperature: Some(23.0),
                }),
                "10.0.0.66" => Err(FetchError::Timeout("deadline has elapsed".into())),
                _ => Err(FetchError::Socket("connection refused".into())),
            }
        }
    }

    fn make_router(discovery: Option<DiscoveryRoutes>) -> Router {
        let scraper = Arc::new(Scraper::new(StaticClient, Arc::new(ExporterMetrics::new())));
        create_router(scraper, discovery, &WebConfig::default())
    }

    fn make_discovery() -> DiscoveryRoutes {
        let table = Arc::new(DeviceTable::new());
        table.upsert(
            decode_datagram(&[1, 2, 3, 4, 5, 6, 2], "10.0.0.5:1234".parse().unwrap()).unwrap(),
        );
        DiscoveryRoutes {
            table,
            exporter_address: "10.0.0.1:9452".to_string(),
        }
    }

    async fn request(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_device_endpoint() {
        let (status, body) = request(make_router(None), "/device?target=10.0.0.5").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("mystrom_power 7.25"));
        assert!(body.contains("mystrom_relay 1"));
    }

    #[tokio::test]
    async fn test_device_endpoint_missing_target() {
        let (status, body) = request(make_router(None), "/device").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "'target' parameter must be specified");

        let (status, _) = request(make_router(None), "/device?target=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_device_endpoint_failure() {
        let (status, body) = request(make_router(None), "/device?target=10.0.0.66").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            "failed to scrape target '10.0.0.66': request timed out: deadline has elapsed"
        );
    }

    #[tokio::test]
    async fn test_metrics_endpoint_counts_scrapes() {
        let router = make_router(None);

        request(router.clone(), "/device?target=10.0.0.5").await;
        request(router.clone(), "/device?target=10.0.0.66").await;
        let (status, body) = request(router, "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(
            "mystrom_exporter_requests_total{target=\"10.0.0.5\",status=\"ok\"} 1"
        ));
        assert!(body.contains(
            "mystrom_exporter_requests_total{target=\"10.0.0.66\",status=\"timeout\"} 1"
        ));
    }

    #[tokio::test]
    async fn test_discovery_routes_absent_when_disabled() {
        let (status, _) = request(make_router(None), "/discover").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = request(make_router(None), "/device_by_mac/01:02:03:04:05:06").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_discover_endpoint() {
        let router = make_router(Some(make_discovery()));
        let (status, body) = request(router, "/discover").await;

        assert_eq!(status, StatusCode::OK);
        let manifest: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(manifest.as_array().unwrap().len(), 1);
        assert_eq!(manifest[0]["targets"][0], "10.0.0.1:9452");
        assert_eq!(manifest[0]["labels"]["instance"], "10.0.0.5");
    }

    #[tokio::test]
    async fn test_device_by_mac() {
        let router = make_router(Some(make_discovery()));

        let (status, body) = request(router.clone(), "/device_by_mac/01:02:03:04:05:06").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("mystrom_power 7.25"));

        let (status, body) = request(router, "/device_by_mac/aa:bb:cc:dd:ee:ff").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("aa:bb:cc:dd:ee:ff"));
    }

    #[tokio::test]
    async fn test_metrics_reports_discovered_devices() {
        let (_, body) = request(make_router(Some(make_discovery())), "/metrics").await;
        assert!(body.contains("mystrom_exporter_discovered_devices 1"));
    }

    #[tokio::test]
    async fn test_landing_page_and_health() {
        let (status, body) = request(make_router(None), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<form action=\"/device\">"));
        assert!(body.contains("href='/metrics'"));

        let (status, body) = request(make_router(None), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "healthy\n");
    }

    #[tokio::test]
    async fn test_bind_fails_on_taken_address() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let result = HttpServer::bind(make_router(None), addr).await;

        let err = result.err().unwrap();
        assert!(err.to_string().starts_with(&format!("Failed to bind to {}", addr)));
    }

    #[tokio::test]
    async fn test_bind_reports_local_addr() {
        let server = HttpServer::bind(make_router(None), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();

        let addr = server.local_addr().unwrap();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_ne!(addr.port(), 0);
    }
}
