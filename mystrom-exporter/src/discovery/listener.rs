//! UDP broadcast listener feeding the device table.
//!
//! ```text
//! ┌──────────────┐  DeviceRecord  ┌──────────────┐  upsert  ┌──────────────┐
//! │ receive loop │──────────────> │ bounded queue│────────> │ DeviceTable  │
//! │  (UdpSocket) │  (blocks when  │ update loop  │          │   (RwLock)   │
//! └──────────────┘     full)      └──────────────┘          └──────────────┘
//! ```

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::DiscoveryConfig;

use super::packet::{DeviceRecord, decode_datagram};
use super::table::SharedDeviceTable;

/// Largest datagram read in one call; discovery packets are far smaller.
const MAX_DATAGRAM: usize = 4096;

/// Public address used to pick the outbound interface. Nothing is sent to it.
const OUTBOUND_PROBE: &str = "8.8.8.8:80";

/// Pause after a failed receive so a persistent socket error cannot spin.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Discovery startup errors.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Failed to bind discovery socket to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to determine the exporter's outbound address: {0}")]
    Address(#[source] io::Error),
}

/// Discovery listener that has not been started yet.
pub struct DiscoveryListener {
    config: DiscoveryConfig,
    table: SharedDeviceTable,
}

/// A running discovery listener.
///
/// Dropping the handle closes the shutdown channel, which also ends the tasks
/// and releases the socket. [`DiscoveryHandle::stop`] additionally waits for
/// them to finish.
#[derive(Debug)]
pub struct DiscoveryHandle {
    local_addr: SocketAddr,
    exporter_address: String,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl DiscoveryListener {
    pub fn new(config: DiscoveryConfig, table: SharedDeviceTable) -> Self {
        Self { config, table }
    }

    /// Bind the discovery socket and spawn the receive, update and sweep tasks.
    ///
    /// `listen` is the exporter's HTTP listen address; it determines the
    /// address published in discovery manifests.
    pub async fn start(self, listen: SocketAddr) -> Result<DiscoveryHandle, DiscoveryError> {
        let exporter_address =
            resolve_exporter_address(listen, self.config.advertise_address.as_deref()).await?;

        let socket = UdpSocket::bind(&self.config.bind)
            .await
            .map_err(|source| DiscoveryError::Bind {
                addr: self.config.bind.clone(),
                source,
            })?;
        let local_addr = socket.local_addr().map_err(|source| DiscoveryError::Bind {
            addr: self.config.bind.clone(),
            source,
        })?;

        info!(
            bind = %local_addr,
            exporter = %exporter_address,
            queue_capacity = self.config.queue_capacity,
            "Discovery listener started"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);

        let mut tasks = vec![
            tokio::spawn(receive_loop(socket, tx, shutdown_rx.clone())),
            tokio::spawn(update_loop(self.table.clone(), rx, shutdown_rx.clone())),
        ];

        if let Some(timeout) = self.config.stale_timeout() {
            tasks.push(tokio::spawn(sweep_loop(
                self.table.clone(),
                timeout,
                self.config.sweep_interval(),
                shutdown_rx,
            )));
        }

        Ok(DiscoveryHandle {
            local_addr,
            exporter_address,
            shutdown_tx,
            tasks,
        })
    }
}

impl DiscoveryHandle {
    /// Address the discovery socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address published as the scrape target in manifests.
    pub fn exporter_address(&self) -> &str {
        &self.exporter_address
    }

    /// Stop all discovery tasks and release the socket.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);

        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Discovery task panicked");
            }
        }

        info!("Stopping discovery listener");
    }
}

/// Receive datagrams until shutdown, forwarding decoded records to the queue.
async fn receive_loop(
    socket: UdpSocket,
    tx: mpsc::Sender<DeviceRecord>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, source)) => {
                    let Some(record) = decode_datagram(&buf[..len], source) else {
                        trace!(%source, len, "Ignoring short datagram");
                        continue;
                    };

                    trace!(%source, mac = %record.mac, "Received discovery packet");

                    // Blocks while the queue is full.
                    if tx.send(record).await.is_err() {
                        break;
                    }
                }
                Err(e) => on_receive_error(&e).await,
            },
            _ = shutdown.changed() => break,
        }
    }

    debug!("Discovery receive loop stopped");
}

/// Log a receive error and back off before the next attempt.
///
/// Errors never end discovery; only the shutdown signal does.
async fn on_receive_error(error: &io::Error) {
    warn!(%error, "Discovery receive error");
    tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
}

/// Apply queued records to the table until shutdown.
async fn update_loop(
    table: SharedDeviceTable,
    mut rx: mpsc::Receiver<DeviceRecord>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            record = rx.recv() => {
                let Some(record) = record else { break };
                let mac = record.mac;
                let source_ip = record.source_ip;
                let device_type = record.device_type;

                if table.upsert(record) {
                    info!(%mac, %source_ip, device_type, "Discovered new device");
                } else {
                    debug!(%mac, %source_ip, "Updated device");
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    debug!("Discovery update loop stopped");
}

/// Periodically forget devices that stopped broadcasting.
async fn sweep_loop(
    table: SharedDeviceTable,
    timeout: Duration,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                table.sweep_stale(timeout);
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Address other hosts should use to reach this exporter.
///
/// An explicit `advertise` address wins. Otherwise `listen` is used, with an
/// unspecified host replaced by the preferred outbound address.
pub async fn resolve_exporter_address(
    listen: SocketAddr,
    advertise: Option<&str>,
) -> Result<String, DiscoveryError> {
    if let Some(advertise) = advertise {
        return Ok(advertise.to_string());
    }

    if !listen.ip().is_unspecified() {
        return Ok(listen.to_string());
    }

    let ip = outbound_ip().await.map_err(DiscoveryError::Address)?;
    Ok(SocketAddr::new(ip, listen.port()).to_string())
}

/// Preferred outbound IP of this machine; no connectivity is needed.
async fn outbound_ip() -> io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(OUTBOUND_PROBE).await?;
    Ok(socket.local_addr()?.ip())
}
