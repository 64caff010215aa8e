//! Passive discovery of myStrom devices on the local network segment.
//!
//! - [`packet`] - Broadcast payload decoding
//! - [`table`] - Device table keyed by hardware address
//! - [`manifest`] - Prometheus HTTP service-discovery document
//! - [`listener`] - UDP listener and table update loop

pub mod listener;
pub mod manifest;
pub mod packet;
pub mod table;

pub use listener::{DiscoveryError, DiscoveryHandle, DiscoveryListener};
pub use packet::{DeviceRecord, DiscoveryPacket};
pub use table::{DeviceTable, SharedDeviceTable};
