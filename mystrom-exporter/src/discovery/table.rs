//! Table of discovered devices keyed by hardware address.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use mystrom_common::MacAddress;

use super::packet::DeviceRecord;

/// Thread-safe device table.
///
/// Written by the discovery update loop only; HTTP handlers read snapshots.
#[derive(Debug, Default)]
pub struct DeviceTable {
    devices: RwLock<HashMap<MacAddress, DeviceRecord>>,
}

/// Create a shareable device table handle.
pub type SharedDeviceTable = Arc<DeviceTable>;

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the record for `record.mac`.
    ///
    /// Returns `true` if the device was not known before.
    pub fn upsert(&self, record: DeviceRecord) -> bool {
        self.devices.write().insert(record.mac, record).is_none()
    }

    /// Copy of every record, ordered by hardware address.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> = self.devices.read().values().cloned().collect();
        records.sort_by_key(|r| r.mac);
        records
    }

    /// Record for a hardware address.
    pub fn get(&self, mac: &MacAddress) -> Option<DeviceRecord> {
        self.devices.read().get(mac).cloned()
    }

    /// Source address of the device with hardware address `mac`.
    ///
    /// Unknown and unparsable addresses both yield `None`.
    pub fn lookup(&self, mac: &str) -> Option<IpAddr> {
        let mac: MacAddress = mac.parse().ok()?;
        self.devices.read().get(&mac).map(|r| r.source_ip)
    }

    /// Forget devices not heard from within `timeout`.
    pub fn sweep_stale(&self, timeout: Duration) -> usize {
        let mut devices = self.devices.write();
        let before = devices.len();

        devices.retain(|_, r| r.last_seen.elapsed() <= timeout);

        let removed = before - devices.len();
        if removed > 0 {
            debug!(removed, remaining = devices.len(), "Removed stale devices");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::packet::decode_datagram;
    use std::net::SocketAddr;
    use std::time::Instant;

    fn record(mac: [u8; 6], source: &str, device_type: u8) -> DeviceRecord {
        let source: SocketAddr = source.parse().unwrap();
        let mut data = mac.to_vec();
        data.push(device_type);
        decode_datagram(&data, source).unwrap()
    }

    #[test]
    fn test_upsert_same_record_twice_is_idempotent() {
        let table = DeviceTable::new();
        let rec = record([1, 2, 3, 4, 5, 6], "10.0.0.5:1234", 2);

        assert!(table.upsert(rec.clone()));
        assert!(!table.upsert(rec.clone()));

        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&rec.mac), Some(rec));
    }

    #[test]
    fn test_upsert_last_write_wins() {
        let table = DeviceTable::new();
        table.upsert(record([1, 2, 3, 4, 5, 6], "10.0.0.5:1234", 2));
        table.upsert(record([1, 2, 3, 4, 5, 6], "10.0.0.77:4321", 3));

        assert_eq!(table.len(), 1);
        assert_eq!(
            table.lookup("01:02:03:04:05:06"),
            Some("10.0.0.77".parse().unwrap())
        );
        let stored = table.get(&MacAddress::new([1, 2, 3, 4, 5, 6])).unwrap();
        assert_eq!(stored.source_port, 4321);
        assert_eq!(stored.device_type, 3);
    }

    #[test]
    fn test_lookup_unknown_is_none() {
        let table = DeviceTable::new();
        table.upsert(record([1, 2, 3, 4, 5, 6], "10.0.0.5:1234", 2));

        assert!(table.lookup("aa:bb:cc:dd:ee:ff").is_none());
        assert!(table.lookup("garbage").is_none());
        assert!(table.lookup("").is_none());
    }

    #[test]
    fn test_lookup_accepts_any_spelling() {
        let table = DeviceTable::new();
        table.upsert(record([0xaa, 0xbb, 0xcc, 0, 0, 1], "192.168.1.20:7979", 107));

        let expected: IpAddr = "192.168.1.20".parse().unwrap();
        assert_eq!(table.lookup("aa:bb:cc:00:00:01"), Some(expected));
        assert_eq!(table.lookup("AA-BB-CC-00-00-01"), Some(expected));
    }

    #[test]
    fn test_snapshot_is_ordered_by_mac() {
        let table = DeviceTable::new();
        table.upsert(record([9, 0, 0, 0, 0, 0], "10.0.0.9:1", 1));
        table.upsert(record([1, 0, 0, 0, 0, 0], "10.0.0.1:1", 1));
        table.upsert(record([5, 0, 0, 0, 0, 0], "10.0.0.5:1", 1));

        let macs: Vec<u8> = table.snapshot().iter().map(|r| r.mac.octets()[0]).collect();
        assert_eq!(macs, vec![1, 5, 9]);
    }

    #[test]
    fn test_sweep_stale() {
        let table = DeviceTable::new();

        let mut old = record([1, 1, 1, 1, 1, 1], "10.0.0.1:1", 1);
        old.last_seen = Instant::now() - Duration::from_secs(5);
        table.upsert(old);
        table.upsert(record([2, 2, 2, 2, 2, 2], "10.0.0.2:1", 1));

        assert_eq!(table.sweep_stale(Duration::from_secs(2)), 1);
        assert_eq!(table.len(), 1);
        assert!(table.lookup("02:02:02:02:02:02").is_some());
        assert!(table.lookup("01:01:01:01:01:01").is_none());
    }
}
