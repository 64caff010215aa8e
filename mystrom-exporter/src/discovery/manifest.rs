//! Service-discovery manifest for Prometheus `http_sd_configs`.

use std::collections::BTreeMap;

use serde::Serialize;

use super::packet::DeviceRecord;
use super::table::DeviceTable;

/// One target group of the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetGroup {
    pub targets: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

impl TargetGroup {
    /// Target group scraping `record` through the exporter at `exporter_address`.
    pub fn for_device(record: &DeviceRecord, exporter_address: &str) -> Self {
        let mac = record.mac.to_string();

        let mut labels = BTreeMap::new();
        labels.insert("instance".to_string(), record.source_ip.to_string());
        labels.insert(
            "__metrics_path__".to_string(),
            format!("/device_by_mac/{}", mac),
        );
        labels.insert("__mac_address".to_string(), mac);
        labels.insert("__device_type".to_string(), record.device_type.to_string());

        Self {
            targets: vec![exporter_address.to_string()],
            labels,
        }
    }
}

/// Serialize the current table contents as a JSON manifest.
///
/// An empty table yields `[]`.
pub fn build(table: &DeviceTable, exporter_address: &str) -> Result<Vec<u8>, serde_json::Error> {
    let groups: Vec<TargetGroup> = table
        .snapshot()
        .iter()
        .map(|record| TargetGroup::for_device(record, exporter_address))
        .collect();

    serde_json::to_vec(&groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::packet::decode_datagram;
    use serde_json::Value;

    fn table_with(devices: &[([u8; 6], &str, u8)]) -> DeviceTable {
        let table = DeviceTable::new();
        for (mac, source, device_type) in devices {
            let mut data = mac.to_vec();
            data.push(*device_type);
            table.upsert(decode_datagram(&data, source.parse().unwrap()).unwrap());
        }
        table
    }

    #[test]
    fn test_empty_table_is_empty_array() {
        let body = build(&DeviceTable::new(), "10.0.0.1:9452").unwrap();
        assert_eq!(body, b"[]");
    }

    #[test]
    fn test_one_entry_per_device() {
        let table = table_with(&[
            ([1, 2, 3, 4, 5, 6], "10.0.0.5:1234", 2),
            ([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff], "10.0.0.6:1234", 107),
        ]);

        let body = build(&table, "10.0.0.1:9452").unwrap();
        let manifest: Vec<Value> = serde_json::from_slice(&body).unwrap();

        assert_eq!(manifest.len(), 2);
        for (entry, mac) in manifest.iter().zip(["01:02:03:04:05:06", "aa:bb:cc:dd:ee:ff"]) {
            assert_eq!(entry["targets"], serde_json::json!(["10.0.0.1:9452"]));
            assert_eq!(entry["labels"]["__mac_address"], mac);
            assert_eq!(
                entry["labels"]["__metrics_path__"],
                format!("/device_by_mac/{}", mac)
            );
        }
        assert_eq!(manifest[1]["labels"]["instance"], "10.0.0.6");
        assert_eq!(manifest[1]["labels"]["__device_type"], "107");
    }

    #[test]
    fn test_target_group_labels() {
        let record = decode_datagram(
            &[1, 2, 3, 4, 5, 6, 2],
            "10.0.0.5:1234".parse().unwrap(),
        )
        .unwrap();

        let group = TargetGroup::for_device(&record, "exporter:9452");

        assert_eq!(group.targets, vec!["exporter:9452"]);
        assert_eq!(group.labels["instance"], "10.0.0.5");
        assert_eq!(group.labels["__device_type"], "2");
        assert_eq!(group.labels.len(), 4);
    }
}
