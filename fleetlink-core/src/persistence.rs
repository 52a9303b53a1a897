//! Fleet persistence: the `[headers, bundles]` JSON save/load format and
//! its MD5 graph-sum comparison.
//!
//! Grounded in `hlapi/DeviceManager.py`'s `save`/`load`: `save()` groups
//! the fleet by interface IP into the `bundles` array; `load()` validates
//! `compat` before touching the live fleet (fail-fast, fleet untouched on
//! mismatch).

use std::collections::HashMap;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::cache::Cache;
use crate::device::{Device, Variant};
use crate::error::{FleetError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Headers {
    compat: u32,
    graph_sum: Option<String>,
}

/// One device's persisted tuple:
/// `[variant_tag, ip, unit, mode, first_in_ring, ring_status, chip_id, data]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeviceTuple(String, String, u16, u8, bool, Option<u8>, String, Cache);

/// A fleet snapshot ready to serialize, or freshly loaded and validated.
#[derive(Debug, Clone)]
pub struct PersistedFleet {
    pub devices: Vec<Device>,
    pub graph_sum: Option<String>,
}

fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// The fleet's topology digest: the sorted uid set joined and hashed.
/// A caller that keeps its own external graph/topology file can MD5 it
/// and compare against this without needing to parse the fleet JSON.
fn compute_graph_sum(devices: &[Device]) -> String {
    let mut uids: Vec<String> = devices.iter().filter_map(|d| d.uid()).collect();
    uids.sort();
    md5_hex(uids.join(",").as_bytes())
}

impl PersistedFleet {
    pub fn from_fleet(devices: Vec<Device>) -> Self {
        let graph_sum = Some(compute_graph_sum(&devices));
        PersistedFleet { devices, graph_sum }
    }

    /// Whether `file_bytes`'s MD5 matches this snapshot's `graph_sum`, so
    /// the caller can skip recomputing a derived artifact it already has
    /// on disk.
    pub fn graph_matches(&self, file_bytes: &[u8]) -> bool {
        self.graph_sum.as_deref() == Some(md5_hex(file_bytes).as_str())
    }

    pub fn to_json(&self, file_compat_nr: u32) -> Result<String> {
        let headers = Headers {
            compat: file_compat_nr,
            graph_sum: self.graph_sum.clone(),
        };

        let mut by_ip: HashMap<String, Vec<DeviceTuple>> = HashMap::new();
        for device in &self.devices {
            let tuple = DeviceTuple(
                device.variant.tag().to_string(),
                device.ip.clone(),
                device.unit_address.unwrap_or(0),
                device.mode,
                device.first_in_ring,
                device.ring_status,
                device.chip_id.clone(),
                device.cache.clone(),
            );
            by_ip.entry(device.ip.clone()).or_default().push(tuple);
        }
        let bundles: Vec<Vec<DeviceTuple>> = by_ip.into_values().collect();

        serde_json::to_string(&(headers, bundles)).map_err(|e| FleetError::Codec(format!("persistence encode: {e}")))
    }

    /// Parse and validate a saved fleet. `compat` is checked before any
    /// device is reconstructed, so a mismatch leaves the caller's live
    /// fleet completely untouched.
    pub fn from_json(text: &str, file_compat_nr: u32) -> Result<Self> {
        let (headers, bundles): (Headers, Vec<Vec<DeviceTuple>>) =
            serde_json::from_str(text).map_err(|e| FleetError::Codec(format!("persistence decode: {e}")))?;

        if headers.compat != file_compat_nr {
            return Err(FleetError::FileCompatError {
                found: headers.compat,
                expected: file_compat_nr,
            });
        }

        let mut devices = Vec::new();
        for bundle in bundles {
            for DeviceTuple(variant_tag, ip, unit, mode, first_in_ring, ring_status, chip_id, data) in bundle {
                let variant = Variant::from_tag(&variant_tag)
                    .ok_or_else(|| FleetError::InvalidInput(format!("unknown variant tag: {variant_tag}")))?;
                let mut device = Device::new(ip, Some(unit), variant, chip_id);
                device.mode = mode;
                device.first_in_ring = first_in_ring;
                device.ring_status = ring_status;
                device.cache = data;
                devices.push(device);
            }
        }

        Ok(PersistedFleet {
            devices,
            graph_sum: headers.graph_sum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;

    fn sample_fleet() -> Vec<Device> {
        let mut dev = Device::new("10.0.0.5".into(), Some(3), Variant::HPdu, "aa:bb".into());
        dev.cache.store_one("identification", "firmware_version", Value::Int(250));
        vec![dev]
    }

    #[test]
    fn round_trips_a_fleet() {
        let saved = PersistedFleet::from_fleet(sample_fleet());
        let json = saved.to_json(1).unwrap();
        let loaded = PersistedFleet::from_json(&json, 1).unwrap();
        assert_eq!(loaded.devices.len(), 1);
        assert_eq!(loaded.devices[0].uid().as_deref(), Some("10.0.0.5#3"));
        assert_eq!(
            loaded.devices[0].cache.get("identification", "firmware_version", crate::cache::PERMANENT),
            Some(&Value::Int(250))
        );
    }

    #[test]
    fn compat_mismatch_fails_without_touching_devices() {
        let saved = PersistedFleet::from_fleet(sample_fleet());
        let json = saved.to_json(1).unwrap();
        let err = PersistedFleet::from_json(&json, 2).unwrap_err();
        assert!(matches!(err, FleetError::FileCompatError { found: 1, expected: 2 }));
    }

    #[test]
    fn graph_sum_matches_the_derived_uid_list() {
        let saved = PersistedFleet::from_fleet(sample_fleet());
        assert!(saved.graph_matches(b"10.0.0.5#3"));
        assert!(!saved.graph_matches(b"something else"));
    }
}
