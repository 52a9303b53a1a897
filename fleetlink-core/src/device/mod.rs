//! Device handles: the identified fleet members Discovery produces and
//! Bulk R/W operates on.

pub mod variant;

pub use variant::Variant;

use crate::cache::Cache;
use crate::registers::Protocol;

/// One identified device, owned by exactly one fleet.
///
/// `unit_address = None` marks an unidentified interface probe — never a
/// fleet member.
#[derive(Debug, Clone)]
pub struct Device {
    pub ip: String,
    pub unit_address: Option<u16>,
    pub variant: Variant,
    pub first_in_ring: bool,
    pub ring_status: Option<u8>,
    pub cache: Cache,
    pub cache_ttl: i64,
    pub preferred_protocols: Vec<Protocol>,
    /// Factory hardware id, used by `set_unit_address` and round-tripped
    /// through persistence (`hlapi/devices/AbstractDevice.py::chipId`).
    pub chip_id: String,
    /// Opaque device-mode byte, round-tripped but not interpreted here.
    pub mode: u8,
}

impl Device {
    pub fn new(ip: String, unit_address: Option<u16>, variant: Variant, chip_id: String) -> Self {
        let unit_address = if variant.forces_unit_zero() {
            Some(0)
        } else {
            unit_address
        };
        Device {
            ip,
            unit_address,
            variant,
            first_in_ring: false,
            ring_status: None,
            cache: Cache::new(),
            cache_ttl: 60,
            preferred_protocols: variant.preferred_order().to_vec(),
            chip_id,
            mode: 0,
        }
    }

    /// `"<ip>#<unit>"`, the stable key used throughout Bulk R/W and
    /// persistence. Unidentified probes have no uid.
    pub fn uid(&self) -> Option<String> {
        self.unit_address.map(|u| format!("{}#{}", self.ip, u))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_always_gets_unit_zero() {
        let dev = Device::new("10.0.0.1".into(), None, Variant::Gateway, "1-2-3".into());
        assert_eq!(dev.unit_address, Some(0));
    }

    #[test]
    fn uid_format() {
        let dev = Device::new("10.0.0.1".into(), Some(5), Variant::HPdu, "1-2-3".into());
        assert_eq!(dev.uid().as_deref(), Some("10.0.0.1#5"));
    }
}
