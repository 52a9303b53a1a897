//! Stage C: per-unit device identification.
//!
//! Grounded in `hlapi/DeviceManager.py`'s `identifyPoolWorker` (the
//! `(deviceType, firmwareVersion)` classification table that selects
//! among the device classes defined in `hlapi/devices/Devices.py`).

use crate::communicator::Communicator;
use crate::device::{Device, Variant};
use crate::registers::table;

/// The three outcomes Stage C produces for one `(ip, unit)` pair.
pub enum Identification {
    Known(Device),
    Gateway(Device),
    Unknown,
}

fn classify(device_type: u64, firmware: u64, dpm27_by_configuration: bool) -> Variant {
    match device_type {
        0 if firmware < 200 => {
            if dpm27_by_configuration {
                Variant::Dpm27
            } else {
                Variant::CPdu
            }
        }
        0 => Variant::HPdu,
        1 if firmware < 200 => Variant::Dpm27,
        1 => Variant::Dpm3,
        2 => Variant::HPduG3,
        _ => Variant::Dpm27e,
    }
}

/// Identify one unit address on a shared-bus `Communicator`. A dummy
/// non-Gateway probe device is used for the identification read itself:
/// `identification` group members are readable by every variant
/// (`added_in_fw = 0`, `AccessSet::All`), so the probe's assumed variant
/// never affects the outcome.
pub async fn identify_unit(comm: &Communicator, ip: &str, unit: u16) -> Identification {
    let id_descs: Vec<_> = table().group_members("identification").collect();
    let probe = Device::new(ip.to_string(), Some(unit), Variant::HPdu, String::new());

    let values = match comm.read_group(&probe, &id_descs, "identification").await {
        Ok(v) => v,
        Err(_) => return identify_via_gateway_probe(comm, ip, unit).await,
    };

    let Some(device_type) = values.get("device_type").and_then(|v| v.as_int()) else {
        return identify_via_gateway_probe(comm, ip, unit).await;
    };
    let firmware = values.get("firmware_version").and_then(|v| v.as_int()).unwrap_or(0);
    let hardware_id = values
        .get("hardware_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_default();

    let dpm27_by_configuration = if device_type == 0 && firmware < 200 {
        let config_descs: Vec<_> = table().group_members("configuration").collect();
        match comm.read_group(&probe, &config_descs, "configuration").await {
            Ok(config) => {
                let phases = config.get("num_phases").and_then(|v| v.as_int());
                let outlets = config.get("num_outlets").and_then(|v| v.as_int());
                phases == Some(0) && outlets == Some(27)
            }
            Err(_) => false,
        }
    } else {
        false
    };

    let variant = classify(device_type, firmware, dpm27_by_configuration);
    let mut device = Device::new(ip.to_string(), Some(unit), variant, hardware_id);
    device.cache.store_group("identification", values);
    Identification::Known(device)
}

/// On no/timeout identification response, probe a known gateway-only
/// register before giving up and recording the pair as unknown.
async fn identify_via_gateway_probe(comm: &Communicator, ip: &str, unit: u16) -> Identification {
    let _ = unit;
    let Some(bfp) = comm.bfp() else {
        return Identification::Unknown;
    };
    let Some(gateway_only) = table().lookup("ring_status") else {
        return Identification::Unknown;
    };
    if bfp.is_gateway(gateway_only).await {
        Identification::Gateway(Device::new(ip.to_string(), Some(0), Variant::Gateway, String::new()))
    } else {
        Identification::Unknown
    }
}
