//! Bulk read/write: fan devices out across interfaces, serialize
//! operations within each interface's shared databus.
//!
//! Grounded in `hlapi/DeviceManager.py`'s `readAll`/`writeAll`, which
//! bundle devices by owning Communicator and run one worker per bundle.

use std::collections::HashMap;
use std::sync::Arc;

use crate::codec::Value;
use crate::communicator::Communicator;
use crate::device::Device;
use crate::progress::ProgressNode;
use crate::registers::{table, RegisterDescriptor};

/// One bundle: every device reachable through the same Communicator
/// (same interface IP), serialized because the databus behind it admits
/// only one in-flight transaction.
pub struct Bundle {
    pub communicator: Arc<Communicator>,
    pub devices: Vec<Device>,
}

/// A bulk read's per-device outcome: the requested mnemonics' values, or
/// the fact that the read failed outright.
pub enum ReadOutcome {
    Data(HashMap<String, Value>),
    Failed,
}

/// Read `mnemonics` from every device across every bundle. Devices
/// within a bundle are visited serially by one worker; bundles run
/// concurrently. Returns a `uid -> (device, outcome)` map.
pub async fn read_all(
    bundles: Vec<Bundle>,
    mnemonics: &[String],
    progress: &Arc<ProgressNode>,
) -> HashMap<String, (Device, ReadOutcome)> {
    progress.start();
    progress.set_target(bundles.iter().map(|b| b.devices.len() as i64).sum());

    let descs: Vec<_> = mnemonics.iter().filter_map(|m| table().lookup(m)).collect();
    let mut handles = Vec::with_capacity(bundles.len());
    for bundle in bundles {
        let descs = descs.clone();
        let progress = progress.clone();
        handles.push(tokio::spawn(read_bundle(bundle.communicator, bundle.devices, descs, progress)));
    }

    let mut results = HashMap::new();
    for handle in handles {
        if let Ok(bundle_results) = handle.await {
            results.extend(bundle_results);
        }
    }
    progress.finish();
    results
}

async fn read_bundle(
    comm: Arc<Communicator>,
    devices: Vec<Device>,
    descs: Vec<&'static RegisterDescriptor>,
    progress: Arc<ProgressNode>,
) -> HashMap<String, (Device, ReadOutcome)> {
    let mut out = HashMap::new();
    for device in devices {
        if !progress.is_running() {
            break;
        }
        let Some(uid) = device.uid() else { continue };
        let outcome = match comm.read_group(&device, &descs, "bulk").await {
            Ok(values) => ReadOutcome::Data(values),
            Err(_) => ReadOutcome::Failed,
        };
        progress.add_progress(1);
        out.insert(uid, (device, outcome));
    }
    out
}

/// Write `data` (`uid -> {mnemonic -> value}`) across every bundle.
/// Returns a `uid -> {mnemonic -> succeeded}` map. A unit-address change
/// within the batch (a successful `idaddr` write) re-keys that device's
/// result from its pre-write uid to its post-write uid.
pub async fn write_all(
    bundles: Vec<Bundle>,
    data: Arc<HashMap<String, HashMap<String, Value>>>,
    progress: &Arc<ProgressNode>,
) -> HashMap<String, HashMap<String, bool>> {
    progress.start();
    progress.set_target(bundles.iter().map(|b| b.devices.len() as i64).sum());

    let mut handles = Vec::with_capacity(bundles.len());
    for bundle in bundles {
        let data = data.clone();
        let progress = progress.clone();
        handles.push(tokio::spawn(write_bundle(bundle.communicator, bundle.devices, data, progress)));
    }

    let mut results = HashMap::new();
    for handle in handles {
        if let Ok(bundle_results) = handle.await {
            results.extend(bundle_results);
        }
    }
    progress.finish();
    results
}

async fn write_bundle(
    comm: Arc<Communicator>,
    devices: Vec<Device>,
    data: Arc<HashMap<String, HashMap<String, Value>>>,
    progress: Arc<ProgressNode>,
) -> HashMap<String, HashMap<String, bool>> {
    let mut results = HashMap::new();
    for mut device in devices {
        if !progress.is_running() {
            break;
        }
        let Some(pre_write_uid) = device.uid() else { continue };
        let Some(fields) = data.get(&pre_write_uid) else { continue };

        let descs: Vec<_> = fields.keys().filter_map(|m| table().lookup(m.as_str())).collect();
        let mut status: HashMap<String, bool> = descs.iter().map(|d| (d.mnemonic.to_string(), true)).collect();
        comm.write_group(&mut device, &descs, fields, &mut status).await;
        progress.add_progress(1);

        if status.get("idaddr").copied().unwrap_or(false) {
            if let Some(Value::Int(new_unit)) = fields.get("idaddr") {
                device.unit_address = Some(*new_unit as u16);
            }
        }
        let result_uid = device.uid().unwrap_or(pre_write_uid);
        results.insert(result_uid, status);
    }
    results
}
