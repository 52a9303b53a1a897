//! The dual-protocol Communicator: owns BFP and HFP transports for one
//! `(ip, port-pair)` and multiplexes operations across them with dynamic
//! priority demotion.
//!
//! Grounded in `hlapi/communication/Communicator.py`'s `consecutiveFails`
//! counters, `protocolOrderDownShift`, and per-protocol dispatch loop.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::bfp::transport::{BfpTransport, ScanEntry};
use crate::codec::{self, Value};
use crate::device::Device;
use crate::error::{FleetError, Result};
use crate::hfp::transport::HfpTransport;
use crate::registers::{AccessSet, Protocol, RegisterDescriptor};

/// One transport's demotion bookkeeping.
#[derive(Default)]
struct FailState {
    consecutive_fails: u32,
}

struct Preference {
    order: Vec<Protocol>,
    fails: HashMap<Protocol, FailState>,
}

/// Owns the transports reachable at one IP and iterates them in priority
/// order, downshifting a protocol's priority after repeated failures.
pub struct Communicator {
    bfp: Option<BfpTransport>,
    hfp: Option<HfpTransport>,
    preference: Mutex<Preference>,
    downshift_tries: u32,
}

impl Communicator {
    pub fn new(bfp: Option<BfpTransport>, hfp: Option<HfpTransport>, order: Vec<Protocol>, downshift_tries: u32) -> Self {
        let mut fails = HashMap::new();
        for p in &order {
            fails.insert(*p, FailState::default());
        }
        Communicator {
            bfp,
            hfp,
            preference: Mutex::new(Preference { order, fails }),
            downshift_tries,
        }
    }

    fn current_order(&self) -> Vec<Protocol> {
        self.preference.lock().unwrap().order.clone()
    }

    /// A successful operation resets the protocol's fail counter.
    fn record_success(&self, protocol: Protocol) {
        let mut pref = self.preference.lock().unwrap();
        if let Some(state) = pref.fails.get_mut(&protocol) {
            state.consecutive_fails = 0;
        }
    }

    /// A failed operation increments the counter; exceeding
    /// `downshift_tries` rotates the protocol one position toward the
    /// end of the preference list.
    fn record_failure(&self, protocol: Protocol) {
        let mut pref = self.preference.lock().unwrap();
        let exceeded = {
            let state = pref.fails.entry(protocol).or_default();
            state.consecutive_fails += 1;
            state.consecutive_fails > self.downshift_tries
        };
        if exceeded {
            if let Some(idx) = pref.order.iter().position(|p| *p == protocol) {
                if idx + 1 < pref.order.len() {
                    pref.order.swap(idx, idx + 1);
                }
            }
        }
    }

    fn transport_available(&self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Bfp => self.bfp.is_some(),
            Protocol::Hfp => self.hfp.is_some(),
        }
    }

    /// Resolve the effective descriptor for `mnemonic`: the device
    /// variant's override if one exists, else the global table entry.
    fn resolve_descriptor(device: &Device, mnemonic: &str) -> Result<RegisterDescriptor> {
        if let Some(overridden) = device.variant.register_override(mnemonic) {
            return Ok(overridden);
        }
        crate::registers::table()
            .lookup(mnemonic)
            .cloned()
            .ok_or_else(|| FleetError::InvalidInput(format!("unknown register mnemonic: {mnemonic}")))
    }

    fn device_fw(device: &Device) -> u32 {
        device
            .cache
            .get("identification", "firmware_version", crate::cache::PERMANENT)
            .and_then(|v| v.as_int())
            .map(|v| v as u32)
            .unwrap_or(0)
    }

    /// Reads one mnemonic, consulting the cache first: a fresh group entry
    /// serves without touching the wire; a stale or absent one triggers a
    /// group read that repopulates the whole group, falling back to a
    /// single-register read (and caching just that one mnemonic) if the
    /// group read fails.
    pub async fn read_register(&self, device: &mut Device, mnemonic: &str) -> Result<Value> {
        let desc = Self::resolve_descriptor(device, mnemonic)?;
        if desc.readable_by.is_any() {
            // Password-sentinel registers never touch the wire.
            return Ok(Value::Ascii(String::new()));
        }
        if matches!(desc.readable_by, AccessSet::None) {
            return Err(FleetError::ProtocolDenied(mnemonic.to_string()));
        }
        if !device.variant.can_read(&desc, Self::device_fw(device)) {
            return Err(FleetError::ProtocolDenied(mnemonic.to_string()));
        }

        if let Some(value) = device.cache.get(desc.group, mnemonic, device.cache_ttl) {
            return Ok(value.clone());
        }

        let group_members: Vec<&RegisterDescriptor> = crate::registers::table().group_members(desc.group).collect();
        if !group_members.is_empty() {
            if let Ok(values) = self.read_group(device, &group_members, desc.group).await {
                let hit = values.get(mnemonic).cloned();
                device.cache.store_group(desc.group, values);
                if let Some(value) = hit {
                    return Ok(value);
                }
            }
        }

        // The group read failed, or didn't cover this mnemonic: fall back
        // to a single-register read.
        let value = self.raw_read_register(device, &desc, mnemonic).await?;
        device.cache.store_one(desc.group, mnemonic, value.clone());
        Ok(value)
    }

    async fn raw_read_register(&self, device: &Device, desc: &RegisterDescriptor, mnemonic: &str) -> Result<Value> {
        let unit = device.unit_address.unwrap_or(0);
        let mut last_err = FleetError::ProtocolDenied(mnemonic.to_string());
        for protocol in self.current_order() {
            if !self.transport_available(protocol) || !desc.readable_by.allows(protocol) {
                continue;
            }
            let result = match protocol {
                Protocol::Bfp => {
                    let raw = self.bfp.as_ref().unwrap().read_register(desc, unit).await;
                    raw.and_then(|bytes| codec::decode(desc, &bytes))
                }
                Protocol::Hfp => self.hfp.as_ref().unwrap().read_register(desc, Some(unit)).await,
            };
            match result {
                Ok(value) => {
                    self.record_success(protocol);
                    return Ok(value);
                }
                Err(e) => {
                    self.record_failure(protocol);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Writes one mnemonic and invalidates its cache entry on success, so
    /// the next read of this mnemonic doesn't serve the stale value.
    pub async fn write_register(&self, device: &mut Device, mnemonic: &str, value: &Value) -> Result<()> {
        let desc = Self::resolve_descriptor(device, mnemonic)?;
        if matches!(desc.writable_by, AccessSet::None) {
            return Err(FleetError::ProtocolDenied(mnemonic.to_string()));
        }
        if !device.variant.can_write(&desc, Self::device_fw(device)) {
            return Err(FleetError::ProtocolDenied(mnemonic.to_string()));
        }
        // Validate range/type before dispatch, regardless of which
        // transport ultimately carries the write.
        let raw = codec::encode(&desc, value)?;

        let unit = device.unit_address.unwrap_or(0);
        let mut last_err = FleetError::ProtocolDenied(mnemonic.to_string());
        for protocol in self.current_order() {
            if !self.transport_available(protocol) || !desc.writable_by.allows(protocol) {
                continue;
            }
            let result = match protocol {
                Protocol::Bfp => self.bfp.as_ref().unwrap().write_register(&desc, unit, raw.clone()).await,
                Protocol::Hfp => self.hfp.as_ref().unwrap().write_register(&desc, Some(unit), value).await,
            };
            match result {
                Ok(()) => {
                    self.record_success(protocol);
                    device.cache.invalidate_mnemonic(desc.group, mnemonic);
                    return Ok(());
                }
                Err(e) => {
                    self.record_failure(protocol);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Reads every register in `group` for `device`, via BFP's
    /// contiguous-span read when BFP is preferred, else per-register HFP
    /// reads (HFP has no raw-span concept; `/group/<name>` already
    /// returns the whole set in one request).
    pub async fn read_group(&self, device: &Device, descs: &[&RegisterDescriptor], group: &str) -> Result<HashMap<String, Value>> {
        let unit = device.unit_address.unwrap_or(0);
        let fw = Self::device_fw(device);
        let accessible: Vec<&&RegisterDescriptor> = descs.iter().filter(|d| device.variant.can_read(d, fw)).collect();
        if accessible.is_empty() {
            return Ok(HashMap::new());
        }

        let owned: Vec<&RegisterDescriptor> = accessible.iter().map(|d| **d).collect();
        let mut last_err = FleetError::TransportFatal("no transport available".into());
        for protocol in self.current_order() {
            if !self.transport_available(protocol) {
                continue;
            }
            let result = match protocol {
                Protocol::Bfp => {
                    let raw = self.bfp.as_ref().unwrap().read_group(&owned, unit).await;
                    raw.and_then(|bytes_map| {
                        let mut out = HashMap::new();
                        for desc in &owned {
                            if let Some(bytes) = bytes_map.get(desc.mnemonic) {
                                out.insert(desc.mnemonic.to_string(), codec::decode(desc, bytes)?);
                            }
                        }
                        Ok(out)
                    })
                }
                Protocol::Hfp => self.hfp.as_ref().unwrap().read_group(&owned, group, Some(unit)).await,
            };
            match result {
                Ok(values) => {
                    self.record_success(protocol);
                    return Ok(values);
                }
                Err(e) => {
                    self.record_failure(protocol);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Per-descriptor single writes; `status` is pre-seeded with which
    /// mnemonics should be attempted and is updated in place.
    pub async fn write_group(
        &self,
        device: &mut Device,
        descs: &[&RegisterDescriptor],
        data: &HashMap<String, Value>,
        status: &mut HashMap<String, bool>,
    ) {
        for desc in descs {
            if !status.get(desc.mnemonic).copied().unwrap_or(false) {
                continue;
            }
            let Some(value) = data.get(desc.mnemonic) else {
                status.insert(desc.mnemonic.to_string(), false);
                continue;
            };
            let ok = self.write_register(device, desc.mnemonic, value).await.is_ok();
            status.insert(desc.mnemonic.to_string(), ok);
        }
    }

    /// BFP-only: broadcasts the databus scan. HFP has no bus-scan
    /// concept, so this requires a BFP transport.
    pub async fn scan(&self) -> Result<Vec<ScanEntry>> {
        let bfp = self
            .bfp
            .as_ref()
            .ok_or_else(|| FleetError::TransportFatal("no BFP transport to scan with".into()))?;
        let result = bfp.scan().await;
        match &result {
            Ok(_) => self.record_success(Protocol::Bfp),
            Err(_) => self.record_failure(Protocol::Bfp),
        }
        result
    }

    pub async fn set_unit_address(&self, hardware_id: &str, new_addr: u16) -> Result<()> {
        let bfp = self
            .bfp
            .as_ref()
            .ok_or_else(|| FleetError::TransportFatal("no BFP transport for address change".into()))?;
        bfp.set_unit_address(hardware_id, new_addr).await
    }

    pub fn bfp(&self) -> Option<&BfpTransport> {
        self.bfp.as_ref()
    }

    pub fn hfp(&self) -> Option<&HfpTransport> {
        self.hfp.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_comm(order: Vec<Protocol>, downshift_tries: u32) -> Communicator {
        Communicator::new(None, None, order, downshift_tries)
    }

    #[test]
    fn downshift_after_threshold_exceeded() {
        let comm = make_comm(vec![Protocol::Hfp, Protocol::Bfp], 5);
        for _ in 0..6 {
            comm.record_failure(Protocol::Hfp);
        }
        assert_eq!(comm.current_order(), vec![Protocol::Bfp, Protocol::Hfp]);
    }

    #[test]
    fn success_resets_only_that_protocols_counter() {
        let comm = make_comm(vec![Protocol::Hfp, Protocol::Bfp], 5);
        for _ in 0..6 {
            comm.record_failure(Protocol::Hfp);
        }
        comm.record_success(Protocol::Bfp);
        let pref = comm.preference.lock().unwrap();
        assert_eq!(pref.fails.get(&Protocol::Bfp).unwrap().consecutive_fails, 0);
        assert_eq!(pref.fails.get(&Protocol::Hfp).unwrap().consecutive_fails, 6);
    }

    #[test]
    fn below_threshold_does_not_reorder() {
        let comm = make_comm(vec![Protocol::Hfp, Protocol::Bfp], 5);
        for _ in 0..4 {
            comm.record_failure(Protocol::Hfp);
        }
        assert_eq!(comm.current_order(), vec![Protocol::Hfp, Protocol::Bfp]);
    }

    #[tokio::test]
    async fn fresh_cache_entry_serves_read_register_without_a_transport() {
        // No BFP or HFP transport is configured; if the cache didn't
        // short-circuit the dispatch loop this would return an error
        // instead of the cached value.
        let comm = make_comm(vec![Protocol::Bfp, Protocol::Hfp], 5);
        let mut device = Device::new("10.0.0.9".into(), Some(1), crate::device::Variant::HPdu, "chip".into());
        device.cache.store_group("identification", HashMap::from([("device_type".to_string(), Value::Int(7))]));

        let value = comm.read_register(&mut device, "device_type").await.unwrap();
        assert_eq!(value, Value::Int(7));
    }
}
