//! Discovery pipeline: wildcard network scan (stage A), databus scan
//! (stage B), and per-unit identification (stage C), wired together per
//! `hlapi/DeviceManager.py::discover`.

pub mod databus;
pub mod identify;
pub mod scan;

use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::bfp::envelope::parse_key;
use crate::bfp::transport::{BfpConfig, BfpTransport};
use crate::communicator::Communicator;
use crate::config::{Config, InterfaceConfig};
use crate::device::{Device, Variant};
use crate::hfp::transport::{HfpConfig, HfpTransport};
use crate::progress::ProgressNode;
use crate::registers::{table, Protocol};

use databus::scan_databus;
use identify::Identification;
use scan::{expand_wildcard, probe_host};

/// The three-way outcome callers need from a discovery run: a successfully
/// identified fleet, `(ip, unit)` pairs that couldn't be classified, and
/// hardware ids awaiting `set_unit_address` renumbering.
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    pub fleet: Vec<Device>,
    pub unknown: Vec<(String, u16)>,
    pub renumber: Vec<(String, String)>,
}

/// Build the Communicator for one host, reusing an interface template's
/// credentials. A malformed `bfp_key` disables BFP for that host rather
/// than failing discovery outright.
pub fn build_communicator(cfg: &Config, iface: &InterfaceConfig) -> Communicator {
    let ip = IpAddr::from_str(&iface.ip).unwrap_or(IpAddr::from([0, 0, 0, 0]));
    let bfp = parse_key(&iface.bfp_key).ok().map(|key| {
        BfpTransport::new(
            ip,
            key,
            BfpConfig {
                port: cfg.bfp_port,
                timeout: Duration::from_secs(cfg.bfp_timeout_secs),
                yield_interval: Duration::from_secs(cfg.bfp_yield_secs),
                scan_timeout: Duration::from_secs(cfg.scan_timeout_secs),
            },
        )
    });
    let hfp = Some(HfpTransport::new(
        iface.ip.clone(),
        HfpConfig {
            port: iface.hfp_port,
            username: iface.hfp_user.clone(),
            password: iface.hfp_pass.clone(),
            timeout: Duration::from_secs(cfg.hfp_timeout_secs),
        },
    ));
    let order = if bfp.is_some() {
        vec![Protocol::Bfp, Protocol::Hfp]
    } else {
        vec![Protocol::Hfp]
    };
    Communicator::new(bfp, hfp, order, cfg.downshift_tries)
}

/// Stage A for one configured interface: expand its (possibly wildcard)
/// `ip` expression and probe each candidate, bounded by `max_threads`
/// concurrent probes.
async fn scan_interface_hosts(cfg: &Config, iface: &InterfaceConfig) -> Vec<String> {
    let client = reqwest::Client::new();
    let semaphore = Arc::new(Semaphore::new(cfg.max_threads.max(1)));
    let timeout = Duration::from_secs(cfg.bfp_timeout_secs);
    let candidates = expand_wildcard(&iface.ip);

    let mut handles = Vec::with_capacity(candidates.len());
    for host in candidates {
        let semaphore = semaphore.clone();
        let client = client.clone();
        let bfp_port = cfg.bfp_port;
        let hfp_port = iface.hfp_port;
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let accepted = probe_host(&host, bfp_port, hfp_port, timeout, &client).await;
            (host, accepted)
        }));
    }

    let mut accepted = Vec::new();
    for handle in handles {
        if let Ok((host, ok)) = handle.await {
            if ok {
                accepted.push(host);
            }
        }
    }
    accepted
}

/// Read whatever of the `identification` group a Gateway is allowed to
/// see (just `firmware_version`), tolerating failure — a gateway found
/// via the databus scan's sentinel is recorded even if the follow-up
/// read times out.
async fn build_gateway_device(comm: &Communicator, ip: &str) -> Device {
    let mut device = Device::new(ip.to_string(), Some(0), Variant::Gateway, String::new());
    let id_descs: Vec<_> = table().group_members("identification").collect();
    if let Ok(values) = comm.read_group(&device, &id_descs, "identification").await {
        device.cache.store_group("identification", values);
    }
    device
}

/// Insert or replace a device in the fleet map, honoring the invariant
/// that the same `(ip, unit)` is never instantiated twice: an existing
/// entry's cache is carried over to the replacement and the old instance
/// discarded.
fn upsert_device(fleet: &mut HashMap<String, Device>, mut device: Device) {
    let Some(uid) = device.uid() else { return };
    if let Some(previous) = fleet.remove(&uid) {
        device.cache = previous.cache;
    }
    fleet.insert(uid, device);
}

/// Run the full three-stage pipeline over every configured interface.
pub async fn discover(cfg: &Config, progress: &ProgressNode) -> DiscoveryOutcome {
    progress.start();
    progress.set_target(cfg.interfaces.len().max(1) as i64);

    let mut fleet: HashMap<String, Device> = HashMap::new();
    let mut outcome = DiscoveryOutcome::default();

    for iface in &cfg.interfaces {
        if !progress.is_running() {
            break;
        }

        let hosts = scan_interface_hosts(cfg, iface).await;
        for host in hosts {
            if !progress.is_running() {
                break;
            }

            let mut host_iface = iface.clone();
            host_iface.ip = host.clone();
            let comm = build_communicator(cfg, &host_iface);

            let databus = match scan_databus(&comm).await {
                Ok(d) => d,
                Err(_) => continue,
            };

            for hardware_id in databus.renumber {
                outcome.renumber.push((host.clone(), hardware_id));
            }

            if databus.is_gateway {
                upsert_device(&mut fleet, build_gateway_device(&comm, &host).await);
            }

            for unit in databus.units {
                match identify::identify_unit(&comm, &host, unit).await {
                    Identification::Known(device) | Identification::Gateway(device) => {
                        upsert_device(&mut fleet, device);
                    }
                    Identification::Unknown => outcome.unknown.push((host.clone(), unit)),
                }
            }
        }

        progress.add_progress(1);
    }

    outcome.fleet = fleet.into_values().collect();
    progress.finish();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;

    #[test]
    fn upsert_carries_over_cache_on_reidentification() {
        let mut fleet = HashMap::new();
        let mut first = Device::new("10.0.0.5".into(), Some(3), Variant::HPdu, "aa".into());
        let mut cache = Cache::new();
        cache.store_one("identification", "firmware_version", crate::codec::Value::Int(250));
        first.cache = cache;
        upsert_device(&mut fleet, first);

        let second = Device::new("10.0.0.5".into(), Some(3), Variant::HPdu, "aa".into());
        upsert_device(&mut fleet, second);

        let entry = fleet.get("10.0.0.5#3").unwrap();
        assert_eq!(
            entry.cache.get("identification", "firmware_version", crate::cache::PERMANENT),
            Some(&crate::codec::Value::Int(250))
        );
    }
}
