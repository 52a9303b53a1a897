//! Per-device, group-keyed TTL cache.
//!
//! Grounded in `hlapi/devices/AbstractDevice.py`'s `data` dict and its
//! `_group_is_fresh`/`invalidate` helpers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec::Value;

/// `-1` cache_ttl means the group never expires.
pub const PERMANENT: i64 = -1;

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GroupEntry {
    timestamp: i64,
    values: HashMap<String, Value>,
}

/// A device's cached register groups. Serializes directly into the
/// persistence format's per-device `data` field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cache {
    groups: HashMap<String, GroupEntry>,
}

impl Cache {
    pub fn new() -> Self {
        Cache::default()
    }

    /// The `identification` group is pinned fresh forever, regardless of
    /// the device's configured TTL.
    fn is_fresh(&self, group: &str, ttl: i64) -> bool {
        let Some(entry) = self.groups.get(group) else {
            return false;
        };
        if group == "identification" || ttl == PERMANENT {
            return true;
        }
        now_secs() - entry.timestamp < ttl
    }

    /// Look up a single mnemonic within a group, only if the group entry
    /// is still fresh.
    pub fn get(&self, group: &str, mnemonic: &str, ttl: i64) -> Option<&Value> {
        if !self.is_fresh(group, ttl) {
            return None;
        }
        self.groups.get(group)?.values.get(mnemonic)
    }

    /// Replace a group's cached contents wholesale, stamping the current
    /// time (a fresh group read).
    pub fn store_group(&mut self, group: &str, values: HashMap<String, Value>) {
        self.groups.insert(
            group.to_string(),
            GroupEntry {
                timestamp: now_secs(),
                values,
            },
        );
    }

    /// Merge one freshly-read mnemonic into a group entry without
    /// disturbing the others (used by the cache's single-register
    /// read fallback).
    pub fn store_one(&mut self, group: &str, mnemonic: &str, value: Value) {
        let entry = self.groups.entry(group.to_string()).or_insert_with(|| GroupEntry {
            timestamp: now_secs(),
            values: HashMap::new(),
        });
        entry.timestamp = now_secs();
        entry.values.insert(mnemonic.to_string(), value);
    }

    /// A write invalidates only the written mnemonic within its group,
    /// not the whole group.
    pub fn invalidate_mnemonic(&mut self, group: &str, mnemonic: &str) {
        if let Some(entry) = self.groups.get_mut(group) {
            entry.values.remove(mnemonic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_group_serves_without_expiring() {
        let mut cache = Cache::new();
        let mut values = HashMap::new();
        values.insert("device_type".to_string(), Value::Int(1));
        cache.store_group("identification", values);
        assert!(cache.get("identification", "device_type", 5).is_some());
    }

    #[test]
    fn stale_group_expires_by_ttl() {
        let mut cache = Cache::new();
        let mut values = HashMap::new();
        values.insert("num_outlets".to_string(), Value::Int(8));
        cache.store_group("configuration", values);
        assert!(cache.get("configuration", "num_outlets", 0).is_none());
    }

    #[test]
    fn permanent_ttl_never_expires() {
        let mut cache = Cache::new();
        let mut values = HashMap::new();
        values.insert("num_outlets".to_string(), Value::Int(8));
        cache.store_group("configuration", values);
        assert!(cache.get("configuration", "num_outlets", PERMANENT).is_some());
    }

    #[test]
    fn write_invalidates_only_its_mnemonic() {
        let mut cache = Cache::new();
        let mut values = HashMap::new();
        values.insert("num_outlets".to_string(), Value::Int(8));
        values.insert("num_phases".to_string(), Value::Int(1));
        cache.store_group("configuration", values);
        cache.invalidate_mnemonic("configuration", "num_outlets");
        assert!(cache.get("configuration", "num_outlets", PERMANENT).is_none());
        assert!(cache.get("configuration", "num_phases", PERMANENT).is_some());
    }
}
