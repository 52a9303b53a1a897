//! Library configuration, loaded from TOML.
//!
//! Grounded in `huginn-proxy-lib::config`'s `Config` +
//! `load_from_path`/`validate_config` shape.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

/// Per-interface connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub ip: String,
    pub hfp_port: u16,
    pub hfp_user: String,
    pub hfp_pass: String,
    /// 16 ASCII bytes. An interface with a malformed key simply runs
    /// without BFP — this is not a config validation error.
    pub bfp_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bfp_timeout_secs: u64,
    pub hfp_timeout_secs: u64,
    pub bfp_yield_secs: u64,
    pub bfp_port: u16,
    pub scan_timeout_secs: u64,
    pub cache_expire_secs: i64,
    pub file_compat_nr: u32,
    pub downshift_tries: u32,
    pub max_threads: usize,
    /// Named mnemonic lists; caller-level convenience, not consumed by
    /// the core itself.
    #[serde(default)]
    pub presets: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bfp_timeout_secs: 5,
            hfp_timeout_secs: 5,
            bfp_yield_secs: 0,
            bfp_port: 1234,
            scan_timeout_secs: 3,
            cache_expire_secs: 60,
            file_compat_nr: 1,
            downshift_tries: 5,
            max_threads: 8,
            presets: HashMap::new(),
            interfaces: Vec::new(),
        }
    }
}

pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let text = fs::read_to_string(path)
        .map_err(|e| FleetError::Config(format!("failed to read config file: {e}")))?;
    let cfg: Config =
        toml::from_str(&text).map_err(|e| FleetError::Config(format!("failed to parse config: {e}")))?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<()> {
    if cfg.bfp_timeout_secs == 0 || cfg.hfp_timeout_secs == 0 {
        return Err(FleetError::Config("transport timeouts must be nonzero".into()));
    }
    if cfg.scan_timeout_secs == 0 {
        return Err(FleetError::Config("scan_timeout must be nonzero".into()));
    }
    if cfg.downshift_tries == 0 {
        return Err(FleetError::Config("downshift_tries must be nonzero".into()));
    }
    if cfg.max_threads == 0 {
        return Err(FleetError::Config("max_threads must be nonzero".into()));
    }

    let mut seen_ips = std::collections::HashSet::new();
    for iface in &cfg.interfaces {
        if !seen_ips.insert(iface.ip.as_str()) {
            return Err(FleetError::Config(format!(
                "duplicate interface entry for {}",
                iface.ip
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_minimal_valid_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            bfp_timeout_secs = 5
            hfp_timeout_secs = 5
            bfp_yield_secs = 0
            bfp_port = 1234
            scan_timeout_secs = 3
            cache_expire_secs = 60
            file_compat_nr = 1
            downshift_tries = 5
            max_threads = 8
            "#
        )
        .unwrap();
        let cfg = load_from_path(file.path()).unwrap();
        assert_eq!(cfg.bfp_port, 1234);
        assert!(cfg.interfaces.is_empty());
    }

    #[test]
    fn rejects_zero_downshift_tries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            bfp_timeout_secs = 5
            hfp_timeout_secs = 5
            bfp_yield_secs = 0
            bfp_port = 1234
            scan_timeout_secs = 3
            cache_expire_secs = 60
            file_compat_nr = 1
            downshift_tries = 0
            max_threads = 8
            "#
        )
        .unwrap();
        assert!(load_from_path(file.path()).is_err());
    }

    #[test]
    fn rejects_duplicate_interface_ips() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            bfp_timeout_secs = 5
            hfp_timeout_secs = 5
            bfp_yield_secs = 0
            bfp_port = 1234
            scan_timeout_secs = 3
            cache_expire_secs = 60
            file_compat_nr = 1
            downshift_tries = 5
            max_threads = 8

            [[interfaces]]
            ip = "10.0.0.1"
            hfp_port = 80
            hfp_user = "admin"
            hfp_pass = "pw"
            bfp_key = "0123456789abcdef"

            [[interfaces]]
            ip = "10.0.0.1"
            hfp_port = 80
            hfp_user = "admin"
            hfp_pass = "pw"
            bfp_key = "0123456789abcdef"
            "#
        )
        .unwrap();
        assert!(load_from_path(file.path()).is_err());
    }
}
