//! Device variant capability model: per-model protocol preference and
//! register access rules, kept as a tagged enum with a small capability
//! interface rather than a class hierarchy, favoring composition over
//! guidance.
//!
//! Grounded in `hlapi/devices/AbstractDevice.py` and its per-model
//! subclasses' `deviceSpecificRegisterOverrides`/access checks, and the
//! variant table each model's firmware documents.

use crate::registers::{AccessSet, Protocol, RegisterDescriptor};

/// The family of supported devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum Variant {
    CPdu,
    HPdu,
    HPduG3,
    Dpm3,
    Dpm27,
    Dpm27e,
    Gateway,
}

impl Variant {
    /// The JSON tag used in the persistence format.
    pub fn tag(&self) -> &'static str {
        match self {
            Variant::CPdu => "cpdu",
            Variant::HPdu => "hpdu",
            Variant::HPduG3 => "hpdu_g3",
            Variant::Dpm3 => "dpm3",
            Variant::Dpm27 => "dpm27",
            Variant::Dpm27e => "dpm27e",
            Variant::Gateway => "gateway",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "cpdu" => Variant::CPdu,
            "hpdu" => Variant::HPdu,
            "hpdu_g3" => Variant::HPduG3,
            "dpm3" => Variant::Dpm3,
            "dpm27" => Variant::Dpm27,
            "dpm27e" => Variant::Dpm27e,
            "gateway" => Variant::Gateway,
            _ => return None,
        })
    }

    /// Protocol preference order on discovery, before any runtime
    /// demotion the Communicator applies.
    pub fn preferred_order(&self) -> &'static [Protocol] {
        match self {
            Variant::CPdu | Variant::Dpm27 | Variant::Gateway => &[Protocol::Bfp],
            Variant::HPdu | Variant::HPduG3 | Variant::Dpm27e | Variant::Dpm3 => {
                &[Protocol::Hfp, Protocol::Bfp]
            }
        }
    }

    fn is_hfp_only(desc: &RegisterDescriptor) -> bool {
        matches!(desc.readable_by, AccessSet::Protocols([Protocol::Hfp]))
    }

    /// Whether this variant may reach `desc` at all, independent of which
    /// protocol is used — firmware gating and the Gateway's restricted
    /// register set.
    pub fn can_read(&self, desc: &RegisterDescriptor, device_fw: u32) -> bool {
        match self {
            Variant::Gateway => matches!(
                desc.mnemonic,
                "ring_status" | "ring_break_index" | "firmware_version"
            ),
            Variant::CPdu | Variant::Dpm27 => {
                !(desc.added_in_fw > 200 || desc.added_in_fw > device_fw || Self::is_hfp_only(desc))
            }
            Variant::HPdu | Variant::HPduG3 | Variant::Dpm27e | Variant::Dpm3 => {
                desc.added_in_fw <= device_fw
            }
        }
    }

    /// Write access follows the same gating as reads; a register library
    /// with no dedicated write rule inherits the read rule.
    pub fn can_write(&self, desc: &RegisterDescriptor, device_fw: u32) -> bool {
        self.can_read(desc, device_fw)
    }

    /// Unit address is hard-pinned to 0 for gateways.
    pub fn forces_unit_zero(&self) -> bool {
        matches!(self, Variant::Gateway)
    }

    /// DPM27's CT-ratio registers are gated at a higher write level than
    /// the baseline descriptor table states; returns the override when
    /// `mnemonic` names one of them.
    pub fn register_override(&self, mnemonic: &str) -> Option<RegisterDescriptor> {
        if !matches!(self, Variant::Dpm27) {
            return None;
        }
        let base = crate::registers::table().lookup(mnemonic)?;
        if mnemonic == "ct_ratio_l1" || mnemonic == "ct_ratio_l2" {
            let mut overridden = base.clone();
            overridden.write_access_level = crate::registers::WriteAccessLevel::Super;
            Some(overridden)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::table;

    #[test]
    fn cpdu_denies_firmware_gated_register() {
        let desc = table().lookup("hfp_only_diagnostic").unwrap();
        assert!(!Variant::CPdu.can_read(desc, 250));
    }

    #[test]
    fn gateway_restricts_to_three_registers() {
        let allowed = table().lookup("ring_status").unwrap();
        let denied = table().lookup("outlet_names").unwrap();
        assert!(Variant::Gateway.can_read(allowed, 999));
        assert!(!Variant::Gateway.can_read(denied, 999));
    }

    #[test]
    fn hpdu_allows_hfp_only_register_when_fw_matches() {
        let desc = table().lookup("hfp_only_diagnostic").unwrap();
        assert!(Variant::HPdu.can_read(desc, 250));
    }

    #[test]
    fn dpm27_ct_ratio_override_raises_write_level() {
        let overridden = Variant::Dpm27.register_override("ct_ratio_l1").unwrap();
        assert_eq!(overridden.write_access_level, crate::registers::WriteAccessLevel::Super);
    }

    #[test]
    fn preferred_order_matches_variant_table() {
        assert_eq!(Variant::HPdu.preferred_order(), &[Protocol::Hfp, Protocol::Bfp]);
        assert_eq!(Variant::CPdu.preferred_order(), &[Protocol::Bfp]);
    }
}
