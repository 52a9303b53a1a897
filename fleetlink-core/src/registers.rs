//! Static register metadata: the process-global table of named, typed
//! register descriptors every transport and device variant consults.

use std::collections::HashMap;
use std::sync::LazyLock;

/// The set of transports (or access classes) a register may be reachable
/// over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Bfp,
    Hfp,
}

/// A register's `readable_by` / `writable_by` set, as spelled in the
/// descriptor table: an explicit protocol list, `All`, the password
/// sentinel `Any` (`readable_by = *`, returns a synthetic empty result
/// instead of denying), or `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessSet {
    Protocols(&'static [Protocol]),
    All,
    Any,
    None,
}

impl AccessSet {
    pub fn allows(&self, protocol: Protocol) -> bool {
        match self {
            AccessSet::Protocols(list) => list.contains(&protocol),
            AccessSet::All => true,
            AccessSet::Any | AccessSet::None => false,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, AccessSet::Any)
    }
}

/// Minimum write-access level required to mutate a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WriteAccessLevel {
    None,
    User,
    Power,
    Admin,
    Super,
    /// `*` in the source table: any authenticated user.
    Any,
}

/// The wire data type used to (de)serialize a register's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Int,
    Ascii,
    Ipv4,
    Ipv6,
    Fd,
}

/// Static, immutable metadata describing one named register.
#[derive(Debug, Clone)]
pub struct RegisterDescriptor {
    pub mnemonic: &'static str,
    pub start: u16,
    pub length: u16,
    pub repeats: u16,
    pub extension: bool,
    pub data_type: DataType,
    pub group: &'static str,
    pub added_in_fw: u32,
    pub readable_by: AccessSet,
    pub writable_by: AccessSet,
    pub write_access_level: WriteAccessLevel,
    pub name: &'static str,
    pub description: &'static str,
    /// Free-text note carried through from the source register table;
    /// not consumed by any operation.
    pub note: Option<&'static str>,
}

impl RegisterDescriptor {
    /// The effective repeat count on the wire: doubled when the register
    /// has an extension layer, since layer-0 and layer-1 are concatenated.
    pub fn effective_repeats(&self) -> u16 {
        if self.extension {
            self.repeats * 2
        } else {
            self.repeats
        }
    }

    /// `[start, end)` span this descriptor's single-layer data occupies.
    pub fn span(&self) -> (u16, u16) {
        (self.start, self.start + self.length * self.repeats)
    }
}

/// The process-global register table: mnemonic and group lookups over
/// the static descriptor list.
pub struct RegisterTable {
    by_mnemonic: HashMap<&'static str, &'static RegisterDescriptor>,
    descriptors: &'static [RegisterDescriptor],
}

impl RegisterTable {
    fn build(descriptors: &'static [RegisterDescriptor]) -> Self {
        let by_mnemonic = descriptors.iter().map(|d| (d.mnemonic, d)).collect();
        RegisterTable {
            by_mnemonic,
            descriptors,
        }
    }

    pub fn lookup(&self, mnemonic: &str) -> Option<&'static RegisterDescriptor> {
        self.by_mnemonic.get(mnemonic).copied()
    }

    pub fn describe(&self, mnemonic: &str) -> Option<&'static RegisterDescriptor> {
        self.lookup(mnemonic)
    }

    /// All descriptors belonging to a named group, in table order.
    pub fn group_members<'a, 'b>(
        &'a self,
        group: &'b str,
    ) -> impl Iterator<Item = &'static RegisterDescriptor> + use<'a, 'b> {
        self.descriptors.iter().filter(move |d| d.group == group)
    }

    pub fn all(&self) -> impl Iterator<Item = &'static RegisterDescriptor> {
        self.descriptors.iter()
    }
}

/// The built-in descriptor table. A real deployment loads this from
/// vendor-supplied register metadata; this repository ships a
/// representative subset used by discovery, identification, and the
/// test suite, following `hlapi/spdm/Registers.py`'s layout.
static DESCRIPTORS: &[RegisterDescriptor] = &[
    RegisterDescriptor {
        mnemonic: "device_type",
        start: 0,
        length: 1,
        repeats: 1,
        extension: false,
        data_type: DataType::Int,
        group: "identification",
        added_in_fw: 0,
        readable_by: AccessSet::All,
        writable_by: AccessSet::None,
        write_access_level: WriteAccessLevel::None,
        name: "Device type",
        description: "Numeric device family identifier",
        note: None,
    },
    RegisterDescriptor {
        mnemonic: "firmware_version",
        start: 1,
        length: 2,
        repeats: 1,
        extension: false,
        data_type: DataType::Int,
        group: "identification",
        added_in_fw: 0,
        readable_by: AccessSet::All,
        writable_by: AccessSet::None,
        write_access_level: WriteAccessLevel::None,
        name: "Firmware version",
        description: "Firmware version as a 3-digit integer",
        note: None,
    },
    RegisterDescriptor {
        mnemonic: "hardware_id",
        start: 3,
        length: 6,
        repeats: 1,
        extension: false,
        data_type: DataType::Int,
        group: "identification",
        added_in_fw: 0,
        readable_by: AccessSet::All,
        writable_by: AccessSet::None,
        write_access_level: WriteAccessLevel::None,
        name: "Hardware id",
        description: "Factory-assigned MAC-style identifier",
        note: None,
    },
    RegisterDescriptor {
        mnemonic: "num_phases",
        start: 9,
        length: 1,
        repeats: 1,
        extension: false,
        data_type: DataType::Int,
        group: "configuration",
        added_in_fw: 0,
        readable_by: AccessSet::All,
        writable_by: AccessSet::None,
        write_access_level: WriteAccessLevel::None,
        name: "Number of phases",
        description: "Used to disambiguate cPDU from DPM27 at firmware <200",
        note: None,
    },
    RegisterDescriptor {
        mnemonic: "num_outlets",
        start: 10,
        length: 1,
        repeats: 1,
        extension: false,
        data_type: DataType::Int,
        group: "configuration",
        added_in_fw: 0,
        readable_by: AccessSet::All,
        writable_by: AccessSet::None,
        write_access_level: WriteAccessLevel::None,
        name: "Number of outlets",
        description: "Used to disambiguate cPDU from DPM27 at firmware <200",
        note: None,
    },
    RegisterDescriptor {
        mnemonic: "ring_status",
        start: 11,
        length: 1,
        repeats: 1,
        extension: false,
        data_type: DataType::Int,
        group: "ring",
        added_in_fw: 0,
        readable_by: AccessSet::Protocols(&[Protocol::Bfp]),
        writable_by: AccessSet::None,
        write_access_level: WriteAccessLevel::None,
        name: "Ring status",
        description: "Gateway ring-topology health",
        note: None,
    },
    RegisterDescriptor {
        mnemonic: "ring_break_index",
        start: 12,
        length: 2,
        repeats: 1,
        extension: false,
        data_type: DataType::Int,
        group: "ring",
        added_in_fw: 0,
        readable_by: AccessSet::Protocols(&[Protocol::Bfp]),
        writable_by: AccessSet::None,
        write_access_level: WriteAccessLevel::None,
        name: "Ring break index",
        description: "Index at which the ring topology is broken, if any",
        note: None,
    },
    RegisterDescriptor {
        mnemonic: "idaddr",
        start: 14,
        length: 2,
        repeats: 1,
        extension: false,
        data_type: DataType::Int,
        group: "identity",
        added_in_fw: 0,
        readable_by: AccessSet::All,
        writable_by: AccessSet::Protocols(&[Protocol::Bfp]),
        write_access_level: WriteAccessLevel::Admin,
        name: "Unit address",
        description: "Databus-local unit address",
        note: None,
    },
    RegisterDescriptor {
        mnemonic: "outlet_names",
        start: 16,
        length: 16,
        repeats: 27,
        extension: false,
        data_type: DataType::Ascii,
        group: "settings",
        added_in_fw: 0,
        readable_by: AccessSet::All,
        writable_by: AccessSet::All,
        write_access_level: WriteAccessLevel::User,
        name: "Outlet names",
        description: "Per-outlet display names",
        note: None,
    },
    RegisterDescriptor {
        mnemonic: "stomct",
        start: 448,
        length: 2,
        repeats: 27,
        extension: true,
        data_type: DataType::Fd,
        group: "settings",
        added_in_fw: 0,
        readable_by: AccessSet::All,
        writable_by: AccessSet::Protocols(&[Protocol::Bfp]),
        write_access_level: WriteAccessLevel::Power,
        name: "Outlet max current threshold",
        description: "Per-outlet overcurrent threshold, extended layer",
        note: None,
    },
    RegisterDescriptor {
        mnemonic: "stomcm",
        start: 556,
        length: 2,
        repeats: 27,
        extension: true,
        data_type: DataType::Fd,
        group: "settings",
        added_in_fw: 0,
        readable_by: AccessSet::All,
        writable_by: AccessSet::Protocols(&[Protocol::Bfp]),
        write_access_level: WriteAccessLevel::Power,
        name: "Outlet max current measured",
        description: "Per-outlet measured max current, extended layer",
        note: None,
    },
    RegisterDescriptor {
        mnemonic: "ct_ratio_l1",
        start: 700,
        length: 2,
        repeats: 1,
        extension: false,
        data_type: DataType::Int,
        group: "settings",
        added_in_fw: 0,
        readable_by: AccessSet::All,
        writable_by: AccessSet::Protocols(&[Protocol::Bfp]),
        write_access_level: WriteAccessLevel::Admin,
        name: "CT ratio phase 1",
        description: "Current-transformer ratio; overridden on DPM27",
        note: None,
    },
    RegisterDescriptor {
        mnemonic: "ct_ratio_l2",
        start: 702,
        length: 2,
        repeats: 1,
        extension: false,
        data_type: DataType::Int,
        group: "settings",
        added_in_fw: 0,
        readable_by: AccessSet::All,
        writable_by: AccessSet::Protocols(&[Protocol::Bfp]),
        write_access_level: WriteAccessLevel::Admin,
        name: "CT ratio phase 2",
        description: "Current-transformer ratio; overridden on DPM27",
        note: None,
    },
    RegisterDescriptor {
        mnemonic: "admin_password",
        start: 900,
        length: 16,
        repeats: 1,
        extension: false,
        data_type: DataType::Ascii,
        group: "credentials",
        added_in_fw: 0,
        readable_by: AccessSet::Any,
        writable_by: AccessSet::All,
        write_access_level: WriteAccessLevel::Admin,
        name: "Admin password",
        description: "Password register; reads return a synthetic empty value",
        note: Some("readable_by = * means reads never touch the wire"),
    },
    RegisterDescriptor {
        mnemonic: "mac_address",
        start: 950,
        length: 6,
        repeats: 1,
        extension: false,
        data_type: DataType::Int,
        group: "network",
        added_in_fw: 0,
        readable_by: AccessSet::All,
        writable_by: AccessSet::None,
        write_access_level: WriteAccessLevel::None,
        name: "MAC address",
        description: "Ethernet MAC address",
        note: None,
    },
    RegisterDescriptor {
        mnemonic: "ip_address",
        start: 960,
        length: 4,
        repeats: 1,
        extension: false,
        data_type: DataType::Ipv4,
        group: "network",
        added_in_fw: 0,
        readable_by: AccessSet::All,
        writable_by: AccessSet::Protocols(&[Protocol::Hfp]),
        write_access_level: WriteAccessLevel::Admin,
        name: "IP address",
        description: "Static IPv4 address",
        note: None,
    },
    RegisterDescriptor {
        mnemonic: "hfp_only_diagnostic",
        start: 970,
        length: 2,
        repeats: 1,
        extension: false,
        data_type: DataType::Int,
        group: "diagnostics",
        added_in_fw: 201,
        readable_by: AccessSet::Protocols(&[Protocol::Hfp]),
        writable_by: AccessSet::None,
        write_access_level: WriteAccessLevel::None,
        name: "HFP-only diagnostic counter",
        description: "Added in firmware 201; denied to cPDU/DPM27 per variant rule",
        note: None,
    },
];

static TABLE: LazyLock<RegisterTable> = LazyLock::new(|| RegisterTable::build(DESCRIPTORS));

/// The process-global register table.
pub fn table() -> &'static RegisterTable {
    &TABLE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_mnemonic() {
        let reg = table().lookup("idaddr").expect("idaddr must exist");
        assert_eq!(reg.group, "identity");
    }

    #[test]
    fn group_members_sorted_by_table_order() {
        let members: Vec<_> = table().group_members("identification").collect();
        assert_eq!(members[0].mnemonic, "device_type");
        assert_eq!(members[1].mnemonic, "firmware_version");
        assert_eq!(members[2].mnemonic, "hardware_id");
    }

    #[test]
    fn password_register_is_any_access() {
        let reg = table().lookup("admin_password").unwrap();
        assert!(reg.readable_by.is_any());
    }

    #[test]
    fn effective_repeats_doubles_for_extension() {
        let reg = table().lookup("stomct").unwrap();
        assert_eq!(reg.effective_repeats(), 54);
    }
}
