//! Stage B: databus scan over one accepted interface IP.
//!
//! Grounded in `hlapi/communication/IPAPIProtocol.py::scan` and the
//! databus-scan loop in `hlapi/DeviceManager.py` that splits the raw scan
//! reply into live units, the gateway sentinel, and renumber candidates.

use crate::bfp::transport::ScanEntry;
use crate::communicator::Communicator;
use crate::error::Result;

/// The classified result of one databus scan.
#[derive(Debug, Default, Clone)]
pub struct DatabusResult {
    pub units: Vec<u16>,
    pub is_gateway: bool,
    /// Hardware ids of units that collided on the same address and need
    /// `set_unit_address` renumbering before they can be read reliably.
    pub renumber: Vec<String>,
}

pub async fn scan_databus(comm: &Communicator) -> Result<DatabusResult> {
    let entries = comm.scan().await?;
    let mut result = DatabusResult::default();
    for entry in entries {
        match entry {
            ScanEntry::Unit(unit) => result.units.push(unit),
            ScanEntry::Gateway => result.is_gateway = true,
            ScanEntry::HardwareId(hardware_id) => result.renumber.push(hardware_id),
        }
    }
    Ok(result)
}
