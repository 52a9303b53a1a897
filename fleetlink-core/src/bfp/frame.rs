//! BFP frame struct and CRC-16 packing, independent of the encrypted
//! envelope that carries it on the wire.
//!
//! Grounded in `hlapi/communication/IPAPIFramer.py`: `Frame`, field
//! layouts per `(start_byte, command)`, and the CRC-16 checksum.

use crate::error::{FleetError, Result};
use crc::{Algorithm, Crc};

/// CRC-16, polynomial 0x11021, no input/output reflection, initial 0xFFFF.
const SPBUS_CRC: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0x1021,
    init: 0xFFFF,
    refin: false,
    refout: false,
    xorout: 0x0000,
    check: 0x0000,
    residue: 0x0000,
};

pub fn crc16(data: &[u8]) -> u16 {
    let crc = Crc::<u16>::new(&SPBUS_CRC);
    crc.checksum(data)
}

/// Start-of-frame marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartByte {
    Stx,
    Ack,
    Nak,
}

impl StartByte {
    fn to_byte(self) -> u8 {
        match self {
            StartByte::Stx => 0x02,
            StartByte::Ack => 0x06,
            StartByte::Nak => 0x0F,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x02 => Some(StartByte::Stx),
            0x06 => Some(StartByte::Ack),
            0x0F | 0x15 => Some(StartByte::Nak),
            _ => None,
        }
    }
}

/// Frame command byte. The extension layer (0 or 1) is encoded directly in
/// the command byte for read/write/broadcast-write, not in the start byte:
/// `CMD_READ = [1, 2]`, `CMD_WRITE = [16, 17]`, `CMD_BRWRITE = [160, 161]`
/// in `hlapi/communication/IPAPIFramer.py`, one value per layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Read(u8),
    Write(u8),
    SetAddress,
    BroadcastScan,
    BroadcastStatus,
    BroadcastWrite(u8),
    DisplaysOn,
    DisplaysOff,
}

impl Command {
    fn to_byte(self) -> u8 {
        match self {
            Command::Read(0) => 1,
            Command::Read(_) => 2,
            Command::Write(0) => 16,
            Command::Write(_) => 17,
            Command::SetAddress => 32,
            Command::BroadcastScan => 144,
            Command::BroadcastStatus => 145,
            Command::BroadcastWrite(0) => 160,
            Command::BroadcastWrite(_) => 161,
            Command::DisplaysOn => 128,
            Command::DisplaysOff => 129,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Command::Read(0)),
            2 => Some(Command::Read(1)),
            16 => Some(Command::Write(0)),
            17 => Some(Command::Write(1)),
            32 => Some(Command::SetAddress),
            144 => Some(Command::BroadcastScan),
            145 => Some(Command::BroadcastStatus),
            160 => Some(Command::BroadcastWrite(0)),
            161 => Some(Command::BroadcastWrite(1)),
            128 => Some(Command::DisplaysOn),
            129 => Some(Command::DisplaysOff),
            _ => None,
        }
    }
}

/// The command-specific field payload, one variant per layout named in
/// the BFP envelope format.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    ReadReq {
        unit: u16,
        transaction_id: u16,
        register_start: u16,
        register_length: u16,
    },
    ReadAck {
        unit: u16,
        transaction_id: u16,
        register_start: u16,
        register_length: u16,
        data: Vec<u8>,
    },
    ReadNak {
        unit: u16,
        transaction_id: u16,
    },
    WriteReq {
        unit: u16,
        transaction_id: u16,
        register_start: u16,
        register_length: u16,
        data: Vec<u8>,
    },
    WriteAck {
        unit: u16,
        transaction_id: u16,
    },
    WriteNak {
        unit: u16,
        transaction_id: u16,
    },
    SetAddressReq {
        hardware_id: String,
        unit: u16,
    },
    SetAddressAck {
        hardware_id: String,
        unit: u16,
    },
    SetAddressNak {
        hardware_id: String,
        unit: u16,
    },
    ScanReq,
    ScanAck {
        unit: u16,
        hardware_id: String,
    },
    StatusReq,
    StatusAck {
        unit: u16,
        status: [u8; 6],
    },
    BroadcastWrite {
        register_start: u16,
        register_length: u16,
        data: Vec<u8>,
    },
    DisplaysOn,
    DisplaysOff,
}

/// A fully structured BFP frame: start byte, command, and body.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub start: StartByte,
    pub command: Command,
    pub body: Body,
}

impl Frame {
    pub fn read_request(
        unit: u16,
        transaction_id: u16,
        register_start: u16,
        register_length: u16,
        layer: u8,
    ) -> Self {
        Frame {
            start: StartByte::Stx,
            command: Command::Read(layer),
            body: Body::ReadReq {
                unit,
                transaction_id,
                register_start,
                register_length,
            },
        }
    }

    pub fn write_request(
        unit: u16,
        transaction_id: u16,
        register_start: u16,
        data: Vec<u8>,
        layer: u8,
    ) -> Self {
        let register_length = data.len() as u16;
        Frame {
            start: StartByte::Stx,
            command: Command::Write(layer),
            body: Body::WriteReq {
                unit,
                transaction_id,
                register_start,
                register_length,
                data,
            },
        }
    }

    /// The extension layer this frame addresses, for read/write/broadcast-write.
    pub fn layer(&self) -> Option<u8> {
        match self.command {
            Command::Read(l) | Command::Write(l) | Command::BroadcastWrite(l) => Some(l),
            _ => None,
        }
    }

    pub fn set_address_request(hardware_id: String, unit: u16) -> Self {
        Frame {
            start: StartByte::Stx,
            command: Command::SetAddress,
            body: Body::SetAddressReq { hardware_id, unit },
        }
    }

    pub fn scan_request() -> Self {
        Frame {
            start: StartByte::Stx,
            command: Command::BroadcastScan,
            body: Body::ScanReq,
        }
    }

    pub fn status_request() -> Self {
        Frame {
            start: StartByte::Stx,
            command: Command::BroadcastStatus,
            body: Body::StatusReq,
        }
    }

    pub fn broadcast_write(register_start: u16, data: Vec<u8>, layer: u8) -> Self {
        let register_length = data.len() as u16;
        Frame {
            start: StartByte::Stx,
            command: Command::BroadcastWrite(layer),
            body: Body::BroadcastWrite {
                register_start,
                register_length,
                data,
            },
        }
    }

    /// Pack this frame to wire bytes: `STX|CMD|fields|CRC-16|ETX`.
    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.push(self.start.to_byte());
        out.push(self.command.to_byte());
        pack_body(&self.body, &mut out);
        let crc = crc16(&out);
        out.extend(crc.to_le_bytes());
        out.push(0x03); // ETX
        out
    }

    /// Unpack wire bytes into a structured frame, dispatching the field
    /// layout on `(start, command)`.
    pub fn unpack(raw: &[u8]) -> Result<Self> {
        if raw.len() < 4 {
            return Err(FleetError::Framer("frame too short".into()));
        }
        let start = StartByte::from_byte(raw[0])
            .ok_or_else(|| FleetError::Framer("unknown start byte".into()))?;
        let command = Command::from_byte(raw[1])
            .ok_or_else(|| FleetError::Framer("unknown command byte".into()))?;

        let body_end = raw.len() - 3; // trailing CRC(2) + ETX(1)
        let body_bytes = &raw[2..body_end];
        let crc_bytes = &raw[body_end..body_end + 2];
        let end_byte = raw[body_end + 2];
        if end_byte != 0x03 {
            return Err(FleetError::Framer("missing ETX".into()));
        }
        let expected_crc = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
        let actual_crc = crc16(&raw[..body_end]);
        if expected_crc != actual_crc {
            return Err(FleetError::Framer("bad CRC".into()));
        }

        let body = unpack_body(start, command, body_bytes)?;
        Ok(Frame {
            start,
            command,
            body,
        })
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.body {
            Body::ReadReq { unit, transaction_id, register_start, register_length } => {
                write!(f, "READ unit={unit} tid={transaction_id} start={register_start} len={register_length}")
            }
            Body::ReadAck { unit, transaction_id, data, .. } => {
                write!(f, "READ-ACK unit={unit} tid={transaction_id} bytes={}", data.len())
            }
            Body::ReadNak { unit, transaction_id } => {
                write!(f, "READ-NAK unit={unit} tid={transaction_id}")
            }
            Body::WriteReq { unit, transaction_id, register_start, data, .. } => {
                write!(f, "WRITE unit={unit} tid={transaction_id} start={register_start} bytes={}", data.len())
            }
            Body::WriteAck { unit, transaction_id } => {
                write!(f, "WRITE-ACK unit={unit} tid={transaction_id}")
            }
            Body::WriteNak { unit, transaction_id } => {
                write!(f, "WRITE-NAK unit={unit} tid={transaction_id}")
            }
            Body::SetAddressReq { hardware_id, unit } => {
                write!(f, "SET-ADDR-REQ hwid={hardware_id} unit={unit}")
            }
            Body::SetAddressAck { hardware_id, unit } => {
                write!(f, "SET-ADDR-ACK hwid={hardware_id} unit={unit}")
            }
            Body::SetAddressNak { hardware_id, unit } => {
                write!(f, "SET-ADDR-NAK hwid={hardware_id} unit={unit}")
            }
            Body::ScanReq => write!(f, "SCAN-REQ"),
            Body::ScanAck { unit, hardware_id } => write!(f, "SCAN-ACK unit={unit} hwid={hardware_id}"),
            Body::StatusReq => write!(f, "STATUS-REQ"),
            Body::StatusAck { unit, .. } => write!(f, "STATUS-ACK unit={unit}"),
            Body::BroadcastWrite { register_start, data, .. } => {
                write!(f, "BROADCAST-WRITE start={register_start} bytes={}", data.len())
            }
            Body::DisplaysOn => write!(f, "DISPLAYS-ON"),
            Body::DisplaysOff => write!(f, "DISPLAYS-OFF"),
        }
    }
}

fn pack_body(body: &Body, out: &mut Vec<u8>) {
    match body {
        Body::ReadReq {
            unit,
            transaction_id,
            register_start,
            register_length,
        } => {
            out.extend(unit.to_le_bytes());
            out.extend(transaction_id.to_le_bytes());
            out.extend(register_start.to_le_bytes());
            out.extend(register_length.to_le_bytes());
        }
        Body::ReadAck {
            unit,
            transaction_id,
            register_start,
            register_length,
            data,
        } => {
            out.extend(unit.to_le_bytes());
            out.extend(transaction_id.to_le_bytes());
            out.extend(register_start.to_le_bytes());
            out.extend(register_length.to_le_bytes());
            out.extend(data);
        }
        Body::ReadNak {
            unit,
            transaction_id,
        } => {
            out.extend(unit.to_le_bytes());
            out.extend(transaction_id.to_le_bytes());
            out.push(0); // reserved
        }
        Body::WriteReq {
            unit,
            transaction_id,
            register_start,
            register_length,
            data,
        } => {
            out.extend(unit.to_le_bytes());
            out.extend(transaction_id.to_le_bytes());
            out.extend(register_start.to_le_bytes());
            out.extend(register_length.to_le_bytes());
            out.extend(data);
        }
        Body::WriteAck {
            unit,
            transaction_id,
        }
        | Body::WriteNak {
            unit,
            transaction_id,
        } => {
            out.extend(unit.to_le_bytes());
            out.extend(transaction_id.to_le_bytes());
            if matches!(body, Body::WriteNak { .. }) {
                out.push(0);
            }
        }
        Body::SetAddressReq { hardware_id, unit }
        | Body::SetAddressAck { hardware_id, unit }
        | Body::SetAddressNak { hardware_id, unit } => {
            out.extend(pack_hardware_id(hardware_id));
            out.extend(unit.to_le_bytes());
            if matches!(body, Body::SetAddressNak { .. }) {
                out.push(0);
            }
        }
        Body::ScanReq | Body::StatusReq | Body::DisplaysOn | Body::DisplaysOff => {}
        Body::ScanAck { unit, hardware_id } => {
            out.extend(unit.to_le_bytes());
            out.extend(pack_hardware_id(hardware_id));
        }
        Body::StatusAck { unit, status } => {
            out.extend(unit.to_le_bytes());
            out.extend(status);
        }
        Body::BroadcastWrite {
            register_start,
            register_length,
            data,
        } => {
            out.extend(register_start.to_le_bytes());
            out.extend(register_length.to_le_bytes());
            out.extend(data);
        }
    }
}

fn pack_hardware_id(hardware_id: &str) -> [u8; 6] {
    let parts: Vec<u16> = hardware_id
        .split('-')
        .filter_map(|p| p.parse().ok())
        .collect();
    let mut out = [0u8; 6];
    for (i, word) in parts.iter().take(3).enumerate() {
        out[i * 2..i * 2 + 2].copy_from_slice(&word.to_le_bytes());
    }
    out
}

fn unpack_hardware_id(raw: &[u8]) -> String {
    let words: Vec<u16> = raw
        .chunks(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    words
        .iter()
        .map(|w| w.to_string())
        .collect::<Vec<_>>()
        .join("-")
}

fn read_u16(raw: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([raw[offset], raw[offset + 1]])
}

fn unpack_body(start: StartByte, command: Command, raw: &[u8]) -> Result<Body> {
    match (start, command) {
        (StartByte::Stx, Command::Read(_)) => {
            if raw.len() < 8 {
                return Err(FleetError::Framer("short read request".into()));
            }
            Ok(Body::ReadReq {
                unit: read_u16(raw, 0),
                transaction_id: read_u16(raw, 2),
                register_start: read_u16(raw, 4),
                register_length: read_u16(raw, 6),
            })
        }
        (StartByte::Ack, Command::Read(_)) => {
            if raw.len() < 8 {
                return Err(FleetError::Framer("short read ack".into()));
            }
            let register_length = read_u16(raw, 6);
            let data = raw
                .get(8..8 + register_length as usize)
                .ok_or_else(|| FleetError::Framer("truncated read ack data".into()))?
                .to_vec();
            Ok(Body::ReadAck {
                unit: read_u16(raw, 0),
                transaction_id: read_u16(raw, 2),
                register_start: read_u16(raw, 4),
                register_length,
                data,
            })
        }
        (StartByte::Nak, Command::Read(_)) => {
            if raw.len() < 5 {
                return Err(FleetError::Framer("short read nak".into()));
            }
            Ok(Body::ReadNak {
                unit: read_u16(raw, 0),
                transaction_id: read_u16(raw, 2),
            })
        }
        (StartByte::Stx, Command::Write(_)) => {
            if raw.len() < 8 {
                return Err(FleetError::Framer("short write request".into()));
            }
            let register_length = read_u16(raw, 6);
            let data = raw
                .get(8..8 + register_length as usize)
                .ok_or_else(|| FleetError::Framer("truncated write request data".into()))?
                .to_vec();
            Ok(Body::WriteReq {
                unit: read_u16(raw, 0),
                transaction_id: read_u16(raw, 2),
                register_start: read_u16(raw, 4),
                register_length,
                data,
            })
        }
        (StartByte::Ack, Command::Write(_)) => {
            if raw.len() < 4 {
                return Err(FleetError::Framer("short write ack".into()));
            }
            Ok(Body::WriteAck {
                unit: read_u16(raw, 0),
                transaction_id: read_u16(raw, 2),
            })
        }
        (StartByte::Nak, Command::Write(_)) => {
            if raw.len() < 5 {
                return Err(FleetError::Framer("short write nak".into()));
            }
            Ok(Body::WriteNak {
                unit: read_u16(raw, 0),
                transaction_id: read_u16(raw, 2),
            })
        }
        (StartByte::Stx, Command::SetAddress) => {
            if raw.len() < 8 {
                return Err(FleetError::Framer("short set-address request".into()));
            }
            Ok(Body::SetAddressReq {
                hardware_id: unpack_hardware_id(&raw[0..6]),
                unit: read_u16(raw, 6),
            })
        }
        (StartByte::Ack, Command::SetAddress) => {
            if raw.len() < 8 {
                return Err(FleetError::Framer("short set-address ack".into()));
            }
            Ok(Body::SetAddressAck {
                hardware_id: unpack_hardware_id(&raw[0..6]),
                unit: read_u16(raw, 6),
            })
        }
        (StartByte::Nak, Command::SetAddress) => {
            if raw.len() < 9 {
                return Err(FleetError::Framer("short set-address nak".into()));
            }
            Ok(Body::SetAddressNak {
                hardware_id: unpack_hardware_id(&raw[0..6]),
                unit: read_u16(raw, 6),
            })
        }
        (StartByte::Stx, Command::BroadcastScan) => Ok(Body::ScanReq),
        (StartByte::Ack, Command::BroadcastScan) => {
            if raw.len() < 8 {
                return Err(FleetError::Framer("short scan ack".into()));
            }
            Ok(Body::ScanAck {
                unit: read_u16(raw, 0),
                hardware_id: unpack_hardware_id(&raw[2..8]),
            })
        }
        (StartByte::Stx, Command::BroadcastStatus) => Ok(Body::StatusReq),
        (StartByte::Ack, Command::BroadcastStatus) => {
            if raw.len() < 8 {
                return Err(FleetError::Framer("short status ack".into()));
            }
            let mut status = [0u8; 6];
            status.copy_from_slice(&raw[2..8]);
            Ok(Body::StatusAck {
                unit: read_u16(raw, 0),
                status,
            })
        }
        (StartByte::Stx, Command::BroadcastWrite(_)) => {
            if raw.len() < 4 {
                return Err(FleetError::Framer("short broadcast write".into()));
            }
            let register_length = read_u16(raw, 2);
            let data = raw
                .get(4..4 + register_length as usize)
                .ok_or_else(|| FleetError::Framer("truncated broadcast write data".into()))?
                .to_vec();
            Ok(Body::BroadcastWrite {
                register_start: read_u16(raw, 0),
                register_length,
                data,
            })
        }
        (StartByte::Stx, Command::DisplaysOn) => Ok(Body::DisplaysOn),
        (StartByte::Stx, Command::DisplaysOff) => Ok(Body::DisplaysOff),
        _ => Err(FleetError::Framer(format!(
            "unsupported (start, command) combination: {start:?}/{command:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_golden_vector() {
        // b"\x02\x01\x00\x00" with poly 0x11021, no reflect, init 0xFFFF.
        let crc = crc16(b"\x02\x01\x00\x00");
        assert_eq!(crc, 0x5E98);
    }

    #[test]
    fn read_request_roundtrip() {
        let frame = Frame::read_request(3, 42, 0, 16, 0);
        let packed = frame.pack();
        let unpacked = Frame::unpack(&packed).unwrap();
        assert_eq!(frame, unpacked);
    }

    #[test]
    fn write_request_roundtrip_with_data() {
        let frame = Frame::write_request(5, 7, 448, vec![1, 2, 3, 4], 0);
        let packed = frame.pack();
        let unpacked = Frame::unpack(&packed).unwrap();
        assert_eq!(frame, unpacked);
    }

    #[test]
    fn scan_ack_roundtrip() {
        let frame = Frame {
            start: StartByte::Ack,
            command: Command::BroadcastScan,
            body: Body::ScanAck {
                unit: 1,
                hardware_id: "170-187-204".into(),
            },
        };
        let packed = frame.pack();
        let unpacked = Frame::unpack(&packed).unwrap();
        assert_eq!(frame, unpacked);
    }

    #[test]
    fn bad_crc_is_rejected() {
        let frame = Frame::read_request(1, 1, 0, 2, 0);
        let mut packed = frame.pack();
        let last = packed.len() - 2;
        packed[last] ^= 0xFF;
        assert!(Frame::unpack(&packed).is_err());
    }
}
