//! Typed (de)serialization of register payloads, per `RegisterDescriptor::data_type`.
//!
//! Grounded in `hlapi/communication/IPAPIProtocol.py`'s per-type decode/encode
//! helpers and `hlapi/spdm/RegisterHelper.py::checkWriteInput`/`formatData`.

use crate::error::{FleetError, Result};
use crate::registers::{DataType, RegisterDescriptor};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::net::Ipv4Addr;

/// A decoded register value. Multi-repeat registers decode to `List`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(u64),
    Ascii(String),
    Ipv4(Ipv4Addr),
    Ipv6(String),
    Fd(f64),
    List(Vec<Value>),
}

impl Value {
    pub fn as_int(&self) -> Option<u64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Ascii(s) => Some(s),
            Value::Ipv6(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_fd(&self) -> Option<f64> {
        match self {
            Value::Fd(v) => Some(*v),
            _ => None,
        }
    }
}

/// Decode `length` bytes per the descriptor's type into a single repeat's
/// value. `raw` must be exactly `descriptor.length` bytes.
pub fn decode_one(descriptor: &RegisterDescriptor, raw: &[u8]) -> Result<Value> {
    if raw.len() != descriptor.length as usize {
        return Err(FleetError::Codec(format!(
            "{}: expected {} bytes, got {}",
            descriptor.mnemonic,
            descriptor.length,
            raw.len()
        )));
    }
    match descriptor.data_type {
        DataType::Int => decode_int(raw),
        DataType::Ascii => Ok(Value::Ascii(decode_ascii(raw))),
        DataType::Ipv4 => decode_ipv4(raw),
        DataType::Ipv6 => Ok(Value::Ipv6(decode_ipv6_string(raw))),
        DataType::Fd => decode_fd(raw),
    }
}

/// Decode a full register's bytes into a `Value`, `List` for
/// `effective_repeats() > 1`. An extended register's two layers arrive
/// pre-concatenated by the transport, so the effective repeat count
/// (doubled for extension) governs the chunking, not the base `repeats`.
pub fn decode(descriptor: &RegisterDescriptor, raw: &[u8]) -> Result<Value> {
    let repeats = descriptor.effective_repeats() as usize;
    if repeats <= 1 {
        return decode_one(descriptor, raw);
    }
    let width = descriptor.length as usize;
    if raw.len() != width * repeats {
        return Err(FleetError::Codec(format!(
            "{}: expected {} bytes for {} repeats, got {}",
            descriptor.mnemonic,
            width * repeats,
            repeats,
            raw.len()
        )));
    }
    let values = raw
        .chunks(width)
        .map(|chunk| decode_one(descriptor, chunk))
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::List(values))
}

fn decode_int(raw: &[u8]) -> Result<Value> {
    let v = match raw.len() {
        1 => raw[0] as u64,
        2 => u16::from_le_bytes([raw[0], raw[1]]) as u64,
        3 => u32::from_le_bytes([raw[0], raw[1], raw[2], 0]) as u64,
        4 => u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as u64,
        6 => {
            return Ok(Value::Ascii(format!(
                "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                raw[0], raw[1], raw[2], raw[3], raw[4], raw[5]
            )))
        }
        n => return Err(FleetError::Codec(format!("unsupported int width {n}"))),
    };
    Ok(Value::Int(v))
}

fn decode_ascii(raw: &[u8]) -> String {
    let nul_pos = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    raw[..nul_pos]
        .iter()
        .copied()
        .filter(|&b| !((0x00..=0x1F).contains(&b) || (0x7F..=0x9F).contains(&b)))
        .map(|b| b as char)
        .collect()
}

fn decode_ipv4(raw: &[u8]) -> Result<Value> {
    if raw.len() != 4 {
        return Err(FleetError::Codec("ipv4 requires 4 bytes".into()));
    }
    Ok(Value::Ipv4(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3])))
}

fn decode_ipv6_string(raw: &[u8]) -> String {
    let mut s = String::new();
    for chunk in raw.chunks(2) {
        if !s.is_empty() {
            s.push(':');
        }
        let word = if chunk.len() == 2 {
            u16::from_be_bytes([chunk[0], chunk[1]])
        } else {
            chunk[0] as u16
        };
        let _ = write!(s, "{word:x}");
    }
    s
}

/// Fixed-point decimal decode: raw ≤32767 → raw/100, else
/// (raw−32767)/10.
fn decode_fd(raw: &[u8]) -> Result<Value> {
    if raw.len() != 2 {
        return Err(FleetError::Codec("fd requires 2 bytes".into()));
    }
    let raw_val = u16::from_le_bytes([raw[0], raw[1]]);
    let decoded = if raw_val <= 32767 {
        raw_val as f64 / 100.0
    } else {
        (raw_val as f64 - 32767.0) / 10.0
    };
    Ok(Value::Fd(decoded))
}

/// Encode a single repeat's value into exactly `descriptor.length` bytes.
pub fn encode_one(descriptor: &RegisterDescriptor, value: &Value) -> Result<Vec<u8>> {
    match (descriptor.data_type, value) {
        (DataType::Int, Value::Int(v)) => encode_int(descriptor, *v),
        (DataType::Int, Value::Ascii(mac)) => encode_mac(descriptor, mac),
        (DataType::Ascii, Value::Ascii(s)) => encode_ascii(descriptor, s),
        (DataType::Ipv4, Value::Ascii(s)) => encode_ipv4(s),
        (DataType::Ipv4, Value::Ipv4(ip)) => Ok(ip.octets().to_vec()),
        (DataType::Ipv6, Value::Ascii(s)) | (DataType::Ipv6, Value::Ipv6(s)) => {
            encode_ipv6_string(descriptor, s)
        }
        (DataType::Fd, Value::Fd(v)) => encode_fd(*v),
        _ => Err(FleetError::Codec(format!(
            "{}: value does not match register type",
            descriptor.mnemonic
        ))),
    }
}

/// Encode a full register value (list for `effective_repeats() > 1`) into
/// the concatenated wire bytes, the inverse of [`decode`].
pub fn encode(descriptor: &RegisterDescriptor, value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::List(items) => {
            let expected = descriptor.effective_repeats() as usize;
            if items.len() != expected {
                return Err(FleetError::Codec(format!(
                    "{}: invalid repeat length ({} expected, {} given)",
                    descriptor.mnemonic,
                    expected,
                    items.len()
                )));
            }
            let mut out = Vec::with_capacity(descriptor.length as usize * items.len());
            for item in items {
                out.extend(encode_one(descriptor, item)?);
            }
            Ok(out)
        }
        single => encode_one(descriptor, single),
    }
}

fn encode_int(descriptor: &RegisterDescriptor, v: u64) -> Result<Vec<u8>> {
    let max = int_size_to_max(descriptor.length);
    if v > max {
        return Err(FleetError::Codec(format!(
            "{}: value {} exceeds max {} for {}-byte register",
            descriptor.mnemonic, v, max, descriptor.length
        )));
    }
    Ok(match descriptor.length {
        1 => vec![v as u8],
        2 => (v as u16).to_le_bytes().to_vec(),
        3 => {
            let b = (v as u32).to_le_bytes();
            vec![b[0], b[1], b[2]]
        }
        4 => (v as u32).to_le_bytes().to_vec(),
        n => return Err(FleetError::Codec(format!("unsupported int width {n}"))),
    })
}

fn int_size_to_max(length: u16) -> u64 {
    match length {
        1 => 255,
        2 => 65_535,
        3 => 16_777_215,
        4 => 4_294_967_295,
        _ => 0,
    }
}

fn encode_mac(descriptor: &RegisterDescriptor, mac: &str) -> Result<Vec<u8>> {
    if descriptor.length != 6 {
        return Err(FleetError::Codec("mac requires a 6-byte register".into()));
    }
    let parts: Vec<&str> = mac.split(':').collect();
    if parts.len() != 6 {
        return Err(FleetError::Codec(format!("malformed mac address: {mac}")));
    }
    let mut out = Vec::with_capacity(6);
    for p in parts {
        let byte = u8::from_str_radix(p, 16)
            .map_err(|_| FleetError::Codec(format!("malformed mac address: {mac}")))?;
        out.push(byte);
    }
    Ok(out)
}

/// ASCII writes longer than the register length fail before encoding;
/// shorter strings are NUL-padded to `length`.
fn encode_ascii(descriptor: &RegisterDescriptor, s: &str) -> Result<Vec<u8>> {
    if s.len() > descriptor.length as usize {
        return Err(FleetError::Codec(format!(
            "{}: ascii value length {} exceeds register length {}",
            descriptor.mnemonic,
            s.len(),
            descriptor.length
        )));
    }
    let mut out = s.as_bytes().to_vec();
    out.resize(descriptor.length as usize, 0);
    Ok(out)
}

fn encode_ipv4(s: &str) -> Result<Vec<u8>> {
    let ip: Ipv4Addr = s
        .parse()
        .map_err(|_| FleetError::Codec(format!("malformed ipv4 address: {s}")))?;
    Ok(ip.octets().to_vec())
}

fn encode_ipv6_string(descriptor: &RegisterDescriptor, s: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(descriptor.length as usize);
    for group in s.split(':') {
        let word = u16::from_str_radix(group, 16)
            .map_err(|_| FleetError::Codec(format!("malformed ipv6 group: {group}")))?;
        out.extend(word.to_be_bytes());
    }
    if out.len() != descriptor.length as usize {
        return Err(FleetError::Codec(format!(
            "ipv6 value does not fill {} bytes",
            descriptor.length
        )));
    }
    Ok(out)
}

/// FD encode: inverts the decode ranges, rounded by +0.5.
fn encode_fd(v: f64) -> Result<Vec<u8>> {
    if !(0.0..=3276.8).contains(&v) {
        return Err(FleetError::Codec(format!(
            "fd value {v} out of range [0, 3276.8]"
        )));
    }
    let raw = if v <= 327.67 {
        (v * 100.0 + 0.5) as u16
    } else {
        (v * 10.0 + 32767.0 + 0.5) as u16
    };
    Ok(raw.to_le_bytes().to_vec())
}
