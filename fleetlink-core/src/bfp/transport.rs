//! BFP transport: owns the TCP socket to one device, reassembles the
//! encrypted envelope stream into frames, and exposes the register-level
//! register-level operations BFP exposes.
//!
//! Grounded in `hlapi/communication/IPAPIProtocol.py`'s socket handling
//! (`_connect`, `_receive`, `readRegister`/`writeRegister`/`readGroup`/
//! `writeGroup`/`scan`/`setUnitAddress`).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::buffer::CarryBuffer;
use super::envelope::encrypt;
use super::frame::{Body, Frame};
use super::reassembly::extract_frames;
use crate::codec;
use crate::error::{FleetError, Result};
use crate::registers::RegisterDescriptor;

/// Per-transport tunables, sourced from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct BfpConfig {
    pub port: u16,
    pub timeout: Duration,
    pub yield_interval: Duration,
    pub scan_timeout: Duration,
}

/// One entry in a databus scan result: a live unit address, or the
/// hardware id of a unit that collided with another on the same address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEntry {
    Unit(u16),
    HardwareId(String),
    Gateway,
}

struct Inner {
    stream: Option<TcpStream>,
    carry: CarryBuffer,
    last_op_finished: Option<Instant>,
}

/// A BFP connection to one `(ip, port)`. Exclusively owns its socket;
/// dropped along with the owning `Communicator`.
pub struct BfpTransport {
    ip: IpAddr,
    key: [u8; 16],
    config: BfpConfig,
    transaction_id: AtomicU16,
    inner: Mutex<Inner>,
}

impl BfpTransport {
    pub fn new(ip: IpAddr, key: [u8; 16], config: BfpConfig) -> Self {
        BfpTransport {
            ip,
            key,
            config,
            transaction_id: AtomicU16::new(1),
            inner: Mutex::new(Inner {
                stream: None,
                carry: CarryBuffer::new(),
                last_op_finished: None,
            }),
        }
    }

    fn next_transaction_id(&self) -> u16 {
        self.transaction_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Classify a socket error: `true` means a reconnect attempt is
    /// warranted, `false` means the error is terminal.
    fn is_reconnectable(err: &std::io::Error) -> bool {
        use std::io::ErrorKind::*;
        matches!(
            err.kind(),
            ConnectionReset | ConnectionAborted | BrokenPipe | TimedOut | UnexpectedEof | NotConnected
        )
    }

    async fn ensure_connected(&self, inner: &mut Inner, deadline: Instant) -> Result<()> {
        if inner.stream.is_some() {
            return Ok(());
        }
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FleetError::TransportTimeout);
            }
            let addr = (self.ip, self.config.port);
            match tokio::time::timeout(remaining, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    inner.stream = Some(stream);
                    inner.carry = CarryBuffer::new();
                    return Ok(());
                }
                Ok(Err(e)) if Self::is_reconnectable(&e) => {
                    tracing::debug!(%e, ip = %self.ip, "bfp connect failed, retrying");
                    continue;
                }
                Ok(Err(e)) => return Err(FleetError::TransportFatal(e.to_string())),
                Err(_) => return Err(FleetError::TransportTimeout),
            }
        }
    }

    async fn respect_yield(&self, inner: &Inner) {
        if let Some(last) = inner.last_op_finished {
            let elapsed = last.elapsed();
            if elapsed < self.config.yield_interval {
                tokio::time::sleep(self.config.yield_interval - elapsed).await;
            }
        }
    }

    async fn send_envelope(&self, inner: &mut Inner, frame: &Frame, deadline: Instant) -> Result<()> {
        self.respect_yield(inner).await;
        self.ensure_connected(inner, deadline).await?;
        let packed = frame.pack();
        let envelope = encrypt(&self.key, &packed);
        let stream = inner.stream.as_mut().expect("ensured connected");
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, stream.write_all(&envelope)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if Self::is_reconnectable(&e) => {
                inner.stream = None;
                Err(FleetError::TransportFatal(e.to_string()))
            }
            Ok(Err(e)) => Err(FleetError::TransportFatal(e.to_string())),
            Err(_) => Err(FleetError::TransportTimeout),
        }
    }

    /// Read whatever is available, decode envelopes, and return any
    /// fully reassembled frames. Polls with a 100 ms backoff when no
    /// bytes are immediately available, until `deadline`.
    async fn poll_frames(&self, inner: &mut Inner, deadline: Instant) -> Result<Vec<Frame>> {
        let mut buf = [0u8; 4096];
        loop {
            if Instant::now() >= deadline {
                return Err(FleetError::TransportTimeout);
            }
            let stream = inner
                .stream
                .as_mut()
                .ok_or_else(|| FleetError::TransportFatal("not connected".into()))?;

            match tokio::time::timeout(Duration::from_millis(100), stream.read(&mut buf)).await {
                Ok(Ok(0)) => {
                    inner.stream = None;
                    return Err(FleetError::TransportFatal("connection closed".into()));
                }
                Ok(Ok(n)) => {
                    inner.carry.extend(&buf[..n]);
                    let raw_frames = extract_frames(&mut inner.carry, &self.key);
                    if !raw_frames.is_empty() {
                        let frames = raw_frames
                            .iter()
                            .filter_map(|raw| Frame::unpack(raw).ok())
                            .collect();
                        inner.last_op_finished = Some(Instant::now());
                        return Ok(frames);
                    }
                    // Envelope not fully reassembled yet; keep polling.
                }
                Ok(Err(e)) if Self::is_reconnectable(&e) => {
                    inner.stream = None;
                    return Err(FleetError::TransportFatal(e.to_string()));
                }
                Ok(Err(e)) => return Err(FleetError::TransportFatal(e.to_string())),
                Err(_) => {
                    // 100ms backoff elapsed with no data; loop and check the deadline.
                }
            }
        }
    }

    async fn roundtrip(&self, frame: Frame, deadline: Instant) -> Result<Frame> {
        let mut inner = self.inner.lock().await;
        self.send_envelope(&mut inner, &frame, deadline).await?;
        let expected_tid = match &frame.body {
            Body::ReadReq { transaction_id, .. } | Body::WriteReq { transaction_id, .. } => {
                Some(*transaction_id)
            }
            _ => None,
        };
        loop {
            let frames = self.poll_frames(&mut inner, deadline).await?;
            for f in frames {
                let tid = match &f.body {
                    Body::ReadAck { transaction_id, .. }
                    | Body::ReadNak { transaction_id, .. }
                    | Body::WriteAck { transaction_id, .. }
                    | Body::WriteNak { transaction_id, .. } => Some(*transaction_id),
                    _ => None,
                };
                if expected_tid.is_none() || tid == expected_tid {
                    return Ok(f);
                }
                // Response to an earlier, already-abandoned transaction; discard.
            }
        }
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.config.timeout
    }

    async fn read_raw(&self, unit: u16, start: u16, length: u16, layer: u8) -> Result<Vec<u8>> {
        let deadline = self.deadline();
        let tid = self.next_transaction_id();
        let frame = Frame::read_request(unit, tid, start, length, layer);
        let response = self.roundtrip(frame, deadline).await?;
        match response.body {
            Body::ReadAck { data, .. } => Ok(data),
            Body::ReadNak { .. } => Err(FleetError::BusNak),
            _ => Err(FleetError::Framer("unexpected response to read".into())),
        }
    }

    async fn write_raw(&self, unit: u16, start: u16, data: Vec<u8>, layer: u8) -> Result<()> {
        let deadline = self.deadline();
        let tid = self.next_transaction_id();
        let frame = Frame::write_request(unit, tid, start, data, layer);
        let response = self.roundtrip(frame, deadline).await?;
        match response.body {
            Body::WriteAck { .. } => Ok(()),
            Body::WriteNak { .. } => Err(FleetError::BusNak),
            _ => Err(FleetError::Framer("unexpected response to write".into())),
        }
    }

    /// Read one register, merging both extension layers when applicable.
    pub async fn read_register(&self, desc: &RegisterDescriptor, unit: u16) -> Result<Vec<u8>> {
        let width = desc.length as usize * desc.repeats as usize;
        let layer0 = self.read_raw(unit, desc.start, width as u16, 0).await?;
        if !desc.extension {
            return Ok(layer0);
        }
        let layer1 = self.read_raw(unit, desc.start, width as u16, 1).await?;
        let mut merged = layer0;
        merged.extend(layer1);
        Ok(merged)
    }

    /// Write one register, writing both extension layers when applicable.
    /// `data` must already be the full concatenated wire bytes (layer 0
    /// followed by layer 1 for extended registers).
    pub async fn write_register(&self, desc: &RegisterDescriptor, unit: u16, data: Vec<u8>) -> Result<()> {
        let single_width = desc.length as usize * desc.repeats as usize;
        if !desc.extension {
            if data.len() != single_width {
                return Err(FleetError::Codec("write_register: length mismatch".into()));
            }
            return self.write_raw(unit, desc.start, data, 0).await;
        }
        if data.len() != single_width * 2 {
            return Err(FleetError::Codec(
                "write_register: extended register needs both layers".into(),
            ));
        }
        let (layer0, layer1) = data.split_at(single_width);
        self.write_raw(unit, desc.start, layer0.to_vec(), 0).await?;
        self.write_raw(unit, desc.start, layer1.to_vec(), 1).await?;
        Ok(())
    }

    /// Read a contiguous `[start, end)` span covering every descriptor in
    /// `descs`, then split the response into per-descriptor raw slices.
    /// Gaps between non-contiguous descriptors are simply skipped in the
    /// response slicing (the device fills them; we only care about our
    /// descriptors' offsets). Extended, multi-repeat descriptors get a
    /// second layer read merged in.
    pub async fn read_group(
        &self,
        descs: &[&RegisterDescriptor],
        unit: u16,
    ) -> Result<HashMap<String, Vec<u8>>> {
        if descs.is_empty() {
            return Ok(HashMap::new());
        }
        let start = descs.iter().map(|d| d.start).min().unwrap();
        let end = descs
            .iter()
            .map(|d| d.start + d.length * d.repeats)
            .max()
            .unwrap();
        let span_len = end - start;

        let layer0 = self.read_raw(unit, start, span_len, 0).await?;
        let has_extended = descs.iter().any(|d| d.extension);
        let layer1 = if has_extended {
            Some(self.read_raw(unit, start, span_len, 1).await?)
        } else {
            None
        };

        let mut out = HashMap::new();
        for desc in descs {
            let offset = (desc.start - start) as usize;
            let width = (desc.length * desc.repeats) as usize;
            let mut slice = layer0
                .get(offset..offset + width)
                .ok_or_else(|| FleetError::Framer("read_group: response too short".into()))?
                .to_vec();
            if desc.extension {
                if let Some(ref l1) = layer1 {
                    let l1_slice = l1
                        .get(offset..offset + width)
                        .ok_or_else(|| FleetError::Framer("read_group: layer1 too short".into()))?;
                    if desc.repeats > 1 {
                        slice.extend_from_slice(l1_slice);
                    }
                    // Single-repeat extended descriptors are unaffected by layer 1.
                }
            }
            out.insert(desc.mnemonic.to_string(), slice);
        }
        Ok(out)
    }

    /// Per-descriptor single writes; block writes are unsafe because a
    /// single denied register reverts the entire block.
    pub async fn write_group(
        &self,
        descs: &[&RegisterDescriptor],
        unit: u16,
        data: &HashMap<String, Vec<u8>>,
    ) -> HashMap<String, bool> {
        let mut status = HashMap::new();
        for desc in descs {
            let Some(raw) = data.get(desc.mnemonic) else {
                continue;
            };
            let ok = self
                .write_register(desc, unit, raw.clone())
                .await
                .is_ok();
            status.insert(desc.mnemonic.to_string(), ok);
        }
        status
    }

    /// Broadcast the scan command and collect replies for the configured
    /// scan window. A unit address reported twice means a collision: the
    /// earlier entry is rewritten to the reported hardware id, and the
    /// later one is added as a hardware id too, so the caller can
    /// schedule renumbering.
    pub async fn scan(&self) -> Result<Vec<ScanEntry>> {
        let deadline = Instant::now() + self.config.scan_timeout;
        let mut inner = self.inner.lock().await;
        let frame = Frame::scan_request();
        self.send_envelope(&mut inner, &frame, deadline).await?;

        let mut seen_units: HashMap<u16, usize> = HashMap::new();
        let mut entries: Vec<ScanEntry> = Vec::new();
        loop {
            let frames = match self.poll_frames(&mut inner, deadline).await {
                Ok(f) => f,
                Err(FleetError::TransportTimeout) => break,
                Err(e) => return Err(e),
            };
            for f in frames {
                if let Body::ScanAck { unit, hardware_id } = f.body {
                    if unit == 0 {
                        // The gateway itself always answers as unit 0; it
                        // is never a renumberable fleet member.
                        entries.push(ScanEntry::Gateway);
                        continue;
                    }
                    if let Some(&idx) = seen_units.get(&unit) {
                        entries[idx] = ScanEntry::HardwareId(hardware_id.clone());
                        entries.push(ScanEntry::HardwareId(hardware_id));
                    } else {
                        seen_units.insert(unit, entries.len());
                        entries.push(ScanEntry::Unit(unit));
                    }
                }
            }
        }
        Ok(entries)
    }

    /// Change a unit's databus address. A post-write read timeout is
    /// treated as success, matching a firmware quirk where the
    /// acknowledgement sometimes carries the new address and is missed.
    pub async fn set_unit_address(&self, hardware_id: &str, new_addr: u16) -> Result<()> {
        let deadline = self.deadline();
        let frame = Frame::set_address_request(hardware_id.to_string(), new_addr);
        match self.roundtrip(frame, deadline).await {
            Ok(response) => match response.body {
                Body::SetAddressAck { .. } => Ok(()),
                Body::SetAddressNak { .. } => Err(FleetError::BusNak),
                _ => Err(FleetError::Framer("unexpected response to set-address".into())),
            },
            Err(FleetError::TransportTimeout) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn broadcast_display(&self, on: bool) -> Result<()> {
        let deadline = self.deadline();
        let mut inner = self.inner.lock().await;
        let frame = Frame {
            start: super::frame::StartByte::Stx,
            command: if on {
                super::frame::Command::DisplaysOn
            } else {
                super::frame::Command::DisplaysOff
            },
            body: if on { Body::DisplaysOn } else { Body::DisplaysOff },
        };
        self.send_envelope(&mut inner, &frame, deadline).await
    }

    pub async fn set_displays(&self, on: bool) -> Result<()> {
        self.broadcast_display(on).await
    }

    /// Probe a known gateway-only register to classify an unidentified
    /// IP as a Gateway, per discovery stage C.
    pub async fn is_gateway(&self, gateway_only: &RegisterDescriptor) -> bool {
        self.read_register(gateway_only, 0).await.is_ok()
    }
}

/// Decode a raw register byte blob per descriptor, convenience wrapper
/// used by the Communicator once a transport read has returned bytes.
pub fn decode_group(
    descs: &[&RegisterDescriptor],
    raw: &HashMap<String, Vec<u8>>,
) -> Result<HashMap<String, codec::Value>> {
    let mut out = HashMap::new();
    for desc in descs {
        if let Some(bytes) = raw.get(desc.mnemonic) {
            out.insert(desc.mnemonic.to_string(), codec::decode(desc, bytes)?);
        }
    }
    Ok(out)
}
