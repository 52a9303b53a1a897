//! A dedicated carry buffer for envelope reassembly across arbitrary TCP
//! read splits: `peek_tag`, `advance`,
//! `carry_remaining` replace the source's string-hybrid byte handling.

use super::envelope::TAG;

/// Bytes left over from a previous read that could not yet be decoded
/// into an envelope, preserved across calls so no byte of lookahead is
/// lost.
#[derive(Debug, Default)]
pub struct CarryBuffer {
    bytes: Vec<u8>,
}

impl CarryBuffer {
    pub fn new() -> Self {
        CarryBuffer { bytes: Vec::new() }
    }

    /// Append freshly read bytes to the carry.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Locate the next `"SAPI"` tag starting at or after `from`. Bytes
    /// before it are noise.
    pub fn find_tag(&self, from: usize) -> Option<usize> {
        if from >= self.bytes.len() {
            return None;
        }
        self.bytes[from..]
            .windows(TAG.len())
            .position(|w| w == TAG)
            .map(|p| p + from)
    }

    /// Drop `n` bytes from the front of the buffer, e.g. noise before an
    /// anchor or a fully consumed envelope.
    pub fn advance(&mut self, n: usize) {
        self.bytes.drain(..n.min(self.bytes.len()));
    }

    /// Borrow the remaining, not-yet-decoded bytes.
    pub fn carry_remaining(&self) -> &[u8] {
        &self.bytes
    }

    /// Read the declared big-endian length field at `offset` (right
    /// after a `"SAPI"` tag), if enough bytes are present.
    pub fn peek_len(&self, offset: usize) -> Option<u16> {
        let b = self.bytes.get(offset..offset + 2)?;
        Some(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn slice(&self, start: usize, end: usize) -> Option<&[u8]> {
        self.bytes.get(start..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_tag_skips_noise() {
        let mut buf = CarryBuffer::new();
        buf.extend(b"junkjunkSAPI\x00\x05hello");
        let pos = buf.find_tag(0).unwrap();
        assert_eq!(pos, 8);
    }

    #[test]
    fn advance_drops_prefix() {
        let mut buf = CarryBuffer::new();
        buf.extend(b"noiseSAPI");
        buf.advance(5);
        assert_eq!(buf.carry_remaining(), b"SAPI");
    }

    #[test]
    fn peek_len_reads_be_u16() {
        let mut buf = CarryBuffer::new();
        buf.extend(b"SAPI\x00\x0Arest");
        assert_eq!(buf.peek_len(4), Some(10));
    }
}
