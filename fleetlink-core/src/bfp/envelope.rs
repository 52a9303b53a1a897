//! The encrypted SPBUS envelope that carries a packed [`super::frame::Frame`]
//! on the wire: `"SAPI" | len(u16 BE) | RC4(key[0..4) | frame | sum32)`.
//!
//! Grounded in `hlapi/library/arc4.py` (the stream cipher) and
//! `hlapi/communication/IPAPIProtocol.py`'s envelope assembly. The cipher
//! has no dedicated crate in this ecosystem; it is a ~20-line legacy
//! stream cipher reimplemented here rather than pulled in as a dependency.

use crate::error::{FleetError, Result};

pub const TAG: &[u8; 4] = b"SAPI";

/// A minimal RC4 keystream generator, keyed fresh per envelope (never
/// streamed across messages).
struct Rc4 {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    fn new(key: &[u8]) -> Self {
        let mut state = [0u8; 256];
        for (idx, s) in state.iter_mut().enumerate() {
            *s = idx as u8;
        }
        let mut j: u8 = 0;
        for i in 0..256 {
            j = j
                .wrapping_add(state[i])
                .wrapping_add(key[i % key.len()]);
            state.swap(i, j as usize);
        }
        Rc4 { state, i: 0, j: 0 }
    }

    fn apply(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.state[self.i as usize]);
            self.state.swap(self.i as usize, self.j as usize);
            let k = self.state[(self.state[self.i as usize].wrapping_add(self.state[self.j as usize])) as usize];
            *byte ^= k;
        }
    }
}

/// RC4-encrypt `plaintext` with a fresh cipher state keyed by `key`.
/// Symmetric: calling this again on the output with the same key decrypts.
pub fn rc4_crypt(key: &[u8], plaintext: &[u8]) -> Vec<u8> {
    let mut cipher = Rc4::new(key);
    let mut out = plaintext.to_vec();
    cipher.apply(&mut out);
    out
}

fn sum32_be(data: &[u8]) -> [u8; 4] {
    let sum: u32 = data.iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32));
    sum.to_be_bytes()
}

/// Encrypt `frame` into a full `"SAPI"`-tagged envelope using the
/// 16-byte per-device key.
pub fn encrypt(key: &[u8; 16], frame: &[u8]) -> Vec<u8> {
    let mut plaintext = Vec::with_capacity(4 + frame.len() + 4);
    plaintext.extend(&key[0..4]);
    plaintext.extend(frame);
    let checksum = sum32_be(&plaintext);
    plaintext.extend(checksum);

    let ciphertext = rc4_crypt(key, &plaintext);

    let mut envelope = Vec::with_capacity(4 + 2 + ciphertext.len());
    envelope.extend(TAG);
    envelope.extend((ciphertext.len() as u16).to_be_bytes());
    envelope.extend(ciphertext);
    envelope
}

/// Decrypt a declared-length ciphertext slice (the bytes following the
/// `"SAPI"` tag and length field) back to the inner frame bytes. Returns
/// `None` (not an error) when the key prefix or checksum don't match,
/// discarding the envelope on checksum mismatch — the caller
/// treats that as noise and keeps scanning.
pub fn decrypt(key: &[u8; 16], ciphertext: &[u8]) -> Option<Vec<u8>> {
    if ciphertext.len() < 8 {
        return None;
    }
    let plaintext = rc4_crypt(key, ciphertext);
    if &plaintext[0..4] != &key[0..4] {
        return None;
    }
    let body_end = plaintext.len() - 4;
    let expected_sum = sum32_be(&plaintext[..body_end]);
    if plaintext[body_end..] != expected_sum {
        return None;
    }
    Some(plaintext[4..body_end].to_vec())
}

/// Parse a 16-ASCII-byte configuration string into the fixed 16-byte key,
/// or reject it as invalid (disables BFP for the owning interface).
pub fn parse_key(ascii: &str) -> Result<[u8; 16]> {
    let bytes = ascii.as_bytes();
    if bytes.len() != 16 {
        return Err(FleetError::InvalidInput(format!(
            "bfp key must be exactly 16 ASCII bytes, got {}",
            bytes.len()
        )));
    }
    let mut key = [0u8; 16];
    key.copy_from_slice(bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 16] {
        parse_key("0123456789abcdef").unwrap()
    }

    #[test]
    fn envelope_roundtrip() {
        let key = test_key();
        let frame = b"hello frame bytes".to_vec();
        let envelope = encrypt(&key, &frame);
        assert_eq!(&envelope[0..4], TAG);
        let len = u16::from_be_bytes([envelope[4], envelope[5]]) as usize;
        let ciphertext = &envelope[6..6 + len];
        let decoded = decrypt(&key, ciphertext).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn decrypt_rejects_wrong_key() {
        let key = test_key();
        let other_key = parse_key("fedcba9876543210").unwrap();
        let envelope = encrypt(&key, b"frame");
        let len = u16::from_be_bytes([envelope[4], envelope[5]]) as usize;
        let ciphertext = &envelope[6..6 + len];
        assert!(decrypt(&other_key, ciphertext).is_none());
    }

    #[test]
    fn parse_key_rejects_wrong_length() {
        assert!(parse_key("short").is_err());
    }

    #[test]
    fn fresh_cipher_state_per_envelope() {
        let key = test_key();
        let first = encrypt(&key, b"same frame bytes");
        let second = encrypt(&key, b"same frame bytes");
        assert_eq!(first, second, "identical plaintext under a fresh keying must produce identical ciphertext");
    }
}
