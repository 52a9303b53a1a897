//! The envelope-extraction decode cycle: turns a rolling carry buffer into
//! zero or more decrypted frame byte-strings, tolerating noise, corrupted
//! lengths, and partial payloads across arbitrary TCP read splits.
//!
//! Grounded in the envelope protocol's numbered decode cycle and
//! `hlapi/communication/IPAPIProtocol.py`'s socket receive loop.

use super::buffer::CarryBuffer;
use super::envelope::decrypt;

const TAG_LEN: usize = 4;
const LEN_FIELD: usize = 2;
const HEADER_LEN: usize = TAG_LEN + LEN_FIELD;

/// Pull every envelope that can currently be decoded out of `buffer`,
/// leaving unresolved bytes in place for the next read. Noise before an
/// anchor is logged and dropped; returns decrypted frame payloads in
/// the order they were found.
pub fn extract_frames(buffer: &mut CarryBuffer, key: &[u8; 16]) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();

    loop {
        let Some(tag_pos) = buffer.find_tag(0) else {
            // No anchor at all: everything left is unparseable noise,
            // but we keep it in case a later read completes the tag.
            break;
        };
        if tag_pos > 0 {
            tracing::debug!(dropped = tag_pos, "discarding noise before SAPI tag");
            buffer.advance(tag_pos);
        }

        let Some(declared_len) = buffer.peek_len(TAG_LEN) else {
            // Tag present but length field not fully arrived yet.
            break;
        };
        let declared_len = declared_len as usize;
        if declared_len < 8 {
            // Malformed length: skip past this tag occurrence and look
            // for the next one rather than getting stuck.
            buffer.advance(TAG_LEN);
            continue;
        }

        let total_len = HEADER_LEN + declared_len;
        let decrypted = buffer.slice(HEADER_LEN, total_len).and_then(|slice| decrypt(key, slice));
        if let Some(frame) = decrypted {
            frames.push(frame);
            buffer.advance(total_len);
            continue;
        }

        // Either the declared-length slice hasn't fully arrived yet, or it
        // decrypted to garbage — either way the length field may be
        // corrupted. Search for the next "SAPI" boundary and try
        // decrypting the intervening slice instead of waiting on a length
        // that may never resolve.
        if let Some(next_tag) = buffer.find_tag(HEADER_LEN) {
            if let Some(intervening) = buffer.slice(HEADER_LEN, next_tag) {
                if let Some(frame) = decrypt(key, intervening) {
                    frames.push(frame);
                    buffer.advance(next_tag);
                    continue;
                }
            }
            // Still garbage: drop the bad tag and retry from the next one.
            buffer.advance(TAG_LEN);
            continue;
        }
        // No further anchor yet: keep everything, wait for more data.
        break;
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bfp::envelope::{encrypt, parse_key};

    fn key() -> [u8; 16] {
        parse_key("0123456789abcdef").unwrap()
    }

    #[test]
    fn single_envelope_in_one_chunk() {
        let k = key();
        let envelope = encrypt(&k, b"frame-one");
        let mut buf = CarryBuffer::new();
        buf.extend(&envelope);
        let frames = extract_frames(&mut buf, &k);
        assert_eq!(frames, vec![b"frame-one".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn noise_before_tag_is_discarded() {
        let k = key();
        let envelope = encrypt(&k, b"payload");
        let mut buf = CarryBuffer::new();
        buf.extend(b"garbagebeforeenvelope");
        buf.extend(&envelope);
        let frames = extract_frames(&mut buf, &k);
        assert_eq!(frames, vec![b"payload".to_vec()]);
    }

    #[test]
    fn partial_envelope_is_retained_for_next_read() {
        let k = key();
        let envelope = encrypt(&k, b"split-frame");
        let mut buf = CarryBuffer::new();
        buf.extend(&envelope[..envelope.len() - 3]);
        let frames = extract_frames(&mut buf, &k);
        assert!(frames.is_empty());
        assert!(!buf.is_empty());

        buf.extend(&envelope[envelope.len() - 3..]);
        let frames = extract_frames(&mut buf, &k);
        assert_eq!(frames, vec![b"split-frame".to_vec()]);
    }

    #[test]
    fn two_envelopes_back_to_back() {
        let k = key();
        let mut buf = CarryBuffer::new();
        buf.extend(&encrypt(&k, b"first"));
        buf.extend(&encrypt(&k, b"second"));
        let frames = extract_frames(&mut buf, &k);
        assert_eq!(frames, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn corrupted_length_recovers_via_next_tag() {
        let k = key();
        let mut envelope = encrypt(&k, b"recoverable");
        // Corrupt the declared length so the slice it points to does not
        // decrypt cleanly; a valid SAPI boundary for the *next* envelope
        // anchors recovery.
        envelope[4] = 0xFF;
        envelope[5] = 0xFF;
        let mut buf = CarryBuffer::new();
        buf.extend(&envelope);
        buf.extend(&encrypt(&k, b"trailing"));
        let frames = extract_frames(&mut buf, &k);
        assert!(frames.contains(&b"recoverable".to_vec()));
        assert!(frames.contains(&b"trailing".to_vec()));
    }
}
