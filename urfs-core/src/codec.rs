//! Chunk transfer encodings.
//!
//! Two encodings are understood on the wire:
//! - armored text: base64 wrapped in a literal `b'...'` envelope, as sent by
//!   existing clients;
//! - binary frames: a big-endian `u32` length followed by the payload.

use crate::error::{Result, UrfsError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{Buf, BufMut, Bytes, BytesMut};

const ARMOR_PREFIX: &str = "b'";
const ARMOR_SUFFIX: &str = "'";
const FRAME_HEADER_LEN: usize = 4;

pub fn armor(data: &[u8]) -> String {
    format!("{}{}{}", ARMOR_PREFIX, STANDARD.encode(data), ARMOR_SUFFIX)
}

pub fn unarmor(block: &str) -> Result<Bytes> {
    let inner = block
        .strip_prefix(ARMOR_PREFIX)
        .and_then(|rest| rest.strip_suffix(ARMOR_SUFFIX))
        .ok_or_else(|| UrfsError::InvalidChunk("missing b'...' wrapper".to_string()))?;

    STANDARD
        .decode(inner)
        .map(Bytes::from)
        .map_err(|error| UrfsError::InvalidChunk(format!("invalid base64 payload: {}", error)))
}

pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    let len = u32::try_from(payload.len())
        .map_err(|_| UrfsError::InvalidChunk("frame payload too large".to_string()))?;
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u32(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Split one frame off the front of `buf`. Returns `None` when `buf` does not
/// yet hold a complete frame.
pub fn decode_frame(buf: &mut Bytes) -> Option<Bytes> {
    if buf.len() < FRAME_HEADER_LEN {
        return None;
    }

    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if buf.len() < FRAME_HEADER_LEN + len {
        return None;
    }

    buf.advance(FRAME_HEADER_LEN);
    Some(buf.split_to(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_armor_matches_existing_clients() {
        assert_eq!(armor(b"hi"), "b'aGk='");
        assert_eq!(unarmor("b'aGk='").unwrap(), Bytes::from_static(b"hi"));
        assert_eq!(unarmor("b''").unwrap().len(), 0);
    }

    #[test]
    fn test_unarmor_rejects_bad_blocks() {
        assert!(matches!(unarmor("aGk="), Err(UrfsError::InvalidChunk(_))));
        assert!(matches!(unarmor("b'aGk="), Err(UrfsError::InvalidChunk(_))));
        assert!(matches!(unarmor("b'@@@'"), Err(UrfsError::InvalidChunk(_))));
    }

    #[test]
    fn test_frames_split_a_stream() {
        let mut stream = BytesMut::new();
        stream.extend_from_slice(&encode_frame(b"first").unwrap());
        stream.extend_from_slice(&encode_frame(b"").unwrap());
        stream.extend_from_slice(&encode_frame(b"third").unwrap()[..6]);
        let mut stream = stream.freeze();

        assert_eq!(decode_frame(&mut stream).unwrap(), Bytes::from_static(b"first"));
        assert_eq!(decode_frame(&mut stream).unwrap().len(), 0);
        assert!(decode_frame(&mut stream).is_none());
        assert_eq!(stream.len(), 6);
    }
}
