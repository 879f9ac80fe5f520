//! Tag/length/value payload codec.
//!
//! A payload is a concatenation of records, each `tag (u16 LE)`,
//! `length (u16 LE)`, then `length` value bytes. Record order is not
//! significant, unknown tags are skipped, and duplicate tags resolve to
//! the first match.

use bytes::{BufMut, Bytes, BytesMut};

/// Recognized tags.
pub mod tag {
    /// Absolute address (u64).
    pub const ADDR: u16 = 0x0001;
    /// Read length in bytes (u32).
    pub const LEN: u16 = 0x0002;
    /// Module file name (UTF-8, no terminator).
    pub const MODNAME: u16 = 0x0003;
    /// Signed offset (i64, two's complement).
    pub const OFFSET: u16 = 0x0004;
    /// Packed sequence of i64 offsets.
    pub const OFFSETS: u16 = 0x0005;
    /// Opaque bytes.
    pub const DATA: u16 = 0x0006;
    /// Pointer-width tag (ASCII, lowercased on read).
    pub const DTYPE: u16 = 0x0007;
    /// Error code (u32), only in error responses.
    pub const ERRCODE: u16 = 0x00FE;
    /// Error message (UTF-8), only in error responses.
    pub const ERRMSG: u16 = 0x00FF;
}

/// A record's value cannot exceed what its u16 length field can carry.
pub const MAX_VALUE_LEN: usize = u16::MAX as usize;

#[derive(Debug, thiserror::Error)]
pub enum TlvError {
    /// A record header or value runs past the end of the payload.
    #[error("truncated record at payload offset {0}")]
    Truncated(usize),

    #[error("missing required tag {tag:#06x}")]
    Missing { tag: u16 },

    /// Fixed-width tags only match on the exact value length.
    #[error("tag {tag:#06x} has length {len}, expected {expected}")]
    WrongLength { tag: u16, len: usize, expected: usize },

    #[error("OFFSETS length {0} is not a multiple of 8")]
    RaggedOffsets(usize),

    #[error("tag {tag:#06x} is not valid UTF-8")]
    BadUtf8 { tag: u16 },
}

/// Builds a payload by appending records into a [`BytesMut`].
///
/// Values longer than [`MAX_VALUE_LEN`] are truncated to the record cap;
/// callers that must not lose bytes check the length up front.
#[derive(Debug, Default)]
pub struct TlvWriter {
    buf: BytesMut,
}

impl TlvWriter {
    pub fn new() -> Self {
        TlvWriter {
            buf: BytesMut::new(),
        }
    }

    fn put_record(&mut self, tag: u16, value: &[u8]) {
        debug_assert!(value.len() <= MAX_VALUE_LEN);
        let len = value.len().min(MAX_VALUE_LEN);
        self.buf.put_u16_le(tag);
        self.buf.put_u16_le(len as u16);
        self.buf.put_slice(&value[..len]);
    }

    pub fn put_u32(&mut self, tag: u16, v: u32) -> &mut Self {
        self.put_record(tag, &v.to_le_bytes());
        self
    }

    pub fn put_u64(&mut self, tag: u16, v: u64) -> &mut Self {
        self.put_record(tag, &v.to_le_bytes());
        self
    }

    pub fn put_i64(&mut self, tag: u16, v: i64) -> &mut Self {
        self.put_record(tag, &v.to_le_bytes());
        self
    }

    /// UTF-8 bytes, no null terminator.
    pub fn put_str(&mut self, tag: u16, s: &str) -> &mut Self {
        self.put_record(tag, s.as_bytes());
        self
    }

    pub fn put_bytes(&mut self, tag: u16, b: &[u8]) -> &mut Self {
        self.put_record(tag, b);
        self
    }

    /// Packed little-endian i64 sequence.
    pub fn put_offsets(&mut self, tag: u16, offsets: &[i64]) -> &mut Self {
        let mut value = Vec::with_capacity(offsets.len() * 8);
        for o in offsets {
            value.extend_from_slice(&o.to_le_bytes());
        }
        self.put_record(tag, &value);
        self
    }

    pub fn into_payload(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Linear scan for the first record with `tag`.
///
/// Returns the raw value slice, `None` when absent. A record that does
/// not fit the remaining payload aborts the scan as malformed.
pub fn find(payload: &[u8], tag: u16) -> Result<Option<&[u8]>, TlvError> {
    let mut pos = 0usize;
    while pos < payload.len() {
        if payload.len() - pos < 4 {
            return Err(TlvError::Truncated(pos));
        }
        let t = u16::from_le_bytes([payload[pos], payload[pos + 1]]);
        let len = u16::from_le_bytes([payload[pos + 2], payload[pos + 3]]) as usize;
        pos += 4;
        if payload.len() - pos < len {
            return Err(TlvError::Truncated(pos));
        }
        if t == tag {
            return Ok(Some(&payload[pos..pos + len]));
        }
        pos += len;
    }
    Ok(None)
}

fn fixed<const N: usize>(payload: &[u8], tag: u16) -> Result<Option<[u8; N]>, TlvError> {
    match find(payload, tag)? {
        None => Ok(None),
        Some(v) => {
            if v.len() != N {
                return Err(TlvError::WrongLength {
                    tag,
                    len: v.len(),
                    expected: N,
                });
            }
            let mut out = [0u8; N];
            out.copy_from_slice(v);
            Ok(Some(out))
        }
    }
}

pub fn get_u32(payload: &[u8], tag: u16) -> Result<Option<u32>, TlvError> {
    Ok(fixed::<4>(payload, tag)?.map(u32::from_le_bytes))
}

pub fn get_u64(payload: &[u8], tag: u16) -> Result<Option<u64>, TlvError> {
    Ok(fixed::<8>(payload, tag)?.map(u64::from_le_bytes))
}

pub fn get_i64(payload: &[u8], tag: u16) -> Result<Option<i64>, TlvError> {
    Ok(fixed::<8>(payload, tag)?.map(i64::from_le_bytes))
}

pub fn get_str(payload: &[u8], tag: u16) -> Result<Option<String>, TlvError> {
    match find(payload, tag)? {
        None => Ok(None),
        Some(v) => match std::str::from_utf8(v) {
            Ok(s) => Ok(Some(s.to_string())),
            Err(_) => Err(TlvError::BadUtf8 { tag }),
        },
    }
}

pub fn get_bytes(payload: &[u8], tag: u16) -> Result<Option<Vec<u8>>, TlvError> {
    Ok(find(payload, tag)?.map(<[u8]>::to_vec))
}

/// Decode a packed i64 sequence; the value length must be a multiple
/// of 8.
pub fn get_offsets(payload: &[u8], tag: u16) -> Result<Option<Vec<i64>>, TlvError> {
    match find(payload, tag)? {
        None => Ok(None),
        Some(v) => {
            if v.len() % 8 != 0 {
                return Err(TlvError::RaggedOffsets(v.len()));
            }
            let offsets = v
                .chunks_exact(8)
                .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect();
            Ok(Some(offsets))
        }
    }
}

pub fn require_u32(payload: &[u8], tag: u16) -> Result<u32, TlvError> {
    get_u32(payload, tag)?.ok_or(TlvError::Missing { tag })
}

pub fn require_u64(payload: &[u8], tag: u16) -> Result<u64, TlvError> {
    get_u64(payload, tag)?.ok_or(TlvError::Missing { tag })
}

pub fn require_i64(payload: &[u8], tag: u16) -> Result<i64, TlvError> {
    get_i64(payload, tag)?.ok_or(TlvError::Missing { tag })
}

pub fn require_str(payload: &[u8], tag: u16) -> Result<String, TlvError> {
    get_str(payload, tag)?.ok_or(TlvError::Missing { tag })
}

pub fn require_bytes(payload: &[u8], tag: u16) -> Result<Vec<u8>, TlvError> {
    get_bytes(payload, tag)?.ok_or(TlvError::Missing { tag })
}

pub fn require_offsets(payload: &[u8], tag: u16) -> Result<Vec<i64>, TlvError> {
    get_offsets(payload, tag)?.ok_or(TlvError::Missing { tag })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_roundtrip() {
        let mut w = TlvWriter::new();
        w.put_u64(tag::ADDR, 0xDEAD_BEEF_0000_1000)
            .put_u32(tag::LEN, 64)
            .put_i64(tag::OFFSET, -0x30)
            .put_str(tag::MODNAME, "kernel32.dll")
            .put_bytes(tag::DATA, &[1, 2, 3])
            .put_offsets(tag::OFFSETS, &[0x10, -0x20, 0]);
        let p = w.into_payload();

        assert_eq!(require_u64(&p, tag::ADDR).unwrap(), 0xDEAD_BEEF_0000_1000);
        assert_eq!(require_u32(&p, tag::LEN).unwrap(), 64);
        assert_eq!(require_i64(&p, tag::OFFSET).unwrap(), -0x30);
        assert_eq!(require_str(&p, tag::MODNAME).unwrap(), "kernel32.dll");
        assert_eq!(require_bytes(&p, tag::DATA).unwrap(), [1, 2, 3]);
        assert_eq!(require_offsets(&p, tag::OFFSETS).unwrap(), [0x10, -0x20, 0]);
    }

    #[test]
    fn unknown_tags_are_skipped() {
        let mut w = TlvWriter::new();
        w.put_bytes(0x7777, b"ignore me")
            .put_u32(tag::LEN, 8)
            .put_bytes(0x8888, b"");
        let p = w.into_payload();
        assert_eq!(require_u32(&p, tag::LEN).unwrap(), 8);
        assert_eq!(get_u64(&p, tag::ADDR).unwrap(), None);
    }

    #[test]
    fn first_match_wins() {
        let mut w = TlvWriter::new();
        w.put_u32(tag::LEN, 1).put_u32(tag::LEN, 2);
        let p = w.into_payload();
        assert_eq!(require_u32(&p, tag::LEN).unwrap(), 1);
    }

    #[test]
    fn record_overrunning_payload_is_malformed() {
        // Claims 16 value bytes but carries only 2.
        let p = [0x01, 0x00, 0x10, 0x00, 0xAA, 0xBB];
        assert!(matches!(
            find(&p, tag::ADDR),
            Err(TlvError::Truncated(4))
        ));
    }

    #[test]
    fn dangling_record_header_is_malformed() {
        let mut w = TlvWriter::new();
        w.put_u32(tag::LEN, 9);
        let mut p = w.into_payload().to_vec();
        p.extend_from_slice(&[0x05, 0x00]); // half a header
        assert!(matches!(find(&p, tag::ADDR), Err(TlvError::Truncated(_))));
        // The earlier record still resolves; the scan stops at the match.
        assert_eq!(require_u32(&p, tag::LEN).unwrap(), 9);
    }

    #[test]
    fn fixed_width_requires_exact_length() {
        let mut w = TlvWriter::new();
        w.put_bytes(tag::ADDR, &[1, 2, 3, 4]); // 4 bytes, ADDR wants 8
        let p = w.into_payload();
        assert!(matches!(
            get_u64(&p, tag::ADDR),
            Err(TlvError::WrongLength {
                tag: tag::ADDR,
                len: 4,
                expected: 8
            })
        ));
    }

    #[test]
    fn ragged_offsets_are_rejected() {
        let mut w = TlvWriter::new();
        w.put_bytes(tag::OFFSETS, &[0u8; 12]);
        let p = w.into_payload();
        assert!(matches!(
            get_offsets(&p, tag::OFFSETS),
            Err(TlvError::RaggedOffsets(12))
        ));
    }

    #[test]
    fn missing_required_tag() {
        let p = TlvWriter::new().into_payload();
        assert!(matches!(
            require_str(&p, tag::MODNAME),
            Err(TlvError::Missing { tag: tag::MODNAME })
        ));
    }

    #[test]
    fn invalid_utf8_string() {
        let mut w = TlvWriter::new();
        w.put_bytes(tag::MODNAME, &[0xFF, 0xFE]);
        let p = w.into_payload();
        assert!(matches!(
            get_str(&p, tag::MODNAME),
            Err(TlvError::BadUtf8 { tag: tag::MODNAME })
        ));
    }

    #[test]
    fn empty_offsets_decode_to_empty_vec() {
        let mut w = TlvWriter::new();
        w.put_offsets(tag::OFFSETS, &[]);
        let p = w.into_payload();
        assert_eq!(require_offsets(&p, tag::OFFSETS).unwrap(), Vec::<i64>::new());
    }
}
