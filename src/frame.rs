use std::io::{Read, Write};

use byteorder::LittleEndian;
use bytes::{BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use zerocopy::byteorder::U32;
use zerocopy::{AsBytes, Unaligned};

/// Four magic bytes opening every frame.
pub const MAGIC: [u8; 4] = *b"CEQP";
/// The only protocol version this crate speaks.
pub const VERSION: u8 = 0x01;
/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 16;
/// Upper bound on `payload_len`; frames above it are rejected.
pub const MAX_PAYLOAD: usize = 1024 * 1024;

// NOTE:
// - All multi-byte fields are little endian, regardless of host order
// - The header is followed by exactly `payload_len` payload bytes

/// Frame header
///
/// +---------------+---------------+---------------+---------------+
/// |       0       |       1       |       2       |       3       |
/// +---------------+---------------+---------------+---------------+
/// |      'C'      |      'E'      |      'Q'      |      'P'      |
/// +---------------+---------------+---------------+---------------+
/// |    Version    |     Type      |     Flags     |   Reserved    |
/// +---------------+---------------+---------------+---------------+
/// |                        Request ID (LE)                        |
/// +---------------+---------------+---------------+---------------+
/// |                      Payload length (LE)                      |
/// +---------------+---------------+---------------+---------------+
///
/// Flags and Reserved are written as zero; unknown flag bits are
/// ignored on receipt.
#[derive(AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
struct Header {
    magic: [u8; 4],
    version: u8,
    msg_type: u8,
    flags: u8,
    reserved: u8,
    request_id: U32<LittleEndian>,
    payload_len: U32<LittleEndian>,
}

impl Header {
    fn new(msg_type: u8, request_id: u32, payload_len: u32) -> Self {
        Header {
            magic: MAGIC,
            version: VERSION,
            msg_type,
            flags: 0,
            reserved: 0,
            request_id: U32::new(request_id),
            payload_len: U32::new(payload_len),
        }
    }
}

/// Message-kind discriminator carried in the header's Type byte.
#[derive(IntoPrimitive, TryFromPrimitive, Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum MsgType {
    HeartbeatReq = 0x01,
    HeartbeatResp = 0x02,
    ReadMemAddr = 0x10,
    WriteMemAddr = 0x11,
    ReadModOff = 0x12,
    WriteModOff = 0x13,
    ReadPtrChain = 0x14,
    GetModBase = 0x20,
    ErrorResp = 0x7F,
}

/// One decoded frame. The type byte is kept raw so that unknown types
/// can still be answered with an error response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    pub msg_type: u8,
    pub request_id: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Not our protocol, or the stream is desynchronized.
    #[error("bad magic {0:02x?}")]
    BadMagic([u8; 4]),

    /// The request id is carried along so the peer can be answered.
    #[error("unsupported version {version:#04x}")]
    BadVersion { version: u8, request_id: u32 },

    /// Declared payload length exceeds [`MAX_PAYLOAD`].
    #[error("payload length {payload_len} exceeds the 1 MiB cap")]
    Oversize { payload_len: u32, request_id: u32 },

    /// Encode-side: the payload cannot be represented in a frame.
    #[error("payload length {0} exceeds the 1 MiB cap")]
    TooLong(usize),
}

/// Read exactly one frame.
///
/// Blocks until the full header and payload arrive or the stream's read
/// deadline elapses; a timeout or EOF surfaces as [`FrameError::Io`].
pub fn read_frame<R: Read>(r: &mut R) -> Result<Frame, FrameError> {
    let mut hdr = [0u8; HEADER_LEN];
    r.read_exact(&mut hdr)?;

    if hdr[0..4] != MAGIC {
        return Err(FrameError::BadMagic([hdr[0], hdr[1], hdr[2], hdr[3]]));
    }
    let request_id = u32::from_le_bytes([hdr[8], hdr[9], hdr[10], hdr[11]]);
    let version = hdr[4];
    if version != VERSION {
        return Err(FrameError::BadVersion {
            version,
            request_id,
        });
    }
    let payload_len = u32::from_le_bytes([hdr[12], hdr[13], hdr[14], hdr[15]]);
    if payload_len as usize > MAX_PAYLOAD {
        return Err(FrameError::Oversize {
            payload_len,
            request_id,
        });
    }

    let msg_type = hdr[5];
    let mut payload = vec![0u8; payload_len as usize];
    r.read_exact(&mut payload)?;

    Ok(Frame {
        msg_type,
        request_id,
        payload,
    })
}

/// Write one frame as a single buffer (header + payload).
pub fn write_frame<W: Write>(
    w: &mut W,
    msg_type: u8,
    request_id: u32,
    payload: &[u8],
) -> Result<(), FrameError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::TooLong(payload.len()));
    }

    let hdr = Header::new(msg_type, request_id, payload.len() as u32);
    let mut packet = BytesMut::with_capacity(HEADER_LEN + payload.len());
    packet.put_slice(hdr.as_bytes());
    packet.put_slice(payload);

    w.write_all(&packet)?;
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn roundtrip() {
        let mut wire = Vec::new();
        write_frame(&mut wire, MsgType::ReadMemAddr.into(), 42, b"hello").unwrap();
        assert_eq!(wire.len(), HEADER_LEN + 5);
        assert_eq!(&wire[0..4], b"CEQP");

        let frame = read_frame(&mut Cursor::new(wire)).unwrap();
        assert_eq!(frame.msg_type, 0x10);
        assert_eq!(frame.request_id, 42);
        assert_eq!(frame.payload, b"hello");
    }

    #[test]
    fn roundtrip_empty_payload() {
        let mut wire = Vec::new();
        write_frame(&mut wire, MsgType::HeartbeatReq.into(), 7, &[]).unwrap();
        assert_eq!(wire.len(), HEADER_LEN);

        let frame = read_frame(&mut Cursor::new(wire)).unwrap();
        assert_eq!(frame.msg_type, 0x01);
        assert_eq!(frame.request_id, 7);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn roundtrip_random_payload() {
        let payload: Vec<u8> = (0..4096).map(|_| rand::random::<u8>()).collect();
        let mut wire = Vec::new();
        write_frame(&mut wire, MsgType::WriteMemAddr.into(), u32::MAX, &payload).unwrap();
        let frame = read_frame(&mut Cursor::new(wire)).unwrap();
        assert_eq!(frame.request_id, u32::MAX);
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut wire = Vec::new();
        write_frame(&mut wire, 0x01, 1, &[]).unwrap();
        wire[0] = b'X';
        match read_frame(&mut Cursor::new(wire)) {
            Err(FrameError::BadMagic(m)) => assert_eq!(&m[1..], b"EQP"),
            other => panic!("expected BadMagic, got {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_version() {
        let mut wire = Vec::new();
        write_frame(&mut wire, 0x01, 99, &[]).unwrap();
        wire[4] = 0x02;
        match read_frame(&mut Cursor::new(wire)) {
            Err(FrameError::BadVersion {
                version,
                request_id,
            }) => {
                assert_eq!(version, 0x02);
                assert_eq!(request_id, 99);
            }
            other => panic!("expected BadVersion, got {other:?}"),
        }
    }

    #[test]
    fn rejects_oversized_payload() {
        let mut wire = Vec::new();
        write_frame(&mut wire, 0x10, 5, &[]).unwrap();
        wire[12..16].copy_from_slice(&0x0020_0000u32.to_le_bytes());
        match read_frame(&mut Cursor::new(wire)) {
            Err(FrameError::Oversize {
                payload_len,
                request_id,
            }) => {
                assert_eq!(payload_len, 0x0020_0000);
                assert_eq!(request_id, 5);
            }
            other => panic!("expected Oversize, got {other:?}"),
        }
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        let mut wire = Vec::new();
        assert!(matches!(
            write_frame(&mut wire, 0x10, 1, &payload),
            Err(FrameError::TooLong(_))
        ));
        assert!(wire.is_empty());
    }

    #[test]
    fn truncated_stream_is_io_error() {
        let mut wire = Vec::new();
        write_frame(&mut wire, 0x10, 1, b"abcdef").unwrap();
        wire.truncate(HEADER_LEN + 2);
        assert!(matches!(
            read_frame(&mut Cursor::new(wire)),
            Err(FrameError::Io(_))
        ));
    }

    #[test]
    fn msg_type_conversions() {
        assert_eq!(u8::from(MsgType::GetModBase), 0x20);
        assert_eq!(MsgType::try_from(0x7F).unwrap(), MsgType::ErrorResp);
        assert!(MsgType::try_from(0x42).is_err());
    }
}
