//! Per-connection request loop.
//!
//! One session owns one socket and serves one request at a time, in
//! arrival order. Transport failures (peer gone, deadline elapsed,
//! short read) close the session without a reply; framing violations
//! are answered with an error frame when the header was readable, then
//! the session closes; payload and operation errors are answered and
//! the session continues.

use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::frame::{self, FrameError};
use crate::handler::{self, code};
use crate::provider::MemoryProvider;

/// Per-read socket deadline; a peer silent for longer is gone.
pub(crate) const IO_TIMEOUT: Duration = Duration::from_secs(3);

pub(crate) fn serve(mut stream: TcpStream, provider: &dyn MemoryProvider, diagnostic: bool) {
    let peer = stream
        .peer_addr()
        .map_or_else(|_| "unknown".to_string(), |a| a.to_string());
    debug!(%peer, "session started");

    loop {
        let frame = match frame::read_frame(&mut stream) {
            Ok(frame) => frame,
            Err(FrameError::BadVersion {
                version,
                request_id,
            }) => {
                warn!(%peer, version, "unsupported protocol version");
                let resp = handler::error_response(code::BAD_VERSION, "bad version");
                let _ = frame::write_frame(&mut stream, resp.msg_type, request_id, &resp.payload);
                break;
            }
            Err(FrameError::Oversize {
                payload_len,
                request_id,
            }) => {
                warn!(%peer, payload_len, "oversized payload");
                let resp = handler::error_response(code::PAYLOAD_TOO_LARGE, "payload too large");
                let _ = frame::write_frame(&mut stream, resp.msg_type, request_id, &resp.payload);
                break;
            }
            // Bad magic means we may be misaligned on the stream; do
            // not reply into garbage.
            Err(FrameError::BadMagic(magic)) => {
                warn!(%peer, ?magic, "bad magic");
                break;
            }
            Err(e) => {
                debug!(%peer, error = %e, "transport closed");
                break;
            }
        };

        let resp = handler::dispatch(provider, diagnostic, frame.msg_type, &frame.payload);
        if let Err(e) =
            frame::write_frame(&mut stream, resp.msg_type, frame.request_id, &resp.payload)
        {
            debug!(%peer, error = %e, "response write failed");
            break;
        }
    }

    let _ = stream.shutdown(Shutdown::Both);
    info!(%peer, "session ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{read_frame, write_frame, MsgType, HEADER_LEN};
    use crate::provider::ArenaProvider;
    use crate::tlv::{self, tag};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;

    /// One session over a real loopback socket.
    fn session_pair() -> TcpStream {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let provider = Arc::new(ArenaProvider::new(0x1000, 0x1000));
            let (stream, _) = listener.accept().unwrap();
            stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
            serve(stream, provider.as_ref(), false);
        });
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
        stream
    }

    #[test]
    fn heartbeat_exchange() {
        let mut stream = session_pair();
        write_frame(&mut stream, MsgType::HeartbeatReq.into(), 7, &[]).unwrap();
        let resp = read_frame(&mut stream).unwrap();
        assert_eq!(resp.msg_type, u8::from(MsgType::HeartbeatResp));
        assert_eq!(resp.request_id, 7);
        assert!(resp.payload.is_empty());
    }

    #[test]
    fn session_survives_request_errors() {
        let mut stream = session_pair();

        // Missing TLVs: an error response, but the session stays up.
        write_frame(&mut stream, MsgType::ReadMemAddr.into(), 1, &[]).unwrap();
        let resp = read_frame(&mut stream).unwrap();
        assert_eq!(resp.msg_type, u8::from(MsgType::ErrorResp));
        assert_eq!(resp.request_id, 1);

        write_frame(&mut stream, MsgType::HeartbeatReq.into(), 2, &[]).unwrap();
        let resp = read_frame(&mut stream).unwrap();
        assert_eq!(resp.request_id, 2);
    }

    #[test]
    fn oversized_payload_gets_one_error_then_close() {
        let mut stream = session_pair();

        let mut hdr = [0u8; HEADER_LEN];
        hdr[0..4].copy_from_slice(b"CEQP");
        hdr[4] = 0x01;
        hdr[5] = u8::from(MsgType::ReadMemAddr);
        hdr[8..12].copy_from_slice(&9u32.to_le_bytes());
        hdr[12..16].copy_from_slice(&0x0020_0000u32.to_le_bytes());
        stream.write_all(&hdr).unwrap();

        let resp = read_frame(&mut stream).unwrap();
        assert_eq!(resp.msg_type, u8::from(MsgType::ErrorResp));
        assert_eq!(resp.request_id, 9);
        assert_eq!(
            tlv::require_u32(&resp.payload, tag::ERRCODE).unwrap(),
            code::PAYLOAD_TOO_LARGE
        );

        // Exactly one frame, then EOF.
        let mut rest = Vec::new();
        assert_eq!(stream.read_to_end(&mut rest).unwrap(), 0);
    }

    #[test]
    fn bad_version_gets_error_then_close() {
        let mut stream = session_pair();

        let mut hdr = [0u8; HEADER_LEN];
        hdr[0..4].copy_from_slice(b"CEQP");
        hdr[4] = 0x02;
        hdr[8..12].copy_from_slice(&3u32.to_le_bytes());
        stream.write_all(&hdr).unwrap();

        let resp = read_frame(&mut stream).unwrap();
        assert_eq!(resp.request_id, 3);
        assert_eq!(
            tlv::require_u32(&resp.payload, tag::ERRCODE).unwrap(),
            code::BAD_VERSION
        );
        let mut rest = Vec::new();
        assert_eq!(stream.read_to_end(&mut rest).unwrap(), 0);
    }

    #[test]
    fn bad_magic_closes_silently() {
        let mut stream = session_pair();
        stream.write_all(&[0u8; HEADER_LEN]).unwrap();
        let mut rest = Vec::new();
        assert_eq!(stream.read_to_end(&mut rest).unwrap(), 0);
    }
}
