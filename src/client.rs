//! Controller side of the protocol: one method per request type.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::error::Error;
use crate::frame::{self, Frame, MsgType};
use crate::session::IO_TIMEOUT;
use crate::tlv::{self, tag, TlvWriter};

/// Largest read a controller will request.
pub const MAX_READ: u32 = 1024 * 1024;

/// How often a controller should [`ping`](Client::ping) to keep the
/// session marked alive.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Result of a pointer-chain read.
#[derive(Clone, Debug)]
pub struct ChainRead {
    /// Final dereferenced address.
    pub addr: u64,
    /// Bytes read there.
    pub data: Vec<u8>,
}

/// A connected controller session.
///
/// Requests run one at a time; the response is correlated by request id
/// before it is interpreted. An error frame surfaces as
/// [`Error::Remote`]; a dead connection surfaces as an I/O error, and
/// reconnecting means calling [`Client::connect`] again.
pub struct Client {
    stream: TcpStream,
    next_id: u32,
}

impl Client {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        debug!(peer = ?stream.peer_addr().ok(), "connected");
        Ok(Client { stream, next_id: 1 })
    }

    fn roundtrip(
        &mut self,
        request: MsgType,
        expect: MsgType,
        payload: &[u8],
    ) -> Result<Frame, Error> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        frame::write_frame(&mut self.stream, request.into(), id, payload)?;
        let resp = frame::read_frame(&mut self.stream)?;

        if resp.request_id != id {
            return Err(Error::RequestIdMismatch {
                sent: id,
                got: resp.request_id,
            });
        }
        if resp.msg_type == u8::from(MsgType::ErrorResp) {
            let code = tlv::get_u32(&resp.payload, tag::ERRCODE)?.unwrap_or(0);
            let message = tlv::get_str(&resp.payload, tag::ERRMSG)?.unwrap_or_default();
            return Err(Error::Remote { code, message });
        }
        if resp.msg_type != u8::from(expect) {
            return Err(Error::UnexpectedResponse {
                sent: request.into(),
                got: resp.msg_type,
            });
        }
        Ok(resp)
    }

    /// Heartbeat; send one every [`HEARTBEAT_INTERVAL`].
    pub fn ping(&mut self) -> Result<(), Error> {
        self.roundtrip(MsgType::HeartbeatReq, MsgType::HeartbeatResp, &[])?;
        Ok(())
    }

    pub fn read_memory(&mut self, addr: u64, len: u32) -> Result<Vec<u8>, Error> {
        if len > MAX_READ {
            return Err(Error::ReadTooLarge(len));
        }
        let mut w = TlvWriter::new();
        w.put_u64(tag::ADDR, addr).put_u32(tag::LEN, len);
        let resp = self.roundtrip(MsgType::ReadMemAddr, MsgType::ReadMemAddr, &w.into_payload())?;
        Ok(tlv::require_bytes(&resp.payload, tag::DATA)?)
    }

    pub fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), Error> {
        if data.len() > tlv::MAX_VALUE_LEN {
            return Err(Error::ValueTooLarge("write data"));
        }
        let mut w = TlvWriter::new();
        w.put_u64(tag::ADDR, addr).put_bytes(tag::DATA, data);
        self.roundtrip(MsgType::WriteMemAddr, MsgType::WriteMemAddr, &w.into_payload())?;
        Ok(())
    }

    pub fn get_module_base(&mut self, module: &str) -> Result<u64, Error> {
        let mut w = TlvWriter::new();
        w.put_str(tag::MODNAME, module);
        let resp = self.roundtrip(MsgType::GetModBase, MsgType::GetModBase, &w.into_payload())?;
        Ok(tlv::require_u64(&resp.payload, tag::ADDR)?)
    }

    pub fn read_module_offset(
        &mut self,
        module: &str,
        offset: i64,
        len: u32,
    ) -> Result<Vec<u8>, Error> {
        if len > MAX_READ {
            return Err(Error::ReadTooLarge(len));
        }
        let mut w = TlvWriter::new();
        w.put_str(tag::MODNAME, module)
            .put_i64(tag::OFFSET, offset)
            .put_u32(tag::LEN, len);
        let resp = self.roundtrip(MsgType::ReadModOff, MsgType::ReadModOff, &w.into_payload())?;
        Ok(tlv::require_bytes(&resp.payload, tag::DATA)?)
    }

    pub fn write_module_offset(
        &mut self,
        module: &str,
        offset: i64,
        data: &[u8],
    ) -> Result<(), Error> {
        if data.len() > tlv::MAX_VALUE_LEN {
            return Err(Error::ValueTooLarge("write data"));
        }
        let mut w = TlvWriter::new();
        w.put_str(tag::MODNAME, module)
            .put_i64(tag::OFFSET, offset)
            .put_bytes(tag::DATA, data);
        self.roundtrip(MsgType::WriteModOff, MsgType::WriteModOff, &w.into_payload())?;
        Ok(())
    }

    /// Walk a pointer chain on the target. `dtype` optionally forces
    /// the pointer width (`u32ptr`/`u64ptr` and aliases); `len`
    /// defaults to one pointer's worth on the server.
    pub fn read_pointer_chain(
        &mut self,
        base: u64,
        offsets: &[i64],
        dtype: Option<&str>,
        len: Option<u32>,
    ) -> Result<ChainRead, Error> {
        if let Some(len) = len {
            if len > MAX_READ {
                return Err(Error::ReadTooLarge(len));
            }
        }
        if offsets.len() * 8 > tlv::MAX_VALUE_LEN {
            return Err(Error::ValueTooLarge("offset list"));
        }

        let mut w = TlvWriter::new();
        w.put_u64(tag::ADDR, base).put_offsets(tag::OFFSETS, offsets);
        if let Some(dtype) = dtype {
            w.put_str(tag::DTYPE, dtype);
        }
        if let Some(len) = len {
            w.put_u32(tag::LEN, len);
        }
        let resp =
            self.roundtrip(MsgType::ReadPtrChain, MsgType::ReadPtrChain, &w.into_payload())?;
        Ok(ChainRead {
            addr: tlv::require_u64(&resp.payload, tag::ADDR)?,
            data: tlv::require_bytes(&resp.payload, tag::DATA)?,
        })
    }
}
