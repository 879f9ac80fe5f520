//! Per-message request handlers and the dispatcher.
//!
//! Every request maps to exactly one response: a success frame of the
//! request's own type (heartbeats answer with their dedicated response
//! type) or an error frame carrying a stable code and a diagnostic
//! message.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::chain::{self, ChainError};
use crate::frame::MsgType;
use crate::provider::{find_module_base, MemoryProvider};
use crate::tlv::{self, tag, TlvWriter};

/// Wire error codes. Their values are stable; never renumber.
pub mod code {
    pub const MOD_BASE_MISSING: u32 = 1;
    pub const MOD_BASE_NOT_FOUND: u32 = 2;
    pub const READ_MEM_MISSING: u32 = 3;
    pub const READ_MEM_FAILED: u32 = 4;
    pub const WRITE_MEM_MISSING: u32 = 5;
    pub const WRITE_MEM_FAILED: u32 = 6;
    pub const READ_MOD_MISSING: u32 = 7;
    pub const READ_MOD_NOT_FOUND: u32 = 8;
    pub const READ_MOD_FAILED: u32 = 9;
    pub const WRITE_MOD_MISSING: u32 = 10;
    pub const WRITE_MOD_NOT_FOUND: u32 = 11;
    pub const WRITE_MOD_FAILED: u32 = 12;
    pub const CHAIN_MISSING: u32 = 13;
    pub const CHAIN_STEP_FAILED: u32 = 14;
    pub const CHAIN_FINAL_FAILED: u32 = 15;
    pub const UNKNOWN_TYPE: u32 = 100;
    pub const BAD_VERSION: u32 = 101;
    pub const PAYLOAD_TOO_LARGE: u32 = 102;
}

/// Type byte and payload of the single frame answering a request.
#[derive(Clone, Debug)]
pub struct Response {
    pub msg_type: u8,
    pub payload: Bytes,
}

pub fn error_response(code: u32, message: &str) -> Response {
    let mut w = TlvWriter::new();
    w.put_u32(tag::ERRCODE, code).put_str(tag::ERRMSG, message);
    Response {
        msg_type: MsgType::ErrorResp.into(),
        payload: w.into_payload(),
    }
}

fn ok(msg_type: MsgType, w: TlvWriter) -> Response {
    Response {
        msg_type: msg_type.into(),
        payload: w.into_payload(),
    }
}

/// Map a missing or malformed TLV onto the handler's error code.
fn extract<T>(parsed: Result<T, tlv::TlvError>, code: u32) -> Result<T, Response> {
    parsed.map_err(|e| error_response(code, &e.to_string()))
}

fn collapse(result: Result<Response, Response>) -> Response {
    match result {
        Ok(r) | Err(r) => r,
    }
}

/// Handle one request payload; infallible by construction.
pub fn dispatch(
    provider: &dyn MemoryProvider,
    diagnostic: bool,
    msg_type: u8,
    payload: &[u8],
) -> Response {
    debug!("dispatch type {msg_type:#04x}, {} payload bytes", payload.len());
    match MsgType::try_from(msg_type) {
        Ok(MsgType::HeartbeatReq) => ok(MsgType::HeartbeatResp, TlvWriter::new()),
        Ok(MsgType::ReadMemAddr) => collapse(read_mem(provider, payload)),
        Ok(MsgType::WriteMemAddr) => collapse(write_mem(provider, payload)),
        Ok(MsgType::ReadModOff) => collapse(read_mod(provider, payload)),
        Ok(MsgType::WriteModOff) => collapse(write_mod(provider, payload)),
        Ok(MsgType::ReadPtrChain) => collapse(read_chain(provider, diagnostic, payload)),
        Ok(MsgType::GetModBase) => collapse(mod_base(provider, payload)),
        Ok(MsgType::HeartbeatResp) | Ok(MsgType::ErrorResp) | Err(_) => {
            warn!("unknown request type {msg_type:#04x}");
            error_response(
                code::UNKNOWN_TYPE,
                &format!("unknown message type {msg_type:#04x}"),
            )
        }
    }
}

/// Cap response data at what one DATA record can carry; this also keeps
/// every response payload far below the frame cap.
fn data_reply(msg_type: MsgType, mut data: Vec<u8>) -> Response {
    data.truncate(tlv::MAX_VALUE_LEN);
    let mut w = TlvWriter::new();
    w.put_bytes(tag::DATA, &data);
    ok(msg_type, w)
}

fn read_mem(provider: &dyn MemoryProvider, payload: &[u8]) -> Result<Response, Response> {
    let addr = extract(tlv::require_u64(payload, tag::ADDR), code::READ_MEM_MISSING)?;
    let len = extract(tlv::require_u32(payload, tag::LEN), code::READ_MEM_MISSING)?;

    match provider.read(addr, len) {
        Ok(data) => Ok(data_reply(MsgType::ReadMemAddr, data)),
        Err(e) => Err(error_response(code::READ_MEM_FAILED, &e.to_string())),
    }
}

fn write_mem(provider: &dyn MemoryProvider, payload: &[u8]) -> Result<Response, Response> {
    let addr = extract(tlv::require_u64(payload, tag::ADDR), code::WRITE_MEM_MISSING)?;
    let data = extract(
        tlv::require_bytes(payload, tag::DATA),
        code::WRITE_MEM_MISSING,
    )?;

    match provider.write(addr, &data) {
        Ok(n) if n == data.len() => Ok(ok(MsgType::WriteMemAddr, TlvWriter::new())),
        Ok(n) => Err(error_response(
            code::WRITE_MEM_FAILED,
            &format!("short write at {addr:#x}: {n} of {} bytes", data.len()),
        )),
        Err(e) => Err(error_response(code::WRITE_MEM_FAILED, &e.to_string())),
    }
}

fn resolve_module(
    provider: &dyn MemoryProvider,
    name: &str,
    not_found: u32,
) -> Result<u64, Response> {
    match find_module_base(provider, name) {
        Ok(Some(base)) => Ok(base),
        Ok(None) => Err(error_response(
            not_found,
            &format!("module not found: {name}"),
        )),
        Err(e) => Err(error_response(not_found, &e.to_string())),
    }
}

fn read_mod(provider: &dyn MemoryProvider, payload: &[u8]) -> Result<Response, Response> {
    let name = extract(
        tlv::require_str(payload, tag::MODNAME),
        code::READ_MOD_MISSING,
    )?;
    let offset = extract(
        tlv::require_i64(payload, tag::OFFSET),
        code::READ_MOD_MISSING,
    )?;
    let len = extract(tlv::require_u32(payload, tag::LEN), code::READ_MOD_MISSING)?;

    let base = resolve_module(provider, &name, code::READ_MOD_NOT_FOUND)?;
    let addr = base.wrapping_add_signed(offset);
    match provider.read(addr, len) {
        Ok(data) => Ok(data_reply(MsgType::ReadModOff, data)),
        Err(e) => Err(error_response(code::READ_MOD_FAILED, &e.to_string())),
    }
}

fn write_mod(provider: &dyn MemoryProvider, payload: &[u8]) -> Result<Response, Response> {
    let name = extract(
        tlv::require_str(payload, tag::MODNAME),
        code::WRITE_MOD_MISSING,
    )?;
    let offset = extract(
        tlv::require_i64(payload, tag::OFFSET),
        code::WRITE_MOD_MISSING,
    )?;
    let data = extract(
        tlv::require_bytes(payload, tag::DATA),
        code::WRITE_MOD_MISSING,
    )?;

    let base = resolve_module(provider, &name, code::WRITE_MOD_NOT_FOUND)?;
    let addr = base.wrapping_add_signed(offset);
    match provider.write(addr, &data) {
        Ok(n) if n == data.len() => Ok(ok(MsgType::WriteModOff, TlvWriter::new())),
        Ok(n) => Err(error_response(
            code::WRITE_MOD_FAILED,
            &format!("short write at {addr:#x}: {n} of {} bytes", data.len()),
        )),
        Err(e) => Err(error_response(code::WRITE_MOD_FAILED, &e.to_string())),
    }
}

fn read_chain(
    provider: &dyn MemoryProvider,
    diagnostic: bool,
    payload: &[u8],
) -> Result<Response, Response> {
    let base = extract(tlv::require_u64(payload, tag::ADDR), code::CHAIN_MISSING)?;
    let offsets = extract(
        tlv::require_offsets(payload, tag::OFFSETS),
        code::CHAIN_MISSING,
    )?;
    let dtype = extract(tlv::get_str(payload, tag::DTYPE), code::CHAIN_MISSING)?
        .map(|s| s.to_ascii_lowercase());
    let len = extract(tlv::get_u32(payload, tag::LEN), code::CHAIN_MISSING)?;

    match chain::walk(provider, base, &offsets, dtype.as_deref(), len, diagnostic) {
        Ok(walked) => {
            let mut data = walked.data;
            data.truncate(tlv::MAX_VALUE_LEN);
            let mut w = TlvWriter::new();
            w.put_bytes(tag::DATA, &data).put_u64(tag::ADDR, walked.addr);
            if diagnostic {
                w.put_str(tag::DTYPE, walked.width.label())
                    .put_u32(tag::LEN, walked.len);
            }
            Ok(ok(MsgType::ReadPtrChain, w))
        }
        Err(e @ ChainError::Step { .. }) => {
            Err(error_response(code::CHAIN_STEP_FAILED, &e.to_string()))
        }
        Err(e @ ChainError::FinalRead { .. }) => {
            Err(error_response(code::CHAIN_FINAL_FAILED, &e.to_string()))
        }
    }
}

fn mod_base(provider: &dyn MemoryProvider, payload: &[u8]) -> Result<Response, Response> {
    let name = extract(
        tlv::require_str(payload, tag::MODNAME),
        code::MOD_BASE_MISSING,
    )?;
    let base = resolve_module(provider, &name, code::MOD_BASE_NOT_FOUND)?;
    let mut w = TlvWriter::new();
    w.put_u64(tag::ADDR, base);
    Ok(ok(MsgType::GetModBase, w))
}
