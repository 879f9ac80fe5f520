//! Pointer-chain walker.
//!
//! A chain is a base address plus a sequence of signed offsets. Each
//! step reads one pointer at the current address and adds the next
//! offset; the walk ends with a variable-length read at the resolved
//! address. Pointer width is protocol-driven so a 32-bit target run
//! under a 64-bit host still dereferences correctly.

use tracing::debug;

use crate::provider::MemoryProvider;

/// Width of one dereference step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PtrWidth {
    Four,
    Eight,
}

impl PtrWidth {
    pub fn bytes(self) -> u32 {
        match self {
            PtrWidth::Four => 4,
            PtrWidth::Eight => 8,
        }
    }

    /// Canonical wire tag for this width.
    pub fn label(self) -> &'static str {
        match self {
            PtrWidth::Four => "u32ptr",
            PtrWidth::Eight => "u64ptr",
        }
    }

    /// Recognize an explicit width override tag (either case).
    pub fn from_dtype(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "u32ptr" | "ptr32" | "u32" => Some(PtrWidth::Four),
            "u64ptr" | "ptr64" | "u64" => Some(PtrWidth::Eight),
            _ => None,
        }
    }

    /// Pick the width for a request: explicit override first, then the
    /// target's bitness, then the host pointer width.
    pub fn for_target(dtype: Option<&str>, provider: &dyn MemoryProvider) -> Self {
        if let Some(width) = dtype.and_then(PtrWidth::from_dtype) {
            return width;
        }
        if provider.is_32bit() || std::mem::size_of::<usize>() == 4 {
            PtrWidth::Four
        } else {
            PtrWidth::Eight
        }
    }
}

/// Outcome of a successful walk.
#[derive(Clone, Debug)]
pub struct Walked {
    /// Final dereferenced address.
    pub addr: u64,
    /// Bytes read at the final address (may be shorter than `len` for a
    /// partially mapped range).
    pub data: Vec<u8>,
    /// Width the walk used.
    pub width: PtrWidth,
    /// Effective final read length.
    pub len: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// An intermediate dereference failed; nothing was read past it.
    #[error("dereference step {step} failed at {addr:#x}: {reason}")]
    Step {
        step: usize,
        addr: u64,
        reason: String,
    },

    #[error("final read failed at {addr:#x}: {reason}")]
    FinalRead { addr: u64, reason: String },
}

fn read_pointer(
    provider: &dyn MemoryProvider,
    addr: u64,
    width: PtrWidth,
) -> Result<u64, String> {
    let want = width.bytes();
    let bytes = provider.read(addr, want).map_err(|e| e.to_string())?;
    if bytes.len() < want as usize {
        return Err(format!(
            "short pointer read: {} of {} bytes",
            bytes.len(),
            want
        ));
    }
    Ok(match width {
        PtrWidth::Four => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64,
        PtrWidth::Eight => u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]),
    })
}

/// Walk a pointer chain and read `len` bytes at the resolved address
/// (default: one pointer's worth).
///
/// Address arithmetic wraps modulo 2^64; negative offsets subtract.
/// A failed step aborts the walk, never a partial dereference. With
/// `trace` set, every step is logged at debug level.
pub fn walk(
    provider: &dyn MemoryProvider,
    base: u64,
    offsets: &[i64],
    dtype: Option<&str>,
    len: Option<u32>,
    trace: bool,
) -> Result<Walked, ChainError> {
    let width = PtrWidth::for_target(dtype, provider);
    let mut cur = base;

    for (step, &offset) in offsets.iter().enumerate() {
        let value = read_pointer(provider, cur, width).map_err(|reason| ChainError::Step {
            step,
            addr: cur,
            reason,
        })?;
        let next = value.wrapping_add_signed(offset);
        if trace {
            debug!("step {step}: [{cur:#x}] = {value:#x}, offset {offset} -> {next:#x}");
        }
        cur = next;
    }

    let len = len.unwrap_or_else(|| width.bytes());
    let data = provider
        .read(cur, len)
        .map_err(|e| ChainError::FinalRead {
            addr: cur,
            reason: e.to_string(),
        })?;
    if trace {
        debug!("final read at {cur:#x}: {} of {len} bytes", data.len());
    }

    Ok(Walked {
        addr: cur,
        data,
        width,
        len,
    })
}
