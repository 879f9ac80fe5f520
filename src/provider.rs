//! The capability granting access to the target process's memory.
//!
//! The protocol engine never touches raw OS handles; a host embeds the
//! crate by implementing [`MemoryProvider`] over whatever debug API it
//! holds (e.g. `ReadProcessMemory` on Windows, `process_vm_readv` on
//! Linux).

use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("read failed at {addr:#x}: {reason}")]
    Read { addr: u64, reason: String },

    #[error("write failed at {addr:#x}: {reason}")]
    Write { addr: u64, reason: String },

    #[error("module enumeration failed: {0}")]
    Modules(String),
}

/// One module loaded in the target process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Module {
    /// Bare file name, e.g. `kernel32.dll`.
    pub name: String,
    /// Load base address.
    pub base: u64,
}

/// Read/write access to one attached target process.
///
/// `read` may return fewer bytes than requested when only part of the
/// range is mapped; it errors only when nothing could be read. `write`
/// succeeds only if every byte was written.
pub trait MemoryProvider: Send + Sync {
    fn read(&self, addr: u64, len: u32) -> Result<Vec<u8>, ProviderError>;

    fn write(&self, addr: u64, data: &[u8]) -> Result<usize, ProviderError>;

    fn modules(&self) -> Result<Vec<Module>, ProviderError>;

    /// Whether the target is a 32-bit process; decides the default
    /// pointer width for chain walks.
    fn is_32bit(&self) -> bool;
}

/// Case-insensitive module lookup; first match wins.
pub fn find_module_base(
    provider: &dyn MemoryProvider,
    name: &str,
) -> Result<Option<u64>, ProviderError> {
    let wanted = name.to_lowercase();
    Ok(provider
        .modules()?
        .into_iter()
        .find(|m| m.name.to_lowercase() == wanted)
        .map(|m| m.base))
}

/// In-process provider backed by a byte arena mapped at a fixed base.
///
/// Serves the loopback demo and the end-to-end tests; real hosts bind a
/// provider over an actual process handle instead.
pub struct ArenaProvider {
    base: u64,
    mem: Mutex<Vec<u8>>,
    modules: Vec<Module>,
    is_32bit: bool,
}

impl ArenaProvider {
    pub fn new(base: u64, size: usize) -> Self {
        ArenaProvider {
            base,
            mem: Mutex::new(vec![0u8; size]),
            modules: Vec::new(),
            is_32bit: false,
        }
    }

    /// Register a synthetic module.
    pub fn add_module(&mut self, name: &str, base: u64) {
        self.modules.push(Module {
            name: name.to_string(),
            base,
        });
    }

    pub fn set_32bit(&mut self, v: bool) {
        self.is_32bit = v;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.mem.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MemoryProvider for ArenaProvider {
    fn read(&self, addr: u64, len: u32) -> Result<Vec<u8>, ProviderError> {
        let mem = self.lock();
        let end = self.base + mem.len() as u64;
        if addr < self.base || addr >= end {
            return Err(ProviderError::Read {
                addr,
                reason: "address is not mapped".to_string(),
            });
        }
        let start = (addr - self.base) as usize;
        // Ranges running off the end of the arena read short, like a
        // partially mapped region would.
        let stop = mem.len().min(start + len as usize);
        Ok(mem[start..stop].to_vec())
    }

    fn write(&self, addr: u64, data: &[u8]) -> Result<usize, ProviderError> {
        let mut mem = self.lock();
        let end = self.base + mem.len() as u64;
        let fits = addr
            .checked_add(data.len() as u64)
            .map_or(false, |stop| addr >= self.base && stop <= end);
        if !fits {
            return Err(ProviderError::Write {
                addr,
                reason: "range is not mapped".to_string(),
            });
        }
        let start = (addr - self.base) as usize;
        mem[start..start + data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn modules(&self) -> Result<Vec<Module>, ProviderError> {
        Ok(self.modules.clone())
    }

    fn is_32bit(&self) -> bool {
        self.is_32bit
    }
}
