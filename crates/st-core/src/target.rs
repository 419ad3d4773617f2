//! Typed reads of the register bank and the named memory regions.

use st_common::RegisterBank;
use st_config::MemoryRegion;
use st_store::RegionRead;
use tracing::warn;

use crate::remote::RemoteTarget;

/// Largest single `m` request; stubs cap their packet size.
pub const MAX_READ_CHUNK: u32 = 0x400;

/// Width of one ARM instruction.
pub const INSTRUCTION_SIZE: u32 = 4;

/// Read the full register bank, logging and swallowing any failure.
pub fn read_register_set<T: RemoteTarget + ?Sized>(target: &mut T) -> Option<RegisterBank> {
    match target.read_registers() {
        Ok(bank) => Some(bank),
        Err(e) => {
            warn!(error = %e, "register read unavailable");
            None
        }
    }
}

/// Reader for the configured region table.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    regions: Vec<MemoryRegion>,
    chunk: u32,
}

impl MemoryReader {
    pub fn new(regions: Vec<MemoryRegion>) -> Self {
        Self {
            regions,
            chunk: MAX_READ_CHUNK,
        }
    }

    /// Override the request size (tests use small chunks).
    pub fn with_chunk_size(mut self, chunk: u32) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    /// Read `size` bytes at `address` in chunks.
    ///
    /// Returns an empty buffer if any chunk fails or comes back short, so a
    /// partially read region is never mistaken for real memory contents.
    pub fn read_range<T: RemoteTarget + ?Sized>(
        &self,
        target: &mut T,
        address: u32,
        size: u32,
    ) -> Vec<u8> {
        let mut data = Vec::with_capacity(size as usize);
        let mut offset = 0u32;
        while offset < size {
            let len = self.chunk.min(size - offset);
            let Some(at) = address.checked_add(offset) else {
                warn!(address = %format!("{address:#010x}"), size, "region wraps the address space");
                return Vec::new();
            };
            match target.read_memory(at, len) {
                Ok(bytes) if bytes.len() == len as usize => data.extend_from_slice(&bytes),
                Ok(bytes) => {
                    warn!(
                        address = %format!("{at:#010x}"),
                        requested = len,
                        received = bytes.len(),
                        "incomplete memory read"
                    );
                    return Vec::new();
                }
                Err(e) => {
                    warn!(address = %format!("{at:#010x}"), error = %e, "memory read failed");
                    return Vec::new();
                }
            }
            offset += len;
        }
        data
    }

    /// Read every configured region. One failed region does not affect the
    /// others; it is returned with empty data.
    pub fn read_all<T: RemoteTarget + ?Sized>(&self, target: &mut T) -> Vec<RegionRead> {
        self.regions
            .iter()
            .map(|region| RegionRead {
                name: region.name.clone(),
                start: region.base,
                data: self.read_range(target, region.base, region.size),
                expected_pattern: region.expected_pattern,
            })
            .collect()
    }

    /// The instruction word at `pc`, if readable.
    pub fn read_instruction<T: RemoteTarget + ?Sized>(
        &self,
        target: &mut T,
        pc: u32,
    ) -> Option<Vec<u8>> {
        let bytes = self.read_range(target, pc, INSTRUCTION_SIZE);
        (!bytes.is_empty()).then_some(bytes)
    }
}
