//! Named memory regions captured in snapshots.

use serde::{Deserialize, Serialize};

/// A named target memory window, optionally painted with a known pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub name: String,
    #[serde(with = "crate::address")]
    pub base: u32,
    pub size: u32,
    #[serde(
        default,
        with = "crate::address::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expected_pattern: Option<u32>,
}

impl MemoryRegion {
    pub fn new(name: impl Into<String>, base: u32, size: u32) -> Self {
        Self {
            name: name.into(),
            base,
            size,
            expected_pattern: None,
        }
    }

    pub fn with_pattern(mut self, pattern: u32) -> Self {
        self.expected_pattern = Some(pattern);
        self
    }

    /// Exclusive end address, widened to u64 so a region touching the top of
    /// the 32-bit space does not wrap.
    pub fn end(&self) -> u64 {
        u64::from(self.base) + u64::from(self.size)
    }
}

/// Region table of the memory-pattern debug build of the guest.
pub fn default_regions() -> Vec<MemoryRegion> {
    vec![
        MemoryRegion::new("guestBase", 0x4000_0000, 0x1000),
        MemoryRegion::new("stackRegion", 0x4100_0000, 0x1000).with_pattern(0xDEAD_BEEF),
        MemoryRegion::new("dataRegion", 0x4120_0000, 0x1000).with_pattern(0x1234_5678),
        MemoryRegion::new("heapRegion", 0x4140_0000, 0x1000).with_pattern(0xCAFE_BABE),
        MemoryRegion::new("patternRegion", 0x4200_0000, 0x4000).with_pattern(0x55AA_55AA),
        MemoryRegion::new("uartRegion", 0x0900_0000, 0x100),
    ]
}
