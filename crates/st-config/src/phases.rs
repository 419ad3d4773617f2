//! Phase table types.
//!
//! A phase is a named, half-open program-counter range `[start, end)`. The
//! table is ordered; lookups take the first range that contains the PC, so
//! overlapping entries are legal and resolved by position.

use serde::{Deserialize, Serialize};

/// Reserved phase name returned when no range matches.
pub const UNKNOWN_PHASE: &str = "unknown";

/// One named entry of the ordered phase table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRange {
    pub name: String,
    #[serde(with = "crate::address")]
    pub start: u32,
    #[serde(with = "crate::address")]
    pub end: u32,
}

impl PhaseRange {
    pub fn new(name: impl Into<String>, start: u32, end: u32) -> Self {
        Self {
            name: name.into(),
            start,
            end,
        }
    }

    pub fn contains(&self, pc: u32) -> bool {
        self.start <= pc && pc < self.end
    }

    pub fn overlaps(&self, other: &PhaseRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Unnamed half-open address range, used for "always snapshot" windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRange {
    #[serde(with = "crate::address")]
    pub start: u32,
    #[serde(with = "crate::address")]
    pub end: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl AddressRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self {
            start,
            end,
            label: None,
        }
    }

    pub fn contains(&self, pc: u32) -> bool {
        self.start <= pc && pc < self.end
    }
}

/// Boot phases of the FreeRTOS-on-seL4 guest.
///
/// `freertos_main` and `pattern_painting` sit inside the `camkes_init`
/// window and are listed before it so they win the first-match lookup.
pub fn default_phase_table() -> Vec<PhaseRange> {
    vec![
        PhaseRange::new("elfloader", 0x6000_0000, 0x6100_0000),
        PhaseRange::new("seL4_boot", 0xe000_0000, 0xe100_0000),
        PhaseRange::new("rootserver_start", 0x0001_0000, 0x0002_0000),
        PhaseRange::new("freertos_main", 0x4000_0e70, 0x4000_1000),
        PhaseRange::new("pattern_painting", 0x4000_08e8, 0x4000_1000),
        PhaseRange::new("camkes_init", 0x4000_0000, 0x4000_1000),
        PhaseRange::new("scheduler_start", 0x4000_3000, 0x4000_4000),
    ]
}
