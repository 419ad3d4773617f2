//! Function-name resolution for trace entries.

use serde::{Deserialize, Serialize};

/// Assumed extent of a function when the symbol carries no size.
pub const DEFAULT_SYMBOL_SIZE: u32 = 0x1000;

fn default_symbol_size() -> u32 {
    DEFAULT_SYMBOL_SIZE
}

/// A known function entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    #[serde(with = "crate::address")]
    pub address: u32,
    #[serde(default = "default_symbol_size")]
    pub size: u32,
}

impl Symbol {
    pub fn new(name: impl Into<String>, address: u32) -> Self {
        Self {
            name: name.into(),
            address,
            size: DEFAULT_SYMBOL_SIZE,
        }
    }

    fn contains(&self, pc: u32) -> bool {
        pc >= self.address && u64::from(pc) < u64::from(self.address) + u64::from(self.size)
    }
}

/// Symbols sorted by address for nearest-preceding lookup.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new(mut symbols: Vec<Symbol>) -> Self {
        symbols.sort_by_key(|s| s.address);
        Self { symbols }
    }

    /// Name of the closest symbol at or below `pc` whose extent covers it.
    pub fn resolve(&self, pc: u32) -> Option<&str> {
        let idx = self.symbols.partition_point(|s| s.address <= pc);
        self.symbols[..idx]
            .iter()
            .rev()
            .find(|s| s.contains(pc))
            .map(|s| s.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Entry points from the FreeRTOS debug build.
pub fn default_symbols() -> Vec<Symbol> {
    vec![
        Symbol::new("_start", 0x4000_0000),
        Symbol::new("vMemoryPatternDebugTask", 0x4000_08e8),
        Symbol::new("main", 0x4000_0e70),
        Symbol::new("vMonitorTask", 0x4000_1014),
    ]
}
