//! Register bank of the 32-bit ARM target.

use serde::{Deserialize, Serialize};

/// Number of registers transmitted by a full register read.
pub const REGISTER_COUNT: usize = 17;

/// Number of general purpose registers (r0-r12).
pub const GPR_COUNT: usize = 13;

/// Register names in wire order.
pub const REGISTER_NAMES: [&str; REGISTER_COUNT] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp", "lr",
    "pc", "cpsr",
];

/// State of all ARM core registers at one instant.
///
/// r0-r12: general purpose
/// sp (r13): stack pointer
/// lr (r14): link register
/// pc (r15): program counter
/// cpsr: current program status register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegisterBank {
    pub gpr: [u32; GPR_COUNT],
    pub sp: u32,
    pub lr: u32,
    pub pc: u32,
    pub cpsr: u32,
}

impl RegisterBank {
    /// Build a bank from registers in wire order.
    pub fn from_words(words: [u32; REGISTER_COUNT]) -> Self {
        let mut gpr = [0u32; GPR_COUNT];
        gpr.copy_from_slice(&words[..GPR_COUNT]);
        Self {
            gpr,
            sp: words[13],
            lr: words[14],
            pc: words[15],
            cpsr: words[16],
        }
    }

    /// Registers in wire order.
    pub fn words(&self) -> [u32; REGISTER_COUNT] {
        let mut words = [0u32; REGISTER_COUNT];
        words[..GPR_COUNT].copy_from_slice(&self.gpr);
        words[13] = self.sp;
        words[14] = self.lr;
        words[15] = self.pc;
        words[16] = self.cpsr;
        words
    }

    /// Look a register up by name (`r0`..`r15`, `sp`, `lr`, `pc`, `cpsr`).
    pub fn get(&self, name: &str) -> Option<u32> {
        match name {
            "r13" => return Some(self.sp),
            "r14" => return Some(self.lr),
            "r15" => return Some(self.pc),
            _ => {}
        }
        REGISTER_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|idx| self.words()[idx])
    }

    /// `(name, value)` pairs in wire order.
    pub fn named(&self) -> impl Iterator<Item = (&'static str, u32)> {
        REGISTER_NAMES.into_iter().zip(self.words())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RegisterBank {
        let mut words = [0u32; REGISTER_COUNT];
        for (i, w) in words.iter_mut().enumerate() {
            *w = 0x1000 + i as u32;
        }
        RegisterBank::from_words(words)
    }

    #[test]
    fn positional_layout() {
        let bank = sample();
        assert_eq!(bank.gpr[0], 0x1000);
        assert_eq!(bank.gpr[12], 0x100c);
        assert_eq!(bank.sp, 0x100d);
        assert_eq!(bank.lr, 0x100e);
        assert_eq!(bank.pc, 0x100f);
        assert_eq!(bank.cpsr, 0x1010);
    }

    #[test]
    fn words_round_trip_preserves_order() {
        let bank = sample();
        assert_eq!(RegisterBank::from_words(bank.words()), bank);
    }

    #[test]
    fn lookup_by_alias() {
        let bank = sample();
        assert_eq!(bank.get("sp"), bank.get("r13"));
        assert_eq!(bank.get("pc"), Some(0x100f));
        assert_eq!(bank.get("cpsr"), Some(0x1010));
        assert_eq!(bank.get("r16"), None);
    }

    #[test]
    fn named_pairs_follow_wire_order() {
        let names: Vec<_> = sample().named().map(|(n, _)| n).collect();
        assert_eq!(names.first(), Some(&"r0"));
        assert_eq!(names.last(), Some(&"cpsr"));
        assert_eq!(names.len(), REGISTER_COUNT);
    }

    #[test]
    fn serde_json_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["pc"], 0x100f);
        assert_eq!(json["gpr"].as_array().unwrap().len(), GPR_COUNT);
    }
}
