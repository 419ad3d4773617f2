//! Memory paint pattern validation.
//!
//! The guest paints regions with a repeating 32-bit word. A capture is
//! compared word by word (little-endian, non-overlapping, from offset 0).
//! Trailing bytes that do not form a full word are ignored: they count
//! neither as matches nor towards the denominator.

use serde::{Deserialize, Serialize};

/// A region counts as correctly painted above this match percentage.
pub const SUCCESS_THRESHOLD: f64 = 90.0;

/// Number of mismatching words kept for diagnostics.
pub const MAX_MISMATCH_SAMPLES: usize = 5;

/// One word that differs from the expected pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    /// Byte offset of the word inside the payload.
    pub offset: usize,
    /// Target address of the word.
    pub address: u64,
    pub expected: u32,
    pub actual: u32,
}

/// Outcome of comparing a payload against a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternResult {
    pub expected: Option<u32>,
    pub matches: u64,
    pub total_words: u64,
    pub match_percentage: f64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mismatches: Vec<Mismatch>,
}

impl PatternResult {
    /// Result for a region that has no expected pattern.
    ///
    /// `success` is false, but this is "not applicable", not a failed check.
    pub fn not_applicable(total_words: u64) -> Self {
        Self {
            expected: None,
            matches: 0,
            total_words,
            match_percentage: 0.0,
            success: false,
            mismatches: Vec::new(),
        }
    }

    pub fn is_applicable(&self) -> bool {
        self.expected.is_some()
    }
}

/// Compare `payload` (read from `base`) against `expected`.
pub fn validate_pattern(base: u32, payload: &[u8], expected: Option<u32>) -> PatternResult {
    let total_words = (payload.len() / 4) as u64;
    let Some(pattern) = expected else {
        return PatternResult::not_applicable(total_words);
    };

    let mut matches = 0u64;
    let mut mismatches = Vec::new();
    for (idx, chunk) in payload.chunks_exact(4).enumerate() {
        let actual = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if actual == pattern {
            matches += 1;
        } else if mismatches.len() < MAX_MISMATCH_SAMPLES {
            let offset = idx * 4;
            mismatches.push(Mismatch {
                offset,
                address: u64::from(base) + offset as u64,
                expected: pattern,
                actual,
            });
        }
    }

    let match_percentage = if total_words == 0 {
        0.0
    } else {
        matches as f64 * 100.0 / total_words as f64
    };

    PatternResult {
        expected: Some(pattern),
        matches,
        total_words,
        match_percentage,
        success: match_percentage > SUCCESS_THRESHOLD,
        mismatches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn painted(pattern: u32, words: usize) -> Vec<u8> {
        pattern.to_le_bytes().repeat(words)
    }

    #[test]
    fn fully_painted_region_succeeds() {
        let data = painted(0xDEAD_BEEF, 16);
        let result = validate_pattern(0x4100_0000, &data, Some(0xDEAD_BEEF));
        assert_eq!(result.matches, 16);
        assert_eq!(result.total_words, 16);
        assert_eq!(result.match_percentage, 100.0);
        assert!(result.success);
        assert!(result.mismatches.is_empty());
    }

    #[test]
    fn zero_memory_against_zero_pattern_is_full_match() {
        let result = validate_pattern(0, &[0u8; 64], Some(0));
        assert_eq!(result.match_percentage, 100.0);
    }

    #[test]
    fn words_are_little_endian() {
        let data = [0xEF, 0xBE, 0xAD, 0xDE];
        assert_eq!(validate_pattern(0, &data, Some(0xDEAD_BEEF)).matches, 1);
        let swapped = [0xDE, 0xAD, 0xBE, 0xEF];
        assert_eq!(validate_pattern(0, &swapped, Some(0xDEAD_BEEF)).matches, 0);
    }

    #[test]
    fn trailing_partial_word_is_ignored() {
        let mut data = painted(0x1234_5678, 3);
        data.extend_from_slice(&[0xff, 0xff]);
        let result = validate_pattern(0, &data, Some(0x1234_5678));
        assert_eq!(result.total_words, 3);
        assert_eq!(result.matches, 3);
        assert_eq!(result.match_percentage, 100.0);
    }

    #[test]
    fn ninety_percent_is_not_success() {
        let mut data = painted(0xCAFE_BABE, 9);
        data.extend_from_slice(&0u32.to_le_bytes());
        let result = validate_pattern(0, &data, Some(0xCAFE_BABE));
        assert_eq!(result.match_percentage, 90.0);
        assert!(!result.success);
    }

    #[test]
    fn mismatch_samples_are_capped_and_addressed() {
        let data = vec![0u8; 4 * 20];
        let result = validate_pattern(0x4200_0000, &data, Some(0x55AA_55AA));
        assert_eq!(result.mismatches.len(), MAX_MISMATCH_SAMPLES);
        assert_eq!(result.mismatches[1].offset, 4);
        assert_eq!(result.mismatches[1].address, 0x4200_0004);
        assert_eq!(result.mismatches[1].actual, 0);
    }

    #[test]
    fn absent_pattern_is_not_applicable() {
        let result = validate_pattern(0, &painted(1, 4), None);
        assert!(!result.is_applicable());
        assert_eq!(result.matches, 0);
        assert!(!result.success);
    }

    #[test]
    fn empty_payload_has_zero_percentage() {
        let result = validate_pattern(0, &[], Some(7));
        assert_eq!(result.total_words, 0);
        assert_eq!(result.match_percentage, 0.0);
        assert!(!result.success);
    }

    proptest! {
        #[test]
        fn bounds_hold_for_any_payload(
            data in proptest::collection::vec(any::<u8>(), 0..512),
            pattern in any::<u32>(),
        ) {
            let result = validate_pattern(0, &data, Some(pattern));
            prop_assert_eq!(result.total_words, (data.len() / 4) as u64);
            prop_assert!(result.matches <= result.total_words);
            prop_assert!((0.0..=100.0).contains(&result.match_percentage));
            prop_assert!(result.mismatches.len() <= MAX_MISMATCH_SAMPLES);
        }
    }
}
