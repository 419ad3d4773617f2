//! Program-counter to execution-phase classification.

use st_config::{PhaseRange, UNKNOWN_PHASE};

/// Ordered phase table lookup.
///
/// Ranges may overlap; the first range listed that contains the PC wins, so
/// narrow phases must precede the broad ones they sit inside.
#[derive(Debug, Clone)]
pub struct PhaseClassifier {
    phases: Vec<PhaseRange>,
}

impl PhaseClassifier {
    pub fn new(phases: Vec<PhaseRange>) -> Self {
        Self { phases }
    }

    /// Name of the first phase containing `pc`, or `"unknown"`.
    pub fn classify(&self, pc: u32) -> &str {
        self.phases
            .iter()
            .find(|phase| phase.contains(pc))
            .map_or(UNKNOWN_PHASE, |phase| phase.name.as_str())
    }

    /// True when `current` differs from `previous`, including the very first
    /// classification of a session.
    pub fn detect_transition(previous: Option<&str>, current: &str) -> bool {
        previous != Some(current)
    }

    pub fn phases(&self) -> &[PhaseRange] {
        &self.phases
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_config::phases::default_phase_table;

    #[test]
    fn default_table_classifies_boot_stages() {
        let classifier = PhaseClassifier::new(default_phase_table());
        assert_eq!(classifier.classify(0x6000_0010), "elfloader");
        assert_eq!(classifier.classify(0x4000_0e70), "freertos_main");
        assert_eq!(classifier.classify(0x4000_08e8), "pattern_painting");
        assert_eq!(classifier.classify(0x4000_0100), "camkes_init");
        assert_eq!(classifier.classify(0x4000_3500), "scheduler_start");
        assert_eq!(classifier.classify(0x0000_0004), UNKNOWN_PHASE);
    }

    #[test]
    fn range_end_is_exclusive() {
        let classifier = PhaseClassifier::new(vec![PhaseRange::new("a", 0x100, 0x200)]);
        assert_eq!(classifier.classify(0x100), "a");
        assert_eq!(classifier.classify(0x1ff), "a");
        assert_eq!(classifier.classify(0x200), UNKNOWN_PHASE);
    }

    #[test]
    fn first_classification_is_a_transition() {
        assert!(PhaseClassifier::detect_transition(None, "freertos_main"));
        assert!(!PhaseClassifier::detect_transition(
            Some("freertos_main"),
            "freertos_main"
        ));
        assert!(PhaseClassifier::detect_transition(
            Some("freertos_main"),
            "scheduler_start"
        ));
    }

    #[test]
    fn empty_table_is_all_unknown() {
        let classifier = PhaseClassifier::new(Vec::new());
        assert_eq!(classifier.classify(0x4000_0000), UNKNOWN_PHASE);
    }
}
