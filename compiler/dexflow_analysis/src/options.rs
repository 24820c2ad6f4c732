//! Analysis configuration.

/// Knobs shared by the analyses.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct AnalysisOptions {
    /// Inlining-related analyses only run when set.
    pub enable_inlining: bool,
    /// Debug builds keep code as written; implies no inlining.
    pub debug: bool,
    /// Maximum number of counted instructions on a path for it to still
    /// count as a trivial early exit.
    pub simple_inlining_constraint_threshold: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        AnalysisOptions {
            enable_inlining: true,
            debug: false,
            simple_inlining_constraint_threshold: 2,
        }
    }
}

impl AnalysisOptions {
    #[must_use]
    pub fn with_enable_inlining(mut self, enable_inlining: bool) -> Self {
        self.enable_inlining = enable_inlining;
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn with_simple_inlining_constraint_threshold(mut self, threshold: usize) -> Self {
        self.simple_inlining_constraint_threshold = threshold;
        self
    }

    #[inline]
    pub fn is_inlining_enabled(&self) -> bool {
        self.enable_inlining && !self.debug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_disables_inlining() {
        let options = AnalysisOptions::default();
        assert!(options.is_inlining_enabled());
        assert_eq!(options.simple_inlining_constraint_threshold, 2);
        assert!(!options.clone().with_debug(true).is_inlining_enabled());
        assert!(!options.with_enable_inlining(false).is_inlining_enabled());
    }
}
