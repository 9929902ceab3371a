//! Deterministic split tie-breaking, so that the same encoded rows always
//! produce the same trees

/// Deterministic tie-breaker for split selection
/// Lower `(feature_idx, candidate)` wins among equal gains
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SplitTieBreaker {
    pub feature_idx: usize,
    /// Position of the threshold among the feature's sorted candidates
    pub candidate: usize,
}

impl SplitTieBreaker {
    pub fn new(feature_idx: usize, candidate: usize) -> Self {
        Self { feature_idx, candidate }
    }
}
