//! Bipolar derivation.
//!
//! The analysis engine works on two hemispheric channels built from the
//! four raw electrodes by subtracting the occipital reference from the
//! temporal electrode on the same side, which cancels common-mode noise:
//!
//! ```text
//! ch1 = T3 − O1   (left)
//! ch2 = T4 − O2   (right)
//! ```

use crate::types::{BipolarSample, RawSignalSample};

/// Derive the bipolar pair for one raw sample.
pub fn derive_one(raw: &RawSignalSample) -> BipolarSample {
    BipolarSample {
        ch1: raw.t3 - raw.o1,
        ch2: raw.t4 - raw.o2,
    }
}

/// Derive one [`BipolarSample`] per raw sample, preserving order exactly.
///
/// The engine is order-sensitive, so this never reorders, filters or
/// deduplicates.
pub fn derive(raw: &[RawSignalSample]) -> Vec<BipolarSample> {
    raw.iter().map(derive_one).collect()
}
