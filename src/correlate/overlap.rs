//! Overlap counting and threshold gating.
//!
//! The overlap at a shift is the mask cross-correlation `cc(fixed_mask,
//! moving_mask)`. Counts are rounded to integers before they are compared
//! against the required threshold; shifts below it are forced to zero.

use crate::correlate::assemble::Assembled;
use crate::util::math::ceil_fraction_of;
use crate::util::{MaskCorrError, MaskCorrResult};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Rounding applied to weighted overlap sums before thresholding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverlapRounding {
    /// Round to nearest, ties up: `floor(x + 0.5)`.
    #[default]
    HalfUp,
    /// Round down after a `1e-6` slack that absorbs FFT round-off on whole counts.
    Truncate,
}

impl OverlapRounding {
    /// Converts a raw overlap sum into a count; negative round-off maps to 0.
    pub fn round(self, overlap: f64) -> u64 {
        if !overlap.is_finite() || overlap <= 0.0 {
            return 0;
        }
        let rounded = match self {
            OverlapRounding::HalfUp => (overlap + 0.5).floor(),
            OverlapRounding::Truncate => (overlap + 1e-6).floor(),
        };
        rounded as u64
    }
}

/// Rounded overlap counts for every shift and their maximum.
#[derive(Clone, Debug)]
pub struct OverlapGate {
    counts: Vec<u64>,
    max_overlap: u64,
}

impl OverlapGate {
    /// Rounds the raw overlap surface with the given policy.
    pub fn from_overlap(overlap: &[f64], rounding: OverlapRounding) -> Self {
        let counts: Vec<u64> = overlap.iter().map(|&n| rounding.round(n)).collect();
        let max_overlap = counts.iter().copied().max().unwrap_or(0);
        Self {
            counts,
            max_overlap,
        }
    }

    /// Returns the rounded count per shift.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Returns the largest rounded count over all shifts.
    pub fn max_overlap(&self) -> u64 {
        self.max_overlap
    }

    /// Returns `max(required_number, ceil(required_fraction * max_overlap))`.
    pub fn effective_threshold(&self, required_number: u64, required_fraction: f64) -> u64 {
        required_number.max(ceil_fraction_of(required_fraction, self.max_overlap))
    }

    /// Zeroes every shift whose count is below `threshold`.
    ///
    /// Anomalies recorded at gated shifts are dropped, since their values
    /// never reach the output. `assembled` must cover the same shifts.
    pub fn apply(
        &self,
        assembled: &mut Assembled,
        threshold: u64,
        parallel: bool,
    ) -> MaskCorrResult<()> {
        if assembled.values.len() != self.counts.len() {
            return Err(MaskCorrError::BufferSizeMismatch {
                needed: self.counts.len(),
                got: assembled.values.len(),
            });
        }
        zero_below(&mut assembled.values, &self.counts, threshold, parallel);
        assembled.anomalies.retain(|&(index, _)| {
            self.counts
                .get(index)
                .is_some_and(|&count| count >= threshold)
        });
        Ok(())
    }

    /// Consumes the gate and returns the counts.
    pub fn into_counts(self) -> Vec<u64> {
        self.counts
    }
}

#[cfg(feature = "rayon")]
fn zero_below(values: &mut [f64], counts: &[u64], threshold: u64, parallel: bool) {
    if parallel {
        values
            .par_iter_mut()
            .zip(counts.par_iter())
            .for_each(|(value, &count)| {
                if count < threshold {
                    *value = 0.0;
                }
            });
    } else {
        zero_below_seq(values, counts, threshold);
    }
}

#[cfg(not(feature = "rayon"))]
fn zero_below(values: &mut [f64], counts: &[u64], threshold: u64, _parallel: bool) {
    zero_below_seq(values, counts, threshold);
}

fn zero_below_seq(values: &mut [f64], counts: &[u64], threshold: u64) {
    for (value, &count) in values.iter_mut().zip(counts) {
        if count < threshold {
            *value = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{OverlapGate, OverlapRounding};
    use crate::correlate::assemble::Assembled;
    use crate::util::MaskCorrError;

    #[test]
    fn rounding_policies_differ_on_fractions() {
        assert_eq!(OverlapRounding::HalfUp.round(2.5), 3);
        assert_eq!(OverlapRounding::HalfUp.round(2.49), 2);
        assert_eq!(OverlapRounding::Truncate.round(2.99), 2);
        assert_eq!(OverlapRounding::Truncate.round(2.9999999), 3);
        assert_eq!(OverlapRounding::HalfUp.round(-1e-12), 0);
        assert_eq!(OverlapRounding::HalfUp.round(f64::NAN), 0);
    }

    #[test]
    fn effective_threshold_takes_stricter_rule() {
        let gate = OverlapGate::from_overlap(&[1.0, 16.0, 7.9999999], OverlapRounding::HalfUp);
        assert_eq!(gate.counts(), &[1, 16, 8]);
        assert_eq!(gate.max_overlap(), 16);
        assert_eq!(gate.effective_threshold(0, 0.0), 0);
        assert_eq!(gate.effective_threshold(3, 0.5), 8);
        assert_eq!(gate.effective_threshold(10, 0.5), 10);
        assert_eq!(gate.effective_threshold(0, 1.0), 16);
    }

    #[test]
    fn apply_zeroes_low_overlap_shifts_and_their_anomalies() {
        let gate = OverlapGate::from_overlap(&[2.0, 5.0, 9.0], OverlapRounding::HalfUp);
        let mut assembled = Assembled {
            values: vec![0.9, -0.4, 1.0],
            anomalies: vec![(0, 1.5), (2, 1.2)],
        };
        gate.apply(&mut assembled, 5, false).unwrap();
        assert_eq!(assembled.values, vec![0.0, -0.4, 1.0]);
        assert_eq!(assembled.anomalies, vec![(2, 1.2)]);
    }

    #[test]
    fn apply_rejects_mismatched_surfaces() {
        let gate = OverlapGate::from_overlap(&[2.0, 5.0, 9.0], OverlapRounding::HalfUp);
        let mut assembled = Assembled {
            values: vec![0.5, 0.5],
            anomalies: vec![(7, 2.0)],
        };
        assert_eq!(
            gate.apply(&mut assembled, 0, false),
            Err(MaskCorrError::BufferSizeMismatch { needed: 3, got: 2 })
        );
        assert_eq!(assembled.values, vec![0.5, 0.5]);

        // Out-of-range anomaly indices are discarded rather than indexed.
        let mut assembled = Assembled {
            values: vec![0.1, 0.2, 0.3],
            anomalies: vec![(1, 1.5), (7, 2.0)],
        };
        gate.apply(&mut assembled, 0, false).unwrap();
        assert_eq!(assembled.anomalies, vec![(1, 1.5)]);
    }
}
