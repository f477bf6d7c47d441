//! Masked FFT normalized cross-correlation.
//!
//! [`masked_ncc`] runs one complete computation: plan the padded shape, build
//! the six spectral terms, assemble the normalized surface, then gate it by
//! overlap. [`MaskedCorrelator`] wraps the same pipeline behind setters and a
//! lazily recomputed result.

pub mod assemble;
mod engine;
pub mod overlap;
pub mod planner;
pub mod spectral;

pub use engine::MaskedCorrelator;
pub use overlap::{OverlapGate, OverlapRounding};

use crate::fft::Transform;
use crate::image::{NdImage, Sample, Shape};
use crate::trace::{trace_event, trace_span};
use crate::util::{MaskCorrError, MaskCorrResult};
use assemble::{assemble, correlate_terms, AssembleParams};
use planner::{output_shape, plan_padded_shape};
use spectral::build_spectral_terms;

/// Configuration for masked correlation.
#[derive(Clone, Debug, PartialEq)]
pub struct CorrelationConfig {
    /// Shifts with fewer overlapping pixels are set to zero.
    pub required_number_of_overlapping_pixels: u64,
    /// Shifts overlapping less than this fraction of the maximum overlap are set to zero.
    pub required_fraction_of_overlapping_pixels: f64,
    /// Rounding from weighted overlap sums to integer counts.
    pub overlap_rounding: OverlapRounding,
    /// Values within this many `f64::EPSILON` of the term scale are treated as zero.
    pub precision_tolerance_factor: f64,
    /// Allowed excess of `|correlation|` over 1 before it is reported as an anomaly.
    pub anomaly_tolerance: f64,
    /// Run the parallel phases on rayon (requires the `rayon` feature).
    pub parallel: bool,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            required_number_of_overlapping_pixels: 0,
            required_fraction_of_overlapping_pixels: 0.0,
            overlap_rounding: OverlapRounding::HalfUp,
            precision_tolerance_factor: 1000.0,
            anomaly_tolerance: 1e-6,
            parallel: false,
        }
    }
}

impl CorrelationConfig {
    /// Checks the fraction range and the tolerances.
    pub fn validate(&self) -> MaskCorrResult<()> {
        let fraction = self.required_fraction_of_overlapping_pixels;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(MaskCorrError::InvalidFraction(fraction));
        }
        for (name, value) in [
            ("precision_tolerance_factor", self.precision_tolerance_factor),
            ("anomaly_tolerance", self.anomaly_tolerance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(MaskCorrError::InvalidTolerance { name, value });
            }
        }
        Ok(())
    }
}

/// A correlation value that left [-1, 1] beyond tolerance or was not finite.
#[derive(Clone, Debug, PartialEq)]
pub struct NumericalAnomaly {
    /// Output location of the anomaly.
    pub index: Vec<usize>,
    /// Raw value before clamping.
    pub value: f64,
}

/// Correlation surface, overlap counts and derived statistics.
#[derive(Clone, Debug)]
pub struct CorrelationOutput {
    surface: NdImage<f64>,
    overlap: NdImage<u64>,
    max_overlap: u64,
    effective_required_overlap: u64,
    zero_shift: Vec<usize>,
    padded_shape: Shape,
    anomalies: Vec<NumericalAnomaly>,
}

impl CorrelationOutput {
    /// Returns the correlation surface, values in [-1, 1].
    pub fn surface(&self) -> &NdImage<f64> {
        &self.surface
    }

    /// Returns the rounded overlap count per shift.
    pub fn overlap_counts(&self) -> &NdImage<u64> {
        &self.overlap
    }

    /// Returns the largest overlap count over all shifts.
    pub fn max_overlap(&self) -> u64 {
        self.max_overlap
    }

    /// Returns the overlap threshold actually applied.
    pub fn effective_required_overlap(&self) -> u64 {
        self.effective_required_overlap
    }

    /// Returns the output index of the zero shift (`moving extent - 1` per axis).
    pub fn zero_shift_index(&self) -> &[usize] {
        &self.zero_shift
    }

    /// Converts an output index into the shift of the moving image.
    pub fn shift_at(&self, index: &[usize]) -> Vec<isize> {
        index
            .iter()
            .zip(&self.zero_shift)
            .map(|(&i, &zero)| i as isize - zero as isize)
            .collect()
    }

    /// Returns the padded transform shape used for the computation.
    pub fn padded_shape(&self) -> &Shape {
        &self.padded_shape
    }

    /// Returns the recorded numerical anomalies.
    pub fn anomalies(&self) -> &[NumericalAnomaly] {
        &self.anomalies
    }

    /// Fails with [`MaskCorrError::NumericalAnomaly`] if any anomaly was recorded.
    pub fn check(&self) -> MaskCorrResult<()> {
        if self.anomalies.is_empty() {
            return Ok(());
        }
        let worst_value = self
            .anomalies
            .iter()
            .map(|a| a.value)
            .fold(0.0f64, |worst, v| {
                if v.is_nan() || v.abs() > worst.abs() {
                    v
                } else {
                    worst
                }
            });
        Err(MaskCorrError::NumericalAnomaly {
            count: self.anomalies.len(),
            worst_value,
        })
    }

    /// Consumes the output and returns the surface.
    pub fn into_surface(self) -> NdImage<f64> {
        self.surface
    }
}

/// Computes the masked normalized cross-correlation of `moving` against `fixed`.
///
/// The output has extent `fixed + moving - 1` per axis. The value at output
/// index `o` is the correlation for the moving image displaced by
/// `o - (moving - 1)` from the fixed image. A missing mask counts every
/// sample with weight one.
pub fn masked_ncc<T, M, P>(
    fixed: &NdImage<T>,
    moving: &NdImage<T>,
    fixed_mask: Option<&NdImage<M>>,
    moving_mask: Option<&NdImage<M>>,
    config: &CorrelationConfig,
    transform: &P,
) -> MaskCorrResult<CorrelationOutput>
where
    T: Sample,
    M: Sample,
    P: Transform + ?Sized,
{
    config.validate()?;
    let _span = trace_span!("masked_ncc", ndim = fixed.shape().ndim()).entered();

    let output = output_shape(fixed.shape(), moving.shape())?;
    let padded = plan_padded_shape(fixed.shape(), moving.shape(), transform.max_prime_factor())?;
    trace_event!(
        "padded_shape",
        output_len = output.len(),
        padded_len = padded.len()
    );

    let spectra = build_spectral_terms(
        fixed,
        fixed_mask,
        moving,
        moving_mask,
        &padded,
        transform,
        config.parallel,
    )?;
    let terms = correlate_terms(&spectra, &output, moving.shape(), transform, config.parallel)?;
    drop(spectra);

    let mut assembled = assemble(
        &terms,
        AssembleParams {
            precision_tolerance_factor: config.precision_tolerance_factor,
            anomaly_tolerance: config.anomaly_tolerance,
            parallel: config.parallel,
        },
    );

    let gate = {
        let _span = trace_span!("overlap_gate").entered();
        OverlapGate::from_overlap(&terms.overlap, config.overlap_rounding)
    };
    let max_overlap = gate.max_overlap();
    let threshold = gate.effective_threshold(
        config.required_number_of_overlapping_pixels,
        config.required_fraction_of_overlapping_pixels,
    );
    gate.apply(&mut assembled, threshold, config.parallel)?;
    trace_event!(
        "overlap",
        max_overlap = max_overlap,
        effective_required_overlap = threshold,
        anomalies = assembled.anomalies.len()
    );

    let anomalies = assembled
        .anomalies
        .iter()
        .map(|&(flat, value)| NumericalAnomaly {
            index: output.unravel(flat),
            value,
        })
        .collect();

    let zero_shift: Vec<usize> = moving.dims().iter().map(|&m| m - 1).collect();
    let origin: Vec<f64> = fixed
        .origin()
        .iter()
        .zip(fixed.spacing())
        .zip(&zero_shift)
        .map(|((&o, &s), &lag)| o - lag as f64 * s)
        .collect();
    let spacing = fixed.spacing().to_vec();

    let surface = NdImage::from_shape(assembled.values, output.clone())?
        .with_metadata(origin.clone(), spacing.clone())?;
    let overlap =
        NdImage::from_shape(gate.into_counts(), output)?.with_metadata(origin, spacing)?;

    Ok(CorrelationOutput {
        surface,
        overlap,
        max_overlap,
        effective_required_overlap: threshold,
        zero_shift,
        padded_shape: padded,
        anomalies,
    })
}

#[cfg(test)]
mod tests {
    use super::{masked_ncc, CorrelationConfig, CorrelationOutput, NumericalAnomaly};
    use crate::fft::RustFftTransform;
    use crate::image::{NdImage, Shape};
    use crate::util::MaskCorrError;

    #[test]
    fn config_rejects_fraction_out_of_range() {
        let cfg = CorrelationConfig {
            required_fraction_of_overlapping_pixels: 1.5,
            ..CorrelationConfig::default()
        };
        assert_eq!(cfg.validate(), Err(MaskCorrError::InvalidFraction(1.5)));

        let cfg = CorrelationConfig {
            required_fraction_of_overlapping_pixels: f64::NAN,
            ..CorrelationConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(MaskCorrError::InvalidFraction(_))));
    }

    #[test]
    fn output_geometry_follows_fixed_metadata() {
        let fixed = NdImage::from_vec_2d((0u8..12).collect(), 4, 3)
            .unwrap()
            .with_metadata(vec![10.0, -2.0], vec![0.5, 2.0])
            .unwrap();
        let moving = NdImage::from_vec_2d(vec![1u8, 5, 2, 7], 2, 2).unwrap();
        let out = masked_ncc::<u8, u8, _>(
            &fixed,
            &moving,
            None,
            None,
            &CorrelationConfig::default(),
            &RustFftTransform::new(),
        )
        .unwrap();
        assert_eq!(out.surface().dims(), &[5, 4]);
        assert_eq!(out.surface().origin(), &[9.5, -4.0]);
        assert_eq!(out.surface().spacing(), &[0.5, 2.0]);
        assert_eq!(out.zero_shift_index(), &[1, 1]);
        assert_eq!(out.shift_at(&[0, 3]), vec![-1, 2]);
        assert_eq!(out.max_overlap(), 4);
    }

    #[test]
    fn check_reports_worst_anomaly() {
        let mut out = CorrelationOutput {
            surface: NdImage::filled(&[3], 0.0).unwrap(),
            overlap: NdImage::filled(&[3], 1u64).unwrap(),
            max_overlap: 1,
            effective_required_overlap: 0,
            zero_shift: vec![1],
            padded_shape: Shape::new(&[3]).unwrap(),
            anomalies: Vec::new(),
        };
        assert_eq!(out.check(), Ok(()));

        out.anomalies = vec![
            NumericalAnomaly {
                index: vec![0],
                value: 1.1,
            },
            NumericalAnomaly {
                index: vec![2],
                value: -3.0,
            },
        ];
        assert_eq!(
            out.check(),
            Err(MaskCorrError::NumericalAnomaly {
                count: 2,
                worst_value: -3.0,
            })
        );
    }
}
