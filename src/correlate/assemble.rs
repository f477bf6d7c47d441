//! Masked normalized cross-correlation assembly.
//!
//! With `cc(a, b)(s) = sum_j a[j] * b[j - s]` and `N = cc(fm, mm)`:
//!
//! ```text
//! numerator     = cc(f*fm, m*mm) - cc(f*fm, mm) * cc(fm, m*mm) / N
//! energy_fixed  = cc(f^2*fm, mm) - cc(f*fm, mm)^2 / N
//! energy_moving = cc(fm, m^2*mm) - cc(fm, m*mm)^2 / N
//! correlation   = numerator / sqrt(energy_fixed * energy_moving)
//! ```
//!
//! Energies and overlaps at or below a precision floor are treated as zero,
//! which yields a correlation of exactly zero.

use crate::correlate::planner::valid_region_offsets;
use crate::correlate::spectral::SpectralTerms;
use crate::fft::{Spectrum, Transform};
use crate::image::Shape;
use crate::trace::trace_span;
use crate::util::{MaskCorrError, MaskCorrResult};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Spatial-domain cross-correlations over the output extent.
#[derive(Clone, Debug, PartialEq)]
pub struct CorrelationTerms {
    /// `cc(fixed_mask, moving_mask)`: the weighted overlap `N`.
    pub overlap: Vec<f64>,
    /// `cc(fixed * fixed_mask, moving * moving_mask)`.
    pub cross: Vec<f64>,
    /// `cc(fixed * fixed_mask, moving_mask)`.
    pub fixed_sum: Vec<f64>,
    /// `cc(fixed_mask, moving * moving_mask)`.
    pub moving_sum: Vec<f64>,
    /// `cc(fixed^2 * fixed_mask, moving_mask)`.
    pub fixed_sq_sum: Vec<f64>,
    /// `cc(fixed_mask, moving^2 * moving_mask)`.
    pub moving_sq_sum: Vec<f64>,
}

/// Tolerances for turning correlation terms into a clamped surface.
#[derive(Clone, Copy, Debug)]
pub struct AssembleParams {
    /// Multiple of `f64::EPSILON` times the term maximum below which a value is zero.
    pub precision_tolerance_factor: f64,
    /// Allowed excess of `|correlation|` over 1 before it counts as an anomaly.
    pub anomaly_tolerance: f64,
    /// Evaluate shifts in parallel (requires the `rayon` feature).
    pub parallel: bool,
}

/// Clamped correlation values plus the raw values that left [-1, 1].
#[derive(Clone, Debug, PartialEq)]
pub struct Assembled {
    /// Correlation per output location, in [-1, 1].
    pub values: Vec<f64>,
    /// `(flat index, raw value)` for every out-of-range or non-finite result.
    pub anomalies: Vec<(usize, f64)>,
}

/// Inverse-transforms the six spectral products and crops them to `output`.
pub fn correlate_terms<P: Transform + ?Sized>(
    terms: &SpectralTerms,
    output: &Shape,
    moving: &Shape,
    transform: &P,
    parallel: bool,
) -> MaskCorrResult<CorrelationTerms> {
    let padded = terms.padded_shape();
    let offsets = valid_region_offsets(output, padded, moving);
    let pairs: [(&Spectrum, &Spectrum); 6] = [
        (&terms.fixed_mask, &terms.moving_mask),
        (&terms.fixed_weighted, &terms.moving_weighted),
        (&terms.fixed_weighted, &terms.moving_mask),
        (&terms.fixed_mask, &terms.moving_weighted),
        (&terms.fixed_squared, &terms.moving_mask),
        (&terms.fixed_mask, &terms.moving_squared),
    ];

    let cross_correlate = |(a, b): (&Spectrum, &Spectrum)| -> MaskCorrResult<Vec<f64>> {
        let product = a.mul_conj(b, parallel)?;
        let circular = transform.inverse(product)?;
        if circular.len() != padded.len() {
            return Err(MaskCorrError::TransformShapeMismatch {
                expected: padded.len(),
                got: circular.len(),
            });
        }
        Ok(offsets.iter().map(|&offset| circular[offset]).collect())
    };

    let mut cropped = map_pairs(pairs, cross_correlate, parallel)?.into_iter();
    let mut next = || {
        cropped
            .next()
            .ok_or(MaskCorrError::TransformFailure("missing cross-correlation"))
    };
    Ok(CorrelationTerms {
        overlap: next()?,
        cross: next()?,
        fixed_sum: next()?,
        moving_sum: next()?,
        fixed_sq_sum: next()?,
        moving_sq_sum: next()?,
    })
}

#[cfg(feature = "rayon")]
fn map_pairs<'s, F>(
    pairs: [(&'s Spectrum, &'s Spectrum); 6],
    f: F,
    parallel: bool,
) -> MaskCorrResult<Vec<Vec<f64>>>
where
    F: Fn((&'s Spectrum, &'s Spectrum)) -> MaskCorrResult<Vec<f64>> + Sync + Send,
{
    if parallel {
        pairs.into_par_iter().map(f).collect()
    } else {
        pairs.into_iter().map(f).collect()
    }
}

#[cfg(not(feature = "rayon"))]
fn map_pairs<'s, F>(
    pairs: [(&'s Spectrum, &'s Spectrum); 6],
    f: F,
    _parallel: bool,
) -> MaskCorrResult<Vec<Vec<f64>>>
where
    F: Fn((&'s Spectrum, &'s Spectrum)) -> MaskCorrResult<Vec<f64>>,
{
    pairs.into_iter().map(f).collect()
}

#[derive(Clone, Copy, Debug)]
struct Floors {
    overlap: f64,
    fixed: f64,
    moving: f64,
}

impl Floors {
    fn new(terms: &CorrelationTerms, factor: f64) -> Self {
        let scale = factor * f64::EPSILON;
        Self {
            overlap: scale * max_of(&terms.overlap),
            fixed: scale * max_of(&terms.fixed_sq_sum),
            moving: scale * max_of(&terms.moving_sq_sum),
        }
    }
}

fn max_of(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0, f64::max)
}

/// Raw correlation at one shift; zero when the overlap or an energy vanishes.
///
/// Any non-finite term yields NaN so that it is reported, not hidden.
fn correlate_at(terms: &CorrelationTerms, i: usize, floors: Floors) -> f64 {
    let n = terms.overlap[i];
    let cross = terms.cross[i];
    let fixed_sum = terms.fixed_sum[i];
    let moving_sum = terms.moving_sum[i];
    let fixed_sq_sum = terms.fixed_sq_sum[i];
    let moving_sq_sum = terms.moving_sq_sum[i];
    let finite = [n, cross, fixed_sum, moving_sum, fixed_sq_sum, moving_sq_sum]
        .iter()
        .all(|v| v.is_finite());
    if !finite {
        return f64::NAN;
    }
    if n <= floors.overlap {
        return 0.0;
    }
    let fixed_energy = fixed_sq_sum - fixed_sum * fixed_sum / n;
    let moving_energy = moving_sq_sum - moving_sum * moving_sum / n;
    if fixed_energy <= floors.fixed || moving_energy <= floors.moving {
        return 0.0;
    }
    let numerator = cross - fixed_sum * moving_sum / n;
    numerator / (fixed_energy * moving_energy).sqrt()
}

/// Clamps a raw value into [-1, 1]; `None` when it was within tolerance.
fn clamp_checked(raw: f64, tolerance: f64) -> (f64, Option<f64>) {
    if !raw.is_finite() {
        return (0.0, Some(raw));
    }
    let anomaly = (raw.abs() > 1.0 + tolerance).then_some(raw);
    (raw.clamp(-1.0, 1.0), anomaly)
}

/// Evaluates, clamps and checks the correlation at every output location.
pub fn assemble(terms: &CorrelationTerms, params: AssembleParams) -> Assembled {
    let len = terms.overlap.len();
    let _span = trace_span!("assemble", shifts = len).entered();

    let floors = Floors::new(terms, params.precision_tolerance_factor);
    let eval = |i: usize| clamp_checked(correlate_at(terms, i, floors), params.anomaly_tolerance);
    let evaluated = evaluate_all(len, eval, params.parallel);

    let mut values = Vec::with_capacity(len);
    let mut anomalies = Vec::new();
    for (i, (value, anomaly)) in evaluated.into_iter().enumerate() {
        values.push(value);
        if let Some(raw) = anomaly {
            anomalies.push((i, raw));
        }
    }
    Assembled { values, anomalies }
}

#[cfg(feature = "rayon")]
fn evaluate_all<F>(len: usize, eval: F, parallel: bool) -> Vec<(f64, Option<f64>)>
where
    F: Fn(usize) -> (f64, Option<f64>) + Sync + Send,
{
    if parallel {
        (0..len).into_par_iter().map(eval).collect()
    } else {
        (0..len).map(eval).collect()
    }
}

#[cfg(not(feature = "rayon"))]
fn evaluate_all<F>(len: usize, eval: F, _parallel: bool) -> Vec<(f64, Option<f64>)>
where
    F: Fn(usize) -> (f64, Option<f64>),
{
    (0..len).map(eval).collect()
}
