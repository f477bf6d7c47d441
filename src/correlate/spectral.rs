//! Spectral terms for the masked correlation identities.
//!
//! Each input contributes three zero-padded products, `image * mask`, `mask`
//! and `image^2 * mask`, placed at the origin corner of the padded shape. The
//! six products are forward-transformed once and the real buffers dropped.

use crate::fft::{Spectrum, Transform};
use crate::image::{NdImage, Sample, Shape};
use crate::trace::trace_span;
use crate::util::{MaskCorrError, MaskCorrResult};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Forward transforms of the six padded products.
pub struct SpectralTerms {
    /// `fixed * fixed_mask`.
    pub fixed_weighted: Spectrum,
    /// `fixed_mask`.
    pub fixed_mask: Spectrum,
    /// `fixed^2 * fixed_mask`.
    pub fixed_squared: Spectrum,
    /// `moving * moving_mask`.
    pub moving_weighted: Spectrum,
    /// `moving_mask`.
    pub moving_mask: Spectrum,
    /// `moving^2 * moving_mask`.
    pub moving_squared: Spectrum,
}

impl SpectralTerms {
    /// Returns the padded shape shared by all six terms.
    pub fn padded_shape(&self) -> &Shape {
        self.fixed_mask.shape()
    }
}

/// Checks a mask against its image extent and the non-negative weight range.
pub(crate) fn validate_mask<T, M: Sample>(
    role: &'static str,
    image: &NdImage<T>,
    mask: Option<&NdImage<M>>,
) -> MaskCorrResult<()> {
    let Some(mask) = mask else {
        return Ok(());
    };
    if mask.dims() != image.dims() {
        return Err(MaskCorrError::MaskExtentMismatch {
            role,
            image: image.dims().to_vec(),
            mask: mask.dims().to_vec(),
        });
    }
    for (index, &weight) in mask.data().iter().enumerate() {
        let value = weight.to_f64();
        if !value.is_finite() || value < 0.0 {
            return Err(MaskCorrError::NegativeMaskWeight { role, index, value });
        }
    }
    Ok(())
}

/// Returns the mask-weighted mean of `image`, or 0 when every weight is 0.
pub(crate) fn weighted_mean<T: Sample, M: Sample>(
    image: &NdImage<T>,
    mask: Option<&NdImage<M>>,
) -> f64 {
    let mut sum = 0.0;
    let mut weight = 0.0;
    for (flat, &sample) in image.data().iter().enumerate() {
        let w = mask.map_or(1.0, |m| m.data()[flat].to_f64());
        if w != 0.0 {
            sum += w * sample.to_f64();
            weight += w;
        }
    }
    if weight > 0.0 {
        sum / weight
    } else {
        0.0
    }
}

/// Builds `[image * mask, mask, image^2 * mask]` zero-padded to `padded`.
///
/// Samples are centered on the mask-weighted mean first. The correlation is
/// invariant to that offset, and centering keeps the energy differences from
/// cancelling on inputs that sit far from zero. Samples of weight zero are
/// skipped entirely. A missing mask weighs every sample by one.
pub(crate) fn padded_products<T: Sample, M: Sample>(
    image: &NdImage<T>,
    mask: Option<&NdImage<M>>,
    padded: &Shape,
) -> [Vec<f64>; 3] {
    let shape = image.shape();
    let mean = weighted_mean(image, mask);
    let mut weighted = vec![0.0; padded.len()];
    let mut weights = vec![0.0; padded.len()];
    let mut squared = vec![0.0; padded.len()];

    let mut index = vec![0usize; shape.ndim()];
    for (flat, &sample) in image.data().iter().enumerate() {
        let w = mask.map_or(1.0, |m| m.data()[flat].to_f64());
        if w == 0.0 {
            continue;
        }
        shape.unravel_into(flat, &mut index);
        let dst: usize = index
            .iter()
            .zip(padded.strides())
            .map(|(&i, &stride)| i * stride)
            .sum();
        let v = sample.to_f64() - mean;
        weighted[dst] = v * w;
        weights[dst] = w;
        squared[dst] = v * v * w;
    }
    [weighted, weights, squared]
}

/// Forms the six padded products and forward-transforms each one.
///
/// Mask extents and weights are validated first. With `parallel` set (and the
/// `rayon` feature enabled) the six transforms run concurrently.
pub fn build_spectral_terms<T, M, P>(
    fixed: &NdImage<T>,
    fixed_mask: Option<&NdImage<M>>,
    moving: &NdImage<T>,
    moving_mask: Option<&NdImage<M>>,
    padded: &Shape,
    transform: &P,
    parallel: bool,
) -> MaskCorrResult<SpectralTerms>
where
    T: Sample,
    M: Sample,
    P: Transform + ?Sized,
{
    let _span = trace_span!("build_spectral_terms", padded_len = padded.len()).entered();

    validate_mask("fixed", fixed, fixed_mask)?;
    validate_mask("moving", moving, moving_mask)?;
    for image in [fixed, moving] {
        let fits = image.shape().ndim() == padded.ndim()
            && image.dims().iter().zip(padded.dims()).all(|(&dim, &len)| dim <= len);
        if !fits {
            return Err(MaskCorrError::InvalidExtent {
                extent: padded.dims().to_vec(),
            });
        }
    }

    let [fw, fm, fs] = padded_products(fixed, fixed_mask, padded);
    let [mw, mm, ms] = padded_products(moving, moving_mask, padded);
    let buffers = vec![fw, fm, fs, mw, mm, ms];

    let mut spectra = forward_all(buffers, padded, transform, parallel)?.into_iter();
    let mut next = || {
        spectra
            .next()
            .ok_or(MaskCorrError::TransformFailure("missing spectral term"))
    };
    Ok(SpectralTerms {
        fixed_weighted: next()?,
        fixed_mask: next()?,
        fixed_squared: next()?,
        moving_weighted: next()?,
        moving_mask: next()?,
        moving_squared: next()?,
    })
}

#[cfg(feature = "rayon")]
fn forward_all<P: Transform + ?Sized>(
    buffers: Vec<Vec<f64>>,
    padded: &Shape,
    transform: &P,
    parallel: bool,
) -> MaskCorrResult<Vec<Spectrum>> {
    if parallel {
        buffers
            .into_par_iter()
            .map(|buffer| transform.forward(&buffer, padded))
            .collect()
    } else {
        forward_all_seq(buffers, padded, transform)
    }
}

#[cfg(not(feature = "rayon"))]
fn forward_all<P: Transform + ?Sized>(
    buffers: Vec<Vec<f64>>,
    padded: &Shape,
    transform: &P,
    _parallel: bool,
) -> MaskCorrResult<Vec<Spectrum>> {
    forward_all_seq(buffers, padded, transform)
}

fn forward_all_seq<P: Transform + ?Sized>(
    buffers: Vec<Vec<f64>>,
    padded: &Shape,
    transform: &P,
) -> MaskCorrResult<Vec<Spectrum>> {
    buffers
        .into_iter()
        .map(|buffer| transform.forward(&buffer, padded))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{padded_products, validate_mask, weighted_mean};
    use crate::image::{NdImage, Shape};
    use crate::util::MaskCorrError;

    #[test]
    fn padded_products_place_centered_data_at_origin_corner() {
        let image = NdImage::from_vec_2d(vec![1u8, 2, 4, 7], 2, 2).unwrap();
        let mask = NdImage::from_vec_2d(vec![1u8, 0, 1, 1], 2, 2).unwrap();
        let padded = Shape::new(&[3, 3]).unwrap();
        assert_eq!(weighted_mean(&image, Some(&mask)), 4.0);
        let [weighted, weights, squared] = padded_products(&image, Some(&mask), &padded);
        assert_eq!(weighted, vec![-3.0, 0.0, 0.0, 0.0, 3.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(weights, vec![1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(squared, vec![9.0, 0.0, 0.0, 0.0, 9.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn missing_mask_weighs_every_sample() {
        let image = NdImage::new(vec![2.0f32, -1.0], &[2]).unwrap();
        let padded = Shape::new(&[4]).unwrap();
        let [weighted, weights, squared] = padded_products::<f32, u8>(&image, None, &padded);
        assert_eq!(weighted, vec![1.5, -1.5, 0.0, 0.0]);
        assert_eq!(weights, vec![1.0, 1.0, 0.0, 0.0]);
        assert_eq!(squared, vec![2.25, 2.25, 0.0, 0.0]);
    }

    #[test]
    fn fractional_weights_scale_products() {
        let image = NdImage::new(vec![4.0f64, 8.0], &[2]).unwrap();
        let mask = NdImage::new(vec![0.25f64, 0.75], &[2]).unwrap();
        let padded = Shape::new(&[3]).unwrap();
        let [weighted, weights, squared] = padded_products(&image, Some(&mask), &padded);
        assert_eq!(weighted, vec![-0.75, 0.75, 0.0]);
        assert_eq!(weights, vec![0.25, 0.75, 0.0]);
        assert_eq!(squared, vec![2.25, 0.75, 0.0]);
    }

    #[test]
    fn constant_offset_does_not_change_products() {
        let base: Vec<u16> = vec![3, 9, 1, 4, 4, 0];
        let offset: Vec<u16> = base.iter().map(|&v| v + 60_000).collect();
        let base = NdImage::new(base, &[3, 2]).unwrap();
        let offset = NdImage::new(offset, &[3, 2]).unwrap();
        let padded = Shape::new(&[5, 3]).unwrap();
        assert_eq!(
            padded_products::<u16, u8>(&base, None, &padded),
            padded_products::<u16, u8>(&offset, None, &padded)
        );
    }

    #[test]
    fn zero_weight_samples_are_skipped() {
        let image = NdImage::new(vec![1.0f64, f64::NAN, 3.0], &[3]).unwrap();
        let mask = NdImage::new(vec![1u8, 0, 1], &[3]).unwrap();
        let padded = Shape::new(&[3]).unwrap();
        let [weighted, weights, squared] = padded_products(&image, Some(&mask), &padded);
        assert_eq!(weighted, vec![-1.0, 0.0, 1.0]);
        assert_eq!(weights, vec![1.0, 0.0, 1.0]);
        assert_eq!(squared, vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn validate_mask_rejects_bad_extent_and_weights() {
        let image = NdImage::from_vec_2d(vec![0u8; 6], 3, 2).unwrap();
        let mask = NdImage::from_vec_2d(vec![1u8; 6], 2, 3).unwrap();
        let err = validate_mask("fixed", &image, Some(&mask)).unwrap_err();
        assert_eq!(
            err,
            MaskCorrError::MaskExtentMismatch {
                role: "fixed",
                image: vec![3, 2],
                mask: vec![2, 3],
            }
        );

        let mask = NdImage::from_vec_2d(vec![1.0f32, 1.0, -0.5, 1.0, 1.0, 1.0], 3, 2).unwrap();
        let err = validate_mask("moving", &image, Some(&mask)).unwrap_err();
        assert_eq!(
            err,
            MaskCorrError::NegativeMaskWeight {
                role: "moving",
                index: 2,
                value: -0.5,
            }
        );
    }
}
