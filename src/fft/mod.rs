//! Transform capability consumed by the correlation engine.
//!
//! The engine never picks an FFT implementation itself; callers construct a
//! [`Transform`] and pass it in. `RustFftTransform` is the bundled backend.

use crate::image::Shape;
use crate::util::{MaskCorrError, MaskCorrResult};
pub use rustfft::num_complex::Complex;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

mod backend;

pub use backend::RustFftTransform;

/// Half spectrum of a real-valued array over a padded shape.
///
/// Axis 0 keeps the `len / 2 + 1` non-negative frequency bins; every other
/// axis is complete. Bins are laid out with axis 0 fastest, like images.
#[derive(Clone, Debug, PartialEq)]
pub struct Spectrum {
    shape: Shape,
    data: Vec<Complex<f64>>,
}

impl Spectrum {
    /// Wraps transform output; `data` must hold [`Spectrum::bin_count`] bins.
    pub fn new(data: Vec<Complex<f64>>, shape: Shape) -> MaskCorrResult<Self> {
        let expected = Self::bin_count(&shape);
        if data.len() != expected {
            return Err(MaskCorrError::TransformShapeMismatch {
                expected,
                got: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Returns the bin extent for a real array of `shape`.
    pub fn bin_dims(shape: &Shape) -> Vec<usize> {
        let mut dims = shape.dims().to_vec();
        dims[0] = dims[0] / 2 + 1;
        dims
    }

    /// Returns the number of bins for a real array of `shape`.
    pub fn bin_count(shape: &Shape) -> usize {
        let dims = shape.dims();
        (dims[0] / 2 + 1) * (shape.len() / dims[0])
    }

    /// Returns the real padded shape the spectrum was computed from.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the frequency bins in memory order.
    pub fn data(&self) -> &[Complex<f64>] {
        &self.data
    }

    /// Splits the spectrum into its bins and shape.
    pub fn into_parts(self) -> (Vec<Complex<f64>>, Shape) {
        (self.data, self.shape)
    }

    /// Returns `self * conj(other)` bin by bin.
    ///
    /// The inverse transform of the result is the circular cross-correlation
    /// `sum_j a[j] * b[j - k]`.
    pub fn mul_conj(&self, other: &Spectrum, parallel: bool) -> MaskCorrResult<Spectrum> {
        if self.shape != other.shape {
            return Err(MaskCorrError::TransformShapeMismatch {
                expected: self.data.len(),
                got: other.data.len(),
            });
        }
        let data = mul_conj_bins(&self.data, &other.data, parallel);
        Ok(Spectrum {
            shape: self.shape.clone(),
            data,
        })
    }
}

#[cfg(feature = "rayon")]
fn mul_conj_bins(a: &[Complex<f64>], b: &[Complex<f64>], parallel: bool) -> Vec<Complex<f64>> {
    if parallel {
        a.par_iter().zip(b.par_iter()).map(|(&x, &y)| x * y.conj()).collect()
    } else {
        a.iter().zip(b).map(|(&x, &y)| x * y.conj()).collect()
    }
}

#[cfg(not(feature = "rayon"))]
fn mul_conj_bins(a: &[Complex<f64>], b: &[Complex<f64>], _parallel: bool) -> Vec<Complex<f64>> {
    a.iter().zip(b).map(|(&x, &y)| x * y.conj()).collect()
}

/// Forward and inverse real-valued N-D transforms.
///
/// `inverse(forward(x))` must reproduce `x` up to floating-point tolerance,
/// so the `1 / len` normalization belongs to `inverse`.
pub trait Transform: Send + Sync {
    /// Transforms real samples laid out over `shape` into their half spectrum.
    fn forward(&self, input: &[f64], shape: &Shape) -> MaskCorrResult<Spectrum>;

    /// Transforms a spectrum back to real samples over its shape.
    fn inverse(&self, spectrum: Spectrum) -> MaskCorrResult<Vec<f64>>;

    /// Largest prime factor of axis lengths this backend handles efficiently.
    fn max_prime_factor(&self) -> usize {
        5
    }
}

impl<T: Transform + ?Sized> Transform for &T {
    fn forward(&self, input: &[f64], shape: &Shape) -> MaskCorrResult<Spectrum> {
        (**self).forward(input, shape)
    }

    fn inverse(&self, spectrum: Spectrum) -> MaskCorrResult<Vec<f64>> {
        (**self).inverse(spectrum)
    }

    fn max_prime_factor(&self) -> usize {
        (**self).max_prime_factor()
    }
}
