//! `rustfft`/`realfft`-backed separable N-D transform.
//!
//! Axis 0 lines are contiguous and go through a real-to-complex transform,
//! leaving `len / 2 + 1` bins per line. The remaining axes are complex
//! transforms over that half spectrum: every outer block is transposed into a
//! line-contiguous scratch buffer, transformed, and transposed back.

use crate::fft::{Spectrum, Transform};
use crate::image::Shape;
use crate::util::{MaskCorrError, MaskCorrResult};
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftDirection, FftPlanner};
use std::sync::{Arc, Mutex};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Target number of samples handed to one parallel task.
#[cfg(feature = "rayon")]
const PAR_CHUNK_SAMPLES: usize = 16 * 1024;

/// Transform provider built on `realfft` and `rustfft` plans.
///
/// Plans are cached by the inner planners, so repeated calls at the same
/// padded shape reuse them.
pub struct RustFftTransform {
    real: Mutex<RealFftPlanner<f64>>,
    complex: Mutex<FftPlanner<f64>>,
    parallel: bool,
}

impl RustFftTransform {
    /// Creates a sequential transform provider.
    pub fn new() -> Self {
        Self {
            real: Mutex::new(RealFftPlanner::new()),
            complex: Mutex::new(FftPlanner::new()),
            parallel: false,
        }
    }

    /// Enables line-parallel transforms (effective with the `rayon` feature).
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    fn plan(&self, len: usize, direction: FftDirection) -> MaskCorrResult<Arc<dyn Fft<f64>>> {
        let mut planner = self
            .complex
            .lock()
            .map_err(|_| MaskCorrError::TransformFailure("fft planner lock poisoned"))?;
        Ok(planner.plan_fft(len, direction))
    }

    fn real_planner(&self) -> MaskCorrResult<std::sync::MutexGuard<'_, RealFftPlanner<f64>>> {
        self.real
            .lock()
            .map_err(|_| MaskCorrError::TransformFailure("real fft planner lock poisoned"))
    }

    /// Complex passes over every axis but the first.
    fn transform_outer_axes(
        &self,
        data: &mut [Complex<f64>],
        bins: &Shape,
        direction: FftDirection,
    ) -> MaskCorrResult<()> {
        let mut scratch = Vec::new();
        for (axis, &len) in bins.dims().iter().enumerate().skip(1) {
            if len == 1 {
                continue;
            }
            let fft = self.plan(len, direction)?;
            let inner = bins.strides()[axis];
            if inner == 1 {
                self.process_lines(fft.as_ref(), len, data);
                continue;
            }

            let block_len = inner * len;
            scratch.resize(block_len, Complex::new(0.0, 0.0));
            for block in data.chunks_exact_mut(block_len) {
                for k in 0..len {
                    let row = &block[k * inner..(k + 1) * inner];
                    for (i, &value) in row.iter().enumerate() {
                        scratch[i * len + k] = value;
                    }
                }
                self.process_lines(fft.as_ref(), len, &mut scratch);
                for k in 0..len {
                    let row = &mut block[k * inner..(k + 1) * inner];
                    for (i, slot) in row.iter_mut().enumerate() {
                        *slot = scratch[i * len + k];
                    }
                }
            }
        }
        Ok(())
    }

    #[cfg(feature = "rayon")]
    fn process_lines(&self, fft: &dyn Fft<f64>, len: usize, lines: &mut [Complex<f64>]) {
        if self.parallel && lines.len() > len {
            let per_task = (PAR_CHUNK_SAMPLES / len).max(1) * len;
            lines
                .par_chunks_mut(per_task)
                .for_each(|chunk| fft.process(chunk));
        } else {
            fft.process(lines);
        }
    }

    #[cfg(not(feature = "rayon"))]
    fn process_lines(&self, fft: &dyn Fft<f64>, _len: usize, lines: &mut [Complex<f64>]) {
        fft.process(lines);
    }

    #[cfg(feature = "rayon")]
    fn forward_lines(
        &self,
        r2c: &dyn RealToComplex<f64>,
        len: usize,
        input: &[f64],
        bins: &mut [Complex<f64>],
    ) -> MaskCorrResult<()> {
        let half = len / 2 + 1;
        if self.parallel && input.len() > len {
            let lines = (PAR_CHUNK_SAMPLES / len).max(1);
            bins.par_chunks_mut(lines * half)
                .zip(input.par_chunks(lines * len))
                .try_for_each(|(dst, src)| forward_block(r2c, len, src, dst))
        } else {
            forward_block(r2c, len, input, bins)
        }
    }

    #[cfg(not(feature = "rayon"))]
    fn forward_lines(
        &self,
        r2c: &dyn RealToComplex<f64>,
        len: usize,
        input: &[f64],
        bins: &mut [Complex<f64>],
    ) -> MaskCorrResult<()> {
        let _ = self.parallel;
        forward_block(r2c, len, input, bins)
    }

    #[cfg(feature = "rayon")]
    fn inverse_lines(
        &self,
        c2r: &dyn ComplexToReal<f64>,
        len: usize,
        bins: &mut [Complex<f64>],
        output: &mut [f64],
    ) -> MaskCorrResult<()> {
        let half = len / 2 + 1;
        if self.parallel && output.len() > len {
            let lines = (PAR_CHUNK_SAMPLES / len).max(1);
            bins.par_chunks_mut(lines * half)
                .zip(output.par_chunks_mut(lines * len))
                .try_for_each(|(src, dst)| inverse_block(c2r, len, src, dst))
        } else {
            inverse_block(c2r, len, bins, output)
        }
    }

    #[cfg(not(feature = "rayon"))]
    fn inverse_lines(
        &self,
        c2r: &dyn ComplexToReal<f64>,
        len: usize,
        bins: &mut [Complex<f64>],
        output: &mut [f64],
    ) -> MaskCorrResult<()> {
        inverse_block(c2r, len, bins, output)
    }
}

fn forward_block(
    r2c: &dyn RealToComplex<f64>,
    len: usize,
    input: &[f64],
    bins: &mut [Complex<f64>],
) -> MaskCorrResult<()> {
    let half = len / 2 + 1;
    let mut line = vec![0.0; len];
    for (src, dst) in input.chunks_exact(len).zip(bins.chunks_exact_mut(half)) {
        line.copy_from_slice(src);
        r2c.process(&mut line, dst)
            .map_err(|_| MaskCorrError::TransformFailure("real forward transform failed"))?;
    }
    Ok(())
}

fn inverse_block(
    c2r: &dyn ComplexToReal<f64>,
    len: usize,
    bins: &mut [Complex<f64>],
    output: &mut [f64],
) -> MaskCorrResult<()> {
    let half = len / 2 + 1;
    for (src, dst) in bins.chunks_exact_mut(half).zip(output.chunks_exact_mut(len)) {
        // The DC and Nyquist bins of a real line are real.
        src[0].im = 0.0;
        if len % 2 == 0 {
            src[half - 1].im = 0.0;
        }
        c2r.process(src, dst)
            .map_err(|_| MaskCorrError::TransformFailure("real inverse transform failed"))?;
    }
    Ok(())
}

impl Default for RustFftTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for RustFftTransform {
    fn forward(&self, input: &[f64], shape: &Shape) -> MaskCorrResult<Spectrum> {
        if input.len() != shape.len() {
            return Err(MaskCorrError::TransformShapeMismatch {
                expected: shape.len(),
                got: input.len(),
            });
        }
        let bins = Shape::new(&Spectrum::bin_dims(shape))?;
        let len = shape.dims()[0];
        let mut data = vec![Complex::new(0.0, 0.0); bins.len()];
        if len == 1 {
            for (slot, &v) in data.iter_mut().zip(input) {
                *slot = Complex::new(v, 0.0);
            }
        } else {
            let r2c = self.real_planner()?.plan_fft_forward(len);
            self.forward_lines(r2c.as_ref(), len, input, &mut data)?;
        }
        self.transform_outer_axes(&mut data, &bins, FftDirection::Forward)?;
        Spectrum::new(data, shape.clone())
    }

    fn inverse(&self, spectrum: Spectrum) -> MaskCorrResult<Vec<f64>> {
        let (mut data, shape) = spectrum.into_parts();
        let bins = Shape::new(&Spectrum::bin_dims(&shape))?;
        self.transform_outer_axes(&mut data, &bins, FftDirection::Inverse)?;

        let len = shape.dims()[0];
        let norm = 1.0 / shape.len() as f64;
        if len == 1 {
            return Ok(data.into_iter().map(|c| c.re * norm).collect());
        }
        let c2r = self.real_planner()?.plan_fft_inverse(len);
        let mut out = vec![0.0; shape.len()];
        self.inverse_lines(c2r.as_ref(), len, &mut data, &mut out)?;
        for v in &mut out {
            *v *= norm;
        }
        Ok(out)
    }

    /// `rustfft` has dedicated butterflies for every prime up to 7.
    fn max_prime_factor(&self) -> usize {
        7
    }
}
