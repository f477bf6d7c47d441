//! Stateful correlation engine with lazy recomputation.

use crate::correlate::spectral::validate_mask;
use crate::correlate::{masked_ncc, CorrelationConfig, CorrelationOutput};
use crate::fft::{RustFftTransform, Transform};
use crate::image::{NdImage, Sample};
use crate::util::{MaskCorrError, MaskCorrResult};

/// Masked correlation engine over borrowed images.
///
/// Setters only record inputs and invalidate the cached result; the pipeline
/// runs on the next result request. The transform backend is injected at
/// construction.
pub struct MaskedCorrelator<'a, T: Sample, M: Sample = u8, P: Transform = RustFftTransform> {
    transform: P,
    config: CorrelationConfig,
    fixed: Option<&'a NdImage<T>>,
    moving: Option<&'a NdImage<T>>,
    fixed_mask: Option<&'a NdImage<M>>,
    moving_mask: Option<&'a NdImage<M>>,
    cached: Option<CorrelationOutput>,
}

fn same_input<X>(current: Option<&X>, next: Option<&X>) -> bool {
    match (current, next) {
        (Some(a), Some(b)) => std::ptr::eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl<'a, T: Sample, M: Sample, P: Transform> MaskedCorrelator<'a, T, M, P> {
    /// Creates an engine with default configuration and no inputs.
    pub fn new(transform: P) -> Self {
        Self {
            transform,
            config: CorrelationConfig::default(),
            fixed: None,
            moving: None,
            fixed_mask: None,
            moving_mask: None,
            cached: None,
        }
    }

    /// Replaces the configuration; it is validated on the next request.
    pub fn with_config(mut self, config: CorrelationConfig) -> Self {
        self.config = config;
        self.cached = None;
        self
    }

    /// Returns the current configuration.
    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Returns the transform backend.
    pub fn transform(&self) -> &P {
        &self.transform
    }

    /// Returns true when a cached result matches the current inputs.
    pub fn is_up_to_date(&self) -> bool {
        self.cached.is_some()
    }

    /// Validates and replaces the configuration.
    pub fn set_config(&mut self, config: CorrelationConfig) -> MaskCorrResult<()> {
        config.validate()?;
        if config != self.config {
            self.config = config;
            self.cached = None;
        }
        Ok(())
    }

    /// Sets the minimum number of overlapping pixels for a non-zero shift.
    pub fn set_required_number_of_overlapping_pixels(&mut self, required: u64) {
        if self.config.required_number_of_overlapping_pixels != required {
            self.config.required_number_of_overlapping_pixels = required;
            self.cached = None;
        }
    }

    /// Sets the minimum overlap as a fraction of the maximum overlap.
    pub fn set_required_fraction_of_overlapping_pixels(
        &mut self,
        fraction: f64,
    ) -> MaskCorrResult<()> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(MaskCorrError::InvalidFraction(fraction));
        }
        if self.config.required_fraction_of_overlapping_pixels != fraction {
            self.config.required_fraction_of_overlapping_pixels = fraction;
            self.cached = None;
        }
        Ok(())
    }

    /// Sets the fixed image.
    pub fn set_fixed_image(&mut self, image: &'a NdImage<T>) -> MaskCorrResult<()> {
        check_ndim(Some(image), self.moving)?;
        validate_mask("fixed", image, self.fixed_mask)?;
        if !same_input(self.fixed, Some(image)) {
            self.fixed = Some(image);
            self.cached = None;
        }
        Ok(())
    }

    /// Sets the moving image.
    pub fn set_moving_image(&mut self, image: &'a NdImage<T>) -> MaskCorrResult<()> {
        check_ndim(self.fixed, Some(image))?;
        validate_mask("moving", image, self.moving_mask)?;
        if !same_input(self.moving, Some(image)) {
            self.moving = Some(image);
            self.cached = None;
        }
        Ok(())
    }

    /// Sets the fixed mask; its extent must match the fixed image if one is set.
    pub fn set_fixed_mask(&mut self, mask: &'a NdImage<M>) -> MaskCorrResult<()> {
        if let Some(image) = self.fixed {
            validate_mask("fixed", image, Some(mask))?;
        }
        if !same_input(self.fixed_mask, Some(mask)) {
            self.fixed_mask = Some(mask);
            self.cached = None;
        }
        Ok(())
    }

    /// Sets the moving mask; its extent must match the moving image if one is set.
    pub fn set_moving_mask(&mut self, mask: &'a NdImage<M>) -> MaskCorrResult<()> {
        if let Some(image) = self.moving {
            validate_mask("moving", image, Some(mask))?;
        }
        if !same_input(self.moving_mask, Some(mask)) {
            self.moving_mask = Some(mask);
            self.cached = None;
        }
        Ok(())
    }

    /// Removes the fixed mask, so every fixed sample has weight one.
    pub fn clear_fixed_mask(&mut self) {
        if self.fixed_mask.take().is_some() {
            self.cached = None;
        }
    }

    /// Removes the moving mask, so every moving sample has weight one.
    pub fn clear_moving_mask(&mut self) {
        if self.moving_mask.take().is_some() {
            self.cached = None;
        }
    }

    /// Returns the correlation output, recomputing it if inputs changed.
    pub fn output(&mut self) -> MaskCorrResult<&CorrelationOutput> {
        let out = match self.cached.take() {
            Some(out) => out,
            None => {
                let fixed = self.fixed.ok_or(MaskCorrError::MissingInput("fixed image"))?;
                let moving = self.moving.ok_or(MaskCorrError::MissingInput("moving image"))?;
                masked_ncc(
                    fixed,
                    moving,
                    self.fixed_mask,
                    self.moving_mask,
                    &self.config,
                    &self.transform,
                )?
            }
        };
        Ok(&*self.cached.insert(out))
    }

    /// Returns the correlation surface.
    pub fn surface(&mut self) -> MaskCorrResult<&NdImage<f64>> {
        Ok(self.output()?.surface())
    }

    /// Returns the largest overlap count observed over all shifts.
    pub fn maximum_number_of_overlapping_pixels(&mut self) -> MaskCorrResult<u64> {
        Ok(self.output()?.max_overlap())
    }

    /// Returns the overlap threshold applied in the last computation.
    pub fn effective_required_overlap(&mut self) -> MaskCorrResult<u64> {
        Ok(self.output()?.effective_required_overlap())
    }
}

fn check_ndim<T>(fixed: Option<&NdImage<T>>, moving: Option<&NdImage<T>>) -> MaskCorrResult<()> {
    if let (Some(fixed), Some(moving)) = (fixed, moving) {
        let (f, m) = (fixed.shape().ndim(), moving.shape().ndim());
        if f != m {
            return Err(MaskCorrError::DimensionMismatch { fixed: f, moving: m });
        }
    }
    Ok(())
}
