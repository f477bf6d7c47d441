//! Dense N-dimensional images and their shapes.
//!
//! Samples are stored contiguously with axis 0 varying fastest, so a 2D image
//! is laid out row by row with `dims = [width, height]`. Each image carries a
//! per-axis origin and spacing; the correlation engine only uses them to place
//! the output surface.

use crate::util::{MaskCorrError, MaskCorrResult};

/// Per-axis extent of a dense array, with precomputed strides.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
    strides: Vec<usize>,
    len: usize,
}

impl Shape {
    /// Creates a shape; every axis must have a non-zero extent.
    pub fn new(dims: &[usize]) -> MaskCorrResult<Self> {
        if dims.is_empty() || dims.contains(&0) {
            return Err(MaskCorrError::InvalidExtent {
                extent: dims.to_vec(),
            });
        }
        let mut strides = Vec::with_capacity(dims.len());
        let mut len = 1usize;
        for &dim in dims {
            strides.push(len);
            len = len.checked_mul(dim).ok_or(MaskCorrError::InvalidExtent {
                extent: dims.to_vec(),
            })?;
        }
        Ok(Self {
            dims: dims.to_vec(),
            strides,
            len,
        })
    }

    /// Returns the number of axes.
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Returns the extent along each axis.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the element stride of each axis.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Returns the total number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; shapes cannot be empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Converts a multi-index to a flat offset if it is within bounds.
    pub fn flat_index(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.dims.len() {
            return None;
        }
        let mut flat = 0usize;
        for ((&i, &dim), &stride) in index.iter().zip(&self.dims).zip(&self.strides) {
            if i >= dim {
                return None;
            }
            flat += i * stride;
        }
        Some(flat)
    }

    /// Converts a flat offset to a multi-index.
    pub fn unravel(&self, flat: usize) -> Vec<usize> {
        let mut out = vec![0; self.dims.len()];
        self.unravel_into(flat, &mut out);
        out
    }

    pub(crate) fn unravel_into(&self, mut flat: usize, out: &mut [usize]) {
        for (slot, &dim) in out.iter_mut().zip(&self.dims) {
            *slot = flat % dim;
            flat /= dim;
        }
    }
}

/// Scalar sample types accepted as image or mask values.
pub trait Sample: Copy + Send + Sync + 'static {
    /// Converts the sample to `f64` for computation.
    fn to_f64(self) -> f64;
}

macro_rules! impl_sample {
    ($($ty:ty),*) => {
        $(
            impl Sample for $ty {
                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_sample!(u8, u16, u32, i8, i16, i32, f32, f64);

/// Owned dense N-dimensional image with origin and spacing metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct NdImage<T> {
    data: Vec<T>,
    shape: Shape,
    origin: Vec<f64>,
    spacing: Vec<f64>,
}

impl<T> NdImage<T> {
    /// Creates an image from a contiguous buffer with zero origin and unit spacing.
    pub fn new(data: Vec<T>, dims: &[usize]) -> MaskCorrResult<Self> {
        let shape = Shape::new(dims)?;
        Self::from_shape(data, shape)
    }

    /// Creates a 2D image from a row-major buffer.
    pub fn from_vec_2d(data: Vec<T>, width: usize, height: usize) -> MaskCorrResult<Self> {
        Self::new(data, &[width, height])
    }

    /// Creates an image over an existing shape.
    pub fn from_shape(data: Vec<T>, shape: Shape) -> MaskCorrResult<Self> {
        if data.len() != shape.len() {
            return Err(MaskCorrError::BufferSizeMismatch {
                needed: shape.len(),
                got: data.len(),
            });
        }
        let ndim = shape.ndim();
        Ok(Self {
            data,
            shape,
            origin: vec![0.0; ndim],
            spacing: vec![1.0; ndim],
        })
    }

    /// Replaces the origin and spacing metadata.
    pub fn with_metadata(mut self, origin: Vec<f64>, spacing: Vec<f64>) -> MaskCorrResult<Self> {
        let ndim = self.shape.ndim();
        if origin.len() != ndim {
            return Err(MaskCorrError::MetadataMismatch {
                field: "origin",
                expected: ndim,
                got: origin.len(),
            });
        }
        if spacing.len() != ndim {
            return Err(MaskCorrError::MetadataMismatch {
                field: "spacing",
                expected: ndim,
                got: spacing.len(),
            });
        }
        self.origin = origin;
        self.spacing = spacing;
        Ok(self)
    }

    /// Returns the image shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the extent along each axis.
    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    /// Returns the samples in memory order.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Returns the physical origin of the first sample.
    pub fn origin(&self) -> &[f64] {
        &self.origin
    }

    /// Returns the physical distance between samples along each axis.
    pub fn spacing(&self) -> &[f64] {
        &self.spacing
    }

    /// Returns the sample at a multi-index if it is within bounds.
    pub fn get(&self, index: &[usize]) -> Option<&T> {
        self.shape.flat_index(index).and_then(|flat| self.data.get(flat))
    }

    /// Consumes the image and returns its samples.
    pub fn into_data(self) -> Vec<T> {
        self.data
    }
}

impl<T: Clone> NdImage<T> {
    /// Creates an image with every sample set to `value`.
    pub fn filled(dims: &[usize], value: T) -> MaskCorrResult<Self> {
        let shape = Shape::new(dims)?;
        let data = vec![value; shape.len()];
        Self::from_shape(data, shape)
    }
}
