//! Error types for maskcorr.

use thiserror::Error;

/// Result alias for maskcorr operations.
pub type MaskCorrResult<T> = std::result::Result<T, MaskCorrError>;

/// Errors that can occur when configuring or running a masked correlation.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum MaskCorrError {
    /// Fixed and moving inputs have a different number of axes.
    #[error("dimension mismatch: fixed has {fixed} axes, moving has {moving}")]
    DimensionMismatch { fixed: usize, moving: usize },
    /// A mask extent differs from the extent of its paired image.
    #[error("{role} mask extent {mask:?} does not match image extent {image:?}")]
    MaskExtentMismatch {
        role: &'static str,
        image: Vec<usize>,
        mask: Vec<usize>,
    },
    /// An extent is empty or has a zero-length axis.
    #[error("invalid extent {extent:?}")]
    InvalidExtent { extent: Vec<usize> },
    /// The sample buffer does not hold exactly one value per element.
    #[error("buffer size mismatch: needed {needed}, got {got}")]
    BufferSizeMismatch { needed: usize, got: usize },
    /// Origin or spacing metadata does not have one entry per axis.
    #[error("{field} has {got} entries, expected {expected}")]
    MetadataMismatch {
        field: &'static str,
        expected: usize,
        got: usize,
    },
    /// A mask weight is negative or not finite.
    #[error("{role} mask has invalid weight {value} at flat index {index}")]
    NegativeMaskWeight {
        role: &'static str,
        index: usize,
        value: f64,
    },
    /// The required overlap fraction lies outside [0, 1].
    #[error("required fraction of overlapping pixels must be in [0, 1], got {0}")]
    InvalidFraction(f64),
    /// A tolerance parameter is negative or not finite.
    #[error("{name} must be finite and non-negative, got {value}")]
    InvalidTolerance { name: &'static str, value: f64 },
    /// A required input image was never set.
    #[error("missing input: {0}")]
    MissingInput(&'static str),
    /// The transform provider returned data of an unexpected size.
    #[error("transform returned {got} samples, expected {expected}")]
    TransformShapeMismatch { expected: usize, got: usize },
    /// The transform provider failed internally.
    #[error("transform failure: {0}")]
    TransformFailure(&'static str),
    /// Correlation values left [-1, 1] beyond tolerance or were not finite.
    #[error("{count} numerical anomalies (worst value {worst_value})")]
    NumericalAnomaly { count: usize, worst_value: f64 },
}

impl MaskCorrError {
    /// Returns true for misconfiguration the caller can fix and resubmit.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            MaskCorrError::DimensionMismatch { .. }
                | MaskCorrError::MaskExtentMismatch { .. }
                | MaskCorrError::InvalidExtent { .. }
                | MaskCorrError::BufferSizeMismatch { .. }
                | MaskCorrError::MetadataMismatch { .. }
                | MaskCorrError::NegativeMaskWeight { .. }
                | MaskCorrError::InvalidFraction(_)
                | MaskCorrError::InvalidTolerance { .. }
                | MaskCorrError::MissingInput(_)
        )
    }
}
