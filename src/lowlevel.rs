//! Low-level building blocks for custom correlation pipelines.
//!
//! These expose the individual stages behind [`crate::masked_ncc`]: shape
//! planning, spectral term construction, term assembly and overlap gating.
//! Most users should prefer `masked_ncc` or `MaskedCorrelator`.

pub use crate::correlate::assemble::{
    assemble, correlate_terms, AssembleParams, Assembled, CorrelationTerms,
};
pub use crate::correlate::overlap::{OverlapGate, OverlapRounding};
pub use crate::correlate::planner::{output_shape, plan_padded_shape};
pub use crate::correlate::spectral::{build_spectral_terms, SpectralTerms};
pub use crate::fft::Complex;
