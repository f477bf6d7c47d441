//! maskcorr computes masked normalized cross-correlation surfaces via FFT.
//!
//! Two N-dimensional images, each optionally restricted by a weight mask, are
//! correlated over every relative shift. Masked-out samples do not bias the
//! local means or energies, and shifts with too little overlap are gated to
//! zero. Parallelism is available via the `rayon` feature and instrumentation
//! via the `tracing` feature.

pub mod correlate;
pub mod fft;
pub mod image;
pub mod lowlevel;
mod trace;
pub mod util;

pub use correlate::{
    masked_ncc, CorrelationConfig, CorrelationOutput, MaskedCorrelator, NumericalAnomaly,
    OverlapRounding,
};
pub use fft::{RustFftTransform, Spectrum, Transform};
pub use image::{NdImage, Sample, Shape};
pub use util::{MaskCorrError, MaskCorrResult};
