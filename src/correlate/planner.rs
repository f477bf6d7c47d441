//! Padded transform shape planning.
//!
//! Linear cross-correlation of extents `a` and `b` needs at least `a + b - 1`
//! samples per axis; anything shorter wraps around. Sizes are rounded up to
//! the next length whose prime factors the transform backend handles well.

use crate::image::Shape;
use crate::util::math::next_smooth_size;
use crate::util::{MaskCorrError, MaskCorrResult};

fn check_same_ndim(fixed: &Shape, moving: &Shape) -> MaskCorrResult<()> {
    if fixed.ndim() != moving.ndim() {
        return Err(MaskCorrError::DimensionMismatch {
            fixed: fixed.ndim(),
            moving: moving.ndim(),
        });
    }
    Ok(())
}

/// Returns the full cross-correlation extent `fixed + moving - 1` per axis.
pub fn output_shape(fixed: &Shape, moving: &Shape) -> MaskCorrResult<Shape> {
    check_same_ndim(fixed, moving)?;
    let dims: Vec<usize> = fixed
        .dims()
        .iter()
        .zip(moving.dims())
        .map(|(&f, &m)| f + m - 1)
        .collect();
    Shape::new(&dims)
}

/// Returns the padded transform shape shared by every spectral term.
///
/// Each axis is the smallest length `>= fixed + moving - 1` with no prime
/// factor above `max_prime_factor`.
pub fn plan_padded_shape(
    fixed: &Shape,
    moving: &Shape,
    max_prime_factor: usize,
) -> MaskCorrResult<Shape> {
    let full = output_shape(fixed, moving)?;
    let dims: Vec<usize> = full
        .dims()
        .iter()
        .map(|&len| next_smooth_size(len, max_prime_factor))
        .collect();
    Shape::new(&dims)
}

/// Maps every output location to its flat index in the padded circular result.
///
/// Output index `o` on an axis is the shift `s = o - (moving - 1)`; negative
/// shifts live at the tail of the circular axis.
pub(crate) fn valid_region_offsets(
    output: &Shape,
    padded: &Shape,
    moving: &Shape,
) -> Vec<usize> {
    let ndim = output.ndim();
    let mut index = vec![0usize; ndim];
    let mut offsets = Vec::with_capacity(output.len());
    for flat in 0..output.len() {
        output.unravel_into(flat, &mut index);
        let mut offset = 0usize;
        for axis in 0..ndim {
            let len = padded.dims()[axis];
            let lag = moving.dims()[axis] - 1;
            let circular = (index[axis] + len - lag) % len;
            offset += circular * padded.strides()[axis];
        }
        offsets.push(offset);
    }
    offsets
}
