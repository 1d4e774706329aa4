//! Weight-mask pyramid.
//!
//! Weights are carried through as-is rather than binarized: validity is
//! tested as "non-zero" and the optimizer multiplies the two masks, so any
//! non-zero magnitude survives decimation. Halving accumulates absolute
//! values over the 2x input footprint with explicit edge clipping, which
//! keeps a single valid input pixel visible at every coarser level.

use crate::cancel::CancelToken;
use crate::error::RegError;
use crate::image::FloatImage;

/// Decimation pyramid of a weight mask, levels ordered coarsest-first.
#[derive(Debug, Clone)]
pub struct MaskPyramid {
    full: FloatImage,
    levels: Vec<FloatImage>,
}

impl MaskPyramid {
    /// Build the pyramid from a full-resolution mask.
    ///
    /// `depth` counts the full-resolution level, so `depth - 1` reduced
    /// levels are produced; the dimensions at each step halve in lockstep
    /// with the paired image pyramid.
    pub fn build(mask: FloatImage, depth: usize, token: &CancelToken) -> Result<Self, RegError> {
        if mask.area() == 0 {
            return Err(RegError::EmptyImage);
        }
        let mut levels = Vec::with_capacity(depth.saturating_sub(1));
        let mut current = mask.clone();
        for _ in 1..depth {
            if token.is_cancelled() {
                return Err(RegError::Cancelled);
            }
            let half = half_mask(&current);
            levels.push(half.clone());
            current = half;
        }
        levels.reverse();
        Ok(Self { full: mask, levels })
    }

    /// All-ones mask pyramid for callers without an explicit mask.
    pub fn all_valid(
        width: usize,
        height: usize,
        depth: usize,
        token: &CancelToken,
    ) -> Result<Self, RegError> {
        let mut mask = FloatImage::new(width, height);
        mask.as_mut_slice().fill(1.0);
        Self::build(mask, depth, token)
    }

    /// Full-resolution weights.
    pub fn full(&self) -> &FloatImage {
        &self.full
    }

    /// Reduced level `i`, `0` being the coarsest.
    pub fn level(&self, i: usize) -> &FloatImage {
        &self.levels[i]
    }

    /// Number of reduced levels (depth minus one).
    pub fn reduced_levels(&self) -> usize {
        self.levels.len()
    }
}

/// Halve the mask resolution.
///
/// Each output cell gathers |weight| over the input window centered at
/// (2x, 2y), clipped to the even-truncated input extent; odd trailing rows
/// and columns do not contribute.
fn half_mask(full: &FloatImage) -> FloatImage {
    let hw = full.width() / 2;
    let hh = full.height() / 2;
    let (uw, uh) = (2 * hw, 2 * hh);
    let src = full.as_slice();
    let mut out = FloatImage::new(hw, hh);
    let dst = out.as_mut_slice();
    for y in 0..hh {
        let v0 = (2 * y).saturating_sub(1);
        let v1 = (2 * y + 1).min(uh - 1);
        for x in 0..hw {
            let u0 = (2 * x).saturating_sub(1);
            let u1 = (2 * x + 1).min(uw - 1);
            let mut sum = 0.0f32;
            for v in v0..=v1 {
                let row = v * full.width();
                for u in u0..=u1 {
                    sum += src[row + u].abs();
                }
            }
            dst[y * hw + x] = sum;
        }
    }
    out
}
