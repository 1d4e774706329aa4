//! Resampling of the source image onto the output grid.
//!
//! The matrix maps output coordinates into source coordinates. Accurate
//! mode interpolates the cubic spline coefficients; accelerated mode reads
//! the nearest sample. The weight mask is always carried nearest-neighbor,
//! and pixels whose preimage falls outside the source get zero in both
//! planes.

use crate::image::FloatImage;
use crate::interp::{round_half_away, Sampler};
use crate::transform::{TransformFamily, TransformMatrix};

/// Warped intensity plane plus the warped validity mask.
#[derive(Debug, Clone)]
pub struct ResampledImage {
    pub image: FloatImage,
    pub mask: FloatImage,
}

/// Apply `matrix` over an `out_width` by `out_height` grid.
///
/// `input` holds cardinal samples in accelerated mode and cubic spline
/// coefficients otherwise.
pub(crate) fn resample(
    family: TransformFamily,
    matrix: &TransformMatrix,
    input: &FloatImage,
    input_mask: &FloatImage,
    out_width: usize,
    out_height: usize,
    accelerated: bool,
) -> ResampledImage {
    match family {
        TransformFamily::Translation => {
            translation_warp(matrix, input, input_mask, out_width, out_height, accelerated)
        }
        _ => general_warp(matrix, input, input_mask, out_width, out_height, accelerated),
    }
}

fn translation_warp(
    matrix: &TransformMatrix,
    input: &FloatImage,
    input_mask: &FloatImage,
    out_width: usize,
    out_height: usize,
    accelerated: bool,
) -> ResampledImage {
    let in_w = input.width() as i64;
    let in_h = input.height() as i64;
    let src = input.as_slice();
    let src_mask = input_mask.as_slice();
    let mut image = FloatImage::new(out_width, out_height);
    let mut mask = FloatImage::new(out_width, out_height);
    let out = image.as_mut_slice();
    let out_mask = mask.as_mut_slice();
    let dx0 = matrix.m[0][0];
    let dy0 = matrix.m[1][0];
    let mut sampler = Sampler::new(input);
    if !accelerated {
        sampler.set_x_weights(dx0 - dx0.floor());
        sampler.set_y_weights(dy0 - dy0.floor());
    }
    let mut k = 0usize;
    let mut y = dy0;
    for _ in 0..out_height {
        let ym = round_half_away(y);
        if ym < 0 || ym >= in_h {
            // whole row has no preimage
            for _ in 0..out_width {
                out[k] = 0.0;
                out_mask[k] = 0.0;
                k += 1;
            }
            y += 1.0;
            continue;
        }
        if !accelerated {
            sampler.set_y_indexes(y);
        }
        let row = (ym * in_w) as usize;
        let mut x = dx0;
        for _ in 0..out_width {
            let xm = round_half_away(x);
            if 0 <= xm && xm < in_w {
                let nearest = row + xm as usize;
                if accelerated {
                    out[k] = src[nearest];
                } else {
                    sampler.set_x_indexes(x);
                    out[k] = sampler.interpolate() as f32;
                }
                out_mask[k] = src_mask[nearest];
            } else {
                out[k] = 0.0;
                out_mask[k] = 0.0;
            }
            k += 1;
            x += 1.0;
        }
        y += 1.0;
    }
    ResampledImage { image, mask }
}

/// Linear and bilinear warps share one incremental walk; the cross terms
/// are simply zero for the linear families.
fn general_warp(
    matrix: &TransformMatrix,
    input: &FloatImage,
    input_mask: &FloatImage,
    out_width: usize,
    out_height: usize,
    accelerated: bool,
) -> ResampledImage {
    let in_w = input.width() as i64;
    let in_h = input.height() as i64;
    let src = input.as_slice();
    let src_mask = input_mask.as_slice();
    let mut image = FloatImage::new(out_width, out_height);
    let mut mask = FloatImage::new(out_width, out_height);
    let out = image.as_mut_slice();
    let out_mask = mask.as_mut_slice();
    let m = matrix.m;
    let mut sampler = Sampler::new(input);
    let mut yx = m[0][0];
    let mut yy = m[1][0];
    let mut yxy = 0.0;
    let mut yyy = 0.0;
    let mut k = 0usize;
    for _ in 0..out_height {
        let mut x0 = yx;
        let mut y0 = yy;
        for _ in 0..out_width {
            let x = x0;
            let y = y0;
            let xm = round_half_away(x);
            let ym = round_half_away(y);
            if 0 <= xm && xm < in_w && 0 <= ym && ym < in_h {
                let nearest = (ym * in_w + xm) as usize;
                if accelerated {
                    out[k] = src[nearest];
                } else {
                    sampler.set(x, y);
                    out[k] = sampler.interpolate() as f32;
                }
                out_mask[k] = src_mask[nearest];
            } else {
                out[k] = 0.0;
                out_mask[k] = 0.0;
            }
            k += 1;
            x0 += m[0][1] + yxy;
            y0 += m[1][1] + yyy;
        }
        yx += m[0][2];
        yy += m[1][2];
        yxy += m[0][3];
        yyy += m[1][3];
    }
    ResampledImage { image, mask }
}
