//! Synthetic images shared by unit and integration tests.

use crate::image::FloatImage;

/// Linear ramp `gx * x + gy * y`.
pub(crate) fn gradient_image(width: usize, height: usize, gx: f32, gy: f32) -> FloatImage {
    let mut img = FloatImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            img.as_mut_slice()[y * width + x] = gx * x as f32 + gy * y as f32;
        }
    }
    img
}

/// Smooth blob centered at (cx, cy); plenty of gradient everywhere without
/// the aliasing a step edge would introduce.
pub(crate) fn gaussian_blob(
    width: usize,
    height: usize,
    cx: f64,
    cy: f64,
    sigma: f64,
    amplitude: f32,
) -> FloatImage {
    let mut img = FloatImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            let v = (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
            img.as_mut_slice()[y * width + x] = amplitude * v as f32;
        }
    }
    img
}

/// Shift an image by an integer offset, mirroring at the borders so that the
/// shifted copy of a smooth image stays smooth.
pub(crate) fn shifted(img: &FloatImage, dx: i64, dy: i64) -> FloatImage {
    let (w, h) = (img.width() as i64, img.height() as i64);
    let mut out = FloatImage::new(img.width(), img.height());
    let fold = |mut q: i64, n: i64| -> usize {
        if q < 0 {
            q = -1 - q;
        }
        q %= 2 * n;
        if q >= n {
            (2 * n - 1 - q) as usize
        } else {
            q as usize
        }
    };
    for y in 0..h {
        for x in 0..w {
            let sx = fold(x - dx, w);
            let sy = fold(y - dy, h);
            out.as_mut_slice()[(y * w + x) as usize] =
                img.as_slice()[sy * img.width() + sx];
        }
    }
    out
}
