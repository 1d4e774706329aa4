//! Cubic B-spline sampling at fractional coordinates.
//!
//! A [`Sampler`] wraps a coefficient image and holds the 4-tap weights and
//! mirror-folded indexes for one sample position. Index and weight setup are
//! split so that pixel walks with a constant fractional part (pure
//! translation) compute weights once and only refresh indexes.

use crate::image::FloatImage;

/// Fractional part under the truncation convention used by the pixel walks:
/// for negative integers this yields 1.0 with the base shifted down, which
/// pairs with the index formula in [`Sampler::set_x_indexes`].
#[inline]
pub(crate) fn frac(x: f64) -> f64 {
    if 0.0 <= x {
        x - (x as i64) as f64
    } else {
        x - ((x as i64) - 1) as f64
    }
}

/// Round half away from zero, the convention used for mask lookups.
#[inline]
pub(crate) fn round_half_away(x: f64) -> i64 {
    if 0.0 <= x {
        (x + 0.5) as i64
    } else {
        (x - 0.5) as i64
    }
}

/// Fold an arbitrary tap coordinate into `[0, n)` by whole-sample mirroring.
#[inline]
fn mirror(p: i64, n: i64) -> usize {
    let mut q = if p < 0 { -1 - p } else { p };
    let period = 2 * n;
    q %= period;
    if q >= n {
        (period - 1 - q) as usize
    } else {
        q as usize
    }
}

/// Interpolation state over one coefficient image.
pub(crate) struct Sampler<'a> {
    data: &'a [f32],
    nx: i64,
    ny: i64,
    x_weight: [f64; 4],
    y_weight: [f64; 4],
    dx_weight: [f64; 4],
    dy_weight: [f64; 4],
    // y indexes are premultiplied by the row stride
    x_index: [usize; 4],
    y_index: [usize; 4],
}

impl<'a> Sampler<'a> {
    pub fn new(coefficients: &'a FloatImage) -> Self {
        Self {
            data: coefficients.as_slice(),
            nx: coefficients.width() as i64,
            ny: coefficients.height() as i64,
            x_weight: [0.0; 4],
            y_weight: [0.0; 4],
            dx_weight: [0.0; 4],
            dy_weight: [0.0; 4],
            x_index: [0; 4],
            y_index: [0; 4],
        }
    }

    /// Taps are stored rightmost-first; weight slot `k` pairs with index
    /// slot `k` throughout.
    #[inline]
    pub fn set_x_indexes(&mut self, x: f64) {
        let p = if 0.0 <= x {
            (x as i64) + 2
        } else {
            (x as i64) + 1
        };
        for (k, slot) in self.x_index.iter_mut().enumerate() {
            *slot = mirror(p - k as i64, self.nx);
        }
    }

    #[inline]
    pub fn set_y_indexes(&mut self, y: f64) {
        let p = if 0.0 <= y {
            (y as i64) + 2
        } else {
            (y as i64) + 1
        };
        for (k, slot) in self.y_index.iter_mut().enumerate() {
            *slot = mirror(p - k as i64, self.ny) * self.nx as usize;
        }
    }

    #[inline]
    pub fn set_x_weights(&mut self, x: f64) {
        let s = 1.0 - x;
        self.x_weight[3] = s * s * s / 6.0;
        let s = x * x;
        self.x_weight[2] = 2.0 / 3.0 - 0.5 * s * (2.0 - x);
        self.x_weight[0] = s * x / 6.0;
        self.x_weight[1] = 1.0 - self.x_weight[0] - self.x_weight[2] - self.x_weight[3];
    }

    #[inline]
    pub fn set_y_weights(&mut self, y: f64) {
        let s = 1.0 - y;
        self.y_weight[3] = s * s * s / 6.0;
        let s = y * y;
        self.y_weight[2] = 2.0 / 3.0 - 0.5 * s * (2.0 - y);
        self.y_weight[0] = s * y / 6.0;
        self.y_weight[1] = 1.0 - self.y_weight[0] - self.y_weight[2] - self.y_weight[3];
    }

    /// Value and first-derivative weights along x in one pass.
    #[inline]
    pub fn set_x_dx_weights(&mut self, x: f64) {
        let s = 1.0 - x;
        self.dx_weight[0] = 0.5 * x * x;
        self.x_weight[0] = x * self.dx_weight[0] / 3.0;
        self.dx_weight[3] = -0.5 * s * s;
        self.x_weight[3] = s * self.dx_weight[3] / -3.0;
        self.dx_weight[1] = 1.0 - 2.0 * self.dx_weight[0] + self.dx_weight[3];
        self.x_weight[1] = 2.0 / 3.0 + (1.0 + x) * self.dx_weight[3];
        self.dx_weight[2] = 1.5 * x * (x - 4.0 / 3.0);
        self.x_weight[2] = 2.0 / 3.0 - (2.0 - x) * self.dx_weight[0];
    }

    #[inline]
    pub fn set_y_dy_weights(&mut self, y: f64) {
        let s = 1.0 - y;
        self.dy_weight[0] = 0.5 * y * y;
        self.y_weight[0] = y * self.dy_weight[0] / 3.0;
        self.dy_weight[3] = -0.5 * s * s;
        self.y_weight[3] = s * self.dy_weight[3] / -3.0;
        self.dy_weight[1] = 1.0 - 2.0 * self.dy_weight[0] + self.dy_weight[3];
        self.y_weight[1] = 2.0 / 3.0 + (1.0 + y) * self.dy_weight[3];
        self.dy_weight[2] = 1.5 * y * (y - 4.0 / 3.0);
        self.y_weight[2] = 2.0 / 3.0 - (2.0 - y) * self.dy_weight[0];
    }

    /// Position the sampler at (x, y) with value weights.
    #[inline]
    pub fn set(&mut self, x: f64, y: f64) {
        self.set_x_indexes(x);
        self.set_y_indexes(y);
        self.set_x_weights(frac(x));
        self.set_y_weights(frac(y));
    }

    #[inline]
    pub fn interpolate(&self) -> f64 {
        let mut value = 0.0;
        for j in 0..4 {
            let row = self.y_index[j];
            let mut s = 0.0;
            for i in 0..4 {
                s += self.x_weight[i] * self.data[row + self.x_index[i]] as f64;
            }
            value += self.y_weight[j] * s;
        }
        value
    }

    /// d/dx of the interpolated surface; needs [`set_x_dx_weights`].
    ///
    /// [`set_x_dx_weights`]: Sampler::set_x_dx_weights
    #[inline]
    pub fn interpolate_dx(&self) -> f64 {
        let mut value = 0.0;
        for j in 0..4 {
            let row = self.y_index[j];
            let mut s = 0.0;
            for i in 0..4 {
                s += self.dx_weight[i] * self.data[row + self.x_index[i]] as f64;
            }
            value += self.y_weight[j] * s;
        }
        value
    }

    /// d/dy of the interpolated surface; needs [`set_y_dy_weights`].
    ///
    /// [`set_y_dy_weights`]: Sampler::set_y_dy_weights
    #[inline]
    pub fn interpolate_dy(&self) -> f64 {
        let mut value = 0.0;
        for j in 0..4 {
            let row = self.y_index[j];
            let mut s = 0.0;
            for i in 0..4 {
                s += self.x_weight[i] * self.data[row + self.x_index[i]] as f64;
            }
            value += self.dy_weight[j] * s;
        }
        value
    }
}
