//! Real-valued image buffer used throughout the engine.
//!
//! All pyramid, optimization, and resampling code operates on row-major
//! `f32` buffers; integer pixel formats are converted once at the API
//! boundary. Intermediate 1-D filtering runs in `f64` and is truncated
//! back to `f32` per line.

use image::GrayImage;

use crate::error::RegError;

/// Row-major single-channel `f32` image.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatImage {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl FloatImage {
    /// Zero-filled buffer.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    /// Wrap an existing row-major buffer.
    ///
    /// Returns [`RegError::EmptyImage`] when the area is zero or the buffer
    /// length disagrees with the dimensions.
    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Result<Self, RegError> {
        if width == 0 || height == 0 || data.len() != width * height {
            return Err(RegError::EmptyImage);
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Convert an 8-bit grayscale image.
    pub fn from_gray8(img: &GrayImage) -> Self {
        let (w, h) = img.dimensions();
        Self {
            width: w as usize,
            height: h as usize,
            data: img.as_raw().iter().map(|&p| p as f32).collect(),
        }
    }

    /// Convert a 16-bit grayscale buffer; samples are treated as unsigned.
    pub fn from_gray16(width: usize, height: usize, pixels: &[u16]) -> Result<Self, RegError> {
        if pixels.len() != width * height {
            return Err(RegError::EmptyImage);
        }
        Self::from_vec(width, height, pixels.iter().map(|&p| p as f32).collect())
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn area(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Extract a rectangular sub-image. Coordinates are clamped to bounds.
    pub fn crop(&self, x0: usize, y0: usize, w: usize, h: usize) -> Result<Self, RegError> {
        let x1 = (x0 + w).min(self.width);
        let y1 = (y0 + h).min(self.height);
        if x1 <= x0 || y1 <= y0 {
            return Err(RegError::EmptyImage);
        }
        let (cw, ch) = (x1 - x0, y1 - y0);
        let mut data = Vec::with_capacity(cw * ch);
        for y in y0..y1 {
            let row = y * self.width;
            data.extend_from_slice(&self.data[row + x0..row + x1]);
        }
        Self::from_vec(cw, ch, data)
    }

    /// Copy row `y` into an `f64` scratch line.
    #[inline]
    pub(crate) fn row_into(&self, y: usize, line: &mut [f64]) {
        let base = y * self.width;
        for (i, v) in line.iter_mut().enumerate().take(self.width) {
            *v = self.data[base + i] as f64;
        }
    }

    /// Copy column `x` into an `f64` scratch line.
    #[inline]
    pub(crate) fn column_into(&self, x: usize, line: &mut [f64]) {
        let mut k = x;
        for v in line.iter_mut().take(self.height) {
            *v = self.data[k] as f64;
            k += self.width;
        }
    }

    /// Store an `f64` scratch line back into row `y`.
    #[inline]
    pub(crate) fn set_row(&mut self, y: usize, line: &[f64]) {
        let base = y * self.width;
        for (i, &v) in line.iter().enumerate().take(self.width) {
            self.data[base + i] = v as f32;
        }
    }

    /// Store an `f64` scratch line back into column `x`.
    #[inline]
    pub(crate) fn set_column(&mut self, x: usize, line: &[f64]) {
        let mut k = x;
        for &v in line.iter().take(self.height) {
            self.data[k] = v as f32;
            k += self.width;
        }
    }
}
