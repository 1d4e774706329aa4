//! Multiresolution image pyramids.
//!
//! One pyramid wraps one image for one registration role. What each level
//! stores depends on (role, family):
//!
//! - target, non-bilinear: cubic coefficients only
//! - source, non-bilinear: cardinal samples plus x/y gradients
//! - target, bilinear:     cardinal samples only
//! - source, bilinear:     cubic coefficients only
//!
//! Levels halve per step (floor) and are stored coarsest-first; the
//! full-resolution representation is kept on the pyramid itself for the
//! final optimization pass. The full-resolution coefficient solve is not
//! interruptible; everything after it polls the cancel token between 1-D
//! sweeps.

use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::RegError;
use crate::image::FloatImage;
use crate::spline::{self, Degree, CARDINAL_CUBIC, CARDINAL_SEPTIC};
use crate::transform::TransformFamily;

/// Halving stops once any of the four pyramid dimensions would drop
/// below twice this tile size.
pub const MIN_SIZE: usize = 12;

/// Which side of the registration an image plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PyramidRole {
    Source,
    Target,
}

/// Per-level payload.
#[derive(Debug, Clone)]
pub enum LevelData {
    /// Cubic B-spline coefficients.
    Coefficients(FloatImage),
    /// Cardinal (sample-domain) intensities.
    Cardinal(FloatImage),
    /// Cardinal intensities with spline-derived gradients.
    WithGradients {
        image: FloatImage,
        xgrad: FloatImage,
        ygrad: FloatImage,
    },
}

impl LevelData {
    pub fn width(&self) -> usize {
        match self {
            LevelData::Coefficients(i) | LevelData::Cardinal(i) => i.width(),
            LevelData::WithGradients { image, .. } => image.width(),
        }
    }

    pub fn height(&self) -> usize {
        match self {
            LevelData::Coefficients(i) | LevelData::Cardinal(i) => i.height(),
            LevelData::WithGradients { image, .. } => image.height(),
        }
    }
}

/// Image pyramid for one (role, family) pair.
#[derive(Debug, Clone)]
pub struct ImagePyramid {
    role: PyramidRole,
    image: FloatImage,
    coefficients: FloatImage,
    xgrad: Option<FloatImage>,
    ygrad: Option<FloatImage>,
    levels: Vec<LevelData>,
}

impl ImagePyramid {
    /// Build the pyramid. `depth` counts the full-resolution level, so
    /// `depth - 1` reduced levels are produced.
    pub fn build(
        image: FloatImage,
        role: PyramidRole,
        family: TransformFamily,
        depth: usize,
        token: &CancelToken,
    ) -> Result<Self, RegError> {
        if image.area() == 0 {
            return Err(RegError::EmptyImage);
        }
        let coefficients = coefficients_from_samples(&image, Degree::Cubic);
        let mut pyramid = Self {
            role,
            image,
            coefficients,
            xgrad: None,
            ygrad: None,
            levels: Vec::with_capacity(depth.saturating_sub(1)),
        };
        let with_gradients = role == PyramidRole::Source && family != TransformFamily::Bilinear;
        let coefficients_only = match role {
            PyramidRole::Target => family != TransformFamily::Bilinear,
            PyramidRole::Source => family == TransformFamily::Bilinear,
        };
        if with_gradients {
            let (xg, yg) = image_gradients(&pyramid.image, token)?;
            pyramid.xgrad = Some(xg);
            pyramid.ygrad = Some(yg);
            pyramid.build_image_and_gradient_levels(depth, token)?;
        } else if coefficients_only {
            pyramid.build_coefficient_levels(depth, token)?;
        } else {
            pyramid.build_cardinal_levels(depth, token)?;
        }
        pyramid.levels.reverse();
        debug!(
            role = ?role,
            width = pyramid.image.width(),
            height = pyramid.image.height(),
            reduced = pyramid.levels.len(),
            "pyramid built"
        );
        Ok(pyramid)
    }

    pub fn role(&self) -> PyramidRole {
        self.role
    }

    /// Full-resolution cardinal samples.
    pub fn image(&self) -> &FloatImage {
        &self.image
    }

    /// Full-resolution cubic coefficients.
    pub fn coefficients(&self) -> &FloatImage {
        &self.coefficients
    }

    /// Full-resolution gradients, present for source/non-bilinear pyramids.
    pub fn gradients(&self) -> Option<(&FloatImage, &FloatImage)> {
        Some((self.xgrad.as_ref()?, self.ygrad.as_ref()?))
    }

    /// Reduced level `i`, `0` being the coarsest.
    pub fn level(&self, i: usize) -> &LevelData {
        &self.levels[i]
    }

    pub fn reduced_levels(&self) -> usize {
        self.levels.len()
    }

    fn build_coefficient_levels(
        &mut self,
        depth: usize,
        token: &CancelToken,
    ) -> Result<(), RegError> {
        if depth <= 1 {
            return Ok(());
        }
        let mut dual = cardinal_fir(&self.coefficients, Degree::Septic, token)?;
        for _ in 1..depth {
            let half_dual = half_dual(&dual, token)?;
            let half_coeff = coefficients_from_samples(&half_dual, Degree::Septic);
            self.levels.push(LevelData::Coefficients(half_coeff));
            dual = half_dual;
        }
        Ok(())
    }

    fn build_cardinal_levels(&mut self, depth: usize, token: &CancelToken) -> Result<(), RegError> {
        if depth <= 1 {
            return Ok(());
        }
        let mut dual = cardinal_to_dual(&self.image, token)?;
        for _ in 1..depth {
            let half = half_dual(&dual, token)?;
            let image = dual_to_cardinal(&half, token)?;
            self.levels.push(LevelData::Cardinal(image));
            dual = half;
        }
        Ok(())
    }

    fn build_image_and_gradient_levels(
        &mut self,
        depth: usize,
        token: &CancelToken,
    ) -> Result<(), RegError> {
        if depth <= 1 {
            return Ok(());
        }
        let mut dual = cardinal_to_dual(&self.image, token)?;
        for _ in 1..depth {
            let half = half_dual(&dual, token)?;
            // The dual of a cubic spline has effective degree 7; inverting
            // with the septic poles yields the level's cubic coefficients.
            let coeff = coefficients_from_samples(&half, Degree::Septic);
            let (xgrad, ygrad) = coefficient_gradients(&coeff, token)?;
            let image = cardinal_fir(&coeff, Degree::Cubic, token)?;
            self.levels.push(LevelData::WithGradients {
                image,
                xgrad,
                ygrad,
            });
            dual = half;
        }
        Ok(())
    }
}

/// Depth shared by the four pyramids of one registration: keep halving as
/// long as all four dimensions stay at least `2 * MIN_SIZE`.
pub fn pyramid_depth(sw: usize, sh: usize, tw: usize, th: usize) -> usize {
    let mut dims = [sw, sh, tw, th];
    let mut depth = 1;
    while dims.iter().all(|d| *d >= 2 * MIN_SIZE) {
        for d in dims.iter_mut() {
            *d /= 2;
        }
        depth += 1;
    }
    depth
}

/// Separable in-place coefficient solve, rows then columns.
pub(crate) fn coefficients_from_samples(img: &FloatImage, degree: Degree) -> FloatImage {
    let (w, h) = (img.width(), img.height());
    let mut out = FloatImage::new(w, h);
    let mut hline = vec![0.0f64; w];
    let mut vline = vec![0.0f64; h];
    for y in 0..h {
        img.row_into(y, &mut hline);
        spline::samples_to_coefficients(&mut hline, degree, 0.0);
        out.set_row(y, &hline);
    }
    for x in 0..w {
        out.column_into(x, &mut vline);
        spline::samples_to_coefficients(&mut vline, degree, 0.0);
        out.set_column(x, &vline);
    }
    out
}

/// Separable symmetric FIR reconstruction with the kernel of `degree`.
fn cardinal_fir(
    basic: &FloatImage,
    degree: Degree,
    token: &CancelToken,
) -> Result<FloatImage, RegError> {
    let h: &[f64] = match degree {
        Degree::Cubic => &CARDINAL_CUBIC,
        Degree::Septic => &CARDINAL_SEPTIC,
    };
    let (w, ht) = (basic.width(), basic.height());
    let mut out = FloatImage::new(w, ht);
    let mut line = vec![0.0f64; w];
    let mut data = vec![0.0f64; w];
    for y in 0..ht {
        basic.row_into(y, &mut line);
        spline::symmetric_fir_mirror_off_bounds(h, &line, &mut data);
        out.set_row(y, &data);
    }
    if token.is_cancelled() {
        return Err(RegError::Cancelled);
    }
    let mut line = vec![0.0f64; ht];
    let mut data = vec![0.0f64; ht];
    for x in 0..w {
        out.column_into(x, &mut line);
        spline::symmetric_fir_mirror_off_bounds(h, &line, &mut data);
        out.set_column(x, &data);
    }
    Ok(out)
}

/// Cardinal samples to the oversampled dual representation.
fn cardinal_to_dual(img: &FloatImage, token: &CancelToken) -> Result<FloatImage, RegError> {
    cardinal_fir(
        &coefficients_from_samples(img, Degree::Cubic),
        Degree::Septic,
        token,
    )
}

/// Inverse of [`cardinal_to_dual`].
fn dual_to_cardinal(dual: &FloatImage, token: &CancelToken) -> Result<FloatImage, RegError> {
    cardinal_fir(
        &coefficients_from_samples(dual, Degree::Septic),
        Degree::Cubic,
        token,
    )
}

/// Halve a dual image in both directions with the binomial decimator.
fn half_dual(full: &FloatImage, token: &CancelToken) -> Result<FloatImage, RegError> {
    let (fw, fh) = (full.width(), full.height());
    let (hw, hh) = (fw / 2, fh / 2);
    let mut demi = FloatImage::new(hw, fh);
    let mut hline = vec![0.0f64; fw];
    let mut hdata = vec![0.0f64; hw];
    for y in 0..fh {
        full.row_into(y, &mut hline);
        spline::reduce_dual(&hline, &mut hdata);
        demi.set_row(y, &hdata);
    }
    if token.is_cancelled() {
        return Err(RegError::Cancelled);
    }
    let mut out = FloatImage::new(hw, hh);
    let mut vline = vec![0.0f64; fh];
    let mut vdata = vec![0.0f64; hh];
    for x in 0..hw {
        demi.column_into(x, &mut vline);
        spline::reduce_dual(&vline, &mut vdata);
        out.set_column(x, &vdata);
    }
    Ok(out)
}

/// Full-resolution gradients straight from the samples: each direction is
/// an independent 1-D coefficient solve followed by the derivative kernel.
fn image_gradients(
    img: &FloatImage,
    token: &CancelToken,
) -> Result<(FloatImage, FloatImage), RegError> {
    let (w, h) = (img.width(), img.height());
    let mut xgrad = FloatImage::new(w, h);
    let mut ygrad = FloatImage::new(w, h);
    let mut hline = vec![0.0f64; w];
    for y in 0..h {
        img.row_into(y, &mut hline);
        spline::samples_to_coefficients(&mut hline, Degree::Cubic, 0.0);
        spline::coefficients_to_gradient(&mut hline);
        xgrad.set_row(y, &hline);
    }
    if token.is_cancelled() {
        return Err(RegError::Cancelled);
    }
    let mut vline = vec![0.0f64; h];
    for x in 0..w {
        img.column_into(x, &mut vline);
        spline::samples_to_coefficients(&mut vline, Degree::Cubic, 0.0);
        spline::coefficients_to_gradient(&mut vline);
        ygrad.set_column(x, &vline);
    }
    Ok((xgrad, ygrad))
}

/// Gradients of a level described by 2-D cubic coefficients: derivative
/// along one axis, cardinal reconstruction along the other.
fn coefficient_gradients(
    coeff: &FloatImage,
    token: &CancelToken,
) -> Result<(FloatImage, FloatImage), RegError> {
    let (w, h) = (coeff.width(), coeff.height());
    let mut xgrad = FloatImage::new(w, h);
    let mut ygrad = FloatImage::new(w, h);
    let mut hline = vec![0.0f64; w];
    let mut hdata = vec![0.0f64; w];
    for y in 0..h {
        coeff.row_into(y, &mut hline);
        hdata.copy_from_slice(&hline);
        spline::coefficients_to_gradient(&mut hline);
        spline::coefficients_to_samples(&mut hdata);
        xgrad.set_row(y, &hline);
        ygrad.set_row(y, &hdata);
    }
    if token.is_cancelled() {
        return Err(RegError::Cancelled);
    }
    let mut vline = vec![0.0f64; h];
    for x in 0..w {
        xgrad.column_into(x, &mut vline);
        spline::coefficients_to_samples(&mut vline);
        xgrad.set_column(x, &vline);
        ygrad.column_into(x, &mut vline);
        spline::coefficients_to_gradient(&mut vline);
        ygrad.set_column(x, &vline);
    }
    Ok((xgrad, ygrad))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::gradient_image;

    #[test]
    fn depth_counts_halvings_above_min_tile() {
        assert_eq!(pyramid_depth(64, 64, 64, 64), 3);
        assert_eq!(pyramid_depth(23, 64, 64, 64), 1);
        assert_eq!(pyramid_depth(24, 24, 24, 24), 2);
        assert_eq!(pyramid_depth(256, 256, 256, 256), 5);
    }

    #[test]
    fn reduced_levels_halve_dimensions() {
        let token = CancelToken::new();
        let img = gradient_image(49, 64, 1.0, 2.0);
        let p = ImagePyramid::build(
            img,
            PyramidRole::Target,
            TransformFamily::Translation,
            3,
            &token,
        )
        .unwrap();
        assert_eq!(p.reduced_levels(), 2);
        // coarsest first
        assert_eq!(p.level(0).width(), 12);
        assert_eq!(p.level(0).height(), 16);
        assert_eq!(p.level(1).width(), 24);
        assert_eq!(p.level(1).height(), 32);
        assert!(matches!(p.level(0), LevelData::Coefficients(_)));
    }

    #[test]
    fn source_non_bilinear_levels_carry_gradients() {
        let token = CancelToken::new();
        let img = gradient_image(48, 48, 1.0, 0.0);
        let p = ImagePyramid::build(
            img,
            PyramidRole::Source,
            TransformFamily::Affine,
            2,
            &token,
        )
        .unwrap();
        assert!(p.gradients().is_some());
        match p.level(0) {
            LevelData::WithGradients { image, xgrad, ygrad } => {
                assert_eq!(image.width(), 24);
                assert_eq!(xgrad.width(), 24);
                assert_eq!(ygrad.height(), 24);
            }
            other => panic!("expected gradients, got {other:?}"),
        }
    }

    #[test]
    fn bilinear_roles_swap_content() {
        let token = CancelToken::new();
        let img = gradient_image(48, 48, 1.0, 1.0);
        let target = ImagePyramid::build(
            img.clone(),
            PyramidRole::Target,
            TransformFamily::Bilinear,
            2,
            &token,
        )
        .unwrap();
        assert!(matches!(target.level(0), LevelData::Cardinal(_)));
        let source = ImagePyramid::build(
            img,
            PyramidRole::Source,
            TransformFamily::Bilinear,
            2,
            &token,
        )
        .unwrap();
        assert!(matches!(source.level(0), LevelData::Coefficients(_)));
    }

    #[test]
    fn full_res_gradient_of_ramp_is_constant() {
        let token = CancelToken::new();
        let img = gradient_image(32, 32, 2.0, -1.0);
        let p = ImagePyramid::build(
            img,
            PyramidRole::Source,
            TransformFamily::Translation,
            1,
            &token,
        )
        .unwrap();
        let (xg, yg) = p.gradients().unwrap();
        let mid = 16 * 32 + 16;
        assert!((xg.as_slice()[mid] - 2.0).abs() < 1e-3);
        assert!((yg.as_slice()[mid] + 1.0).abs() < 1e-3);
    }

    #[test]
    fn cancelled_token_stops_the_build() {
        let token = CancelToken::new();
        token.cancel();
        let img = gradient_image(64, 64, 1.0, 1.0);
        let err = ImagePyramid::build(
            img,
            PyramidRole::Target,
            TransformFamily::Affine,
            3,
            &token,
        )
        .unwrap_err();
        assert!(matches!(err, RegError::Cancelled));
    }
}
