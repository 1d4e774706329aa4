//! High-level registration entry points.

use crate::cancel::CancelToken;
use crate::config::RegistrationConfig;
use crate::engine::run_registration;
use crate::error::RegError;
use crate::image::FloatImage;
use crate::pyramid::coefficients_from_samples;
use crate::resample::{resample, ResampledImage};
use crate::spline::Degree;
use crate::transform::{build_matrix, LandmarkSet};

/// Landmark-guided registration of one source image onto one target.
///
/// The registrar owns the configuration; each `register_*` call is an
/// independent run that consumes its images (the pyramids are built in
/// place from them).
///
/// ```
/// use splinereg::{FloatImage, LandmarkSet, Registrar, TransformFamily};
///
/// let img = FloatImage::from_vec(16, 16, vec![0.0; 256])?;
/// let landmarks = LandmarkSet::new(
///     TransformFamily::Translation,
///     vec![[8.0, 8.0]],
///     vec![[8.0, 8.0]],
/// )?;
/// let refined = Registrar::new().register(img.clone(), img, &landmarks)?;
/// assert_eq!(refined.source.len(), 1);
/// # Ok::<(), splinereg::RegError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Registrar {
    config: RegistrationConfig,
}

impl Registrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RegistrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut RegistrationConfig {
        &mut self.config
    }

    /// Refine the source landmarks so the warped source matches the target.
    pub fn register(
        &self,
        source: FloatImage,
        target: FloatImage,
        landmarks: &LandmarkSet,
    ) -> Result<LandmarkSet, RegError> {
        self.register_masked(source, None, target, None, landmarks, &CancelToken::new())
    }

    /// [`register`](Self::register) with optional weight masks and a cancel
    /// token polled between processing stages.
    ///
    /// Mask weights multiply pixel validity: a pixel contributes to the
    /// error only where both masks are non-zero.
    pub fn register_masked(
        &self,
        source: FloatImage,
        source_mask: Option<FloatImage>,
        target: FloatImage,
        target_mask: Option<FloatImage>,
        landmarks: &LandmarkSet,
        token: &CancelToken,
    ) -> Result<LandmarkSet, RegError> {
        check_inputs(&source, source_mask.as_ref(), &target, target_mask.as_ref(), landmarks)?;
        let result = run_registration(
            &self.config,
            source,
            source_mask,
            target,
            target_mask,
            landmarks,
            token,
        )?;
        Ok(result.landmarks)
    }

    /// Register, then warp the source onto the target grid with the refined
    /// landmarks. Returns the refined set and the warped image plus mask.
    pub fn register_resampled(
        &self,
        source: FloatImage,
        source_mask: Option<FloatImage>,
        target: FloatImage,
        target_mask: Option<FloatImage>,
        landmarks: &LandmarkSet,
        token: &CancelToken,
    ) -> Result<(LandmarkSet, ResampledImage), RegError> {
        check_inputs(&source, source_mask.as_ref(), &target, target_mask.as_ref(), landmarks)?;
        let (out_w, out_h) = (target.width(), target.height());
        let result = run_registration(
            &self.config,
            source,
            source_mask,
            target,
            target_mask,
            landmarks,
            token,
        )?;
        let refined = result.landmarks;
        let accelerated = self.config.quality.is_accelerated();
        let matrix = build_matrix(refined.family, &refined.target, &refined.source)?;
        let input = if accelerated {
            result.source.image()
        } else {
            result.source.coefficients()
        };
        let warped = resample(
            refined.family,
            &matrix,
            input,
            result.source_mask.full(),
            out_w,
            out_h,
            accelerated,
        );
        Ok((refined, warped))
    }

    /// Warp the source onto an output grid using already-refined landmarks,
    /// without running any optimization.
    pub fn transform(
        &self,
        source: &FloatImage,
        source_mask: Option<&FloatImage>,
        landmarks: &LandmarkSet,
        out_width: usize,
        out_height: usize,
    ) -> Result<ResampledImage, RegError> {
        if source.area() == 0 || out_width * out_height == 0 {
            return Err(RegError::EmptyImage);
        }
        check_mask(source, source_mask)?;
        landmarks.validate()?;
        let accelerated = self.config.quality.is_accelerated();
        let matrix = build_matrix(landmarks.family, &landmarks.target, &landmarks.source)?;
        let owned_input;
        let input = if accelerated {
            source
        } else {
            owned_input = coefficients_from_samples(source, Degree::Cubic);
            &owned_input
        };
        let owned_mask;
        let mask = match source_mask {
            Some(m) => m,
            None => {
                let mut all = FloatImage::new(source.width(), source.height());
                all.as_mut_slice().fill(1.0);
                owned_mask = all;
                &owned_mask
            }
        };
        Ok(resample(
            landmarks.family,
            &matrix,
            input,
            mask,
            out_width,
            out_height,
            accelerated,
        ))
    }
}

fn check_inputs(
    source: &FloatImage,
    source_mask: Option<&FloatImage>,
    target: &FloatImage,
    target_mask: Option<&FloatImage>,
    landmarks: &LandmarkSet,
) -> Result<(), RegError> {
    if source.area() == 0 || target.area() == 0 {
        return Err(RegError::EmptyImage);
    }
    check_mask(source, source_mask)?;
    check_mask(target, target_mask)?;
    landmarks.validate()
}

fn check_mask(image: &FloatImage, mask: Option<&FloatImage>) -> Result<(), RegError> {
    if let Some(m) = mask {
        if m.width() != image.width() || m.height() != image.height() {
            return Err(RegError::MaskDimensionMismatch {
                mask_width: m.width(),
                mask_height: m.height(),
                width: image.width(),
                height: image.height(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Quality;
    use crate::test_utils::{gaussian_blob, shifted};
    use crate::transform::TransformFamily;

    #[test]
    fn mask_dimensions_are_validated() {
        let img = gaussian_blob(32, 32, 16.0, 16.0, 4.0, 100.0);
        let bad_mask = FloatImage::new(16, 16);
        let landmarks = LandmarkSet::new(
            TransformFamily::Translation,
            vec![[16.0, 16.0]],
            vec![[16.0, 16.0]],
        )
        .unwrap();
        let err = Registrar::new()
            .register_masked(
                img.clone(),
                Some(bad_mask),
                img,
                None,
                &landmarks,
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            RegError::MaskDimensionMismatch {
                mask_width: 16,
                width: 32,
                ..
            }
        ));
    }

    #[test]
    fn hand_built_landmark_sets_are_revalidated() {
        let img = gaussian_blob(32, 32, 16.0, 16.0, 4.0, 100.0);
        let landmarks = LandmarkSet {
            family: TransformFamily::Affine,
            source: vec![[1.0, 1.0]],
            target: vec![[1.0, 1.0]],
        };
        let err = Registrar::new()
            .register(img.clone(), img, &landmarks)
            .unwrap_err();
        assert!(matches!(err, RegError::LandmarkCount { expected: 3, .. }));
    }

    #[test]
    fn register_resampled_restores_a_shifted_blob() {
        let base = gaussian_blob(48, 48, 20.0, 20.0, 6.0, 100.0);
        let moved = shifted(&base, 3, -2);
        let landmarks = LandmarkSet::new(
            TransformFamily::Translation,
            vec![[20.0, 20.0]],
            vec![[20.0, 20.0]],
        )
        .unwrap();
        let registrar = Registrar::new();
        let (refined, warped) = registrar
            .register_resampled(moved, None, base.clone(), None, &landmarks, &CancelToken::new())
            .unwrap();
        assert!((refined.source[0][0] - 23.0).abs() < 0.05);
        assert!((refined.source[0][1] - 18.0).abs() < 0.05);
        // warped source should sit on top of the target away from borders
        let mut worst = 0.0f32;
        for y in 8..40 {
            for x in 8..40 {
                let k = y * 48 + x;
                worst = worst.max((warped.image.as_slice()[k] - base.as_slice()[k]).abs());
            }
        }
        assert!(worst < 1.0, "worst interior deviation {worst}");
    }

    #[test]
    fn transform_applies_landmarks_without_optimizing() {
        let img = gaussian_blob(32, 32, 16.0, 16.0, 5.0, 100.0);
        // landmarks encode a pure +2 px x shift of the source
        let landmarks = LandmarkSet::new(
            TransformFamily::Translation,
            vec![[18.0, 16.0]],
            vec![[16.0, 16.0]],
        )
        .unwrap();
        let warped = Registrar::new()
            .transform(&img, None, &landmarks, 32, 32)
            .unwrap();
        let k = 16 * 32 + 16;
        // output pixel (16, 16) reads source pixel (18, 16)
        assert!((warped.image.as_slice()[k] - img.as_slice()[k + 2]).abs() < 1e-2);
    }

    #[test]
    fn accelerated_transform_uses_nearest_samples() {
        let img = gaussian_blob(32, 32, 16.0, 16.0, 5.0, 100.0);
        let landmarks = LandmarkSet::new(
            TransformFamily::Translation,
            vec![[17.0, 16.0]],
            vec![[16.0, 16.0]],
        )
        .unwrap();
        let registrar = Registrar::with_config(RegistrationConfig {
            quality: Quality::Accelerated,
        });
        let warped = registrar.transform(&img, None, &landmarks, 32, 32).unwrap();
        let k = 16 * 32 + 16;
        assert_eq!(warped.image.as_slice()[k], img.as_slice()[k + 1]);
    }
}
