//! Coarse-to-fine registration driver.
//!
//! The four pyramids (two images, two masks) are built on scoped worker
//! threads, then the landmark refinement walks the levels coarsest-first.
//! The iteration budget doubles with each halving, the landmarks are scaled
//! alongside the images, and the full-resolution pass at the end is skipped
//! in accelerated mode.

use std::panic;
use std::thread;

use tracing::debug;

use crate::cancel::CancelToken;
use crate::config::RegistrationConfig;
use crate::error::RegError;
use crate::image::FloatImage;
use crate::mask::MaskPyramid;
use crate::optimize::{
    marquardt_levenberg, AffineObjective, BilinearObjective, FamilyObjective, GradientView,
    LevelView, RigidBodyObjective, ScaledRotationObjective, TranslationObjective,
};
use crate::pyramid::{pyramid_depth, ImagePyramid, LevelData, PyramidRole};
use crate::transform::{LandmarkSet, Point, TransformFamily};

#[derive(Debug)]
pub(crate) struct RegistrationResult {
    pub landmarks: LandmarkSet,
    pub source: ImagePyramid,
    pub source_mask: MaskPyramid,
}

/// Refine `landmarks.source` so the warped source best matches the target.
///
/// The returned source pyramid and mask are handed back so the caller can
/// resample the output image without rebuilding them.
pub(crate) fn run_registration(
    config: &RegistrationConfig,
    source: FloatImage,
    source_mask: Option<FloatImage>,
    target: FloatImage,
    target_mask: Option<FloatImage>,
    landmarks: &LandmarkSet,
    token: &CancelToken,
) -> Result<RegistrationResult, RegError> {
    let family = landmarks.family;
    let accelerated = config.quality.is_accelerated();
    let max_iterations = config.quality.max_iterations();
    let precision = config.quality.pixel_precision();
    let (sw, sh) = (source.width(), source.height());
    let (tw, th) = (target.width(), target.height());
    let depth = pyramid_depth(sw, sh, tw, th);
    debug!(?family, depth, accelerated, "registration started");

    let (sp, tp, sm, tm) = thread::scope(|s| {
        let sp = s.spawn(move || ImagePyramid::build(source, PyramidRole::Source, family, depth, token));
        let tp = s.spawn(move || ImagePyramid::build(target, PyramidRole::Target, family, depth, token));
        let sm = s.spawn(move || match source_mask {
            Some(m) => MaskPyramid::build(m, depth, token),
            None => MaskPyramid::all_valid(sw, sh, depth, token),
        });
        let tm = s.spawn(move || match target_mask {
            Some(m) => MaskPyramid::build(m, depth, token),
            None => MaskPyramid::all_valid(tw, th, depth, token),
        });
        (sp.join(), tp.join(), sm.join(), tm.join())
    });
    let source_pyr = sp.unwrap_or_else(|p| panic::resume_unwind(p))?;
    let target_pyr = tp.unwrap_or_else(|p| panic::resume_unwind(p))?;
    let source_masks = sm.unwrap_or_else(|p| panic::resume_unwind(p))?;
    let target_masks = tm.unwrap_or_else(|p| panic::resume_unwind(p))?;

    // bring the landmarks down to the coarsest level
    let scale = 0.5f64.powi(depth as i32 - 1);
    let mut source_pts: Vec<Point> = landmarks
        .source
        .iter()
        .map(|p| [p[0] * scale, p[1] * scale])
        .collect();
    let mut target_pts: Vec<Point> = landmarks
        .target
        .iter()
        .map(|p| [p[0] * scale, p[1] * scale])
        .collect();

    let mut iteration_power = 1usize << depth;
    for level in 0..source_pyr.reduced_levels() {
        if token.is_cancelled() {
            return Err(RegError::Cancelled);
        }
        iteration_power /= 2;
        let budget = max_iterations * iteration_power - 1;
        let mut objective = level_objective(
            family,
            &source_pyr,
            &target_pyr,
            source_masks.level(level),
            target_masks.level(level),
            Some(level),
            source_pts.clone(),
            target_pts.clone(),
        );
        let mse = marquardt_levenberg(&mut objective, budget, precision, accelerated)?;
        source_pts = objective.refined_points();
        debug!(level, budget, mse, "level refined");
        for p in source_pts.iter_mut().chain(target_pts.iter_mut()) {
            p[0] *= 2.0;
            p[1] *= 2.0;
        }
    }
    iteration_power /= 2;

    if !accelerated {
        if token.is_cancelled() {
            return Err(RegError::Cancelled);
        }
        let budget = max_iterations * iteration_power - 1;
        let mut objective = level_objective(
            family,
            &source_pyr,
            &target_pyr,
            source_masks.full(),
            target_masks.full(),
            None,
            source_pts.clone(),
            target_pts.clone(),
        );
        let mse = marquardt_levenberg(&mut objective, budget, precision, accelerated)?;
        source_pts = objective.refined_points();
        debug!(budget, mse, "full-resolution pass done");
    }

    Ok(RegistrationResult {
        landmarks: LandmarkSet {
            family,
            source: source_pts,
            target: landmarks.target.clone(),
        },
        source: source_pyr,
        source_mask: source_masks,
    })
}

/// Assemble the family objective over one pyramid level (`None` selects the
/// full-resolution buffers).
///
/// The inverse families interpolate the target through its coefficients and
/// compare against source samples; bilinear swaps the two roles. The level
/// payloads are fixed by (role, family) at pyramid build time, so the
/// variant matches cannot fail.
#[allow(clippy::too_many_arguments)]
fn level_objective<'a>(
    family: TransformFamily,
    source_pyr: &'a ImagePyramid,
    target_pyr: &'a ImagePyramid,
    source_mask: &'a FloatImage,
    target_mask: &'a FloatImage,
    level: Option<usize>,
    source_pts: Vec<Point>,
    target_pts: Vec<Point>,
) -> FamilyObjective<'a> {
    if family == TransformFamily::Bilinear {
        let in_coeff = match level {
            Some(i) => match source_pyr.level(i) {
                LevelData::Coefficients(c) => c,
                _ => unreachable!("bilinear source level holds coefficients"),
            },
            None => source_pyr.coefficients(),
        };
        let out_img = match level {
            Some(i) => match target_pyr.level(i) {
                LevelData::Cardinal(img) => img,
                _ => unreachable!("bilinear target level holds samples"),
            },
            None => target_pyr.image(),
        };
        let view = LevelView {
            in_coeff,
            in_mask: source_mask,
            out_img,
            out_mask: target_mask,
        };
        return FamilyObjective::Bilinear(BilinearObjective::new(view, source_pts, target_pts));
    }
    let in_coeff = match level {
        Some(i) => match target_pyr.level(i) {
            LevelData::Coefficients(c) => c,
            _ => unreachable!("target level holds coefficients"),
        },
        None => target_pyr.coefficients(),
    };
    let (out_img, xgrad, ygrad) = match level {
        Some(i) => match source_pyr.level(i) {
            LevelData::WithGradients {
                image,
                xgrad,
                ygrad,
            } => (image, xgrad, ygrad),
            _ => unreachable!("source level holds samples and gradients"),
        },
        None => {
            let (xg, yg) = match source_pyr.gradients() {
                Some(g) => g,
                None => unreachable!("source pyramid carries gradients"),
            };
            (source_pyr.image(), xg, yg)
        }
    };
    let view = GradientView {
        level: LevelView {
            in_coeff,
            in_mask: target_mask,
            out_img,
            out_mask: source_mask,
        },
        xgrad,
        ygrad,
    };
    match family {
        TransformFamily::Translation => {
            FamilyObjective::Translation(TranslationObjective::new(view, source_pts, target_pts))
        }
        TransformFamily::RigidBody => {
            FamilyObjective::RigidBody(RigidBodyObjective::new(view, source_pts, target_pts))
        }
        TransformFamily::ScaledRotation => {
            let jac = target_jacobian(family, &target_pts);
            FamilyObjective::ScaledRotation(ScaledRotationObjective::new(
                view, source_pts, target_pts, jac,
            ))
        }
        TransformFamily::Affine => {
            let jac = target_jacobian(family, &target_pts);
            FamilyObjective::Affine(AffineObjective::new(view, source_pts, target_pts, jac))
        }
        TransformFamily::Bilinear => unreachable!("handled above"),
    }
}

/// Normalization constant for the area-preserving error terms, computed
/// from the target landmarks at the current level's scale.
fn target_jacobian(family: TransformFamily, t: &[Point]) -> f64 {
    match family {
        TransformFamily::ScaledRotation => {
            let dx = t[0][0] - t[1][0];
            let dy = t[0][1] - t[1][1];
            dx * dx + dy * dy
        }
        TransformFamily::Affine => {
            (t[1][0] - t[2][0]) * t[0][1]
                + (t[2][0] - t[0][0]) * t[1][1]
                + (t[0][0] - t[1][0]) * t[2][1]
        }
        _ => 1.0,
    }
}
