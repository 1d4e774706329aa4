//! Levenberg-Marquardt refinement of the landmark positions.
//!
//! One driver serves all five families; the family-specific error,
//! gradient, and Hessian evaluations live behind the [`Objective`] trait
//! and are selected by tagged dispatch in [`FamilyObjective`]. The damped
//! normal equations go through an LU solve; a singular system counts as a
//! rejected step and inflates the damping factor instead of aborting.

mod affine;
mod bilinear;
mod rigid;
mod scaled_rotation;
mod translation;

pub(crate) use affine::AffineObjective;
pub(crate) use bilinear::BilinearObjective;
pub(crate) use rigid::RigidBodyObjective;
pub(crate) use scaled_rotation::ScaledRotationObjective;
pub(crate) use translation::TranslationObjective;

use nalgebra::{DMatrix, DVector};
use tracing::warn;

use crate::error::RegError;
use crate::image::FloatImage;
use crate::interp::{round_half_away, Sampler};
use crate::transform::{Point, TransformMatrix};

pub(crate) const FIRST_LAMBDA: f64 = 1.0;
pub(crate) const LAMBDA_MAGSTEP: f64 = 4.0;

/// Buffers of one pyramid level as the optimizer sees them: the "in" image
/// is interpolated through its spline coefficients, the "out" image is
/// compared against sample by sample.
pub(crate) struct LevelView<'a> {
    pub in_coeff: &'a FloatImage,
    pub in_mask: &'a FloatImage,
    pub out_img: &'a FloatImage,
    pub out_mask: &'a FloatImage,
}

/// [`LevelView`] plus the precomputed gradients of the "out" image, used by
/// the inverse (non-bilinear) families.
pub(crate) struct GradientView<'a> {
    pub level: LevelView<'a>,
    pub xgrad: &'a FloatImage,
    pub ygrad: &'a FloatImage,
}

/// What a mean-squares evaluation should refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EvalMode {
    Full,
    GradientOnly,
    Plain,
}

/// Family-specific optimization state.
///
/// `try_step` stages an attempt from the damped update and reports the mean
/// landmark displacement; `evaluate` scores that attempt and overwrites the
/// derivative buffers (the Hessian only when asked, so an accelerated run
/// keeps reusing the initial one). `accept` promotes the attempt.
pub(crate) trait Objective {
    fn dof(&self) -> usize;
    fn initialize(&mut self) -> Result<f64, RegError>;
    fn try_step(&mut self, update: &DVector<f64>) -> Option<f64>;
    fn evaluate(&mut self, refresh_hessian: bool) -> f64;
    fn plain_mse(&mut self) -> f64;
    fn accept(&mut self);
    fn gradient(&self) -> &DVector<f64>;
    fn hessian(&self) -> &DMatrix<f64>;
}

/// Run the damped iteration until the budget is exhausted or the landmark
/// displacement drops below `precision`, then apply one undamped polish
/// step that is kept only if it improves the error.
pub(crate) fn marquardt_levenberg<O: Objective>(
    obj: &mut O,
    budget: usize,
    precision: f64,
    accelerated: bool,
) -> Result<f64, RegError> {
    let mut best = obj.initialize()?;
    let mut lambda = FIRST_LAMBDA;
    let mut iteration = 1usize;
    loop {
        let step = damped_update(obj.hessian(), obj.gradient(), lambda)
            .and_then(|update| obj.try_step(&update));
        iteration += 1;
        let displacement = match step {
            Some(d) => d,
            None => {
                warn!(lambda, "singular damped system, step rejected");
                lambda *= LAMBDA_MAGSTEP;
                if iteration < budget {
                    continue;
                }
                break;
            }
        };
        let mse = obj.evaluate(!accelerated);
        if mse < best {
            best = mse;
            obj.accept();
            lambda /= LAMBDA_MAGSTEP;
        } else {
            lambda *= LAMBDA_MAGSTEP;
        }
        if iteration >= budget || displacement < precision {
            break;
        }
    }
    if let Some(update) = undamped_update(obj.hessian(), obj.gradient()) {
        if obj.try_step(&update).is_some() {
            let mse = obj.plain_mse();
            if mse < best {
                best = mse;
                obj.accept();
            }
        }
    }
    Ok(best)
}

fn damped_update(
    hessian: &DMatrix<f64>,
    gradient: &DVector<f64>,
    lambda: f64,
) -> Option<DVector<f64>> {
    let mut damped = hessian.clone();
    for i in 0..damped.nrows() {
        damped[(i, i)] *= 1.0 + lambda;
    }
    solve(damped, gradient)
}

fn undamped_update(hessian: &DMatrix<f64>, gradient: &DVector<f64>) -> Option<DVector<f64>> {
    solve(hessian.clone(), gradient)
}

fn solve(system: DMatrix<f64>, gradient: &DVector<f64>) -> Option<DVector<f64>> {
    let update = system.lu().solve(gradient)?;
    update.iter().all(|v| v.is_finite()).then_some(update)
}

/// Landmark bookkeeping shared by the point-parametrized families.
pub(crate) struct PointState {
    pub current: Vec<Point>,
    pub attempt: Vec<Point>,
    pub target: Vec<Point>,
    pub gradient: DVector<f64>,
    pub hessian: DMatrix<f64>,
}

impl PointState {
    pub fn new(source: Vec<Point>, target: Vec<Point>, dof: usize) -> Self {
        let attempt = source.clone();
        Self {
            current: source,
            attempt,
            target,
            gradient: DVector::zeros(dof),
            hessian: DMatrix::zeros(dof, dof),
        }
    }

    /// Stage `current - update` as the attempt; mean per-landmark shift.
    pub fn displace(&mut self, update: &DVector<f64>) -> f64 {
        let mut displacement = 0.0;
        for (k, (c, a)) in self.current.iter().zip(self.attempt.iter_mut()).enumerate() {
            let ux = update[2 * k];
            let uy = update[2 * k + 1];
            a[0] = c[0] - ux;
            a[1] = c[1] - uy;
            displacement += ux.hypot(uy);
        }
        displacement / self.current.len() as f64
    }

    pub fn accept(&mut self) {
        self.current.clone_from(&self.attempt);
    }
}

/// Gradient slot update plus upper-triangle Hessian accumulation for one
/// pixel's parameter-derivative vector `d`.
#[inline]
pub(crate) fn accumulate(
    gradient: &mut DVector<f64>,
    mut hessian: Option<&mut DMatrix<f64>>,
    diff: f64,
    d: &[f64],
) {
    for (i, di) in d.iter().enumerate() {
        gradient[i] += diff * di;
        if let Some(h) = hessian.as_deref_mut() {
            for (j, dj) in d.iter().enumerate().skip(i) {
                h[(i, j)] += di * dj;
            }
        }
    }
}

/// The evaluations only fill the upper triangle; copy it down once per pass.
pub(crate) fn mirror_upper_triangle(h: &mut DMatrix<f64>) {
    for i in 1..h.nrows() {
        for j in 0..i {
            h[(i, j)] = h[(j, i)];
        }
    }
}

/// Masked sum of squared differences over the warped output grid.
///
/// The warp is walked incrementally along rows and columns; `visit` fires
/// for each valid pixel with `(k, u, v, difference)`, `u`/`v` being the
/// output coordinates the per-family gradient formulas are written in.
/// Returns the raw sum and the number of contributing pixels.
pub(crate) fn warped_sum_squares(
    view: &LevelView,
    matrix: &TransformMatrix,
    mut visit: impl FnMut(usize, f64, f64, f64),
) -> (f64, u64) {
    let in_w = view.in_coeff.width() as i64;
    let in_h = view.in_coeff.height() as i64;
    let out_w = view.out_img.width();
    let out_h = view.out_img.height();
    let out = view.out_img.as_slice();
    let out_mask = view.out_mask.as_slice();
    let in_mask = view.in_mask.as_slice();
    let mut sampler = Sampler::new(view.in_coeff);
    let mut yx = matrix.m[0][0];
    let mut yy = matrix.m[1][0];
    let mut sum = 0.0;
    let mut area = 0u64;
    let mut k = 0usize;
    for v in 0..out_h {
        let mut x0 = yx;
        let mut y0 = yy;
        for u in 0..out_w {
            let x = x0;
            let y = y0;
            let xm = round_half_away(x);
            let ym = round_half_away(y);
            if 0 <= xm
                && xm < in_w
                && 0 <= ym
                && ym < in_h
                && out_mask[k] * in_mask[(ym * in_w + xm) as usize] != 0.0
            {
                area += 1;
                sampler.set(x, y);
                let diff = out[k] as f64 - sampler.interpolate();
                sum += diff * diff;
                visit(k, u as f64, v as f64, diff);
            }
            k += 1;
            x0 += matrix.m[0][1];
            y0 += matrix.m[1][1];
        }
        yx += matrix.m[0][2];
        yy += matrix.m[1][2];
    }
    (sum, area)
}

/// Tagged dispatch over the five family objectives.
pub(crate) enum FamilyObjective<'a> {
    Translation(TranslationObjective<'a>),
    RigidBody(RigidBodyObjective<'a>),
    ScaledRotation(ScaledRotationObjective<'a>),
    Affine(AffineObjective<'a>),
    Bilinear(BilinearObjective<'a>),
}

impl FamilyObjective<'_> {
    /// Refined source landmarks after the level has been optimized.
    pub fn refined_points(&self) -> Vec<Point> {
        match self {
            FamilyObjective::Translation(o) => o.points().to_vec(),
            FamilyObjective::RigidBody(o) => o.points(),
            FamilyObjective::ScaledRotation(o) => o.points().to_vec(),
            FamilyObjective::Affine(o) => o.points().to_vec(),
            FamilyObjective::Bilinear(o) => o.points().to_vec(),
        }
    }
}

macro_rules! delegate {
    ($self:ident, $o:ident => $body:expr) => {
        match $self {
            FamilyObjective::Translation($o) => $body,
            FamilyObjective::RigidBody($o) => $body,
            FamilyObjective::ScaledRotation($o) => $body,
            FamilyObjective::Affine($o) => $body,
            FamilyObjective::Bilinear($o) => $body,
        }
    };
}

impl Objective for FamilyObjective<'_> {
    fn dof(&self) -> usize {
        delegate!(self, o => o.dof())
    }

    fn initialize(&mut self) -> Result<f64, RegError> {
        delegate!(self, o => o.initialize())
    }

    fn try_step(&mut self, update: &DVector<f64>) -> Option<f64> {
        delegate!(self, o => o.try_step(update))
    }

    fn evaluate(&mut self, refresh_hessian: bool) -> f64 {
        delegate!(self, o => o.evaluate(refresh_hessian))
    }

    fn plain_mse(&mut self) -> f64 {
        delegate!(self, o => o.plain_mse())
    }

    fn accept(&mut self) {
        delegate!(self, o => o.accept())
    }

    fn gradient(&self) -> &DVector<f64> {
        delegate!(self, o => o.gradient())
    }

    fn hessian(&self) -> &DMatrix<f64> {
        delegate!(self, o => o.hessian())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Quadratic bowl (p - c)^T A (p - c); its Gauss-Newton model is exact,
    /// so the driver should land on the minimum in a handful of steps.
    struct Bowl {
        a: DMatrix<f64>,
        center: DVector<f64>,
        current: DVector<f64>,
        attempt: DVector<f64>,
        gradient: DVector<f64>,
        hessian: DMatrix<f64>,
    }

    impl Bowl {
        fn new(center: [f64; 2], start: [f64; 2]) -> Self {
            let a = DMatrix::from_row_slice(2, 2, &[3.0, 1.0, 1.0, 2.0]);
            Self {
                a,
                center: DVector::from_row_slice(&center),
                current: DVector::from_row_slice(&start),
                attempt: DVector::zeros(2),
                gradient: DVector::zeros(2),
                hessian: DMatrix::zeros(2, 2),
            }
        }

        fn value_at(&self, p: &DVector<f64>) -> f64 {
            let d = p - &self.center;
            (d.transpose() * &self.a * &d)[(0, 0)]
        }

        fn refresh(&mut self, p: &DVector<f64>, hessian: bool) -> f64 {
            let d = p - &self.center;
            self.gradient = &self.a * &d;
            if hessian {
                self.hessian = self.a.clone();
            }
            self.value_at(p)
        }
    }

    impl Objective for Bowl {
        fn dof(&self) -> usize {
            2
        }

        fn initialize(&mut self) -> Result<f64, RegError> {
            let p = self.current.clone();
            Ok(self.refresh(&p, true))
        }

        fn try_step(&mut self, update: &DVector<f64>) -> Option<f64> {
            self.attempt = &self.current - update;
            Some(update.norm())
        }

        fn evaluate(&mut self, refresh_hessian: bool) -> f64 {
            let p = self.attempt.clone();
            self.refresh(&p, refresh_hessian)
        }

        fn plain_mse(&mut self) -> f64 {
            self.value_at(&self.attempt.clone())
        }

        fn accept(&mut self) {
            self.current.copy_from(&self.attempt);
        }

        fn gradient(&self) -> &DVector<f64> {
            &self.gradient
        }

        fn hessian(&self) -> &DMatrix<f64> {
            &self.hessian
        }
    }

    #[test]
    fn driver_converges_on_quadratic_bowl() {
        let mut bowl = Bowl::new([5.0, -3.0], [0.0, 0.0]);
        let best = marquardt_levenberg(&mut bowl, 39, 1e-6, false).unwrap();
        assert!(best < 1e-9, "best {best}");
        assert!((bowl.current[0] - 5.0).abs() < 1e-6);
        assert!((bowl.current[1] + 3.0).abs() < 1e-6);
    }

    #[test]
    fn zero_hessian_rejects_steps_without_panicking() {
        struct Flat {
            gradient: DVector<f64>,
            hessian: DMatrix<f64>,
        }
        impl Objective for Flat {
            fn dof(&self) -> usize {
                2
            }
            fn initialize(&mut self) -> Result<f64, RegError> {
                Ok(1.0)
            }
            fn try_step(&mut self, _update: &DVector<f64>) -> Option<f64> {
                Some(0.0)
            }
            fn evaluate(&mut self, _refresh_hessian: bool) -> f64 {
                1.0
            }
            fn plain_mse(&mut self) -> f64 {
                1.0
            }
            fn accept(&mut self) {}
            fn gradient(&self) -> &DVector<f64> {
                &self.gradient
            }
            fn hessian(&self) -> &DMatrix<f64> {
                &self.hessian
            }
        }
        let mut flat = Flat {
            gradient: DVector::zeros(2),
            hessian: DMatrix::zeros(2, 2),
        };
        let best = marquardt_levenberg(&mut flat, 9, 1e-3, false).unwrap();
        assert_eq!(best, 1.0);
    }

    #[test]
    fn accumulate_fills_upper_triangle_products() {
        let mut g = DVector::zeros(3);
        let mut h = DMatrix::zeros(3, 3);
        accumulate(&mut g, Some(&mut h), 2.0, &[1.0, 2.0, 3.0]);
        assert_eq!(g[1], 4.0);
        assert_eq!(h[(0, 2)], 3.0);
        assert_eq!(h[(1, 2)], 6.0);
        assert_eq!(h[(2, 0)], 0.0);
        mirror_upper_triangle(&mut h);
        assert_eq!(h[(2, 0)], 3.0);
    }
}
