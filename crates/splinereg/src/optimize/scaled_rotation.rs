//! Similarity (scaled rotation) refinement.
//!
//! Two landmarks parametrize rotation, isotropic scale, and shift. The
//! per-pixel parameter derivatives depend on the landmark pair being
//! evaluated, so the constants are rebuilt for every evaluation, and the
//! error is normalized by the squared landmark span so that shrinking the
//! pair cannot fake an improvement.

use nalgebra::{DMatrix, DVector};

use super::{
    accumulate, mirror_upper_triangle, warped_sum_squares, EvalMode, GradientView, Objective,
    PointState,
};
use crate::error::RegError;
use crate::transform::{build_matrix, Point, TransformFamily, TransformMatrix};

pub(crate) struct ScaledRotationObjective<'a> {
    view: GradientView<'a>,
    state: PointState,
    matrix: TransformMatrix,
    target_jacobian: f64,
}

impl<'a> ScaledRotationObjective<'a> {
    pub fn new(
        view: GradientView<'a>,
        source: Vec<Point>,
        target: Vec<Point>,
        target_jacobian: f64,
    ) -> Self {
        Self {
            view,
            state: PointState::new(source, target, 4),
            matrix: TransformMatrix { m: [[0.0; 4]; 2] },
            target_jacobian,
        }
    }

    pub fn points(&self) -> &[Point] {
        &self.state.current
    }

    fn eval(&mut self, use_attempt: bool, mode: EvalMode) -> f64 {
        let pts = if use_attempt {
            [self.state.attempt[0], self.state.attempt[1]]
        } else {
            [self.state.current[0], self.state.current[1]]
        };
        let (u1, v1) = (pts[0][0], pts[0][1]);
        let (u2, v2) = (pts[1][0], pts[1][1]);
        let u12 = u1 - u2;
        let v12 = v1 - v2;
        let uv2 = u12 * u12 + v12 * v12;
        let c = 0.5 * (u2 * v1 - u1 * v2) / uv2;
        let c1 = u12 / uv2;
        let c2 = v12 / uv2;
        let c3 = (uv2 - u12 * v12) / uv2;
        let c4 = (uv2 + u12 * v12) / uv2;
        let c5 = c + u1 * c1 + u2 * c2;
        let c6 = c * (u12 * u12 - v12 * v12) / uv2;
        let c7 = c1 * c4;
        let c8 = c1 - c2 - c1 * c2 * v12;
        let c9 = c1 + c2 - c1 * c2 * u12;
        let c0 = c2 * c3;
        let dgxx0 = c1 * u2 + c2 * v2;
        let dgyx0 = 2.0 * c;
        let dgxx1 = c5 + c6;
        let dgyy1 = c5 - c6;
        let gradient = &mut self.state.gradient;
        let hessian = &mut self.state.hessian;
        if mode != EvalMode::Plain {
            gradient.fill(0.0);
        }
        if mode == EvalMode::Full {
            hessian.fill(0.0);
        }
        let xg = self.view.xgrad.as_slice();
        let yg = self.view.ygrad.as_slice();
        let (sum, area) = warped_sum_squares(&self.view.level, &self.matrix, |k, u, v, diff| {
            if mode == EvalMode::Plain {
                return;
            }
            let gxx0 = u * c1 + v * c2 - dgxx0;
            let gyx0 = v * c1 - u * c2 + dgyx0;
            let gxy0 = -gyx0;
            let gyy0 = gxx0;
            let gxx1 = v * c8 - u * c7 + dgxx1;
            let gyx1 = -c3 * gyx0;
            let gxy1 = c4 * gyx0;
            let gyy1 = dgyy1 - u * c9 - v * c0;
            let xgk = xg[k] as f64;
            let ygk = yg[k] as f64;
            let d = [
                xgk * gxx0 + ygk * gyx0,
                xgk * gxy0 + ygk * gyy0,
                xgk * gxx1 + ygk * gyx1,
                xgk * gxy1 + ygk * gyy1,
            ];
            let hess = if mode == EvalMode::Full {
                Some(&mut *hessian)
            } else {
                None
            };
            accumulate(gradient, hess, diff, &d);
        });
        if mode == EvalMode::Full {
            mirror_upper_triangle(hessian);
        }
        sum / (area as f64 * uv2 / self.target_jacobian)
    }
}

impl Objective for ScaledRotationObjective<'_> {
    fn dof(&self) -> usize {
        4
    }

    fn initialize(&mut self) -> Result<f64, RegError> {
        self.matrix = build_matrix(
            TransformFamily::ScaledRotation,
            &self.state.current,
            &self.state.target,
        )?;
        Ok(self.eval(false, EvalMode::Full))
    }

    fn try_step(&mut self, update: &DVector<f64>) -> Option<f64> {
        let displacement = self.state.displace(update);
        self.matrix = build_matrix(
            TransformFamily::ScaledRotation,
            &self.state.attempt,
            &self.state.target,
        )
        .ok()?;
        Some(displacement)
    }

    fn evaluate(&mut self, refresh_hessian: bool) -> f64 {
        self.eval(
            true,
            if refresh_hessian {
                EvalMode::Full
            } else {
                EvalMode::GradientOnly
            },
        )
    }

    fn plain_mse(&mut self) -> f64 {
        self.eval(true, EvalMode::Plain)
    }

    fn accept(&mut self) {
        self.state.accept();
    }

    fn gradient(&self) -> &DVector<f64> {
        &self.state.gradient
    }

    fn hessian(&self) -> &DMatrix<f64> {
        &self.state.hessian
    }
}
