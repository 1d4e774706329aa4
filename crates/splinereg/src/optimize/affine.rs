//! Affine refinement.
//!
//! Three landmarks span the six degrees of freedom; the per-pixel parameter
//! derivatives are the barycentric coordinates of the output pixel in the
//! source triangle. The error is normalized by the triangle's area ratio so
//! that collapsing the triangle cannot fake an improvement.

use nalgebra::{DMatrix, DVector};

use super::{
    accumulate, mirror_upper_triangle, warped_sum_squares, EvalMode, GradientView, Objective,
    PointState,
};
use crate::error::RegError;
use crate::transform::{build_matrix, Point, TransformFamily, TransformMatrix};

pub(crate) struct AffineObjective<'a> {
    view: GradientView<'a>,
    state: PointState,
    matrix: TransformMatrix,
    target_jacobian: f64,
}

impl<'a> AffineObjective<'a> {
    pub fn new(
        view: GradientView<'a>,
        source: Vec<Point>,
        target: Vec<Point>,
        target_jacobian: f64,
    ) -> Self {
        Self {
            view,
            state: PointState::new(source, target, 6),
            matrix: TransformMatrix { m: [[0.0; 4]; 2] },
            target_jacobian,
        }
    }

    pub fn points(&self) -> &[Point] {
        &self.state.current
    }

    fn eval(&mut self, use_attempt: bool, mode: EvalMode) -> f64 {
        let pts = if use_attempt {
            [
                self.state.attempt[0],
                self.state.attempt[1],
                self.state.attempt[2],
            ]
        } else {
            [
                self.state.current[0],
                self.state.current[1],
                self.state.current[2],
            ]
        };
        let (u1, v1) = (pts[0][0], pts[0][1]);
        let (u2, v2) = (pts[1][0], pts[1][1]);
        let (u3, v3) = (pts[2][0], pts[2][1]);
        let det = u3 * v2 - u2 * v3 + u2 * v1 - u1 * v2 + u1 * v3 - u3 * v1;
        let uv32 = (u3 * v2 - u2 * v3) / det;
        let uv21 = (u2 * v1 - u1 * v2) / det;
        let uv13 = (u1 * v3 - u3 * v1) / det;
        let u12 = (u1 - u2) / det;
        let u23 = (u2 - u3) / det;
        let u31 = (u3 - u1) / det;
        let v12 = (v1 - v2) / det;
        let v23 = (v2 - v3) / det;
        let v31 = (v3 - v1) / det;
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
            let g0 = u23 * v - v23 * u + uv32;
            let g1 = u31 * v - v31 * u + uv13;
            let g2 = u12 * v - v12 * u + uv21;
            let xgk = xg[k] as f64;
            let ygk = yg[k] as f64;
            let d = [
                xgk * g0,
                ygk * g0,
                xgk * g1,
                ygk * g1,
                xgk * g2,
                ygk * g2,
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
        sum / (area as f64 * (det / self.target_jacobian).abs())
    }
}

impl Objective for AffineObjective<'_> {
    fn dof(&self) -> usize {
        6
    }

    fn initialize(&mut self) -> Result<f64, RegError> {
        self.matrix = build_matrix(
            TransformFamily::Affine,
            &self.state.current,
            &self.state.target,
        )?;
        Ok(self.eval(false, EvalMode::Full))
    }

    fn try_step(&mut self, update: &DVector<f64>) -> Option<f64> {
        let displacement = self.state.displace(update);
        self.matrix = build_matrix(
            TransformFamily::Affine,
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
