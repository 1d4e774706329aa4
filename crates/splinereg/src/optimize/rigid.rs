//! Rigid-body refinement (rotation plus shift).
//!
//! Unlike the other families this one iterates directly on the matrix: the
//! update carries (angle, tx, ty), the attempt matrix is rebuilt from the
//! current one, and the landmark positions are only re-derived from the
//! matrix when the level finishes.

use nalgebra::{DMatrix, DVector};

use super::{
    accumulate, mirror_upper_triangle, warped_sum_squares, EvalMode, GradientView, Objective,
};
use crate::error::RegError;
use crate::transform::{build_matrix, Point, TransformFamily, TransformMatrix};

pub(crate) struct RigidBodyObjective<'a> {
    view: GradientView<'a>,
    source: Vec<Point>,
    target: Vec<Point>,
    gradient: DVector<f64>,
    hessian: DMatrix<f64>,
    matrix: TransformMatrix,
    attempt: TransformMatrix,
}

impl<'a> RigidBodyObjective<'a> {
    pub fn new(view: GradientView<'a>, source: Vec<Point>, target: Vec<Point>) -> Self {
        let identity = TransformMatrix { m: [[0.0; 4]; 2] };
        Self {
            view,
            source,
            target,
            gradient: DVector::zeros(3),
            hessian: DMatrix::zeros(3, 3),
            matrix: identity,
            attempt: identity,
        }
    }

    /// Source landmarks implied by the accepted matrix: the inverse rotation
    /// applied to the shifted target landmarks.
    pub fn points(&self) -> Vec<Point> {
        let m = &self.matrix.m;
        self.target
            .iter()
            .map(|t| {
                [
                    (t[0] - m[0][0]) * m[0][1] + (t[1] - m[1][0]) * m[1][1],
                    (t[0] - m[0][0]) * m[0][2] + (t[1] - m[1][0]) * m[1][2],
                ]
            })
            .collect()
    }

    fn eval(&mut self, matrix: TransformMatrix, mode: EvalMode) -> f64 {
        let gradient = &mut self.gradient;
        let hessian = &mut self.hessian;
        if mode != EvalMode::Plain {
            gradient.fill(0.0);
        }
        if mode == EvalMode::Full {
            hessian.fill(0.0);
        }
        let xg = self.view.xgrad.as_slice();
        let yg = self.view.ygrad.as_slice();
        let (sum, area) = warped_sum_squares(&self.view.level, &matrix, |k, u, v, diff| {
            if mode == EvalMode::Plain {
                return;
            }
            let xgk = xg[k] as f64;
            let ygk = yg[k] as f64;
            let dtheta = ygk * u - xgk * v;
            let d = [dtheta, xgk, ygk];
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
        sum / area as f64
    }
}

impl Objective for RigidBodyObjective<'_> {
    fn dof(&self) -> usize {
        3
    }

    fn initialize(&mut self) -> Result<f64, RegError> {
        // Project the source landmarks onto the rigid motion the landmark
        // pairs imply before deriving the inverse matrix, so the matrix and
        // the points agree exactly.
        let forward = build_matrix(TransformFamily::RigidBody, &self.target, &self.source)?;
        for (s, t) in self.source.iter_mut().zip(&self.target) {
            *s = forward.apply(t[0], t[1]);
        }
        self.matrix = build_matrix(TransformFamily::RigidBody, &self.source, &self.target)?;
        let matrix = self.matrix;
        Ok(self.eval(matrix, EvalMode::Full))
    }

    fn try_step(&mut self, update: &DVector<f64>) -> Option<f64> {
        let m = &self.matrix.m;
        let angle = f64::atan2(m[0][2], m[0][1]) - update[0];
        let mut a = [[0.0; 4]; 2];
        a[0][1] = angle.cos();
        a[0][2] = angle.sin();
        a[1][1] = -a[0][2];
        a[1][2] = a[0][1];
        let (s, c) = update[0].sin_cos();
        a[0][0] = (m[0][0] + update[1]) * c - (m[1][0] + update[2]) * s;
        a[1][0] = (m[0][0] + update[1]) * s + (m[1][0] + update[2]) * c;
        self.attempt = TransformMatrix { m: a };
        let in_w = self.view.level.in_coeff.width() as f64;
        let in_h = self.view.level.in_coeff.height() as f64;
        // the angular term is weighted by a quarter of the image diagonal
        let displacement =
            update[1].hypot(update[2]) + 0.25 * in_w.hypot(in_h) * update[0].abs();
        Some(displacement)
    }

    fn evaluate(&mut self, refresh_hessian: bool) -> f64 {
        let attempt = self.attempt;
        self.eval(
            attempt,
            if refresh_hessian {
                EvalMode::Full
            } else {
                EvalMode::GradientOnly
            },
        )
    }

    fn plain_mse(&mut self) -> f64 {
        let attempt = self.attempt;
        self.eval(attempt, EvalMode::Plain)
    }

    fn accept(&mut self) {
        self.matrix = self.attempt;
    }

    fn gradient(&self) -> &DVector<f64> {
        &self.gradient
    }

    fn hessian(&self) -> &DMatrix<f64> {
        &self.hessian
    }
}
