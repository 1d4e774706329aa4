//! Two-parameter shift refinement.
//!
//! The warp is a pure translation, so the evaluation walks the output grid
//! with weights computed once from the fractional offset and rows that fall
//! outside the input skipped wholesale.

use nalgebra::{DMatrix, DVector};

use super::{accumulate, mirror_upper_triangle, EvalMode, GradientView, Objective, PointState};
use crate::error::RegError;
use crate::interp::{round_half_away, Sampler};
use crate::transform::{build_matrix, Point, TransformFamily, TransformMatrix};

pub(crate) struct TranslationObjective<'a> {
    view: GradientView<'a>,
    state: PointState,
    matrix: TransformMatrix,
}

impl<'a> TranslationObjective<'a> {
    pub fn new(view: GradientView<'a>, source: Vec<Point>, target: Vec<Point>) -> Self {
        Self {
            view,
            state: PointState::new(source, target, 2),
            matrix: TransformMatrix { m: [[0.0; 4]; 2] },
        }
    }

    pub fn points(&self) -> &[Point] {
        &self.state.current
    }

    fn eval(&mut self, mode: EvalMode) -> f64 {
        let level = &self.view.level;
        let in_w = level.in_coeff.width() as i64;
        let in_h = level.in_coeff.height() as i64;
        let out_w = level.out_img.width();
        let out_h = level.out_img.height();
        let out = level.out_img.as_slice();
        let out_mask = level.out_mask.as_slice();
        let in_mask = level.in_mask.as_slice();
        let xg = self.view.xgrad.as_slice();
        let yg = self.view.ygrad.as_slice();
        let gradient = &mut self.state.gradient;
        let hessian = &mut self.state.hessian;
        if mode != EvalMode::Plain {
            gradient.fill(0.0);
        }
        if mode == EvalMode::Full {
            hessian.fill(0.0);
        }
        let dx0 = self.matrix.m[0][0];
        let dy0 = self.matrix.m[1][0];
        let mut sampler = Sampler::new(level.in_coeff);
        sampler.set_x_weights(dx0 - dx0.floor());
        sampler.set_y_weights(dy0 - dy0.floor());
        let mut sum = 0.0;
        let mut area = 0u64;
        let mut k = 0usize;
        let mut y = dy0;
        for _ in 0..out_h {
            let ym = round_half_away(y);
            if ym < 0 || ym >= in_h {
                k += out_w;
                y += 1.0;
                continue;
            }
            sampler.set_y_indexes(y);
            let row = (ym * in_w) as usize;
            let mut x = dx0;
            for _ in 0..out_w {
                let xm = round_half_away(x);
                if 0 <= xm && xm < in_w && out_mask[k] * in_mask[row + xm as usize] != 0.0 {
                    area += 1;
                    sampler.set_x_indexes(x);
                    let diff = out[k] as f64 - sampler.interpolate();
                    sum += diff * diff;
                    if mode != EvalMode::Plain {
                        let d = [xg[k] as f64, yg[k] as f64];
                        let hess = if mode == EvalMode::Full {
                            Some(&mut *hessian)
                        } else {
                            None
                        };
                        accumulate(gradient, hess, diff, &d);
                    }
                }
                k += 1;
                x += 1.0;
            }
            y += 1.0;
        }
        if mode == EvalMode::Full {
            mirror_upper_triangle(hessian);
        }
        sum / area as f64
    }
}

impl Objective for TranslationObjective<'_> {
    fn dof(&self) -> usize {
        2
    }

    fn initialize(&mut self) -> Result<f64, RegError> {
        self.matrix = build_matrix(
            TransformFamily::Translation,
            &self.state.current,
            &self.state.target,
        )?;
        Ok(self.eval(EvalMode::Full))
    }

    fn try_step(&mut self, update: &DVector<f64>) -> Option<f64> {
        let displacement = self.state.displace(update);
        self.matrix = build_matrix(
            TransformFamily::Translation,
            &self.state.attempt,
            &self.state.target,
        )
        .ok()?;
        Some(displacement)
    }

    fn evaluate(&mut self, refresh_hessian: bool) -> f64 {
        self.eval(if refresh_hessian {
            EvalMode::Full
        } else {
            EvalMode::GradientOnly
        })
    }

    fn plain_mse(&mut self) -> f64 {
        self.eval(EvalMode::Plain)
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
