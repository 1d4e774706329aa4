//! Bilinear refinement.
//!
//! The only forward family: the warp maps the target grid into the source
//! image, so the roles of the two images are swapped relative to the other
//! objectives and the image gradients are interpolated on the fly from the
//! source spline instead of being precomputed. The Hessian is refreshed on
//! every evaluation, accelerated or not.

use nalgebra::{DMatrix, DVector};

use super::{accumulate, mirror_upper_triangle, EvalMode, LevelView, Objective, PointState};
use crate::error::RegError;
use crate::interp::{frac, round_half_away, Sampler};
use crate::transform::{build_matrix, Point, TransformFamily, TransformMatrix};

struct GradientConstants {
    c: [f64; 4],
    cu: [f64; 4],
    cv: [f64; 4],
    cuv: [f64; 4],
}

/// Derivatives of the four bilinear basis functions with respect to the
/// output pixel position, expressed through the target landmarks.
fn gradient_constants(t: &[Point; 4]) -> GradientConstants {
    let (u1, v1) = (t[0][0], t[0][1]);
    let (u2, v2) = (t[1][0], t[1][1]);
    let (u3, v3) = (t[2][0], t[2][1]);
    let (u4, v4) = (t[3][0], t[3][1]);
    let v12 = v1 - v2;
    let v13 = v1 - v3;
    let v14 = v1 - v4;
    let v23 = v2 - v3;
    let v24 = v2 - v4;
    let v34 = v3 - v4;
    let uv12 = u1 * u2 * v12;
    let uv13 = u1 * u3 * v13;
    let uv14 = u1 * u4 * v14;
    let uv23 = u2 * u3 * v23;
    let uv24 = u2 * u4 * v24;
    let uv34 = u3 * u4 * v34;
    let det = uv12 * v34 - uv13 * v24 + uv14 * v23 + uv23 * v14 - uv24 * v13 + uv34 * v12;
    GradientConstants {
        c: [
            (-uv34 * v2 + uv24 * v3 - uv23 * v4) / det,
            (uv34 * v1 - uv14 * v3 + uv13 * v4) / det,
            (-uv24 * v1 + uv14 * v2 - uv12 * v4) / det,
            (uv23 * v1 - uv13 * v2 + uv12 * v3) / det,
        ],
        cu: [
            (u3 * v3 * v24 - u2 * v2 * v34 - u4 * v4 * v23) / det,
            (-u3 * v3 * v14 + u1 * v1 * v34 + u4 * v4 * v13) / det,
            (u2 * v2 * v14 - u1 * v1 * v24 - u4 * v4 * v12) / det,
            (-u2 * v2 * v13 + u1 * v1 * v23 + u3 * v3 * v12) / det,
        ],
        cv: [
            (uv23 - uv24 + uv34) / det,
            (-uv13 + uv14 - uv34) / det,
            (uv12 - uv14 + uv24) / det,
            (-uv12 + uv13 - uv23) / det,
        ],
        cuv: [
            (u4 * v23 - u3 * v24 + u2 * v34) / det,
            (-u4 * v13 + u3 * v14 - u1 * v34) / det,
            (u4 * v12 - u2 * v14 + u1 * v24) / det,
            (-u3 * v1 + u2 * v13 + u3 * v2 - u1 * v23) / det,
        ],
    }
}

pub(crate) struct BilinearObjective<'a> {
    view: LevelView<'a>,
    state: PointState,
    matrix: TransformMatrix,
}

impl<'a> BilinearObjective<'a> {
    pub fn new(view: LevelView<'a>, source: Vec<Point>, target: Vec<Point>) -> Self {
        Self {
            view,
            state: PointState::new(source, target, 8),
            matrix: TransformMatrix { m: [[0.0; 4]; 2] },
        }
    }

    pub fn points(&self) -> &[Point] {
        &self.state.current
    }

    fn eval(&mut self, mode: EvalMode) -> f64 {
        let targets = [
            self.state.target[0],
            self.state.target[1],
            self.state.target[2],
            self.state.target[3],
        ];
        let consts = gradient_constants(&targets);
        let gradient = &mut self.state.gradient;
        let hessian = &mut self.state.hessian;
        if mode != EvalMode::Plain {
            gradient.fill(0.0);
            hessian.fill(0.0);
        }
        let view = &self.view;
        let in_w = view.in_coeff.width() as i64;
        let in_h = view.in_coeff.height() as i64;
        let out_w = view.out_img.width();
        let out_h = view.out_img.height();
        let out = view.out_img.as_slice();
        let out_mask = view.out_mask.as_slice();
        let in_mask = view.in_mask.as_slice();
        let m = self.matrix.m;
        let mut sampler = Sampler::new(view.in_coeff);
        let mut yx = m[0][0];
        let mut yy = m[1][0];
        let mut yxy = 0.0;
        let mut yyy = 0.0;
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
                    sampler.set_x_indexes(x);
                    sampler.set_y_indexes(y);
                    if mode == EvalMode::Plain {
                        sampler.set_x_weights(frac(x));
                        sampler.set_y_weights(frac(y));
                    } else {
                        sampler.set_x_dx_weights(frac(x));
                        sampler.set_y_dy_weights(frac(y));
                    }
                    let diff = sampler.interpolate() - out[k] as f64;
                    sum += diff * diff;
                    if mode != EvalMode::Plain {
                        let xgr = sampler.interpolate_dx();
                        let ygr = sampler.interpolate_dy();
                        let (fu, fv) = (u as f64, v as f64);
                        let uv = fu * fv;
                        let mut d = [0.0; 8];
                        for i in 0..4 {
                            let g = consts.cuv[i] * uv
                                + consts.cu[i] * fu
                                + consts.cv[i] * fv
                                + consts.c[i];
                            d[2 * i] = xgr * g;
                            d[2 * i + 1] = ygr * g;
                        }
                        accumulate(gradient, Some(&mut *hessian), diff, &d);
                    }
                }
                k += 1;
                x0 += m[0][1] + yxy;
                y0 += m[1][1] + yyy;
            }
            yx += m[0][2];
            yy += m[1][2];
            yxy += m[0][3];
            yyy += m[1][3];
        }
        if mode != EvalMode::Plain {
            mirror_upper_triangle(hessian);
        }
        sum / area as f64
    }
}

impl Objective for BilinearObjective<'_> {
    fn dof(&self) -> usize {
        8
    }

    fn initialize(&mut self) -> Result<f64, RegError> {
        self.matrix = build_matrix(
            TransformFamily::Bilinear,
            &self.state.target,
            &self.state.current,
        )?;
        Ok(self.eval(EvalMode::Full))
    }

    fn try_step(&mut self, update: &DVector<f64>) -> Option<f64> {
        let displacement = self.state.displace(update);
        self.matrix = build_matrix(
            TransformFamily::Bilinear,
            &self.state.target,
            &self.state.attempt,
        )
        .ok()?;
        Some(displacement)
    }

    fn evaluate(&mut self, _refresh_hessian: bool) -> f64 {
        self.eval(EvalMode::Full)
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
