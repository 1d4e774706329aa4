//! Transformation families, landmark sets, and the closed-form
//! landmark-to-matrix solves.

use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};
use serde::{Deserialize, Serialize};

use crate::error::RegError;

/// 2-D coordinate, image pixel units.
pub type Point = [f64; 2];

/// The five geometric warp families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransformFamily {
    Translation,
    RigidBody,
    ScaledRotation,
    Affine,
    Bilinear,
}

impl TransformFamily {
    /// Landmark pairs required. Rigid body carries three points even though
    /// it has only three degrees of freedom; point 0 anchors the origin and
    /// points 1 and 2 fix the angle.
    pub fn landmark_count(self) -> usize {
        match self {
            TransformFamily::Translation => 1,
            TransformFamily::RigidBody => 3,
            TransformFamily::ScaledRotation => 2,
            TransformFamily::Affine => 3,
            TransformFamily::Bilinear => 4,
        }
    }

    /// Optimized degrees of freedom.
    pub fn dof(self) -> usize {
        match self {
            TransformFamily::Translation => 2,
            TransformFamily::RigidBody => 3,
            TransformFamily::ScaledRotation => 4,
            TransformFamily::Affine => 6,
            TransformFamily::Bilinear => 8,
        }
    }

    /// Name used by the landmark text format.
    pub fn label(self) -> &'static str {
        match self {
            TransformFamily::Translation => "TRANSLATION",
            TransformFamily::RigidBody => "RIGID_BODY",
            TransformFamily::ScaledRotation => "SCALED_ROTATION",
            TransformFamily::Affine => "AFFINE",
            TransformFamily::Bilinear => "BILINEAR",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "TRANSLATION" => Some(TransformFamily::Translation),
            "RIGID_BODY" => Some(TransformFamily::RigidBody),
            "SCALED_ROTATION" => Some(TransformFamily::ScaledRotation),
            "AFFINE" => Some(TransformFamily::Affine),
            "BILINEAR" => Some(TransformFamily::Bilinear),
            _ => None,
        }
    }
}

/// A family plus its paired source/target control points.
///
/// Point order is load-bearing: point 0 anchors the translation-derived
/// terms in every family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub family: TransformFamily,
    pub source: Vec<Point>,
    pub target: Vec<Point>,
}

impl LandmarkSet {
    pub fn new(
        family: TransformFamily,
        source: Vec<Point>,
        target: Vec<Point>,
    ) -> Result<Self, RegError> {
        let set = Self {
            family,
            source,
            target,
        };
        set.validate()?;
        Ok(set)
    }

    /// Re-check the point counts; the fields are public, so sets built by
    /// hand or deserialized may disagree with the family.
    pub fn validate(&self) -> Result<(), RegError> {
        let expected = self.family.landmark_count();
        for pts in [&self.source, &self.target] {
            if pts.len() != expected {
                return Err(RegError::LandmarkCount {
                    family: self.family,
                    expected,
                    got: pts.len(),
                });
            }
        }
        Ok(())
    }
}

/// Polynomial warp matrix.
///
/// Row 0 maps to the x coordinate, row 1 to y; the basis is
/// `[1, x, y, x*y]`, with the cross term only used by the bilinear family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformMatrix {
    pub m: [[f64; 4]; 2],
}

impl TransformMatrix {
    #[inline]
    pub fn apply(&self, x: f64, y: f64) -> Point {
        [
            self.m[0][0] + self.m[0][1] * x + self.m[0][2] * y + self.m[0][3] * x * y,
            self.m[1][0] + self.m[1][1] * x + self.m[1][2] * y + self.m[1][3] * x * y,
        ]
    }
}

/// Closed-form solve for the matrix mapping `from` coordinates onto `to`
/// coordinates.
///
/// Scaled rotation, affine, and bilinear go through a small LU solve; a
/// singular system (collinear or coincident landmarks) is reported as
/// [`RegError::SingularSystem`] instead of letting NaN propagate.
pub fn build_matrix(
    family: TransformFamily,
    from: &[Point],
    to: &[Point],
) -> Result<TransformMatrix, RegError> {
    let mut m = [[0.0f64; 4]; 2];
    match family {
        TransformFamily::Translation => {
            m[0] = [to[0][0] - from[0][0], 1.0, 0.0, 0.0];
            m[1] = [to[0][1] - from[0][1], 0.0, 1.0, 0.0];
        }
        TransformFamily::RigidBody => {
            let angle = f64::atan2(from[2][0] - from[1][0], from[2][1] - from[1][1])
                - f64::atan2(to[2][0] - to[1][0], to[2][1] - to[1][1]);
            let (s, c) = angle.sin_cos();
            m[0] = [to[0][0] - c * from[0][0] + s * from[0][1], c, -s, 0.0];
            m[1] = [to[0][1] - s * from[0][0] - c * from[0][1], s, c, 0.0];
        }
        TransformFamily::ScaledRotation => {
            // Third row is a synthetic point completing the similarity
            // constraint from two landmarks.
            #[rustfmt::skip]
            let a = Matrix3::new(
                1.0, from[0][0], from[0][1],
                1.0, from[1][0], from[1][1],
                1.0, from[0][1] - from[1][1] + from[1][0], from[1][0] + from[1][1] - from[0][0],
            );
            let lu = a.lu();
            let vx = Vector3::new(to[0][0], to[1][0], to[0][1] - to[1][1] + to[1][0]);
            let vy = Vector3::new(to[0][1], to[1][1], to[1][0] + to[1][1] - to[0][0]);
            let rx = lu
                .solve(&vx)
                .ok_or(RegError::SingularSystem { family })?;
            let ry = lu
                .solve(&vy)
                .ok_or(RegError::SingularSystem { family })?;
            m[0] = [rx[0], rx[1], rx[2], 0.0];
            m[1] = [ry[0], ry[1], ry[2], 0.0];
        }
        TransformFamily::Affine => {
            #[rustfmt::skip]
            let a = Matrix3::new(
                1.0, from[0][0], from[0][1],
                1.0, from[1][0], from[1][1],
                1.0, from[2][0], from[2][1],
            );
            let lu = a.lu();
            let vx = Vector3::new(to[0][0], to[1][0], to[2][0]);
            let vy = Vector3::new(to[0][1], to[1][1], to[2][1]);
            let rx = lu
                .solve(&vx)
                .ok_or(RegError::SingularSystem { family })?;
            let ry = lu
                .solve(&vy)
                .ok_or(RegError::SingularSystem { family })?;
            m[0] = [rx[0], rx[1], rx[2], 0.0];
            m[1] = [ry[0], ry[1], ry[2], 0.0];
        }
        TransformFamily::Bilinear => {
            #[rustfmt::skip]
            let a = Matrix4::new(
                1.0, from[0][0], from[0][1], from[0][0] * from[0][1],
                1.0, from[1][0], from[1][1], from[1][0] * from[1][1],
                1.0, from[2][0], from[2][1], from[2][0] * from[2][1],
                1.0, from[3][0], from[3][1], from[3][0] * from[3][1],
            );
            let lu = a.lu();
            let vx = Vector4::new(to[0][0], to[1][0], to[2][0], to[3][0]);
            let vy = Vector4::new(to[0][1], to[1][1], to[2][1], to[3][1]);
            let rx = lu
                .solve(&vx)
                .ok_or(RegError::SingularSystem { family })?;
            let ry = lu
                .solve(&vy)
                .ok_or(RegError::SingularSystem { family })?;
            m[0] = rx.into();
            m[1] = ry.into();
        }
    }
    if !m.iter().flatten().all(|v| v.is_finite()) {
        return Err(RegError::SingularSystem { family });
    }
    Ok(TransformMatrix { m })
}
