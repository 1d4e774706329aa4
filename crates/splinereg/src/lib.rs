//! splinereg — multiresolution landmark-guided image registration.
//!
//! Registers a source image onto a target image by refining a small set of
//! control-point landmarks. The pipeline stages are:
//!
//! 1. **Pyramids** – cubic B-spline decomposition of both images into
//!    coarse-to-fine levels, with masks decimated in lockstep.
//! 2. **Warp model** – one of five families (translation, rigid body,
//!    scaled rotation, affine, bilinear), each solved in closed form from
//!    its landmarks.
//! 3. **Refinement** – Levenberg-Marquardt descent on the masked mean
//!    squared intensity difference, walking the pyramid coarsest-first
//!    with the landmarks scaled alongside.
//! 4. **Resampling** – the refined warp applied to the source image on the
//!    target grid, interpolating through the spline coefficients.
//!
//! # Public API
//! - [`Registrar`] as the primary entry point, tuned via
//!   [`RegistrationConfig`]
//! - [`LandmarkSet`] / [`TransformFamily`] describing the warp
//! - [`FloatImage`] as the pixel buffer at the API boundary
//! - [`LandmarkDocument`] for the interchange text format
//!
//! Spline filtering, pyramid layout, and the optimizer internals are not
//! part of the public surface.

mod api;
mod cancel;
mod config;
mod engine;
mod error;
mod image;
mod interp;
mod landmarks_io;
mod mask;
mod optimize;
mod pyramid;
mod resample;
mod spline;
#[cfg(test)]
mod test_utils;
mod transform;

pub use api::Registrar;
pub use cancel::CancelToken;
pub use config::{Quality, RegistrationConfig};
pub use error::RegError;
pub use self::image::FloatImage;
pub use landmarks_io::{load_landmarks, save_landmarks, LandmarkDocument};
pub use pyramid::{pyramid_depth, MIN_SIZE};
pub use resample::ResampledImage;
pub use transform::{build_matrix, LandmarkSet, Point, TransformFamily, TransformMatrix};
