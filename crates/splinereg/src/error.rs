//! Error type shared across the registration engine.

use crate::transform::TransformFamily;

/// Errors reported at the engine boundary.
///
/// Numeric work inside the optimizer never panics on degeneracy: a singular
/// damped system is treated as a rejected step, and only the closed-form
/// matrix builders surface [`RegError::SingularSystem`] to the caller.
#[derive(Debug, thiserror::Error)]
pub enum RegError {
    /// Wrong number of landmark pairs for the requested family.
    #[error("{family:?} requires {expected} landmark pair(s), got {got}")]
    LandmarkCount {
        family: TransformFamily,
        expected: usize,
        got: usize,
    },

    /// Zero-area image or mask.
    #[error("image has zero area")]
    EmptyImage,

    /// Mask dimensions do not match the paired image.
    #[error("mask is {mask_width}x{mask_height} but image is {width}x{height}")]
    MaskDimensionMismatch {
        mask_width: usize,
        mask_height: usize,
        width: usize,
        height: usize,
    },

    /// A closed-form landmark-to-matrix solve hit a singular system
    /// (e.g. collinear affine landmarks or coincident points).
    #[error("singular system while deriving the {family:?} matrix")]
    SingularSystem { family: TransformFamily },

    /// Cooperative cancellation was requested.
    #[error("registration cancelled")]
    Cancelled,

    /// Malformed landmark text file.
    #[error("invalid landmark file: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
