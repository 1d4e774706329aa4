//! Registration configuration.

use serde::{Deserialize, Serialize};

/// Speed/accuracy trade-off.
///
/// Accelerated runs skip the final full-resolution pass, interpolate
/// nearest-neighbor when producing output images, and reuse the Hessian
/// computed at the start of each level instead of refreshing it every
/// iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Accelerated,
    Accurate,
}

impl Quality {
    /// Base iteration budget per pyramid level; coarser levels get the
    /// budget multiplied by a power of two.
    pub fn max_iterations(self) -> usize {
        match self {
            Quality::Accelerated => 5,
            Quality::Accurate => 10,
        }
    }

    /// Mean landmark displacement, in pixels, below which a level stops
    /// iterating.
    pub fn pixel_precision(self) -> f64 {
        match self {
            Quality::Accelerated => 0.1,
            Quality::Accurate => 0.001,
        }
    }

    pub fn is_accelerated(self) -> bool {
        self == Quality::Accelerated
    }
}

/// Engine knobs besides the images and landmarks themselves. The warp
/// family travels with the landmark set, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub quality: Quality,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            quality: Quality::Accurate,
        }
    }
}
