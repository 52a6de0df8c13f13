//! Landmark source boundary
//!
//! The core never assumes a specific detector stack. It only assumes this
//! contract: given one frame, return named landmark coordinates in
//! normalized [0,1]x[0,1]xdepth space, or nothing. Concrete backends wrap
//! whatever pose/face models the host application carries.
//!
//! A detector handle is acquired for the batch of frames it processes and
//! released deterministically when dropped; implementations must not leak
//! resources across batches.

use crate::quality::LumaFrame;
use crate::types::Point3;

/// Raw pose landmarks for one frame, in normalized image space.
/// Unlike [`crate::types::PoseFrame`] these are not yet re-centered or
/// scale-normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPose {
    pub nose: Point3,
    pub left_shoulder: Point3,
    pub right_shoulder: Point3,
    pub left_elbow: Point3,
    pub right_elbow: Point3,
    pub left_wrist: Point3,
    pub right_wrist: Point3,
    pub left_hip: Point3,
    pub right_hip: Point3,
}

/// Face landmarks needed for the proxy head-angle computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawFace {
    /// Left eye center (x, y) in normalized image space.
    pub left_eye: (f64, f64),
    /// Right eye center (x, y).
    pub right_eye: (f64, f64),
    /// Nose tip (x, y).
    pub nose: (f64, f64),
}

/// Opaque per-frame landmark capability.
///
/// Every method returns `None` when the underlying detector finds nothing;
/// downstream treats detector failure exactly like a quality-gate invalid
/// frame (excluded from aggregates).
pub trait LandmarkSource {
    /// Number of faces detected in the frame.
    fn face_count(&mut self, frame: &LumaFrame) -> u32;

    /// Named pose joints, or `None` when no body was found.
    fn pose(&mut self, frame: &LumaFrame) -> Option<RawPose>;

    /// Eye/nose face landmarks, or `None` when no face mesh was found.
    fn face(&mut self, frame: &LumaFrame) -> Option<RawFace>;
}
