//! Core types for the kinesia pipeline
//!
//! This module defines the data structures that flow through each stage:
//! per-frame signal records, quality statistics, usability verdicts, window
//! feature vectors, and the inference request/response contract.
//!
//! Frame records use a fixed, versioned schema (named fields per signal
//! group) so that both ingestion paths produce identical structures.

use serde::{Deserialize, Serialize};

/// Version of the per-frame record schema. Bumped whenever a field is
/// added, removed, or changes meaning.
pub const FRAME_SCHEMA_VERSION: &str = "frame.record.v1";

/// A 3D point in normalized landmark space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl std::ops::Sub for Point3 {
    type Output = Point3;
    fn sub(self, rhs: Point3) -> Point3 {
        Point3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// Named upper-body pose joints for one frame.
///
/// The six required joints are the ones feature computation consumes.
/// Nose and hips are present on the live video path (they drive pose
/// normalization) but absent from third-party landmark exports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseFrame {
    pub left_shoulder: Point3,
    pub right_shoulder: Point3,
    pub left_elbow: Point3,
    pub right_elbow: Point3,
    pub left_wrist: Point3,
    pub right_wrist: Point3,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nose: Option<Point3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_hip: Option<Point3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_hip: Option<Point3>,
}

impl PoseFrame {
    /// The six upper-body joints, in the fixed order used by motion
    /// features.
    pub fn upper_body(&self) -> [Point3; 6] {
        [
            self.left_wrist,
            self.right_wrist,
            self.left_elbow,
            self.right_elbow,
            self.left_shoulder,
            self.right_shoulder,
        ]
    }
}

/// Proxy head orientation angles derived from eye/nose geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

/// Gaze direction vector (heuristic when no dedicated estimator exists).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gaze {
    pub gx: f64,
    pub gy: f64,
    pub gz: f64,
}

/// One frame of extracted signal, aligned with the validity mask.
///
/// When `valid` is false, downstream feature computation treats the signal
/// groups as absent even if they are structurally present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Frame timestamp in seconds (carried for traceability; windowing
    /// operates on frame indices, never timestamps).
    pub t: f64,
    /// Whether the frame passed all quality rules.
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pose: Option<PoseFrame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<HeadPose>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gaze: Option<Gaze>,
}

impl FrameRecord {
    /// An invalid frame with no signal groups.
    pub fn invalid(t: f64) -> Self {
        Self {
            t,
            valid: false,
            pose: None,
            head: None,
            gaze: None,
        }
    }

    /// Pose, but only when the frame is valid.
    pub fn usable_pose(&self) -> Option<&PoseFrame> {
        if self.valid {
            self.pose.as_ref()
        } else {
            None
        }
    }

    /// Head angles, but only when the frame is valid.
    pub fn usable_head(&self) -> Option<&HeadPose> {
        if self.valid {
            self.head.as_ref()
        } else {
            None
        }
    }

    /// Gaze vector, but only when the frame is valid.
    pub fn usable_gaze(&self) -> Option<&Gaze> {
        if self.valid {
            self.gaze.as_ref()
        } else {
            None
        }
    }
}

/// Per-video quality counters, immutable once computed for a frame set.
///
/// A frame can fail several rules at once; each rule increments its own
/// counter independently, while `valid_frames` counts the logical AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityStats {
    pub total_frames: u32,
    pub valid_frames: u32,
    pub no_face_frames: u32,
    pub multi_face_frames: u32,
    pub dark_frames: u32,
    pub blurry_frames: u32,
}

/// Why a video was (or was not) usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UsabilityReason {
    NoFramesDecoded,
    TooFewValidFrames,
    LowValidRatio,
    LongInvalidGap,
    Ok,
}

/// Per-video usability decision. A video with `usable == false` never
/// proceeds past the quality gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsabilityVerdict {
    pub usable: bool,
    pub reason: UsabilityReason,
}

/// Structured behavioral tasks a session can be recorded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskContext {
    Imitation,
    JointAttention,
    TurnTaking,
}

impl TaskContext {
    /// Parse a task name. An unrecognized name is a hard input error,
    /// never a silent default.
    pub fn from_name(name: &str) -> Result<Self, crate::error::ScreenError> {
        match name.to_ascii_lowercase().as_str() {
            "imitation" => Ok(TaskContext::Imitation),
            "joint_attention" => Ok(TaskContext::JointAttention),
            "turn_taking" => Ok(TaskContext::TurnTaking),
            _ => Err(crate::error::ScreenError::UnknownTask(name.to_string())),
        }
    }

    /// Fixed one-hot encoding `[imitation, joint_attention, turn_taking]`.
    pub fn one_hot(&self) -> [f64; 3] {
        match self {
            TaskContext::Imitation => [1.0, 0.0, 0.0],
            TaskContext::JointAttention => [0.0, 1.0, 0.0],
            TaskContext::TurnTaking => [0.0, 0.0, 1.0],
        }
    }
}

/// Fixed-schema statistical descriptors for one accepted window.
///
/// The key set and ordering are identical across all windows in a run so
/// vectors can be stacked into an `(N, F)` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub motion_mean: f64,
    pub motion_std: f64,
    pub motion_max: f64,
    pub lr_mean_dist: f64,
    pub lr_std_dist: f64,
    pub gaze_var_x: f64,
    pub gaze_var_y: f64,
    pub yaw_std: f64,
    pub pitch_std: f64,
    /// One-hot task context, present only when a task was supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskContext>,
}

/// Base feature keys, in stacking order.
pub const FEATURE_KEYS: [&str; 9] = [
    "motion_mean",
    "motion_std",
    "motion_max",
    "lr_mean_dist",
    "lr_std_dist",
    "gaze_var_x",
    "gaze_var_y",
    "yaw_std",
    "pitch_std",
];

impl FeatureVector {
    /// Dimensionality of the stacked vector.
    pub fn dim(&self) -> usize {
        if self.task.is_some() {
            FEATURE_KEYS.len() + 3
        } else {
            FEATURE_KEYS.len()
        }
    }

    /// Flatten to the fixed stacking order, task one-hot last.
    pub fn to_vec(&self) -> Vec<f64> {
        let mut v = vec![
            self.motion_mean,
            self.motion_std,
            self.motion_max,
            self.lr_mean_dist,
            self.lr_std_dist,
            self.gaze_var_x,
            self.gaze_var_y,
            self.yaw_std,
            self.pitch_std,
        ];
        if let Some(task) = self.task {
            v.extend_from_slice(&task.one_hot());
        }
        v
    }
}

/// Session-level screening result.
///
/// Always carries the full per-window z-score list alongside the
/// aggregates, never only the scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningScore {
    /// Bounded confidence in [0, 1] (logistic-squashed mean deviation).
    pub confidence: f64,
    /// Mean anomaly z-score across windows.
    pub mean_deviation: f64,
    /// Per-window anomaly z-scores, in window order.
    pub window_scores: Vec<f64>,
}

/// Inference request: a pre-extracted frame sequence plus its frame rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub fps: f64,
    pub sequence: Vec<FrameRecord>,
    /// Optional task name; unrecognized names are a hard error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
}

/// Inference outcome status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceStatus {
    Scored,
    /// No window could be formed yet; not an error.
    WaitingForMoreData,
}

/// Counts describing how much of the request survived each stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceMeta {
    pub frames_processed: u32,
    pub windows_generated: u32,
}

/// Inference response consumed by the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub status: InferenceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<ScreeningScore>,
    pub meta: InferenceMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usability_reason_serialization() {
        let reason = UsabilityReason::NoFramesDecoded;
        let json = serde_json::to_string(&reason).unwrap();
        assert_eq!(json, "\"NO_FRAMES_DECODED\"");

        let parsed: UsabilityReason = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, UsabilityReason::NoFramesDecoded);
    }

    #[test]
    fn test_task_from_name() {
        assert_eq!(
            TaskContext::from_name("imitation").unwrap(),
            TaskContext::Imitation
        );
        assert_eq!(
            TaskContext::from_name("Joint_Attention").unwrap(),
            TaskContext::JointAttention
        );
        assert!(TaskContext::from_name("staring_contest").is_err());
    }

    #[test]
    fn test_task_one_hot() {
        assert_eq!(TaskContext::TurnTaking.one_hot(), [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_feature_vector_stacking_order() {
        let fv = FeatureVector {
            motion_mean: 1.0,
            motion_std: 2.0,
            motion_max: 3.0,
            lr_mean_dist: 4.0,
            lr_std_dist: 5.0,
            gaze_var_x: 6.0,
            gaze_var_y: 7.0,
            yaw_std: 8.0,
            pitch_std: 9.0,
            task: None,
        };
        assert_eq!(fv.dim(), FEATURE_KEYS.len());
        assert_eq!(fv.to_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);

        let with_task = FeatureVector {
            task: Some(TaskContext::Imitation),
            ..fv
        };
        assert_eq!(with_task.dim(), 12);
        assert_eq!(&with_task.to_vec()[9..], &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_invalid_frame_hides_signal() {
        let frame = FrameRecord {
            t: 0.0,
            valid: false,
            pose: None,
            head: Some(HeadPose {
                yaw: 0.1,
                pitch: 0.2,
                roll: 0.0,
            }),
            gaze: None,
        };
        // Structurally present head data is still treated as absent.
        assert!(frame.usable_head().is_none());
    }

    #[test]
    fn test_frame_record_roundtrip() {
        let frame = FrameRecord {
            t: 0.04,
            valid: true,
            pose: Some(PoseFrame {
                left_shoulder: Point3::new(-0.5, 0.0, 0.0),
                right_shoulder: Point3::new(0.5, 0.0, 0.0),
                left_elbow: Point3::new(-0.6, 0.4, 0.0),
                right_elbow: Point3::new(0.6, 0.4, 0.0),
                left_wrist: Point3::new(-0.7, 0.8, 0.0),
                right_wrist: Point3::new(0.7, 0.8, 0.0),
                nose: None,
                left_hip: None,
                right_hip: None,
            }),
            head: Some(HeadPose {
                yaw: 0.1,
                pitch: -0.05,
                roll: 0.0,
            }),
            gaze: Some(Gaze {
                gx: -0.1,
                gy: 0.05,
                gz: 1.0,
            }),
        };

        let json = serde_json::to_string(&frame).unwrap();
        let parsed: FrameRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_point_distance() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(3.0, 4.0, 0.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-12);
    }
}
