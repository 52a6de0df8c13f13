//! Signal extraction
//!
//! Converts raw landmarks into structured per-frame records: normalized
//! pose joints, proxy head angles, and a heuristic gaze vector. Invalid
//! frames are carried through as empty records so the sequence stays
//! aligned with the validity mask.

use crate::quality::LumaFrame;
use crate::source::{LandmarkSource, RawFace, RawPose};
use crate::types::{FrameRecord, Gaze, HeadPose, Point3, PoseFrame};

/// Guard against zero shoulder width during scale normalization.
const SHOULDER_EPSILON: f64 = 1e-6;

/// Re-center joints on the torso midpoint (mean of the hips) and scale by
/// shoulder width. The result is translation- and scale-invariant across
/// subjects and camera distances.
pub fn normalize_pose(raw: &RawPose) -> PoseFrame {
    let torso = Point3::new(
        (raw.left_hip.x + raw.right_hip.x) / 2.0,
        (raw.left_hip.y + raw.right_hip.y) / 2.0,
        (raw.left_hip.z + raw.right_hip.z) / 2.0,
    );
    let scale = raw.left_shoulder.distance(&raw.right_shoulder) + SHOULDER_EPSILON;

    let norm = |p: Point3| {
        Point3::new(
            (p.x - torso.x) / scale,
            (p.y - torso.y) / scale,
            (p.z - torso.z) / scale,
        )
    };

    PoseFrame {
        left_shoulder: norm(raw.left_shoulder),
        right_shoulder: norm(raw.right_shoulder),
        left_elbow: norm(raw.left_elbow),
        right_elbow: norm(raw.right_elbow),
        left_wrist: norm(raw.left_wrist),
        right_wrist: norm(raw.right_wrist),
        nose: Some(norm(raw.nose)),
        left_hip: Some(norm(raw.left_hip)),
        right_hip: Some(norm(raw.right_hip)),
    }
}

/// Proxy head angles from eye/nose landmark geometry. Sufficient for
/// behavioral stability features; these are not calibrated Euler angles.
pub fn head_angles(face: &RawFace) -> HeadPose {
    HeadPose {
        yaw: face.right_eye.0 - face.left_eye.0,
        pitch: face.nose.1 - (face.left_eye.1 + face.right_eye.1) / 2.0,
        roll: face.right_eye.1 - face.left_eye.1,
    }
}

/// Heuristic gaze: negated head yaw/pitch with a unit forward bias, used
/// when no dedicated gaze estimator is available.
pub fn gaze_from_head(head: &HeadPose) -> Gaze {
    Gaze {
        gx: -head.yaw,
        gy: -head.pitch,
        gz: 1.0,
    }
}

/// Extract one [`FrameRecord`] per frame, aligned with the validity mask.
///
/// Invalid frames are never handed to the detector. A valid frame can
/// still yield `pose = None` (or `head`/`gaze = None`) when the detector
/// fails on it; feature computation treats both cases identically.
pub fn extract_frame_records(
    frames: &[LumaFrame],
    valid_mask: &[bool],
    timestamps: &[f64],
    source: &mut dyn LandmarkSource,
) -> Vec<FrameRecord> {
    let mut records = Vec::with_capacity(frames.len());

    for ((frame, &valid), &t) in frames.iter().zip(valid_mask).zip(timestamps) {
        if !valid {
            records.push(FrameRecord::invalid(t));
            continue;
        }

        let pose = source.pose(frame).map(|raw| normalize_pose(&raw));
        let head = source.face(frame).map(|face| head_angles(&face));
        let gaze = head.as_ref().map(gaze_from_head);

        records.push(FrameRecord {
            t,
            valid,
            pose,
            head,
            gaze,
        });
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::fixtures::ScriptedSource;
    use crate::types::Point3;

    fn sample_raw_pose() -> RawPose {
        RawPose {
            nose: Point3::new(0.5, 0.2, 0.0),
            left_shoulder: Point3::new(0.4, 0.4, 0.0),
            right_shoulder: Point3::new(0.6, 0.4, 0.0),
            left_elbow: Point3::new(0.35, 0.55, 0.0),
            right_elbow: Point3::new(0.65, 0.55, 0.0),
            left_wrist: Point3::new(0.3, 0.7, 0.0),
            right_wrist: Point3::new(0.7, 0.7, 0.0),
            left_hip: Point3::new(0.45, 0.8, 0.0),
            right_hip: Point3::new(0.55, 0.8, 0.0),
        }
    }

    fn scale_raw(raw: &RawPose, k: f64) -> RawPose {
        let s = |p: Point3| Point3::new(p.x * k, p.y * k, p.z * k);
        RawPose {
            nose: s(raw.nose),
            left_shoulder: s(raw.left_shoulder),
            right_shoulder: s(raw.right_shoulder),
            left_elbow: s(raw.left_elbow),
            right_elbow: s(raw.right_elbow),
            left_wrist: s(raw.left_wrist),
            right_wrist: s(raw.right_wrist),
            left_hip: s(raw.left_hip),
            right_hip: s(raw.right_hip),
        }
    }

    #[test]
    fn test_pose_normalization_centers_torso() {
        let pose = normalize_pose(&sample_raw_pose());
        let lh = pose.left_hip.unwrap();
        let rh = pose.right_hip.unwrap();
        // Hip midpoint maps to the origin.
        assert!((lh.x + rh.x).abs() < 1e-9);
        assert!((lh.y + rh.y).abs() < 1e-9);
    }

    #[test]
    fn test_pose_normalization_scale_invariant() {
        let base = normalize_pose(&sample_raw_pose());
        let scaled = normalize_pose(&scale_raw(&sample_raw_pose(), 3.5));

        let pairs = [
            (base.left_wrist, scaled.left_wrist),
            (base.right_elbow, scaled.right_elbow),
            (base.left_shoulder, scaled.left_shoulder),
        ];
        for (a, b) in pairs {
            assert!((a.x - b.x).abs() < 1e-4, "{} vs {}", a.x, b.x);
            assert!((a.y - b.y).abs() < 1e-4, "{} vs {}", a.y, b.y);
        }
    }

    #[test]
    fn test_head_angles_geometry() {
        let face = RawFace {
            left_eye: (0.45, 0.18),
            right_eye: (0.55, 0.20),
            nose: (0.5, 0.25),
        };
        let head = head_angles(&face);
        assert!((head.yaw - 0.10).abs() < 1e-9);
        assert!((head.pitch - (0.25 - 0.19)).abs() < 1e-9);
        assert!((head.roll - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_gaze_negates_head() {
        let head = HeadPose {
            yaw: 0.1,
            pitch: -0.05,
            roll: 0.0,
        };
        let gaze = gaze_from_head(&head);
        assert_eq!(gaze.gx, -0.1);
        assert_eq!(gaze.gy, 0.05);
        assert_eq!(gaze.gz, 1.0);
    }

    #[test]
    fn test_extract_respects_validity_mask() {
        let frames: Vec<LumaFrame> = (0..4).map(|_| LumaFrame::new(vec![128; 16], 4, 4)).collect();
        let mask = vec![true, false, true, true];
        let timestamps = vec![0.0, 0.04, 0.08, 0.12];
        // Middle detector slot simulates a pose miss on the third frame.
        let mut source = ScriptedSource::new(vec![Some(0.0), None, Some(0.01)]);

        let records = extract_frame_records(&frames, &mask, &timestamps, &mut source);

        assert_eq!(records.len(), 4);
        // Invalid frame: empty record, detector never consulted.
        assert!(!records[1].valid);
        assert!(records[1].pose.is_none());
        // Valid frame with detector miss: valid flag set, pose absent.
        assert!(records[2].valid);
        assert!(records[2].pose.is_none());
        // Valid frames keep timestamps for traceability.
        assert_eq!(records[3].t, 0.12);
        assert!(records[3].pose.is_some());
        assert!(records[3].gaze.is_some());
    }
}
