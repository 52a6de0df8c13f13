//! DREAM landmark export adapter
//!
//! Converts DREAM 1.2 session JSON (nested per-joint channel arrays) into
//! the pipeline's frame records. The format in the wild is messy; this
//! adapter tolerates mismatched stream lengths, JSON nulls, corrupt files,
//! and the dataset's `sholder`/`shoulder` key inconsistency.
//!
//! Corrupt or empty sessions surface as errors for the caller to skip;
//! a single missing value only invalidates its own frame.

use crate::error::ScreenError;
use crate::types::{FrameRecord, Gaze, HeadPose, Point3, PoseFrame};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Frame rate assumed when the export does not declare one.
const DEFAULT_FRAME_RATE: f64 = 25.0;

/// Stand-in for absent JSON fields so lookups can borrow instead of clone.
static NULL: Value = Value::Null;

/// Read one value from a per-joint channel array.
///
/// Returns `(value, present)`; any structural problem (missing channel,
/// short array, null entry, non-numeric entry) falls back to 0.0 with
/// `present = false` rather than aborting the session.
fn channel_value(source: &Value, key: &str, idx: usize) -> (f64, bool) {
    match source.get(key).and_then(Value::as_array) {
        Some(arr) => match arr.get(idx) {
            Some(v) => match v.as_f64() {
                Some(f) => (f, true),
                None => (0.0, false),
            },
            None => (0.0, false),
        },
        None => (0.0, false),
    }
}

/// Read one joint's (x, y, z) at a frame index. The `present` flag is
/// true only when the x channel held a real value, matching how frame
/// validity is decided.
fn joint_at(joint: &Value, idx: usize) -> (Point3, bool) {
    let (x, present) = channel_value(joint, "x", idx);
    let (y, _) = channel_value(joint, "y", idx);
    let (z, _) = channel_value(joint, "z", idx);
    (Point3::new(x, y, z), present)
}

/// Resolve the dataset's shoulder-key spelling: probe the canonical key
/// first, fall back to the known `sholder` typo.
fn shoulder_keys(skeleton: &Value) -> (&'static str, &'static str) {
    if skeleton.get("shoulder_left").is_some() {
        ("shoulder_left", "shoulder_right")
    } else {
        ("sholder_left", "sholder_right")
    }
}

/// Number of frames, probed from the left then right wrist x channel.
fn frame_count(skeleton: &Value) -> usize {
    for wrist in ["wrist_left", "wrist_right"] {
        if let Some(arr) = skeleton
            .get(wrist)
            .and_then(|j| j.get("x"))
            .and_then(Value::as_array)
        {
            return arr.len();
        }
    }
    0
}

/// Load one DREAM session file into frame records.
///
/// Errors (corrupt JSON, unreadable file, zero usable frames) are returned
/// so batch callers can skip the session with a diagnostic; they never
/// abort a whole batch.
pub fn load_dream_sequence(path: &Path) -> Result<Vec<FrameRecord>, ScreenError> {
    let text = fs::read_to_string(path)?;
    let data: Value = serde_json::from_str(&text)
        .map_err(|e| ScreenError::ParseError(format!("{}: {}", path.display(), e)))?;

    let skeleton = data.get("skeleton").unwrap_or(&NULL);
    let eye = data.get("eye_gaze").unwrap_or(&NULL);
    let head = data.get("head_gaze").unwrap_or(&NULL);
    let frame_rate = data
        .get("frame_rate")
        .and_then(Value::as_f64)
        .unwrap_or(DEFAULT_FRAME_RATE);

    let n_frames = frame_count(skeleton);
    if n_frames == 0 {
        return Err(ScreenError::ParseError(format!(
            "{}: no usable frames",
            path.display()
        )));
    }

    let (ls_key, rs_key) = shoulder_keys(skeleton);

    // Resolve each joint's channel object once, not once per frame.
    let wrist_l = skeleton.get("wrist_left").unwrap_or(&NULL);
    let wrist_r = skeleton.get("wrist_right").unwrap_or(&NULL);
    let elbow_l = skeleton.get("elbow_left").unwrap_or(&NULL);
    let elbow_r = skeleton.get("elbow_right").unwrap_or(&NULL);
    let shoulder_l = skeleton.get(ls_key).unwrap_or(&NULL);
    let shoulder_r = skeleton.get(rs_key).unwrap_or(&NULL);

    let mut sequence = Vec::with_capacity(n_frames);
    for i in 0..n_frames {
        let (left_wrist, v1) = joint_at(wrist_l, i);
        let (right_wrist, v2) = joint_at(wrist_r, i);
        let (left_elbow, v3) = joint_at(elbow_l, i);
        let (right_elbow, v4) = joint_at(elbow_r, i);
        let (left_shoulder, v5) = joint_at(shoulder_l, i);
        let (right_shoulder, v6) = joint_at(shoulder_r, i);

        let valid = v1 && v2 && v3 && v4 && v5 && v6;

        let pose = PoseFrame {
            left_shoulder,
            right_shoulder,
            left_elbow,
            right_elbow,
            left_wrist,
            right_wrist,
            nose: None,
            left_hip: None,
            right_hip: None,
        };

        let (yaw, _) = channel_value(head, "ry", i);
        let (pitch, _) = channel_value(head, "rx", i);
        let (roll, _) = channel_value(head, "rz", i);
        let (gx, _) = channel_value(eye, "rx", i);
        let (gy, _) = channel_value(eye, "ry", i);

        sequence.push(FrameRecord {
            t: i as f64 / frame_rate,
            valid,
            pose: Some(pose),
            head: Some(HeadPose { yaw, pitch, roll }),
            gaze: Some(Gaze { gx, gy, gz: 1.0 }),
        });
    }

    Ok(sequence)
}

/// Discover session files grouped by user directory: subdirectories whose
/// name starts with `user` (case-insensitive), each holding `.json`
/// session files. Users and sessions are returned sorted for
/// reproducible splits.
pub fn discover_user_sessions(root: &Path) -> Result<Vec<(String, Vec<PathBuf>)>, ScreenError> {
    let mut users = Vec::new();

    let mut entries: Vec<PathBuf> = fs::read_dir(root)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();

    for entry in entries {
        let name = match entry.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        if !entry.is_dir() || !name.to_ascii_lowercase().starts_with("user") {
            continue;
        }

        let mut sessions: Vec<PathBuf> = fs::read_dir(&entry)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|x| x == "json").unwrap_or(false))
            .collect();
        sessions.sort();

        if !sessions.is_empty() {
            users.push((name, sessions));
        }
    }

    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kinesia-dream-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn session_json(shoulder_key: &str) -> String {
        let channels = |vals: &str| format!(r#"{{"x": {0}, "y": {0}, "z": {0}}}"#, vals);
        format!(
            r#"{{
                "frame_rate": 25.0,
                "skeleton": {{
                    "wrist_left": {wl},
                    "wrist_right": {wr},
                    "elbow_left": {e},
                    "elbow_right": {e},
                    "{sl}": {e},
                    "{sr}": {e}
                }},
                "head_gaze": {{"rx": [0.1, 0.2, 0.3], "ry": [0.0, 0.1, 0.2], "rz": [0.0, 0.0, 0.0]}},
                "eye_gaze": {{"rx": [0.5, 0.5, 0.5], "ry": [0.2, 0.2, 0.2]}}
            }}"#,
            wl = channels("[0.1, 0.2, 0.3]"),
            wr = channels("[0.4, null, 0.6]"),
            e = channels("[0.0, 0.0, 0.0]"),
            sl = format!("{}_left", shoulder_key),
            sr = format!("{}_right", shoulder_key),
        )
    }

    #[test]
    fn test_load_basic_session() {
        let path = temp_file("s1.json", &session_json("shoulder"));
        let seq = load_dream_sequence(&path).unwrap();

        assert_eq!(seq.len(), 3);
        // Timestamps follow the declared frame rate.
        assert!((seq[1].t - 0.04).abs() < 1e-9);
        // Head yaw comes from head_gaze.ry.
        assert_eq!(seq[0].head.as_ref().unwrap().yaw, 0.0);
        assert_eq!(seq[0].head.as_ref().unwrap().pitch, 0.1);
        // Gaze forward bias.
        assert_eq!(seq[0].gaze.as_ref().unwrap().gz, 1.0);
    }

    #[test]
    fn test_null_value_invalidates_only_its_frame() {
        let path = temp_file("s2.json", &session_json("shoulder"));
        let seq = load_dream_sequence(&path).unwrap();

        // Frame 1 has a null right-wrist x: invalid, value defaulted.
        assert!(seq[0].valid);
        assert!(!seq[1].valid);
        assert!(seq[2].valid);
        assert_eq!(seq[1].pose.as_ref().unwrap().right_wrist.x, 0.0);
    }

    #[test]
    fn test_sholder_typo_fallback() {
        let path = temp_file("s3.json", &session_json("sholder"));
        let seq = load_dream_sequence(&path).unwrap();
        assert_eq!(seq.len(), 3);
        assert!(seq[0].valid);
    }

    #[test]
    fn test_missing_joint_invalidates_frames() {
        let json = r#"{
            "skeleton": {
                "wrist_left": {"x": [0.1, 0.2], "y": [0.0, 0.0], "z": [0.0, 0.0]},
                "wrist_right": {"x": [0.1, 0.2], "y": [0.0, 0.0], "z": [0.0, 0.0]}
            }
        }"#;
        let path = temp_file("s6.json", json);
        let seq = load_dream_sequence(&path).unwrap();

        // Elbows and shoulders are absent entirely; frames load but none
        // can be valid, and the missing joints default to the origin.
        assert_eq!(seq.len(), 2);
        assert!(seq.iter().all(|f| !f.valid));
        assert_eq!(seq[0].pose.as_ref().unwrap().left_elbow.x, 0.0);
    }

    #[test]
    fn test_long_session_loads_in_linear_time() {
        let n = 20_000;
        let vals: Vec<String> = (0..n).map(|i| format!("{:.3}", i as f64 * 0.001)).collect();
        let arr = format!("[{}]", vals.join(","));
        let joint = format!(r#"{{"x": {0}, "y": {0}, "z": {0}}}"#, arr);
        let json = format!(
            r#"{{"skeleton": {{
                "wrist_left": {j}, "wrist_right": {j},
                "elbow_left": {j}, "elbow_right": {j},
                "shoulder_left": {j}, "shoulder_right": {j}
            }}}}"#,
            j = joint,
        );
        let path = temp_file("s7.json", &json);

        let start = std::time::Instant::now();
        let seq = load_dream_sequence(&path).unwrap();
        let elapsed = start.elapsed();

        assert_eq!(seq.len(), n);
        assert!(seq.iter().all(|f| f.valid));
        // Per-frame work must not grow with session length; a generous
        // bound still catches any return to per-frame deep copies.
        assert!(elapsed.as_secs() < 5, "load took {:?}", elapsed);
    }

    #[test]
    fn test_corrupt_json_is_skippable_error() {
        let path = temp_file("s4.json", "{ not json at all");
        let result = load_dream_sequence(&path);
        assert!(matches!(result, Err(ScreenError::ParseError(_))));
    }

    #[test]
    fn test_empty_skeleton_is_error() {
        let path = temp_file("s5.json", r#"{"skeleton": {}}"#);
        assert!(load_dream_sequence(&path).is_err());
    }

    #[test]
    fn test_discover_user_sessions() {
        let root = std::env::temp_dir().join(format!("kinesia-users-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(root.join("user2")).unwrap();
        fs::create_dir_all(root.join("user1")).unwrap();
        fs::create_dir_all(root.join("notes")).unwrap();
        fs::write(root.join("user1/b.json"), "{}").unwrap();
        fs::write(root.join("user1/a.json"), "{}").unwrap();
        fs::write(root.join("user2/c.json"), "{}").unwrap();
        fs::write(root.join("user2/readme.txt"), "x").unwrap();
        fs::write(root.join("notes/d.json"), "{}").unwrap();

        let users = discover_user_sessions(&root).unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].0, "user1");
        assert_eq!(users[0].1.len(), 2);
        // Sessions come back sorted.
        assert!(users[0].1[0].ends_with("a.json"));
        assert_eq!(users[1].1.len(), 1);
    }
}
